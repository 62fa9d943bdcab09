/// Default site served by `onionserve`
///
/// Every path answers with the same page: `index.html` from the working
/// directory when present, a short greeting otherwise.

use axum::{
    extract::State,
    response::{Html, IntoResponse, Response},
    Router,
};
use std::path::Path;
use std::sync::Arc;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{debug, info, warn, Level};

pub const INDEX_FILE: &str = "index.html";
pub const WELCOME: &str = "welcome to the tor network!";

#[derive(Clone)]
struct SiteState {
    page: Arc<Page>,
}

enum Page {
    Html(String),
    Text(&'static str),
}

/// Build the router, reading `index` once at startup
pub fn router(index: &Path) -> Router {
    let page = match std::fs::read_to_string(index) {
        Ok(body) => {
            info!("Serving {}", index.display());
            Page::Html(body)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Page::Text(WELCOME),
        Err(e) => {
            warn!("Cannot read {}: {}", index.display(), e);
            Page::Text(WELCOME)
        }
    };

    Router::new()
        .fallback(serve_page)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(SiteState {
            page: Arc::new(page),
        })
}

async fn serve_page(State(state): State<SiteState>) -> Response {
    debug!("Serving page");
    match state.page.as_ref() {
        Page::Html(body) => Html(body.clone()).into_response(),
        Page::Text(text) => (*text).into_response(),
    }
}
