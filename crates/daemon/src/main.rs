/// onionserve - serve a website as a Tor onion service
///
/// By default the service key is read from `onion.pk` (created on first run),
/// Tor is started in a throwaway data directory and the site is published on
/// port 80 of the derived `.onion` address. `--dev` serves locally instead.

use anyhow::Result;
use std::path::Path;
use tracing::{error, info, Level};

use onionserve_common::ServiceConfig;
use onionserve_daemon::cli::{self, Command, Options};
use onionserve_daemon::{server, shutdown_signal, site, Lifecycle};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let options = match cli::parse(&args) {
        Ok(Command::Help) => {
            cli::print_help();
            return Ok(());
        }
        Ok(Command::Version) => {
            println!("onionserve v{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Ok(Command::Serve(options)) => options,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("Run with 'help' to see available options");
            std::process::exit(2);
        }
    };

    let config = options.apply(load_config(&options)?);

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(if config.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .init();

    info!("Starting onionserve v{}", env!("CARGO_PKG_VERSION"));
    info!("Mode: {:?}", config.mode);

    let app = site::router(Path::new(site::INDEX_FILE));
    let served = match server::from_config(&config, app).await {
        Ok(server) => Lifecycle::new(server).run(shutdown_signal()).await,
        Err(e) => Err(e),
    };

    if let Err(e) = &served {
        error!("{:#}", e);
    } else {
        info!("Stopped");
    }
    served
}

/// Settings from `--config`, or defaults. A missing file is created with the
/// defaults so it can be edited for the next run.
fn load_config(options: &Options) -> Result<ServiceConfig> {
    let Some(path) = options.config.as_ref() else {
        return Ok(ServiceConfig::default());
    };

    if path.exists() {
        return Ok(ServiceConfig::from_file(path)?);
    }

    let config = ServiceConfig::default();
    save_default(&config, path);
    Ok(config)
}

fn save_default(config: &ServiceConfig, path: &Path) {
    // Logging is not up yet
    match config.to_file(path) {
        Ok(()) => eprintln!("Saved default configuration to {}", path.display()),
        Err(e) => eprintln!("Failed to save default config: {}", e),
    }
}
