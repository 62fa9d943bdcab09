/// Tor control protocol client
///
/// Replies are groups of lines `NNN-text` (more follows), `NNN+key=` (a data
/// block terminated by a lone `.`) and a final `NNN text`. Status 650 marks an
/// asynchronous event; events can arrive between a command and its reply, so
/// they are queued and handed out by `next_event`.

use std::collections::VecDeque;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

/// Status code of a successful reply
pub const STATUS_OK: u16 = 250;

/// Status code of an asynchronous event
pub const STATUS_EVENT: u16 = 650;

/// A complete reply or event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub lines: Vec<String>,
}

impl Reply {
    /// Value of the first `key=value` line
    pub fn value(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| {
            line.strip_prefix(key)
                .and_then(|rest| rest.strip_prefix('='))
        })
    }

    /// Text of the final line
    pub fn message(&self) -> &str {
        self.lines.last().map(String::as_str).unwrap_or("")
    }
}

/// Connection to a Tor control port
pub struct ControlConnection<S = TcpStream> {
    stream: BufReader<S>,
    events: VecDeque<Reply>,
}

impl ControlConnection<TcpStream> {
    /// Connect to a control port
    pub async fn connect(addr: SocketAddr) -> Result<Self, ControlError> {
        let stream = TcpStream::connect(addr).await?;
        debug!("Connected to control port {}", addr);
        Ok(Self::new(stream))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> ControlConnection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            events: VecDeque::new(),
        }
    }

    /// Send a command and wait for its reply. Non-250 replies are errors.
    pub async fn command(&mut self, command: &str) -> Result<Reply, ControlError> {
        // Only the keyword: ADD_ONION and AUTHENTICATE carry secrets
        debug!(
            command = command.split_whitespace().next().unwrap_or(""),
            "control command"
        );

        let stream = self.stream.get_mut();
        stream.write_all(command.as_bytes()).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await?;

        loop {
            let reply = self.read_reply().await?;
            if reply.status == STATUS_EVENT {
                self.events.push_back(reply);
                continue;
            }
            if reply.status != STATUS_OK {
                return Err(ControlError::Rejected {
                    status: reply.status,
                    message: reply.message().to_string(),
                });
            }
            return Ok(reply);
        }
    }

    /// Next asynchronous event, queued or read from the wire
    pub async fn next_event(&mut self) -> Result<Reply, ControlError> {
        if let Some(event) = self.events.pop_front() {
            return Ok(event);
        }

        loop {
            let reply = self.read_reply().await?;
            if reply.status == STATUS_EVENT {
                return Ok(reply);
            }
            debug!(status = reply.status, "dropping unsolicited reply");
        }
    }

    async fn read_reply(&mut self) -> Result<Reply, ControlError> {
        let mut lines = Vec::new();

        loop {
            let line = self.read_line().await?;
            let separator = line.as_bytes().get(3).copied();
            if !matches!(separator, Some(b' ' | b'-' | b'+')) {
                return Err(ControlError::Malformed(line));
            }

            let status: u16 = line[..3]
                .parse()
                .map_err(|_| ControlError::Malformed(line.clone()))?;
            let text = line[4..].to_string();

            match separator {
                Some(b' ') => {
                    lines.push(text);
                    return Ok(Reply { status, lines });
                }
                Some(b'-') => lines.push(text),
                _ => {
                    let mut data = text;
                    loop {
                        let body = self.read_line().await?;
                        if body == "." {
                            break;
                        }
                        data.push('\n');
                        // leading dots are escaped by doubling
                        data.push_str(body.strip_prefix('.').unwrap_or(&body));
                    }
                    lines.push(data);
                }
            }
        }
    }

    async fn read_line(&mut self) -> Result<String, ControlError> {
        let mut line = String::new();
        let read = self.stream.read_line(&mut line).await?;
        if read == 0 {
            return Err(ControlError::Closed);
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// Control protocol errors
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Control connection closed")]
    Closed,

    #[error("Malformed control reply: {0:?}")]
    Malformed(String),

    #[error("Command rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
