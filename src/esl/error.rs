use thiserror::Error;

/// Errors returned by the event socket client.
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("event socket I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("command failed: {0}")]
    Command(String),

    #[error("invalid command {0:?}: must not contain line breaks")]
    InvalidCommand(String),

    #[error("dial timed out after {0:?}")]
    DialTimeout(std::time::Duration),

    #[error("connection closed")]
    Disconnected,

    #[error("not connected")]
    NotConnected,
}
