use std::path::PathBuf;
use std::time::Duration;

use qube_proto::ProtocolError;

#[derive(Debug, thiserror::Error)]
pub enum InceptionError {
    #[error("socket {}: {source}", path.display())]
    Socket {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rpc timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("rpc transport: {0}")]
    Transport(#[from] std::io::Error),

    #[error("rpc protocol: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("unexpected response type 0x{0:02X}")]
    UnexpectedResponse(u8),

    #[error("{0}")]
    Remote(String),
}

pub type Result<T> = std::result::Result<T, InceptionError>;
