use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GaleError>;

#[derive(Debug, Error)]
pub enum GaleError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("corruption detected: {0}")]
    Corruption(String),
}

impl GaleError {
    /// Startup validation failure. All configuration errors are fatal and
    /// detected before any graph memory is allocated.
    pub fn config(msg: impl Into<String>) -> Self {
        GaleError::Config(msg.into())
    }

    /// A peer sent a message whose size or tag does not match the protocol.
    pub fn protocol(msg: impl Into<String>) -> Self {
        GaleError::Protocol(msg.into())
    }
}
