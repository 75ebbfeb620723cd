use std::io;
use thiserror::Error;

/// Main error type for the context layer
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP parsing error: {0}")]
    HttpParse(String),

    #[error("Request body exceeds the maximum size of {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("Multipart error: {0}")]
    Multipart(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ServerError {
    /// Unwrap an I/O error produced by a size-limited body back into its typed form
    pub fn from_body_io(err: io::Error) -> Self {
        let limit = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<ServerError>())
            .and_then(|inner| match inner {
                ServerError::PayloadTooLarge { limit } => Some(*limit),
                _ => None,
            });
        match limit {
            Some(limit) => ServerError::PayloadTooLarge { limit },
            None => ServerError::Io(err),
        }
    }
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Whether an I/O failure is the peer going away rather than a real fault.
pub fn connection_lost(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => true,
        _ => {
            let message = err.to_string().to_lowercase();
            message.contains("reset by peer") || message.contains("broken pipe")
        }
    }
}
