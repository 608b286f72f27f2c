use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The objective is not in a stage where the command applies.
    #[error("{0}")]
    InvalidState(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Caller supplied data that fails a domain rule.
    #[error("{0}")]
    Validation(String),

    /// The generator call itself failed (network, provider error, missing key).
    #[error("generator failed: {0}")]
    Generator(String),

    /// The generator answered, but not in the expected shape.
    #[error("invalid generator response at {path}: {message}")]
    InvalidResponse { path: String, message: String },

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn invalid_response(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidResponse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// IPC error code reported to the host.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidState(_) => "invalid_state",
            Error::NotFound(_) => "not_found",
            Error::Validation(_) => "bad_params",
            Error::Generator(_) => "ai_failed",
            Error::InvalidResponse { .. } => "ai_invalid_response",
            Error::Db(_) | Error::Json(_) => "db_query_failed",
            Error::Io(_) => "io_failed",
        }
    }
}
