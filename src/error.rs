use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    /// A watched key moved between `watch` and `exec`, or retries ran out.
    #[error("conflicting concurrent write on {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not signed in")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Store(#[from] sqlx::Error),

    #[error("could not encode update: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("write timed out")]
    WriteTimeout,

    #[error("session evicted as slow consumer")]
    SlowConsumer,
}

impl Error {
    pub(crate) fn corrupt(key: &str, reason: impl ToString) -> Self {
        Self::Corrupt {
            key: key.to_owned(),
            reason: reason.to_string(),
        }
    }
}
