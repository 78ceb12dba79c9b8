use thiserror::Error;

#[derive(Debug, Error)]
pub enum RasError {
    #[error("{operation} {url} failed: {source}")]
    Transport {
        operation: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{operation} {url} returned unexpected status {status}: {body}")]
    UnexpectedStatus {
        operation: String,
        url: String,
        status: u16,
        body: String,
    },

    /// A conflicting update that is worth trying again after a back-off.
    #[error("clashing update on {0}")]
    UpdateClash(String),

    #[error("{what} failed due to conflicts, attempted {attempts} times")]
    RetriesExhausted { what: String, attempts: u32 },

    #[error("{database} document {id} has been updated by another engine")]
    OwnershipConflict { database: String, id: String },

    #[error("not found - {0}")]
    NotFound(String),

    #[error("invalid response from {url}: {reason}")]
    MalformedResponse { url: String, reason: String },

    #[error("invalid store version {0}")]
    InvalidVersion(String),

    #[error("store version {actual} is below minimum {minimum}")]
    VersionTooLow { actual: String, minimum: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("run store has been aborted")]
    Aborted,

    #[error("run store is closed")]
    Closed,

    #[error("artifact file system is read only")]
    ReadOnly,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RasError {
    pub fn malformed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        RasError::MalformedResponse {
            url: url.into(),
            reason: reason.into(),
        }
    }
}
