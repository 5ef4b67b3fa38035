//! Error types for storage and per-ticker updates.
//!
//! Nothing here is retried. A [`StoreError`] surfaces through an
//! [`UpdateError`] for one ticker and ends up in the logs.

/// A storage backend operation failed.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend refused or could not serve the request.
    #[error("{backend} unavailable: {reason}")]
    Unavailable { backend: String, reason: String },

    /// A stored value did not have the expected shape.
    #[error("corrupt value at {path}: {reason}")]
    Corrupt { path: String, reason: String },

    /// Reading or writing a snapshot file failed.
    #[error("snapshot {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A single ticker's update did not complete this tick.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// The canonical read failed, so nothing was written.
    #[error("read of {ticker} from {backend} failed: {source}")]
    Read {
        ticker: String,
        backend: String,
        #[source]
        source: StoreError,
    },

    /// One or more backend writes failed. Writes to other backends stand.
    #[error(
        "{} of {attempted} writes for {ticker} failed: {}",
        .failed.len(),
        describe_failed(.failed)
    )]
    Write {
        ticker: String,
        attempted: usize,
        failed: Vec<(String, StoreError)>,
    },
}

fn describe_failed(failed: &[(String, StoreError)]) -> String {
    failed
        .iter()
        .map(|(backend, e)| format!("{backend}: {e}"))
        .collect::<Vec<_>>()
        .join("; ")
}
