use thiserror::Error;

/// Result type for sync engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Failure kinds reported by the sync engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or connection failure before a response was received.
    #[error("transport error: {0}")]
    Transport(String),
    /// The remote answered a read with an empty body.
    #[error("no data returned by remote")]
    NoData,
    /// The payload is not JSON or does not have the collection shape.
    #[error("decode error: {0}")]
    Decode(String),
    /// The wire representation could not be serialized.
    #[error("encode error: {0}")]
    Encode(#[source] serde_json::Error),
    /// The task has no identifier assigned.
    #[error("task has no identifier")]
    MissingIdentifier,
    /// The task lacks a field required to build its wire representation.
    #[error("task cannot be represented: {0}")]
    MissingRepresentation(&'static str),
    /// Committing staged local mutations failed.
    #[error("commit failed: {0}")]
    Commit(#[source] StoreError),
    /// The local repository failed outside of a commit.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Stable numeric code for the C ABI. 0 is reserved for success.
    pub fn code(&self) -> i32 {
        match self {
            SyncError::Transport(_) => 1,
            SyncError::NoData => 2,
            SyncError::Decode(_) => 3,
            SyncError::Encode(_) => 4,
            SyncError::MissingIdentifier => 5,
            SyncError::MissingRepresentation(_) => 6,
            SyncError::Commit(_) => 7,
            SyncError::Store(_) => 8,
        }
    }
}

/// Errors raised by a local task repository.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid task: {0}")]
    Invalid(String),
    #[error("store unavailable: {0}")]
    Unavailable(&'static str),
}
