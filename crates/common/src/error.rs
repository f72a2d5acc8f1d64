// Error surface of the tracking kernel.
//
// Typed variants cover caller mistakes (unknown class, conflicting
// track) and infrastructure failures (storage, metadata store). Fetch
// failures are NOT here: they are recorded on the document and drive
// the backoff state machine instead of propagating.

use thiserror::Error;

/// Failure inside a storage backend `put`/`get`.
#[derive(Debug, Error)]
#[error("storage backend `{backend}` {op} failed: {message}")]
pub struct StorageError {
    pub backend: &'static str,
    pub op: &'static str,
    pub message: String,
}

impl StorageError {
    pub fn new(backend: &'static str, op: &'static str, message: impl ToString) -> Self {
        Self { backend, op, message: message.to_string() }
    }
}

/// Errors surfaced synchronously by kernel operations.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("unregistered doc class `{0}`")]
    UnknownDocClass(String),

    #[error("unregistered storage engine `{0}`")]
    UnknownStorageEngine(String),

    #[error("unknown versioning scheme `{0}`")]
    UnknownVersioning(String),

    #[error("unknown text extractor `{0}`")]
    UnknownExtractor(String),

    #[error("doc class `{0}` has no text extractor")]
    NoExtractor(String),

    #[error(
        "`{id}` already tracked with different identity \
         (tracked: {existing_url} [{existing_class}], new: {url} [{doc_class}])"
    )]
    TrackingConflict {
        id: String,
        existing_url: String,
        existing_class: String,
        url: String,
        doc_class: String,
    },

    #[error("document `{0}` has no stored versions")]
    NoVersions(String),

    #[error("document `{0}` is not tracked")]
    UnknownDocument(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Db(#[from] anyhow::Error),
}

pub type KernelResult<T> = Result<T, KernelError>;
