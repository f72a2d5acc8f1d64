// Pluggable blob storage.
//
// Backends persist opaque payloads addressed by an opaque key. Each
// `Version` records the backend's `storage_type` tag so reads keep
// routing correctly even if a doc class is later pointed elsewhere.

pub mod dummy;
pub mod fs;

use std::collections::HashMap;
use std::sync::Arc;

use limpet_common::{StorageError, TrackedDocument};

pub use dummy::DummyStorage;
pub use fs::FsStorage;

pub trait StorageBackend: Send + Sync {
    /// Short tag recorded on every version written through this backend.
    fn storage_type(&self) -> &'static str;

    /// Persist a payload; the returned key, together with the backend
    /// identity, uniquely addresses the blob.
    fn put(
        &self,
        doc: &TrackedDocument,
        data: &[u8],
        content_type: &str,
    ) -> Result<String, StorageError>;

    /// Retrieve a previously stored payload.
    fn get(&self, storage_key: &str) -> Result<Vec<u8>, StorageError>;
}

/// Name → backend registry, populated once before kernel construction.
#[derive(Clone, Default)]
pub struct StorageRegistry {
    engines: HashMap<String, Arc<dyn StorageBackend>>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, backend: Arc<dyn StorageBackend>) {
        self.engines.insert(name.into(), backend);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StorageBackend>> {
        self.engines.get(name).cloned()
    }

    /// Resolve a backend by its `storage_type` tag (used when reading
    /// back a stored version).
    pub fn by_type(&self, storage_type: &str) -> Option<Arc<dyn StorageBackend>> {
        self.engines.values().find(|backend| backend.storage_type() == storage_type).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.engines.contains_key(name)
    }
}
