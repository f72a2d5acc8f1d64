// In-memory storage backend. Should NOT be used outside of testing:
// blobs vanish with the process.
//
// Keys combine the document id with the payload hash so distinct
// versions of one document stay individually addressable.

use std::collections::HashMap;
use std::sync::Mutex;

use limpet_common::{StorageError, TrackedDocument};

use super::StorageBackend;
use crate::versioning::md5_hex;

#[derive(Default)]
pub struct DummyStorage {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl DummyStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for DummyStorage {
    fn storage_type(&self) -> &'static str {
        "dummy"
    }

    fn put(
        &self,
        doc: &TrackedDocument,
        data: &[u8],
        _content_type: &str,
    ) -> Result<String, StorageError> {
        let key = format!("{}:{}", doc.id, md5_hex(data));
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| StorageError::new("dummy", "put", "blob map lock poisoned"))?;
        blobs.insert(key.clone(), data.to_vec());
        Ok(key)
    }

    fn get(&self, storage_key: &str) -> Result<Vec<u8>, StorageError> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| StorageError::new("dummy", "get", "blob map lock poisoned"))?;
        blobs
            .get(storage_key)
            .cloned()
            .ok_or_else(|| StorageError::new("dummy", "get", format!("no blob `{storage_key}`")))
    }
}
