// Content-addressed blob store on the local filesystem.
//
// The key is the payload's MD5 hex digest; blobs live at
// `<root>/<ab>/<cd>/<digest>` so directories stay shallow. Identical
// payloads share one blob, which is what makes the cache deduplicate
// storage for free. Writes go through a temp file + rename so readers
// never observe a partial blob.

use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use limpet_common::{StorageError, TrackedDocument};

use super::StorageBackend;
use crate::versioning::md5_hex;

pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|error| {
            StorageError::new("fs", "init", format!("cannot create `{}`: {error}", root.display()))
        })?;
        Ok(Self { root })
    }

    fn blob_path(&self, op: &'static str, key: &str) -> Result<PathBuf, StorageError> {
        // Keys are 32 lowercase hex chars; anything else is not ours and
        // must not be allowed to escape the root.
        if key.len() != 32 || !key.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
        {
            return Err(StorageError::new("fs", op, format!("malformed blob key `{key}`")));
        }
        Ok(self.root.join(&key[0..2]).join(&key[2..4]).join(key))
    }

    fn write_atomically(&self, path: &Path, data: &[u8]) -> Result<(), StorageError> {
        let parent = path
            .parent()
            .ok_or_else(|| StorageError::new("fs", "put", "blob path has no parent"))?;
        fs::create_dir_all(parent).map_err(|error| {
            StorageError::new(
                "fs",
                "put",
                format!("cannot create `{}`: {error}", parent.display()),
            )
        })?;

        let tmp = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        fs::write(&tmp, data).map_err(|error| {
            StorageError::new("fs", "put", format!("cannot write `{}`: {error}", tmp.display()))
        })?;
        fs::rename(&tmp, path).map_err(|error| {
            let _ = fs::remove_file(&tmp);
            StorageError::new("fs", "put", format!("cannot rename into `{}`: {error}", path.display()))
        })
    }
}

impl StorageBackend for FsStorage {
    fn storage_type(&self) -> &'static str {
        "fs"
    }

    fn put(
        &self,
        _doc: &TrackedDocument,
        data: &[u8],
        _content_type: &str,
    ) -> Result<String, StorageError> {
        let key = md5_hex(data);
        let path = self.blob_path("put", &key)?;

        if !path.exists() {
            self.write_atomically(&path, data)?;
        }
        Ok(key)
    }

    fn get(&self, storage_key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.blob_path("get", storage_key)?;
        fs::read(&path).map_err(|error| {
            StorageError::new(
                "fs",
                "get",
                format!("cannot read blob `{storage_key}`: {error}"),
            )
        })
    }
}
