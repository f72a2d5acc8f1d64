// Versioning schemes: deciding whether a fetched payload is a new
// version of a document.
//
// Content-hash comparison is the mandated scheme; MD5 is enough here
// because this is a dedup cache, not an integrity store. Schemes are
// resolved by name through a registry so doc classes stay pure data.

use std::collections::HashMap;
use std::sync::Arc;

use md5::{Digest, Md5};

pub trait VersioningScheme: Send + Sync {
    fn name(&self) -> &'static str;

    /// `true` when `new` should be stored as a fresh version.
    fn is_new_version(&self, old: &[u8], new: &[u8]) -> bool;
}

/// Compute the MD5 hash of the given bytes as a lowercase hex string.
pub fn md5_hex(data: &[u8]) -> String {
    let digest = Md5::digest(data);
    hex_encode(&digest)
}

pub struct Md5Versioning;

impl VersioningScheme for Md5Versioning {
    fn name(&self) -> &'static str {
        "md5"
    }

    fn is_new_version(&self, old: &[u8], new: &[u8]) -> bool {
        md5_hex(old) != md5_hex(new)
    }
}

/// Name → scheme registry, populated once at startup.
#[derive(Clone, Default)]
pub struct VersioningRegistry {
    schemes: HashMap<String, Arc<dyn VersioningScheme>>,
}

impl VersioningRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(Md5Versioning));
        registry
    }

    pub fn register(&mut self, scheme: Arc<dyn VersioningScheme>) {
        self.schemes.insert(scheme.name().to_string(), scheme);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn VersioningScheme>> {
        self.schemes.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemes.contains_key(name)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_hex_matches_known_vector() {
        assert_eq!(md5_hex(b"hello"), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn md5_hex_empty_input() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn identical_payloads_are_not_a_new_version() {
        assert!(!Md5Versioning.is_new_version(b"hello!", b"hello!"));
    }

    #[test]
    fn differing_payloads_are_a_new_version() {
        assert!(Md5Versioning.is_new_version(b"hello!", b"hey!"));
    }

    #[test]
    fn registry_resolves_md5_and_rejects_unknown() {
        let registry = VersioningRegistry::with_defaults();
        assert!(registry.contains("md5"));
        assert_eq!(registry.get("md5").unwrap().name(), "md5");
        assert!(registry.get("sha256").is_none());
    }
}
