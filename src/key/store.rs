//! In-memory key manager.
//!
//! The store is handed to an encryption context at construction and
//! consulted by the key-info resolver; there is no process-wide registry.

use hashbrown::HashMap;

use crate::key::{Key, KeyRequirement};

/// Named key storage with requirement-aware lookup.
#[derive(Default)]
pub struct KeyStore {
    keys: HashMap<String, Key>,
}

impl KeyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key under its own name. A key without a name is rejected by
    /// construction of the map, so `insert` takes the name from the key.
    pub fn insert(&mut self, key: Key) {
        if let Some(name) = key.name() {
            self.keys.insert(name.to_owned(), key);
        }
    }

    /// Looks up a key by name, honoring the requirement. Returns `None`
    /// when the name is unknown or the stored key does not satisfy the
    /// requirement.
    #[must_use]
    pub fn find(&self, name: &str, requirement: &KeyRequirement) -> Option<&Key> {
        self.keys.get(name).filter(|key| key.matches(requirement))
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyType;
    use crate::types::Operation;

    #[test]
    fn test_find_by_name() {
        let mut store = KeyStore::new();
        store.insert(Key::symmetric("k1", &[0u8; 16]));

        assert!(store.find("k1", &KeyRequirement::any()).is_some());
        assert!(store.find("k2", &KeyRequirement::any()).is_none());
    }

    #[test]
    fn test_find_honors_requirement() {
        let mut store = KeyStore::new();
        store.insert(Key::symmetric("k1", &[0u8; 16]));

        let wants_256 = KeyRequirement { key_type: KeyType::SYMMETRIC, bits: Some(256), usage: Operation::Encrypt };
        assert!(store.find("k1", &wants_256).is_none());

        let wants_128 = KeyRequirement { key_type: KeyType::SYMMETRIC, bits: Some(128), usage: Operation::Encrypt };
        assert!(store.find("k1", &wants_128).is_some());
    }

    #[test]
    fn test_insert_replaces_same_name() {
        let mut store = KeyStore::new();
        store.insert(Key::symmetric("k1", &[0u8; 16]));
        store.insert(Key::symmetric("k1", &[0u8; 32]));

        assert_eq!(store.len(), 1);
        assert_eq!(store.find("k1", &KeyRequirement::any()).unwrap().bits(), 256);
    }
}
