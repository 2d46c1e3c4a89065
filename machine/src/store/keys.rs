//! The keyed store: unique string keys mapping to opaque byte values.
//!
//! Each value is wrapped in a [`StoredInstance`] carrying its own
//! single-block hash tree, so any single entry can be integrity-checked
//! without touching the rest. The aggregate `head()` root is rebuilt
//! lazily — mutations only invalidate a cache — by folding `(key, value)`
//! pairs in lexicographic key order into one tree.

use std::cell::RefCell;
use std::collections::BTreeMap;

use regex::Regex;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use super::StoreError;
use crate::hashtree::{Hash, HashTree};

/// A stored value plus its single-block integrity tree.
#[derive(Clone)]
pub struct StoredInstance {
    data: Vec<u8>,
    tree: HashTree,
}

impl StoredInstance {
    fn new(data: Vec<u8>) -> Self {
        let tree = HashTree::single(&data);
        StoredInstance { data, tree }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn tree(&self) -> &HashTree {
        &self.tree
    }
}

/// The generic key-value store with per-key and aggregate Merkle roots.
///
/// Iteration order is the consensus-safety linchpin: entries live in a
/// `BTreeMap` so the aggregate root folds keys in lexicographic order on
/// every replica, regardless of insertion history.
#[derive(Clone)]
pub struct Keys {
    data: BTreeMap<String, StoredInstance>,
    head: RefCell<Option<Hash>>,
}

impl Keys {
    pub fn new() -> Self {
        Keys {
            data: BTreeMap::new(),
            head: RefCell::new(None),
        }
    }

    /// Store `value` at `key`, replacing any previous value.
    pub fn save(&mut self, key: &str, value: impl Into<Vec<u8>>) {
        self.data.insert(key.to_string(), StoredInstance::new(value.into()));
        self.head.replace(None);
    }

    /// The value at `key`, if present.
    pub fn retrieve(&self, key: &str) -> Option<&[u8]> {
        self.data.get(key).map(|ins| ins.data())
    }

    /// How many of the given keys exist.
    pub fn exists(&self, keys: &[&str]) -> usize {
        keys.iter().filter(|k| self.data.contains_key(**k)).count()
    }

    /// Delete the given keys; returns how many were actually removed.
    pub fn delete(&mut self, keys: &[&str]) -> usize {
        let mut removed = 0;
        for key in keys {
            if self.data.remove(*key).is_some() {
                removed += 1;
            }
        }

        if removed > 0 {
            self.head.replace(None);
        }

        removed
    }

    /// All keys matching `pattern`, sorted.
    pub fn search(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let re = Regex::new(pattern).map_err(|source| StoreError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;

        // BTreeMap iteration is already sorted.
        Ok(self
            .data
            .keys()
            .filter(|k| re.is_match(k))
            .cloned()
            .collect())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The integrity tree of the single entry at `key`.
    pub fn hash_tree(&self, key: &str) -> Option<&HashTree> {
        self.data.get(key).map(|ins| ins.tree())
    }

    /// The aggregate root over all entries.
    ///
    /// Recomputed only when dirty. The fold starts from a fixed `"root"`
    /// block so an empty store still has a well-defined head, then appends
    /// `key` and `value` blocks in lexicographic key order.
    pub fn head(&self) -> Hash {
        if let Some(cached) = *self.head.borrow() {
            return cached;
        }

        let mut blocks: Vec<Vec<u8>> = Vec::with_capacity(1 + self.data.len() * 2);
        blocks.push(b"root".to_vec());
        for (key, instance) in &self.data {
            blocks.push(key.clone().into_bytes());
            blocks.push(instance.data.clone());
        }

        let head = *HashTree::from_nonempty_blocks(&blocks).head();
        self.head.replace(Some(head));
        head
    }

    /// Deep-clone every entry; the copy shares no storage with the
    /// original.
    pub fn copy(&self) -> Keys {
        self.clone()
    }
}

impl Default for Keys {
    fn default() -> Self {
        Self::new()
    }
}

// The integrity trees are derivable from the values, so only the raw
// entries hit the wire; trees are rebuilt on deserialization.
impl Serialize for Keys {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.data.iter().map(|(k, ins)| (k, &ins.data)))
    }
}

impl<'de> Deserialize<'de> for Keys {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, Vec<u8>>::deserialize(deserializer)?;
        let data = raw
            .into_iter()
            .map(|(k, v)| (k, StoredInstance::new(v)))
            .collect();
        Ok(Keys {
            data,
            head: RefCell::new(None),
        })
    }
}
