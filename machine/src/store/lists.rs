//! Ordered sequences and unique sets, layered on the typed object store.
//!
//! One type serves both shapes: a `Lists` built with `new_set` enforces
//! byte-equality uniqueness on insert, union and intersection; a plain
//! list keeps duplicates and insertion order. Elements are encoded byte
//! strings — callers with typed elements go through `add_values` /
//! `retrieve_values`, which route through the codec.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{Objects, StoreError};
use crate::codec::Codec;
use crate::hashtree::Hash;

#[derive(Clone, Serialize, Deserialize)]
pub struct Lists {
    unique: bool,
    objects: Objects,
}

impl Lists {
    /// An ordered, duplicate-keeping list collection.
    pub fn new_list(codec: Codec) -> Self {
        Lists {
            unique: false,
            objects: Objects::new(codec),
        }
    }

    /// A unique-membership set collection.
    pub fn new_set(codec: Codec) -> Self {
        Lists {
            unique: true,
            objects: Objects::new(codec),
        }
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    fn load(&self, key: &str) -> Result<Option<Vec<Vec<u8>>>, StoreError> {
        self.objects.retrieve(key)
    }

    fn store(&mut self, key: &str, elements: &Vec<Vec<u8>>) -> Result<(), StoreError> {
        self.objects.save(key, elements)
    }

    /// Append `values` to the list at `key`, creating it if absent.
    ///
    /// For sets, values already present (and duplicates within `values`)
    /// are skipped. Returns the number of elements actually added.
    pub fn add(&mut self, key: &str, values: &[Vec<u8>]) -> Result<usize, StoreError> {
        let mut elements = self.load(key)?.unwrap_or_default();

        let mut added = 0;
        for value in values {
            if self.unique && elements.iter().any(|existing| existing == value) {
                continue;
            }

            elements.push(value.clone());
            added += 1;
        }

        self.store(key, &elements)?;
        Ok(added)
    }

    /// Remove every element byte-equal to one of `values`; returns the
    /// number removed.
    pub fn del(&mut self, key: &str, values: &[Vec<u8>]) -> Result<usize, StoreError> {
        let Some(mut elements) = self.load(key)? else {
            return Ok(0);
        };

        let before = elements.len();
        elements.retain(|existing| !values.iter().any(|v| v == existing));
        let removed = before - elements.len();

        if removed > 0 {
            self.store(key, &elements)?;
        }

        Ok(removed)
    }

    /// A range of the list at `key`, starting at `index`. `amount = None`
    /// reads to the end. Returns `None` when the key does not exist.
    pub fn retrieve(
        &self,
        key: &str,
        index: usize,
        amount: Option<usize>,
    ) -> Result<Option<Vec<Vec<u8>>>, StoreError> {
        let Some(elements) = self.load(key)? else {
            return Ok(None);
        };

        let from = index.min(elements.len());
        let to = match amount {
            Some(n) => (from + n).min(elements.len()),
            None => elements.len(),
        };

        Ok(Some(elements[from..to].to_vec()))
    }

    /// Number of elements at `key` (zero for a missing key).
    pub fn len(&self, key: &str) -> Result<usize, StoreError> {
        Ok(self.load(key)?.map_or(0, |elements| elements.len()))
    }

    /// Merge the elements of all `keys` in order; deduplicated for sets.
    pub fn union(&self, keys: &[&str]) -> Result<Vec<Vec<u8>>, StoreError> {
        let mut out: Vec<Vec<u8>> = Vec::new();
        for key in keys {
            let Some(elements) = self.load(key)? else {
                continue;
            };

            for element in elements {
                if self.unique && out.iter().any(|existing| *existing == element) {
                    continue;
                }
                out.push(element);
            }
        }

        Ok(out)
    }

    /// Union, materialized into `destination`; returns the number of
    /// elements added there.
    pub fn union_store(&mut self, destination: &str, keys: &[&str]) -> Result<usize, StoreError> {
        let merged = self.union(keys)?;
        self.add(destination, &merged)
    }

    /// Elements present in every one of `keys`, in first-key order.
    pub fn inter(&self, keys: &[&str]) -> Result<Vec<Vec<u8>>, StoreError> {
        let Some((first, rest)) = keys.split_first() else {
            return Ok(Vec::new());
        };

        let Some(candidates) = self.load(first)? else {
            return Ok(Vec::new());
        };

        let mut others = Vec::with_capacity(rest.len());
        for key in rest {
            match self.load(key)? {
                Some(elements) => others.push(elements),
                None => return Ok(Vec::new()),
            }
        }

        let mut out: Vec<Vec<u8>> = Vec::new();
        for candidate in candidates {
            if out.iter().any(|existing| *existing == candidate) {
                continue;
            }

            if others.iter().all(|elements| elements.contains(&candidate)) {
                out.push(candidate);
            }
        }

        Ok(out)
    }

    /// Intersection, materialized into `destination`; returns the number
    /// of elements added there.
    pub fn inter_store(&mut self, destination: &str, keys: &[&str]) -> Result<usize, StoreError> {
        let common = self.inter(keys)?;
        self.add(destination, &common)
    }

    /// Keep only the `amount` elements starting at `index`; returns how
    /// many remain.
    pub fn trim(
        &mut self,
        key: &str,
        index: usize,
        amount: Option<usize>,
    ) -> Result<usize, StoreError> {
        let Some(kept) = self.retrieve(key, index, amount)? else {
            return Ok(0);
        };

        self.store(key, &kept)?;
        Ok(kept.len())
    }

    /// Typed append: each value is encoded through the codec first.
    pub fn add_values<T: Serialize>(&mut self, key: &str, values: &[T]) -> Result<usize, StoreError> {
        let mut encoded = Vec::with_capacity(values.len());
        for value in values {
            encoded.push(self.objects.codec().encode(value)?);
        }

        self.add(key, &encoded)
    }

    /// Typed range read; see [`Lists::retrieve`].
    pub fn retrieve_values<T: DeserializeOwned>(
        &self,
        key: &str,
        index: usize,
        amount: Option<usize>,
    ) -> Result<Option<Vec<T>>, StoreError> {
        let Some(elements) = self.retrieve(key, index, amount)? else {
            return Ok(None);
        };

        let mut out = Vec::with_capacity(elements.len());
        for element in &elements {
            out.push(self.objects.codec().decode(element)?);
        }

        Ok(Some(out))
    }

    pub fn exists(&self, keys: &[&str]) -> usize {
        self.objects.exists(keys)
    }

    pub fn delete(&mut self, keys: &[&str]) -> usize {
        self.objects.delete(keys)
    }

    pub fn head(&self) -> Hash {
        self.objects.head()
    }

    pub fn copy(&self) -> Lists {
        self.clone()
    }
}
