//! Role-based access control: named identity groups plus the write-path
//! patterns each group is allowed to touch.
//!
//! Both live in the same underlying set collection: members under the role
//! key itself, enabled patterns under the derived `"<role>:write-access"`
//! key. A path is writable for a role iff at least one enabled pattern
//! matches it in full — and the router additionally requires the signer to
//! be a member of the role.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Lists, StoreError};
use crate::codec::Codec;
use crate::hashtree::Hash;
use crate::identity::Identity;

#[derive(Clone, Serialize, Deserialize)]
pub struct Roles {
    sets: Lists,
}

impl Roles {
    pub fn new(codec: Codec) -> Self {
        Roles {
            sets: Lists::new_set(codec),
        }
    }

    fn write_key(role: &str) -> String {
        format!("{role}:write-access")
    }

    /// Add identities to a role; returns how many were actually added.
    pub fn add(&mut self, role: &str, identities: &[Identity]) -> Result<usize, StoreError> {
        let elements: Vec<Vec<u8>> = identities.iter().map(|id| id.as_bytes().to_vec()).collect();
        self.sets.add(role, &elements)
    }

    /// Remove identities from a role; returns how many were removed.
    pub fn del(&mut self, role: &str, identities: &[Identity]) -> Result<usize, StoreError> {
        let elements: Vec<Vec<u8>> = identities.iter().map(|id| id.as_bytes().to_vec()).collect();
        self.sets.del(role, &elements)
    }

    pub fn is_member(&self, role: &str, identity: &Identity) -> Result<bool, StoreError> {
        let members = self.sets.retrieve(role, 0, None)?.unwrap_or_default();
        Ok(members
            .iter()
            .any(|bytes| bytes.as_slice() == identity.as_bytes()))
    }

    /// All member identities of a role. Entries that fail to parse back
    /// into identities are skipped (they cannot occur through this API).
    pub fn members(&self, role: &str) -> Result<Vec<Identity>, StoreError> {
        let raw = self.sets.retrieve(role, 0, None)?.unwrap_or_default();
        Ok(raw
            .iter()
            .filter_map(|bytes| Identity::from_slice(bytes).ok())
            .collect())
    }

    /// Enable write-path patterns on a role; returns how many were added.
    ///
    /// Patterns that fail to compile are skipped rather than rejected, so
    /// a partially-bad bootstrap list still enables the valid entries.
    pub fn enable_write_access(
        &mut self,
        role: &str,
        patterns: &[&str],
    ) -> Result<usize, StoreError> {
        let mut valid: Vec<Vec<u8>> = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            match Regex::new(pattern) {
                Ok(_) => valid.push(pattern.as_bytes().to_vec()),
                Err(err) => {
                    debug!(role, pattern, %err, "skipping invalid write-access pattern");
                }
            }
        }

        self.sets.add(&Self::write_key(role), &valid)
    }

    /// Disable write-path patterns on a role; returns how many were
    /// removed.
    pub fn disable_write_access(
        &mut self,
        role: &str,
        patterns: &[&str],
    ) -> Result<usize, StoreError> {
        let elements: Vec<Vec<u8>> = patterns.iter().map(|p| p.as_bytes().to_vec()).collect();
        self.sets.del(&Self::write_key(role), &elements)
    }

    /// The subset of `paths` the role may write, deduplicated.
    ///
    /// A path qualifies when at least one enabled pattern matches it in
    /// full. Stored patterns were validated on enable; one that no longer
    /// compiles is skipped with a log rather than failing the check.
    pub fn has_write_access(
        &self,
        role: &str,
        paths: &[&str],
    ) -> Result<Vec<String>, StoreError> {
        let patterns = self
            .sets
            .retrieve(&Self::write_key(role), 0, None)?
            .unwrap_or_default();

        let mut out: Vec<String> = Vec::new();
        for raw in &patterns {
            let Ok(pattern) = std::str::from_utf8(raw) else {
                continue;
            };

            let anchored = format!("^(?:{pattern})$");
            let re = match Regex::new(&anchored) {
                Ok(re) => re,
                Err(err) => {
                    debug!(role, pattern, %err, "stored write-access pattern no longer compiles");
                    continue;
                }
            };

            for path in paths {
                if re.is_match(path) && !out.iter().any(|p| p == path) {
                    out.push((*path).to_string());
                }
            }
        }

        Ok(out)
    }

    pub fn head(&self) -> Hash {
        self.sets.head()
    }

    pub fn copy(&self) -> Roles {
        self.clone()
    }
}
