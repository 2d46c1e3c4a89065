//! # Hash Tree — Deterministic Merkle Aggregation
//!
//! The tamper-evident primitive everything else is built on. A `HashTree`
//! is a binary Merkle tree over an ordered list of opaque byte blocks:
//! each block is hashed with SHA-256, the hash list is padded with hashes
//! of empty data up to the next power of two, and adjacent pairs are folded
//! upward (`H(left ‖ right)`) until a single root remains.
//!
//! ## Why this matters
//!
//! The root hash is a pure function of block order and content. Every
//! replica that applies the same transaction history computes the same
//! root — that is the load-bearing correctness property of the whole
//! state machine. Anything that feeds blocks into a tree must therefore
//! iterate in a fixed, deterministic order (see `store::keys`).
//!
//! ## Compact form and canonical ordering
//!
//! `compact()` strips the internal node structure down to `{root, leaf
//! hashes}` for network transmission; the full tree can be rebuilt from
//! it. `order()` solves the inverse problem: given a batch of data blocks
//! received out of order, reorder them to match the leaf order implied by
//! a previously-published root.

use std::fmt;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;

/// Errors produced while building or querying hash trees.
#[derive(Debug, Error)]
pub enum HashTreeError {
    #[error("cannot build a hash tree from an empty block list")]
    EmptyBlockList,

    #[error("invalid hex digest: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("digest must be 32 bytes, got {0}")]
    InvalidDigestLength(usize),

    #[error("leaf count must be a power of two >= 2, got {0}")]
    InvalidLeafCount(usize),

    #[error(
        "{matched} of {input} data blocks matched the tree leaves; \
         the rest have no corresponding leaf"
    )]
    UnorderableData { input: usize, matched: usize },
}

// ---------------------------------------------------------------------------
// Hash
// ---------------------------------------------------------------------------

/// A 32-byte SHA-256 digest.
///
/// Equality-comparable, cheap to copy, printable as lowercase hex. This is
/// the unit of agreement between replicas: two `Hash` values compare equal
/// iff the underlying content was identical.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Hash arbitrary bytes.
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Hash(hasher.finalize().into())
    }

    /// The hash of the empty byte string, used as padding for non-power-of-two
    /// block lists. Padding leaves never collide with real data leaves in
    /// practice because real blocks are non-empty framed values.
    pub fn empty() -> Self {
        Hash::of(b"")
    }

    /// Parse a digest from its lowercase hex form.
    pub fn from_hex(s: &str) -> Result<Self, HashTreeError> {
        let raw = hex::decode(s)?;
        let len = raw.len();
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| HashTreeError::InvalidDigestLength(len))?;
        Ok(Hash(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Hash of the concatenation `left ‖ right` — the parent derivation.
    fn combine(left: &Hash, right: &Hash) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(left.0);
        hasher.update(right.0);
        Hash(hasher.finalize().into())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s).map_err(D::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Leaf / ParentLeaf
// ---------------------------------------------------------------------------

/// A node in the tree: its digest plus, for derived nodes, the pair it was
/// folded from. Navigation is downward-only; the pair owns its children.
#[derive(Clone)]
pub struct Leaf {
    head: Hash,
    parent: Option<Box<ParentLeaf>>,
}

impl Leaf {
    fn new(head: Hash) -> Self {
        Leaf { head, parent: None }
    }

    pub fn head(&self) -> &Hash {
        &self.head
    }

    pub fn parent(&self) -> Option<&ParentLeaf> {
        self.parent.as_deref()
    }

    /// Collect the base-level leaf hashes beneath this node, left to right.
    fn collect_block_leaves<'a>(&'a self, out: &mut Vec<&'a Hash>) {
        match &self.parent {
            Some(pair) => {
                pair.left.collect_block_leaves(out);
                pair.right.collect_block_leaves(out);
            }
            None => out.push(&self.head),
        }
    }
}

/// A `(left, right)` pair; its derived hash is `H(left.head ‖ right.head)`.
#[derive(Clone)]
pub struct ParentLeaf {
    left: Leaf,
    right: Leaf,
}

impl ParentLeaf {
    pub fn left(&self) -> &Leaf {
        &self.left
    }

    pub fn right(&self) -> &Leaf {
        &self.right
    }
}

// ---------------------------------------------------------------------------
// HashTree
// ---------------------------------------------------------------------------

/// A complete Merkle tree: root hash plus the root pair.
///
/// Serializes as its [`Compact`] form — the internal node structure is
/// redundant and is rebuilt on deserialization.
#[derive(Clone)]
pub struct HashTree {
    head: Hash,
    root: ParentLeaf,
}

impl HashTree {
    /// Build a tree from an ordered list of data blocks.
    ///
    /// Fails only on an empty list. A single block is paired with the empty
    /// block; any other non-power-of-two count is padded with hashes of
    /// empty data. Determinism contract: identical ordered block lists
    /// always produce identical roots.
    pub fn build<B: AsRef<[u8]>>(blocks: &[B]) -> Result<Self, HashTreeError> {
        if blocks.is_empty() {
            return Err(HashTreeError::EmptyBlockList);
        }

        Ok(Self::from_nonempty_blocks(blocks))
    }

    /// Build a two-leaf tree over a single value: `[H(value), H("")]`.
    ///
    /// The per-key integrity wrapper in the keyed store uses this shape; it
    /// cannot fail, so it skips the empty-list check.
    pub fn single(value: &[u8]) -> Self {
        Self::fold_level(vec![Leaf::new(Hash::of(value)), Leaf::new(Hash::empty())])
    }

    /// Internal constructor for callers that guarantee a non-empty list.
    pub(crate) fn from_nonempty_blocks<B: AsRef<[u8]>>(blocks: &[B]) -> Self {
        debug_assert!(!blocks.is_empty());

        let mut hashes: Vec<Hash> = blocks.iter().map(|b| Hash::of(b.as_ref())).collect();
        while hashes.len() < 2 || !hashes.len().is_power_of_two() {
            hashes.push(Hash::empty());
        }

        Self::fold_level(hashes.into_iter().map(Leaf::new).collect())
    }

    /// Rebuild a tree from an already-hashed leaf level.
    ///
    /// Used by [`Compact::hash_tree`]; the leaf count must be a power of two
    /// of at least 2, exactly as `build` produces.
    pub fn from_leaf_hashes(leaves: &[Hash]) -> Result<Self, HashTreeError> {
        if leaves.len() < 2 || !leaves.len().is_power_of_two() {
            return Err(HashTreeError::InvalidLeafCount(leaves.len()));
        }

        Ok(Self::fold_level(
            leaves.iter().copied().map(Leaf::new).collect(),
        ))
    }

    /// Fold a power-of-two level of leaves pairwise up to the root.
    fn fold_level(mut level: Vec<Leaf>) -> Self {
        debug_assert!(level.len() >= 2 && level.len().is_power_of_two());

        while level.len() > 2 {
            let mut next = Vec::with_capacity(level.len() / 2);
            let mut nodes = level.into_iter();
            while let (Some(left), Some(right)) = (nodes.next(), nodes.next()) {
                let head = Hash::combine(&left.head, &right.head);
                next.push(Leaf {
                    head,
                    parent: Some(Box::new(ParentLeaf { left, right })),
                });
            }
            level = next;
        }

        let mut nodes = level.into_iter();
        match (nodes.next(), nodes.next()) {
            (Some(left), Some(right)) => {
                let head = Hash::combine(&left.head, &right.head);
                HashTree {
                    head,
                    root: ParentLeaf { left, right },
                }
            }
            // Unreachable by the debug_assert above; keeps the fold total.
            _ => HashTree::single(b""),
        }
    }

    /// The root hash every replica must agree on.
    pub fn head(&self) -> &Hash {
        &self.head
    }

    pub fn root(&self) -> &ParentLeaf {
        &self.root
    }

    /// Padded leaf count — always a power of two.
    pub fn length(&self) -> usize {
        self.leaves().len()
    }

    /// Number of pairing levels plus one: `log2(length) + 1`.
    pub fn height(&self) -> usize {
        self.length().trailing_zeros() as usize + 1
    }

    /// The base-level leaf hashes in canonical (left-to-right) order.
    pub fn leaves(&self) -> Vec<&Hash> {
        let mut out = Vec::new();
        self.root.left.collect_block_leaves(&mut out);
        self.root.right.collect_block_leaves(&mut out);
        out
    }

    /// Strip the tree down to a transmittable `{root, leaf hashes}` summary.
    pub fn compact(&self) -> Compact {
        Compact {
            head: self.head,
            leaves: self.leaves().into_iter().copied().collect(),
        }
    }

    /// Reorder a permuted data batch to match this tree's canonical leaf
    /// order.
    ///
    /// Each element is hashed and looked up against the leaves; padding
    /// leaves never match real data and are skipped. Fails if any element
    /// has no matching leaf.
    pub fn order(&self, data: &[Vec<u8>]) -> Result<Vec<Vec<u8>>, HashTreeError> {
        let mut by_hash: HashMap<Hash, &Vec<u8>> = HashMap::with_capacity(data.len());
        for block in data {
            by_hash.insert(Hash::of(block), block);
        }

        let mut out = Vec::with_capacity(data.len());
        for leaf in self.leaves() {
            if let Some(block) = by_hash.get(leaf) {
                out.push((*block).clone());
            }
        }

        if out.len() != data.len() {
            return Err(HashTreeError::UnorderableData {
                input: data.len(),
                matched: out.len(),
            });
        }

        Ok(out)
    }
}

impl fmt::Debug for HashTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashTree")
            .field("head", &self.head)
            .field("length", &self.length())
            .finish()
    }
}

impl PartialEq for HashTree {
    fn eq(&self, other: &Self) -> bool {
        self.head == other.head
    }
}

impl Eq for HashTree {}

impl Serialize for HashTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.compact().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for HashTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let compact = Compact::deserialize(deserializer)?;
        compact.hash_tree().map_err(D::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Compact
// ---------------------------------------------------------------------------

/// A structure-free summary of a tree: the root plus the ordered leaf
/// hashes. This is what travels over the wire; internal nodes are derivable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compact {
    head: Hash,
    leaves: Vec<Hash>,
}

impl Compact {
    pub fn head(&self) -> &Hash {
        &self.head
    }

    pub fn leaves(&self) -> &[Hash] {
        &self.leaves
    }

    pub fn length(&self) -> usize {
        self.leaves.len()
    }

    /// Rebuild the full tree from the leaf hashes. The root is recomputed
    /// from scratch, so a tampered `head` field cannot survive the round
    /// trip.
    pub fn hash_tree(&self) -> Result<HashTree, HashTreeError> {
        HashTree::from_leaf_hashes(&self.leaves)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks(n: usize) -> Vec<Vec<u8>> {
        (0..n).map(|i| format!("block-{i}").into_bytes()).collect()
    }

    #[test]
    fn build_rejects_empty_block_list() {
        let empty: Vec<Vec<u8>> = vec![];
        assert!(matches!(
            HashTree::build(&empty),
            Err(HashTreeError::EmptyBlockList)
        ));
    }

    #[test]
    fn build_is_deterministic() {
        let data = blocks(5);
        let a = HashTree::build(&data).unwrap();
        let b = HashTree::build(&data).unwrap();
        assert_eq!(a.head(), b.head());
    }

    #[test]
    fn order_matters() {
        let a = HashTree::build(&[b"first".to_vec(), b"second".to_vec()]).unwrap();
        let b = HashTree::build(&[b"second".to_vec(), b"first".to_vec()]).unwrap();
        assert_ne!(a.head(), b.head());
    }

    #[test]
    fn length_is_next_power_of_two() {
        for (input, expected) in [(1, 2), (2, 2), (3, 4), (4, 4), (5, 8), (9, 16)] {
            let tree = HashTree::build(&blocks(input)).unwrap();
            assert_eq!(tree.length(), expected, "input count {input}");
        }
    }

    #[test]
    fn height_is_log2_plus_one() {
        for (input, expected) in [(2, 2), (4, 3), (8, 4), (16, 5)] {
            let tree = HashTree::build(&blocks(input)).unwrap();
            assert_eq!(tree.height(), expected, "input count {input}");
        }
    }

    #[test]
    fn single_block_padded_with_empty() {
        let tree = HashTree::build(&[b"only".to_vec()]).unwrap();
        assert_eq!(tree.length(), 2);
        let leaves = tree.leaves();
        assert_eq!(*leaves[0], Hash::of(b"only"));
        assert_eq!(*leaves[1], Hash::empty());
    }

    #[test]
    fn single_matches_build() {
        let via_build = HashTree::build(&[b"value".to_vec()]).unwrap();
        let via_single = HashTree::single(b"value");
        assert_eq!(via_build.head(), via_single.head());
    }

    #[test]
    fn root_is_hash_of_children() {
        let tree = HashTree::build(&[b"left".to_vec(), b"right".to_vec()]).unwrap();
        let expected = Hash::combine(&Hash::of(b"left"), &Hash::of(b"right"));
        assert_eq!(*tree.head(), expected);
    }

    #[test]
    fn compact_preserves_leaf_order_and_head() {
        let tree = HashTree::build(&blocks(6)).unwrap();
        let compact = tree.compact();
        assert_eq!(compact.head(), tree.head());
        assert_eq!(compact.length(), tree.length());

        let rebuilt = compact.hash_tree().unwrap();
        assert_eq!(rebuilt.head(), tree.head());
    }

    #[test]
    fn compact_rejects_bad_leaf_counts() {
        assert!(HashTree::from_leaf_hashes(&[Hash::of(b"a")]).is_err());
        assert!(
            HashTree::from_leaf_hashes(&[Hash::of(b"a"), Hash::of(b"b"), Hash::of(b"c")]).is_err()
        );
    }

    #[test]
    fn order_restores_canonical_order() {
        let data = blocks(5);
        let tree = HashTree::build(&data).unwrap();

        // A reversed batch comes back in the original order.
        let mut shuffled = data.clone();
        shuffled.reverse();
        let ordered = tree.order(&shuffled).unwrap();
        assert_eq!(ordered, data);
    }

    #[test]
    fn order_rejects_foreign_blocks() {
        let data = blocks(4);
        let tree = HashTree::build(&data).unwrap();

        let mut tampered = data.clone();
        tampered[2] = b"not-in-the-tree".to_vec();
        assert!(matches!(
            tree.order(&tampered),
            Err(HashTreeError::UnorderableData { input: 4, .. })
        ));
    }

    #[test]
    fn order_skips_padding_leaves() {
        // 3 blocks pad to 4 leaves; the padding leaf must not leak into the
        // ordered output.
        let data = blocks(3);
        let tree = HashTree::build(&data).unwrap();
        let ordered = tree.order(&data).unwrap();
        assert_eq!(ordered.len(), 3);
        assert_eq!(ordered, data);
    }

    #[test]
    fn hash_hex_round_trip() {
        let h = Hash::of(b"round trip");
        let parsed = Hash::from_hex(&h.to_hex()).unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn hash_rejects_short_digests() {
        assert!(matches!(
            Hash::from_hex("abcd"),
            Err(HashTreeError::InvalidDigestLength(2))
        ));
        assert!(Hash::from_hex("not hex").is_err());
    }

    #[test]
    fn serde_round_trip_via_compact() {
        let tree = HashTree::build(&blocks(4)).unwrap();
        let encoded = serde_json::to_string(&tree).unwrap();
        let decoded: HashTree = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.head(), tree.head());
        assert_eq!(decoded.length(), tree.length());
    }
}
