//! Nullifier map: a sparse Merkle map `key -> {0, 1}` recording claims.
//!
//! Keys are 256-bit digests bound to a tree index, so the map has one level
//! per key bit. Unset keys read as [`ClaimFlag::Unclaimed`]; the leaf digest of
//! an unclaimed key is the empty leaf, so the empty-map root is well defined.
//!
//! Only claimed keys are stored. Roots and witnesses are computed by
//! partitioning that set level by level, which is cheap for allowlists of a
//! few thousand entries.

use borsh::{BorshDeserialize, BorshSerialize};
use hashbrown::HashSet;

use merkdrop_core::{
    hash32, hash_pair, Digest, Hash32, DS_MAP_LEAF, DS_MAP_NODE, DS_NULLIFIER_KEY, MAP_DEPTH,
};

use crate::error::StateError;

/// Map key bound to one tree index.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, BorshSerialize, BorshDeserialize)]
pub struct NullifierKey(pub Hash32);

impl NullifierKey {
    /// The only key a claim for tree slot `index` may flip.
    pub fn for_index(index: u32) -> Self {
        Self(hash32(DS_NULLIFIER_KEY, &index.to_le_bytes()))
    }

    /// Bit `height` of the key, little-endian: selects right (true) or left
    /// at that height.
    fn bit(&self, height: usize) -> bool {
        let byte = self.0.as_bytes()[height / 8];
        (byte >> (height % 8)) & 1 == 1
    }
}

/// Value held at a key.
#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub enum ClaimFlag {
    /// 0: not yet claimed.
    Unclaimed,
    /// 1: claimed.
    Claimed,
}

impl ClaimFlag {
    fn leaf_digest(self) -> Digest {
        match self {
            ClaimFlag::Unclaimed => hash32(DS_MAP_LEAF, &[0]),
            ClaimFlag::Claimed => hash32(DS_MAP_LEAF, &[1]),
        }
    }
}

/// Sibling path for one key, leaf level first.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct MapWitness {
    key: NullifierKey,
    siblings: Vec<Digest>,
}

impl MapWitness {
    /// Key this witness is anchored at.
    pub fn key(&self) -> NullifierKey {
        self.key
    }

    /// Whether the path has one sibling per key bit.
    pub fn is_well_formed(&self) -> bool {
        self.siblings.len() == MAP_DEPTH
    }

    /// Root the whole map would have if the anchored key held `assumed`,
    /// with every other key fixed by the embedded siblings. Pure.
    ///
    /// Calling this with both flags gives the before/after roots of a
    /// single-bit flip at the key.
    pub fn compute_root_and_key(&self, assumed: ClaimFlag) -> (Digest, NullifierKey) {
        let mut node = assumed.leaf_digest();
        for (height, sibling) in self.siblings.iter().enumerate() {
            node = if self.key.bit(height) {
                hash_pair(DS_MAP_NODE, sibling, &node)
            } else {
                hash_pair(DS_MAP_NODE, &node, sibling)
            };
        }
        (node, self.key)
    }
}

/// Off-chain copy of the claimed-key set with Merkle map commitments.
#[derive(Clone, Debug)]
pub struct NullifierMap {
    claimed: HashSet<NullifierKey>,
    /// `empty[h]` = root of an all-unclaimed subtree of height `h`.
    empty: Vec<Digest>,
}

impl NullifierMap {
    /// Create an empty map (every key unclaimed).
    pub fn new() -> Self {
        Self {
            claimed: HashSet::new(),
            empty: empty_hashes(),
        }
    }

    /// Root of the map with no key claimed.
    pub fn empty_root() -> Digest {
        empty_hashes()[MAP_DEPTH]
    }

    /// Current root.
    pub fn root(&self) -> Digest {
        let keys: Vec<NullifierKey> = self.claimed.iter().copied().collect();
        self.subtree_root(&keys, MAP_DEPTH)
    }

    /// Current value at `key`.
    pub fn get(&self, key: &NullifierKey) -> ClaimFlag {
        if self.claimed.contains(key) {
            ClaimFlag::Claimed
        } else {
            ClaimFlag::Unclaimed
        }
    }

    /// Set the value at `key`.
    ///
    /// Returns `true` if the stored value changed.
    pub fn set(&mut self, key: NullifierKey, flag: ClaimFlag) -> bool {
        match flag {
            ClaimFlag::Claimed => self.claimed.insert(key),
            ClaimFlag::Unclaimed => self.claimed.remove(&key),
        }
    }

    /// Number of claimed keys.
    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    /// Whether no key is claimed.
    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }

    /// Witness for `key` against the current root.
    pub fn witness(&self, key: NullifierKey) -> MapWitness {
        let mut siblings = vec![Hash32::zero(); MAP_DEPTH];
        let mut on_path: Vec<NullifierKey> = self.claimed.iter().copied().collect();

        // Walk root to leaf; at each level keep the side holding `key`.
        for height in (0..MAP_DEPTH).rev() {
            let (right, left): (Vec<_>, Vec<_>) =
                on_path.into_iter().partition(|k| k.bit(height));
            let (path_side, other_side) = if key.bit(height) {
                (right, left)
            } else {
                (left, right)
            };
            siblings[height] = self.subtree_root(&other_side, height);
            on_path = path_side;
        }

        MapWitness { key, siblings }
    }

    /// Root of the subtree of height `height` whose claimed keys are `keys`.
    fn subtree_root(&self, keys: &[NullifierKey], height: usize) -> Digest {
        if keys.is_empty() {
            return self.empty[height];
        }
        if height == 0 {
            return ClaimFlag::Claimed.leaf_digest();
        }
        let child = height - 1;
        let (right, left): (Vec<_>, Vec<_>) = keys.iter().copied().partition(|k| k.bit(child));
        hash_pair(
            DS_MAP_NODE,
            &self.subtree_root(&left, child),
            &self.subtree_root(&right, child),
        )
    }
}

impl Default for NullifierMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve the witness for a claim on slot `index`, failing if the witness is
/// anchored elsewhere.
pub fn expect_key(witness: &MapWitness, index: u32) -> Result<NullifierKey, StateError> {
    let expected = NullifierKey::for_index(index);
    if witness.key() != expected {
        return Err(StateError::KeyMismatch);
    }
    Ok(expected)
}

fn empty_hashes() -> Vec<Digest> {
    let mut out = Vec::with_capacity(MAP_DEPTH + 1);
    let mut node = ClaimFlag::Unclaimed.leaf_digest();
    out.push(node);
    for _ in 0..MAP_DEPTH {
        node = hash_pair(DS_MAP_NODE, &node, &node);
        out.push(node);
    }
    out
}
