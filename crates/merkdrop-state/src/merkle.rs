//! Fixed-depth account tree (off-chain storage).
//!
//! `TREE_DEPTH` levels above the leaves, `TREE_CAPACITY` slots. Only written
//! slots and their ancestors are stored; everything else falls back to the
//! precomputed empty subtree digest for its height.
//!
//! Hash function: BLAKE3 with domain separators from `merkdrop-core`.

use borsh::{BorshDeserialize, BorshSerialize};
use hashbrown::HashMap;

use merkdrop_core::{
    hash32, hash_pair, Digest, DS_TREE_EMPTY, DS_TREE_NODE, TREE_CAPACITY, TREE_DEPTH,
};

use crate::error::StateError;

/// Sibling path from one leaf slot to the root.
///
/// `siblings[h]` is the sibling of the path node at height `h`; bit `h` of
/// `index` says whether the path node is the right (1) or left (0) child.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct MembershipWitness {
    index: u32,
    siblings: Vec<Digest>,
}

impl MembershipWitness {
    /// Build a witness, checking it has the shape of this tree.
    pub fn new(index: u32, siblings: Vec<Digest>) -> Result<Self, StateError> {
        let witness = Self { index, siblings };
        witness.ensure_well_formed()?;
        Ok(witness)
    }

    /// Leaf index this witness opens.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Sibling digests, leaf level first.
    pub fn siblings(&self) -> &[Digest] {
        &self.siblings
    }

    /// Fails unless the path has exactly `TREE_DEPTH` siblings and the index
    /// addresses a real slot. Decoded witnesses skip [`Self::new`], so callers
    /// that accept untrusted witnesses check this.
    pub fn ensure_well_formed(&self) -> Result<(), StateError> {
        if self.siblings.len() != TREE_DEPTH {
            return Err(StateError::MalformedWitness("wrong sibling count"));
        }
        if self.index >= TREE_CAPACITY {
            return Err(StateError::IndexOutOfRange(self.index));
        }
        Ok(())
    }

    /// Root the tree would have with `leaf` at this witness's slot. Pure.
    pub fn recompute_root(&self, leaf: &Digest) -> Digest {
        let mut node = *leaf;
        let mut idx = self.index;
        for sibling in &self.siblings {
            node = if (idx & 1) == 0 {
                hash_pair(DS_TREE_NODE, &node, sibling)
            } else {
                hash_pair(DS_TREE_NODE, sibling, &node)
            };
            idx >>= 1;
        }
        node
    }
}

/// Sparse fixed-depth Merkle tree keyed by slot index.
#[derive(Clone, Debug)]
pub struct MerkleStore {
    /// Written nodes keyed by `(height, index at that height)`; height 0 = leaves.
    nodes: HashMap<(usize, u32), Digest>,
    /// `empty[h]` = root of an all-empty subtree of height `h`.
    empty: [Digest; TREE_DEPTH + 1],
}

impl MerkleStore {
    /// Create a tree with every slot empty.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            empty: empty_hashes(),
        }
    }

    /// Build a tree from `(index, leaf)` pairs.
    pub fn from_leaves<I>(leaves: I) -> Result<Self, StateError>
    where
        I: IntoIterator<Item = (u32, Digest)>,
    {
        let mut store = Self::new();
        for (index, leaf) in leaves {
            store.update(index, leaf)?;
        }
        Ok(store)
    }

    /// Current root.
    pub fn root(&self) -> Digest {
        self.node(TREE_DEPTH, 0)
    }

    /// Digest stored at a slot (the empty leaf if never written).
    pub fn leaf(&self, index: u32) -> Result<Digest, StateError> {
        check_index(index)?;
        Ok(self.node(0, index))
    }

    /// Digest of an unwritten slot.
    pub fn empty_leaf(&self) -> Digest {
        self.empty[0]
    }

    /// Sibling path for `index` against the current root.
    pub fn witness(&self, index: u32) -> Result<MembershipWitness, StateError> {
        check_index(index)?;
        let siblings = (0..TREE_DEPTH)
            .map(|height| self.node(height, (index >> height) ^ 1))
            .collect();
        Ok(MembershipWitness { index, siblings })
    }

    /// Overwrite one slot and refresh its ancestors.
    ///
    /// Only the off-chain owner calls this, after a transition is accepted.
    pub fn update(&mut self, index: u32, leaf: Digest) -> Result<(), StateError> {
        check_index(index)?;
        self.nodes.insert((0, index), leaf);

        let mut idx = index;
        for height in 0..TREE_DEPTH {
            let left = self.node(height, idx & !1);
            let right = self.node(height, idx | 1);
            idx >>= 1;
            self.nodes
                .insert((height + 1, idx), hash_pair(DS_TREE_NODE, &left, &right));
        }
        Ok(())
    }

    fn node(&self, height: usize, idx: u32) -> Digest {
        self.nodes
            .get(&(height, idx))
            .copied()
            .unwrap_or(self.empty[height])
    }
}

impl Default for MerkleStore {
    fn default() -> Self {
        Self::new()
    }
}

fn check_index(index: u32) -> Result<(), StateError> {
    if index >= TREE_CAPACITY {
        return Err(StateError::IndexOutOfRange(index));
    }
    Ok(())
}

/// Empty subtree digests for every height, leaf level first.
fn empty_hashes() -> [Digest; TREE_DEPTH + 1] {
    let mut out = [hash32(DS_TREE_EMPTY, &[]); TREE_DEPTH + 1];
    for height in 1..=TREE_DEPTH {
        out[height] = hash_pair(DS_TREE_NODE, &out[height - 1], &out[height - 1]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use merkdrop_core::Hash32;

    fn leaf(n: u8) -> Digest {
        Hash32([n; 32])
    }

    #[test]
    fn empty_tree_root_is_empty_subtree() {
        let store = MerkleStore::new();
        let w = store.witness(0).expect("witness");
        assert_eq!(w.recompute_root(&store.empty_leaf()), store.root());
    }

    #[test]
    fn witness_recomputes_root_for_every_written_slot() {
        let store =
            MerkleStore::from_leaves([(0, leaf(1)), (1, leaf(2)), (2, leaf(3)), (255, leaf(4))])
                .expect("build");
        for (index, value) in [(0u32, leaf(1)), (1, leaf(2)), (2, leaf(3)), (255, leaf(4))] {
            let w = store.witness(index).expect("witness");
            assert_eq!(w.siblings().len(), TREE_DEPTH);
            assert_eq!(w.recompute_root(&value), store.root(), "slot {index}");
            assert_ne!(w.recompute_root(&leaf(9)), store.root());
        }
    }

    #[test]
    fn witness_is_bound_to_its_index() {
        let store = MerkleStore::from_leaves([(0, leaf(1)), (1, leaf(2))]).expect("build");
        let w0 = store.witness(0).expect("witness");
        assert_ne!(w0.recompute_root(&leaf(2)), store.root());
    }

    #[test]
    fn update_invalidates_old_witnesses() {
        let mut store = MerkleStore::from_leaves([(0, leaf(1)), (5, leaf(2))]).expect("build");
        let stale = store.witness(0).expect("witness");
        store.update(5, leaf(3)).expect("update");
        assert_ne!(stale.recompute_root(&leaf(1)), store.root());
        let fresh = store.witness(0).expect("witness");
        assert_eq!(fresh.recompute_root(&leaf(1)), store.root());
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut store = MerkleStore::new();
        assert!(matches!(
            store.witness(TREE_CAPACITY),
            Err(StateError::IndexOutOfRange(256))
        ));
        assert!(matches!(
            store.update(TREE_CAPACITY, leaf(1)),
            Err(StateError::IndexOutOfRange(256))
        ));
    }

    #[test]
    fn malformed_witness_rejected() {
        assert!(matches!(
            MembershipWitness::new(0, vec![leaf(0); TREE_DEPTH - 1]),
            Err(StateError::MalformedWitness(_))
        ));
        assert!(MembershipWitness::new(3, vec![leaf(0); TREE_DEPTH]).is_ok());
    }
}
