//! Protocol-wide constants for merkdrop.

/// Length in bytes of a 32-byte digest.
pub const HASH32_LEN: usize = 32;

/// Length in bytes of a SEC1-compressed secp256k1 public key.
pub const PUBLIC_KEY_LEN: usize = 33;

/// Length in bytes of a fixed-size (r || s) ECDSA signature.
pub const SIGNATURE_LEN: usize = 64;

/// Depth of the off-chain account tree.
pub const TREE_DEPTH: usize = 8;

/// Number of leaf slots in the account tree (`2^TREE_DEPTH`).
pub const TREE_CAPACITY: u32 = 1 << TREE_DEPTH;

/// Depth of the nullifier map; one level per bit of a [`crate::Hash32`] key.
pub const MAP_DEPTH: usize = HASH32_LEN * 8;

/// Units transferred to a record owner by a successful claim.
pub const CLAIM_AMOUNT: u64 = 1;

/// Size of the persisted commitment state: two roots plus the total supply.
pub const STATE_LEN: usize = HASH32_LEN + HASH32_LEN + 8;

/// Domain separator for account record digests.
pub const DS_RECORD: &[u8] = b"MERKDROP::RECORD::V0";

/// Domain separator for account tree interior nodes.
pub const DS_TREE_NODE: &[u8] = b"MERKDROP::TREE_NODE::V0";

/// Domain separator for unset account tree slots.
pub const DS_TREE_EMPTY: &[u8] = b"MERKDROP::TREE_EMPTY::V0";

/// Domain separator for nullifier map leaves.
pub const DS_MAP_LEAF: &[u8] = b"MERKDROP::MAP_LEAF::V0";

/// Domain separator for nullifier map interior nodes.
pub const DS_MAP_NODE: &[u8] = b"MERKDROP::MAP_NODE::V0";

/// Domain separator used when deriving a nullifier key from a tree index.
pub const DS_NULLIFIER_KEY: &[u8] = b"MERKDROP::NULLIFIER_KEY::V0";

/// Domain separator for the commitment state hash (ledger precondition).
pub const DS_STATE: &[u8] = b"MERKDROP::STATE::V0";

/// Domain separator prefixed to admin mint authorizations.
pub const DS_MINT: &[u8] = b"MERKDROP::MINT::V0";

/// Domain separator prefixed to admin claim authorizations.
pub const DS_CLAIM: &[u8] = b"MERKDROP::CLAIM::V0";

/// Domain separator prefixed to admin re-anchor authorizations.
pub const DS_SET_COMMITMENT: &[u8] = b"MERKDROP::SET_COMMITMENT::V0";

/// Domain separator prefixed to account-holder transfer authorizations.
pub const DS_SEND: &[u8] = b"MERKDROP::SEND::V0";

/// Domain separator for transition proofs.
pub const DS_PROOF: &[u8] = b"MERKDROP::PROOF::V0";
