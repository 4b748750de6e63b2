//! Account records stored as tree leaves.

use borsh::{BorshDeserialize, BorshSerialize};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use merkdrop_core::{hash32, Digest, PublicKeyBytes, DS_RECORD, PUBLIC_KEY_LEN};

use crate::error::StateError;

/// Leaf payload: an allowlisted owner and its point counter.
///
/// A record is immutable once hashed. Changing the counter yields a new record
/// with a new digest, which needs a tree update to become visible.
#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HashedRecord {
    /// Owner public key; receives claimed tokens.
    pub owner: PublicKeyBytes,
    /// Points awarded so far.
    pub counter: u32,
}

impl HashedRecord {
    /// Create a record.
    pub const fn new(owner: PublicKeyBytes, counter: u32) -> Self {
        Self { owner, counter }
    }

    /// Leaf digest: `BLAKE3(DS_RECORD || owner || counter LE)`.
    ///
    /// The byte layout is identical to the record's Borsh encoding.
    pub fn digest(&self) -> Digest {
        let mut bytes = [0u8; PUBLIC_KEY_LEN + 4];
        bytes[..PUBLIC_KEY_LEN].copy_from_slice(self.owner.as_bytes());
        bytes[PUBLIC_KEY_LEN..].copy_from_slice(&self.counter.to_le_bytes());
        hash32(DS_RECORD, &bytes)
    }

    /// Same owner with `points` more on the counter.
    pub fn with_points(self, points: u32) -> Result<Self, StateError> {
        let counter = self.counter.checked_add(points).ok_or(StateError::Overflow)?;
        Ok(Self { counter, ..self })
    }
}
