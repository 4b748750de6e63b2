//! On-chain commitment state and contract lifecycle.

use borsh::{BorshDeserialize, BorshSerialize};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use merkdrop_core::{hash32, Amount, Digest, Hash32, DS_STATE, HASH32_LEN, STATE_LEN};

use crate::error::StateError;
use crate::nullifier::NullifierMap;

/// The only durable on-chain state.
///
/// Persisted layout (72 bytes): `commitment_root || nullifier_root ||
/// total_supply (u64 LE)`, which is also its Borsh encoding.
#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CommitmentState {
    /// Root of the off-chain account tree.
    pub commitment_root: Digest,
    /// Root of the nullifier map.
    pub nullifier_root: Digest,
    /// Total minted supply.
    pub total_supply: Amount,
}

impl CommitmentState {
    /// Genesis state anchored at `initial_root`: empty nullifier map, no supply.
    pub fn genesis(initial_root: Digest) -> Self {
        Self {
            commitment_root: initial_root,
            nullifier_root: NullifierMap::empty_root(),
            total_supply: Amount::zero(),
        }
    }

    /// Fixed 72-byte encoding.
    pub fn to_bytes(&self) -> [u8; STATE_LEN] {
        let mut out = [0u8; STATE_LEN];
        out[..HASH32_LEN].copy_from_slice(self.commitment_root.as_bytes());
        out[HASH32_LEN..2 * HASH32_LEN].copy_from_slice(self.nullifier_root.as_bytes());
        out[2 * HASH32_LEN..].copy_from_slice(&self.total_supply.units().to_le_bytes());
        out
    }

    /// Decode the fixed 72-byte encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StateError> {
        if bytes.len() != STATE_LEN {
            return Err(StateError::Encoding("commitment state must be 72 bytes"));
        }
        let mut commitment_root = [0u8; HASH32_LEN];
        commitment_root.copy_from_slice(&bytes[..HASH32_LEN]);
        let mut nullifier_root = [0u8; HASH32_LEN];
        nullifier_root.copy_from_slice(&bytes[HASH32_LEN..2 * HASH32_LEN]);
        let mut supply = [0u8; 8];
        supply.copy_from_slice(&bytes[2 * HASH32_LEN..]);
        Ok(Self {
            commitment_root: Hash32(commitment_root),
            nullifier_root: Hash32(nullifier_root),
            total_supply: Amount::from_units(u64::from_le_bytes(supply)),
        })
    }

    /// Hash used as the ledger precondition for a transition.
    pub fn state_hash(&self) -> Hash32 {
        hash32(DS_STATE, &self.to_bytes())
    }
}

/// Contract lifecycle: `Uninitialized -> Active`, no terminal state.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ContractState {
    /// Not deployed yet.
    #[default]
    Uninitialized,
    /// Deployed; holds the current commitment state.
    Active(CommitmentState),
}

impl ContractState {
    /// Deploy with the initial tree root.
    pub fn deploy(self, initial_root: Digest) -> Result<CommitmentState, StateError> {
        match self {
            ContractState::Uninitialized => Ok(CommitmentState::genesis(initial_root)),
            ContractState::Active(_) => Err(StateError::AlreadyDeployed),
        }
    }

    /// Current state; fails before deploy.
    pub fn active(&self) -> Result<CommitmentState, StateError> {
        match self {
            ContractState::Active(state) => Ok(*state),
            ContractState::Uninitialized => Err(StateError::NotDeployed),
        }
    }
}
