//! State transition errors.
//!
//! Every variant is terminal for the attempted transition: state is left
//! untouched and the caller must rebuild witnesses against the current state.

use merkdrop_core::CoreError;
use thiserror::Error;

/// Errors produced by state validation or transitions.
#[derive(Debug, Error)]
pub enum StateError {
    /// Membership witness does not reconstruct the stored commitment root.
    #[error("record is not included under the current commitment")]
    Inclusion,

    /// Nullifier witness is anchored at a key other than the record's.
    #[error("nullifier witness anchored at the wrong key")]
    KeyMismatch,

    /// Nullifier map does not agree the key is unclaimed.
    #[error("already claimed")]
    AlreadyClaimed,

    /// Admin or account-holder authorization failed.
    #[error("invalid authorization signature")]
    Signature,

    /// Supply, balance or counter arithmetic would overflow.
    #[error("arithmetic overflow")]
    Overflow,

    /// Transfer exceeds the sender's balance.
    #[error("insufficient balance")]
    InsufficientBalance,

    /// Transfer nonce is not the sender's next nonce.
    #[error("transfer nonce {got} does not match expected {expected}")]
    StaleNonce {
        /// Sender's next nonce.
        expected: u64,
        /// Nonce the transfer was signed with.
        got: u64,
    },

    /// Precondition state no longer matches the finalized state.
    #[error("stale state: precondition no longer matches")]
    StaleState,

    /// Tree index outside `0..TREE_CAPACITY`.
    #[error("tree index {0} out of range")]
    IndexOutOfRange(u32),

    /// Witness has the wrong shape for this tree.
    #[error("malformed witness: {0}")]
    MalformedWitness(&'static str),

    /// Operation attempted before the contract was deployed.
    #[error("contract not deployed")]
    NotDeployed,

    /// Deploy attempted on an already active contract.
    #[error("contract already deployed")]
    AlreadyDeployed,

    /// Persisted state could not be decoded.
    #[error("invalid encoding: {0}")]
    Encoding(&'static str),
}

impl From<CoreError> for StateError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::AmountOverflow => Self::Overflow,
            CoreError::InvalidHexLength { .. }
            | CoreError::InvalidHex(_)
            | CoreError::InvalidKey(_)
            | CoreError::InvalidValue(_) => Self::Encoding("core value rejected"),
        }
    }
}
