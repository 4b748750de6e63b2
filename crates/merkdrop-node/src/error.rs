//! Node error types.

use merkdrop_core::CoreError;
use merkdrop_state::StateError;
use thiserror::Error;

/// Errors returned by the ledger store, prover and sequencer.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The transition itself was rejected.
    #[error(transparent)]
    State(#[from] StateError),

    /// sled I/O failure.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// A value could not be encoded for storage or proving.
    #[error("encoding failed: {0}")]
    Encoding(&'static str),

    /// Persisted bytes did not decode.
    #[error("corrupt ledger database: {0}")]
    Corrupt(&'static str),

    /// The prover refused the transition or its proof did not verify.
    #[error("proof rejected")]
    ProofRejected,
}

impl From<CoreError> for NodeError {
    fn from(_: CoreError) -> Self {
        NodeError::Encoding("core serialization failed")
    }
}
