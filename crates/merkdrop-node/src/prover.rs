//! Proof generation for state transitions.
//!
//! `TransitionProver` is the seam where a real proving backend plugs in. The
//! bundled `DigestProver` re-executes the transition and binds the result to a
//! BLAKE3 digest; it proves correct execution to anyone who trusts the prover,
//! nothing more.

use borsh::{BorshDeserialize, BorshSerialize};
use merkdrop_core::{hash32, to_bytes, Hash32, PublicKeyBytes, DS_PROOF};
use merkdrop_state::{apply_transition, CommitmentState, Transition, TransitionRequest};
use tracing::warn;

use crate::error::NodeError;

/// Opaque proof attached to a finalized transition.
#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct Proof(pub Hash32);

/// Proves that `transition` is what `request` yields from `pre`.
pub trait TransitionProver {
    /// Produce a proof, or refuse if the transition does not follow.
    fn prove(
        &self,
        pre: &CommitmentState,
        request: &TransitionRequest,
        transition: &Transition,
    ) -> Result<Proof, NodeError>;

    /// Check a proof against the same statement.
    fn verify(
        &self,
        proof: &Proof,
        pre: &CommitmentState,
        request: &TransitionRequest,
        transition: &Transition,
    ) -> Result<bool, NodeError>;
}

/// Hash-based stand-in prover.
#[derive(Clone, Debug)]
pub struct DigestProver {
    admin: PublicKeyBytes,
}

impl DigestProver {
    /// Prover for a deployment administered by `admin`.
    pub fn new(admin: PublicKeyBytes) -> Self {
        Self { admin }
    }

    fn statement_digest(
        pre: &CommitmentState,
        request: &TransitionRequest,
        transition: &Transition,
    ) -> Result<Hash32, NodeError> {
        let mut buf = to_bytes(request)?;
        buf.extend_from_slice(&pre.to_bytes());
        buf.extend_from_slice(&transition.state.to_bytes());
        buf.extend_from_slice(&to_bytes(&transition.effects)?);
        Ok(hash32(DS_PROOF, &buf))
    }
}

impl TransitionProver for DigestProver {
    fn prove(
        &self,
        pre: &CommitmentState,
        request: &TransitionRequest,
        transition: &Transition,
    ) -> Result<Proof, NodeError> {
        let expected = apply_transition(*pre, &self.admin, request)?;
        if &expected != transition {
            warn!(kind = request.kind(), "transition does not follow from request");
            return Err(NodeError::ProofRejected);
        }
        Ok(Proof(Self::statement_digest(pre, request, transition)?))
    }

    fn verify(
        &self,
        proof: &Proof,
        pre: &CommitmentState,
        request: &TransitionRequest,
        transition: &Transition,
    ) -> Result<bool, NodeError> {
        Ok(proof.0 == Self::statement_digest(pre, request, transition)?)
    }
}
