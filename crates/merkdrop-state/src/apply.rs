//! State transition functions for the airdrop contract.
//!
//! Every operation is a pure function of one `CommitmentState` snapshot and
//! the caller-supplied witnesses. Nothing here reads global state, so the same
//! inputs always produce the same `Transition`, which is what lets an external
//! prover wrap these functions.
//!
//! Off-chain storage and balances are never touched here. A successful
//! transition lists the `Effect`s the off-chain owner applies once the ledger
//! has accepted the new state.

use borsh::{BorshDeserialize, BorshSerialize};

use merkdrop_core::{
    claim_message, commitment_message, mint_message, send_message, verify_admin, AdminSignature,
    Amount, Digest, PublicKeyBytes, CLAIM_AMOUNT,
};

use crate::commitment::CommitmentState;
use crate::error::StateError;
use crate::merkle::MembershipWitness;
use crate::nullifier::{expect_key, ClaimFlag, MapWitness};
use crate::record::HashedRecord;

/// Claim one unit for an allowlisted record.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct ClaimRequest {
    /// Record as stored in the account tree.
    pub record: HashedRecord,
    /// Path from the record's slot to the commitment root.
    pub membership: MembershipWitness,
    /// Admin signature over the claim message for `record.owner`.
    pub signature: AdminSignature,
    /// Nullifier map path for the record's key.
    pub nullifier: MapWitness,
}

/// Mint new supply to one account.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct MintRequest {
    /// Account credited.
    pub recipient: PublicKeyBytes,
    /// Units minted.
    pub amount: Amount,
    /// Admin signature over the mint message for `(amount, recipient)`.
    pub signature: AdminSignature,
}

/// Move existing balance between accounts, authorized by the sender.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct SendRequest {
    /// Account debited; also the key the signature must verify under.
    pub sender: PublicKeyBytes,
    /// Account credited.
    pub recipient: PublicKeyBytes,
    /// Units moved.
    pub amount: Amount,
    /// Sender's next transfer nonce.
    pub nonce: u64,
    /// Sender signature over the send message for `(amount, recipient, nonce)`.
    pub signature: AdminSignature,
}

/// Award one point to an allowlisted record.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct AwardRequest {
    /// Record as currently stored.
    pub record: HashedRecord,
    /// Path from the record's slot to the commitment root.
    pub membership: MembershipWitness,
}

/// Any state-changing operation.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub enum TransitionRequest {
    /// Re-anchor the contract at a new tree root. Admin-only.
    SetCommitment {
        /// New commitment root.
        root: Digest,
        /// Admin signature over the commitment message for `root`.
        signature: AdminSignature,
    },
    /// Claim one unit.
    Claim(ClaimRequest),
    /// Mint supply.
    Mint(MintRequest),
    /// Transfer balance.
    Send(SendRequest),
    /// Bump a record's counter.
    AwardPoint(AwardRequest),
}

impl TransitionRequest {
    /// Short operation name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TransitionRequest::SetCommitment { .. } => "set_commitment",
            TransitionRequest::Claim(_) => "claim",
            TransitionRequest::Mint(_) => "mint",
            TransitionRequest::Send(_) => "send",
            TransitionRequest::AwardPoint(_) => "award_point",
        }
    }
}

/// Off-chain consequence of an accepted transition.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub enum Effect {
    /// Set the nullifier flag for a tree slot.
    MarkClaimed {
        /// Tree slot whose key flips to claimed.
        index: u32,
    },
    /// Pay out of the contract reserve.
    Disburse {
        /// Account credited.
        recipient: PublicKeyBytes,
        /// Units moved from the reserve.
        amount: Amount,
    },
    /// Credit freshly minted units.
    Credit {
        /// Account credited.
        recipient: PublicKeyBytes,
        /// Units minted.
        amount: Amount,
    },
    /// Move balance between accounts.
    Transfer {
        /// Account debited.
        sender: PublicKeyBytes,
        /// Account credited.
        recipient: PublicKeyBytes,
        /// Units moved.
        amount: Amount,
        /// Must equal the sender's next nonce when applied.
        nonce: u64,
    },
    /// Replace the record stored at a tree slot.
    WriteRecord {
        /// Tree slot.
        index: u32,
        /// New record.
        record: HashedRecord,
    },
}

/// Output of a successful transition.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct Transition {
    /// State to finalize.
    pub state: CommitmentState,
    /// Off-chain updates to apply after finalization, in order.
    pub effects: Vec<Effect>,
}

/// Replace the commitment root, given an admin signature over it.
///
/// Invalidates every outstanding membership witness.
pub fn set_commitment(
    state: CommitmentState,
    admin: &PublicKeyBytes,
    root: Digest,
    signature: &AdminSignature,
) -> Result<Transition, StateError> {
    if !verify_admin(signature, admin, &commitment_message(&root)) {
        return Err(StateError::Signature);
    }
    Ok(Transition {
        state: CommitmentState {
            commitment_root: root,
            ..state
        },
        effects: Vec::new(),
    })
}

/// Read-only membership check against the snapshot's commitment root.
pub fn check_inclusion(
    state: &CommitmentState,
    record: &HashedRecord,
    witness: &MembershipWitness,
) -> Result<(), StateError> {
    if witness.ensure_well_formed().is_err() {
        return Err(StateError::Inclusion);
    }
    if witness.recompute_root(&record.digest()) != state.commitment_root {
        return Err(StateError::Inclusion);
    }
    Ok(())
}

/// Claim one unit for `request.record`.
///
/// Checks, in order: inclusion, nullifier key binding, unclaimed status, admin
/// signature. Either every check passes and the nullifier root moves to the
/// claimed root, or nothing changes.
pub fn claim(
    state: CommitmentState,
    admin: &PublicKeyBytes,
    request: &ClaimRequest,
) -> Result<Transition, StateError> {
    check_inclusion(&state, &request.record, &request.membership)?;

    let index = request.membership.index();
    if !request.nullifier.is_well_formed() {
        return Err(StateError::MalformedWitness("nullifier path length"));
    }
    let (root_at_zero, _) = request.nullifier.compute_root_and_key(ClaimFlag::Unclaimed);
    expect_key(&request.nullifier, index)?;

    if root_at_zero != state.nullifier_root {
        return Err(StateError::AlreadyClaimed);
    }

    let (root_at_one, _) = request.nullifier.compute_root_and_key(ClaimFlag::Claimed);

    if !verify_admin(&request.signature, admin, &claim_message(&request.record.owner)) {
        return Err(StateError::Signature);
    }

    Ok(Transition {
        state: CommitmentState {
            nullifier_root: root_at_one,
            ..state
        },
        effects: vec![
            Effect::MarkClaimed { index },
            Effect::Disburse {
                recipient: request.record.owner,
                amount: Amount::from_units(CLAIM_AMOUNT),
            },
        ],
    })
}

/// Mint `request.amount` to `request.recipient`.
pub fn mint(
    state: CommitmentState,
    admin: &PublicKeyBytes,
    request: &MintRequest,
) -> Result<Transition, StateError> {
    if !verify_admin(
        &request.signature,
        admin,
        &mint_message(request.amount, &request.recipient),
    ) {
        return Err(StateError::Signature);
    }

    let total_supply = state.total_supply.checked_add(request.amount)?;

    Ok(Transition {
        state: CommitmentState {
            total_supply,
            ..state
        },
        effects: vec![Effect::Credit {
            recipient: request.recipient,
            amount: request.amount,
        }],
    })
}

/// Transfer balance signed by the sender. State is unchanged; the balance
/// and nonce checks happen where balances live, when the effect is applied.
pub fn send_tokens(state: CommitmentState, request: &SendRequest) -> Result<Transition, StateError> {
    let message = send_message(request.amount, &request.recipient, request.nonce);
    if !verify_admin(&request.signature, &request.sender, &message) {
        return Err(StateError::Signature);
    }
    Ok(Transition {
        state,
        effects: vec![Effect::Transfer {
            sender: request.sender,
            recipient: request.recipient,
            amount: request.amount,
            nonce: request.nonce,
        }],
    })
}

/// Award one point: verify inclusion, bump the counter, and re-anchor the
/// commitment at the root the same witness yields for the new record.
pub fn award_point(state: CommitmentState, request: &AwardRequest) -> Result<Transition, StateError> {
    check_inclusion(&state, &request.record, &request.membership)?;

    let updated = request.record.with_points(1)?;
    let commitment_root = request.membership.recompute_root(&updated.digest());

    Ok(Transition {
        state: CommitmentState {
            commitment_root,
            ..state
        },
        effects: vec![Effect::WriteRecord {
            index: request.membership.index(),
            record: updated,
        }],
    })
}

/// Dispatch any request against one snapshot.
pub fn apply_transition(
    state: CommitmentState,
    admin: &PublicKeyBytes,
    request: &TransitionRequest,
) -> Result<Transition, StateError> {
    match request {
        TransitionRequest::SetCommitment { root, signature } => {
            set_commitment(state, admin, *root, signature)
        }
        TransitionRequest::Claim(req) => claim(state, admin, req),
        TransitionRequest::Mint(req) => mint(state, admin, req),
        TransitionRequest::Send(req) => send_tokens(state, req),
        TransitionRequest::AwardPoint(req) => award_point(state, req),
    }
}
