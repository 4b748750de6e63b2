//! Explicit world context: off-chain storage plus the ledger's view of the
//! contract, threaded through every operation instead of living in globals.
//!
//! Flow for one operation:
//! 1. `prepare` snapshots the current `CommitmentState` once and runs the pure
//!    transition against it.
//! 2. `finalize` accepts the transition only if the snapshot is still current
//!    (`StaleState` otherwise), then applies the off-chain effects in the same
//!    order the ledger finalized them.

use hashbrown::HashMap;
use tracing::{debug, warn};

use merkdrop_core::{AdminSignature, Hash32, PublicKeyBytes};

use crate::apply::{
    apply_transition, check_inclusion, AwardRequest, ClaimRequest, Effect, Transition,
    TransitionRequest,
};
use crate::commitment::{CommitmentState, ContractState};
use crate::error::StateError;
use crate::ledger::TokenLedger;
use crate::merkle::{MembershipWitness, MerkleStore};
use crate::nullifier::{ClaimFlag, MapWitness, NullifierKey, NullifierMap};
use crate::record::HashedRecord;

/// Everything one airdrop deployment owns.
#[derive(Clone, Debug)]
pub struct World {
    store: MerkleStore,
    records: HashMap<u32, HashedRecord>,
    nullifiers: NullifierMap,
    ledger: TokenLedger,
    contract: ContractState,
    admin: PublicKeyBytes,
    reserve: PublicKeyBytes,
}

impl World {
    /// Empty, undeployed world administered by `admin`; claims are paid from
    /// `reserve`.
    pub fn new(admin: PublicKeyBytes, reserve: PublicKeyBytes) -> Self {
        Self {
            store: MerkleStore::new(),
            records: HashMap::new(),
            nullifiers: NullifierMap::new(),
            ledger: TokenLedger::new(),
            contract: ContractState::Uninitialized,
            admin,
            reserve,
        }
    }

    /// Rebuild a deployed world from persisted parts.
    pub fn restore<R, C>(
        admin: PublicKeyBytes,
        reserve: PublicKeyBytes,
        state: CommitmentState,
        records: R,
        claimed: C,
        ledger: TokenLedger,
    ) -> Result<Self, StateError>
    where
        R: IntoIterator<Item = (u32, HashedRecord)>,
        C: IntoIterator<Item = u32>,
    {
        let mut world = Self::new(admin, reserve);
        for (index, record) in records {
            world.put_record(index, record)?;
        }
        for index in claimed {
            world
                .nullifiers
                .set(NullifierKey::for_index(index), ClaimFlag::Claimed);
        }
        world.ledger = ledger;
        world.contract = ContractState::Active(state);
        world.warn_if_diverged(&state);
        Ok(world)
    }

    /// Admin key that authorizes mints and claims.
    pub fn admin(&self) -> &PublicKeyBytes {
        &self.admin
    }

    /// Account claims are paid from.
    pub fn reserve(&self) -> &PublicKeyBytes {
        &self.reserve
    }

    /// Off-chain account tree.
    pub fn store(&self) -> &MerkleStore {
        &self.store
    }

    /// Off-chain nullifier map.
    pub fn nullifiers(&self) -> &NullifierMap {
        &self.nullifiers
    }

    /// Balances.
    pub fn ledger(&self) -> &TokenLedger {
        &self.ledger
    }

    /// Record stored at a slot, if any.
    pub fn record(&self, index: u32) -> Option<HashedRecord> {
        self.records.get(&index).copied()
    }

    /// All stored records, in no particular order.
    pub fn records(&self) -> impl Iterator<Item = (u32, HashedRecord)> + '_ {
        self.records.iter().map(|(i, r)| (*i, *r))
    }

    /// Add an allowlisted record to off-chain storage.
    ///
    /// After deploy this moves the off-chain root away from the on-chain
    /// commitment until `SetCommitment` re-anchors it.
    pub fn insert_record(&mut self, index: u32, record: HashedRecord) -> Result<(), StateError> {
        self.put_record(index, record)
    }

    /// Deploy the contract anchored at the current off-chain root.
    pub fn deploy(&mut self) -> Result<CommitmentState, StateError> {
        let state = self.contract.deploy(self.store.root())?;
        self.contract = ContractState::Active(state);
        debug!(root = %state.commitment_root, "contract deployed");
        Ok(state)
    }

    /// Current commitment state.
    pub fn state(&self) -> Result<CommitmentState, StateError> {
        self.contract.active()
    }

    /// Membership witness for a slot against the current off-chain tree.
    pub fn membership_witness(&self, index: u32) -> Result<MembershipWitness, StateError> {
        self.store.witness(index)
    }

    /// Nullifier witness for a slot against the current off-chain map.
    pub fn nullifier_witness(&self, index: u32) -> MapWitness {
        self.nullifiers.witness(NullifierKey::for_index(index))
    }

    /// Whether the slot's nullifier is set.
    pub fn is_claimed(&self, index: u32) -> bool {
        self.nullifiers.get(&NullifierKey::for_index(index)) == ClaimFlag::Claimed
    }

    /// Assemble a claim for the record at `index` with fresh witnesses.
    pub fn claim_request(
        &self,
        index: u32,
        signature: AdminSignature,
    ) -> Result<ClaimRequest, StateError> {
        let record = self.records.get(&index).copied().ok_or(StateError::Inclusion)?;
        Ok(ClaimRequest {
            record,
            membership: self.membership_witness(index)?,
            signature,
            nullifier: self.nullifier_witness(index),
        })
    }

    /// Assemble a point award for the record at `index`.
    pub fn award_request(&self, index: u32) -> Result<AwardRequest, StateError> {
        let record = self.records.get(&index).copied().ok_or(StateError::Inclusion)?;
        Ok(AwardRequest {
            record,
            membership: self.membership_witness(index)?,
        })
    }

    /// Public membership oracle against the current commitment.
    pub fn check_inclusion(
        &self,
        record: &HashedRecord,
        witness: &MembershipWitness,
    ) -> Result<(), StateError> {
        check_inclusion(&self.state()?, record, witness)
    }

    /// Run `request` against a single snapshot of the current state.
    ///
    /// Returns the snapshot's hash (the ledger precondition) and the transition.
    pub fn prepare(&self, request: &TransitionRequest) -> Result<(Hash32, Transition), StateError> {
        let snapshot = self.state()?;
        let transition = apply_transition(snapshot, &self.admin, request).map_err(|err| {
            warn!(kind = request.kind(), %err, "transition rejected");
            err
        })?;
        Ok((snapshot.state_hash(), transition))
    }

    /// Accept a prepared transition if `precondition` is still the current
    /// state, then apply its effects. All or nothing.
    pub fn finalize(
        &mut self,
        precondition: Hash32,
        transition: Transition,
    ) -> Result<CommitmentState, StateError> {
        let current = self.state()?;
        if current.state_hash() != precondition {
            warn!("stale precondition");
            return Err(StateError::StaleState);
        }
        self.apply_effects(&transition)?;
        self.contract = ContractState::Active(transition.state);
        self.warn_if_diverged(&transition.state);
        Ok(transition.state)
    }

    /// Prepare and finalize in one step.
    pub fn submit(&mut self, request: &TransitionRequest) -> Result<CommitmentState, StateError> {
        let (precondition, transition) = self.prepare(request)?;
        let state = self.finalize(precondition, transition)?;
        debug!(
            kind = request.kind(),
            nullifier_root = %state.nullifier_root,
            supply = state.total_supply.units(),
            "transition accepted"
        );
        Ok(state)
    }

    /// Apply the off-chain effects of a transition some ledger has already
    /// finalized. Nothing changes on error.
    pub fn apply_effects(&mut self, transition: &Transition) -> Result<(), StateError> {
        let mut ledger = self.ledger.clone();
        ledger.apply_effects(&self.reserve, &transition.effects)?;

        let mut store = self.store.clone();
        let mut records = self.records.clone();
        let mut nullifiers = self.nullifiers.clone();
        for effect in &transition.effects {
            match effect {
                Effect::MarkClaimed { index } => {
                    nullifiers.set(NullifierKey::for_index(*index), ClaimFlag::Claimed);
                }
                Effect::WriteRecord { index, record } => {
                    store.update(*index, record.digest())?;
                    records.insert(*index, *record);
                }
                Effect::Disburse { .. } | Effect::Credit { .. } | Effect::Transfer { .. } => {}
            }
        }

        self.ledger = ledger;
        self.store = store;
        self.records = records;
        self.nullifiers = nullifiers;
        Ok(())
    }

    fn put_record(&mut self, index: u32, record: HashedRecord) -> Result<(), StateError> {
        self.store.update(index, record.digest())?;
        self.records.insert(index, record);
        Ok(())
    }

    fn warn_if_diverged(&self, state: &CommitmentState) {
        if self.store.root() != state.commitment_root {
            warn!(
                onchain = %state.commitment_root,
                offchain = %self.store.root(),
                "off-chain tree does not match commitment"
            );
        }
    }
}
