//! Serializes requests against the persisted ledger.
//!
//! Each submission takes one snapshot of the finalized state, computes the
//! transition, proves it, and hands it to `LedgerDb::finalize` with the
//! snapshot hash as precondition. The in-memory world follows the database:
//! it remembers the height it was built at and reloads whenever the database
//! has moved past it, so witnesses are always built from the latest state
//! this sequencer can see.

use merkdrop_core::{AdminSignature, Digest, PublicKeyBytes};
use merkdrop_state::{
    apply_transition, CommitmentState, HashedRecord, MerkleStore, StateError, Transition,
    TransitionRequest, World,
};
use tracing::{debug, info, warn};

use crate::error::NodeError;
use crate::ledger_store::LedgerDb;
use crate::prover::{Proof, TransitionProver};

/// Outcome of a finalized submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Receipt {
    /// Ledger height after this transition.
    pub height: u64,
    /// State the ledger now holds.
    pub state: CommitmentState,
    /// Proof that was checked before finalizing.
    pub proof: Proof,
}

/// Front end to a ledger database. Other writers may share the database.
pub struct Sequencer<P> {
    db: LedgerDb,
    world: World,
    /// Database height `world` reflects.
    height: u64,
    prover: P,
}

impl<P: TransitionProver> Sequencer<P> {
    /// Attach to an already deployed database.
    pub fn open(db: LedgerDb, prover: P) -> Result<Self, NodeError> {
        let height = db.height()?;
        let world = db.load_world()?;
        Ok(Self {
            db,
            world,
            height,
            prover,
        })
    }

    /// Deploy a fresh allowlist and attach to it.
    pub fn deploy(
        db: LedgerDb,
        prover: P,
        admin: PublicKeyBytes,
        reserve: PublicKeyBytes,
        records: Vec<(u32, HashedRecord)>,
    ) -> Result<Self, NodeError> {
        let mut world = World::new(admin, reserve);
        for (index, record) in &records {
            world.insert_record(*index, *record)?;
        }
        let genesis = world.deploy()?;
        db.deploy(&admin, &reserve, &genesis, &records)?;
        info!(root = %genesis.commitment_root, accounts = records.len(), "allowlist deployed");
        Ok(Self {
            db,
            world,
            height: 0,
            prover,
        })
    }

    /// Off-chain view as of the last refresh.
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Underlying database handle.
    pub fn db(&self) -> &LedgerDb {
        &self.db
    }

    /// Finalized state.
    pub fn state(&self) -> Result<CommitmentState, NodeError> {
        Ok(self.db.state()?.ok_or(StateError::NotDeployed)?)
    }

    /// Reload the off-chain view if another writer has finalized since it
    /// was built.
    pub fn refresh(&mut self) -> Result<(), NodeError> {
        let current = self.db.height()?;
        if current != self.height {
            debug!(from = self.height, to = current, "reloading world");
            self.world = self.db.load_world()?;
            self.height = current;
        }
        Ok(())
    }

    /// Prove and finalize one request.
    pub fn submit(&mut self, request: &TransitionRequest) -> Result<Receipt, NodeError> {
        self.refresh()?;
        let snapshot = self.state()?;
        let transition = apply_transition(snapshot, self.world.admin(), request).map_err(|err| {
            warn!(kind = request.kind(), %err, "transition rejected");
            err
        })?;

        let proof = self.prover.prove(&snapshot, request, &transition)?;
        if !self.prover.verify(&proof, &snapshot, request, &transition)? {
            warn!(kind = request.kind(), "proof failed verification");
            return Err(NodeError::ProofRejected);
        }

        let height = self.db.finalize(snapshot.state_hash(), &transition)?;
        self.follow(snapshot, transition.clone(), height);
        info!(
            kind = request.kind(),
            height,
            supply = transition.state.total_supply.units(),
            "transition finalized"
        );
        Ok(Receipt {
            height,
            state: transition.state,
            proof,
        })
    }

    /// Claim the record at `index` with fresh witnesses.
    pub fn claim(&mut self, index: u32, signature: AdminSignature) -> Result<Receipt, NodeError> {
        self.refresh()?;
        let request = self.world.claim_request(index, signature)?;
        self.submit(&TransitionRequest::Claim(request))
    }

    /// Award one point to the record at `index`.
    pub fn award_point(&mut self, index: u32) -> Result<Receipt, NodeError> {
        self.refresh()?;
        let request = self.world.award_request(index)?;
        self.submit(&TransitionRequest::AwardPoint(request))
    }

    /// Replace the committed root. `signature` is the admin's over `root`.
    pub fn set_commitment(
        &mut self,
        root: Digest,
        signature: AdminSignature,
    ) -> Result<Receipt, NodeError> {
        self.submit(&TransitionRequest::SetCommitment { root, signature })
    }

    /// Root the off-chain tree would commit to.
    pub fn offchain_root(&self) -> Digest {
        self.world.store().root()
    }

    /// Root of an arbitrary allowlist, without touching storage.
    pub fn root_of(records: &[(u32, HashedRecord)]) -> Result<Digest, NodeError> {
        let store = MerkleStore::from_leaves(records.iter().map(|(i, r)| (*i, r.digest())))?;
        Ok(store.root())
    }

    /// Bring the world up to `height` after a successful finalize.
    ///
    /// The transition is already committed, so failures here are logged and
    /// leave the world marked stale for the next `refresh`.
    fn follow(&mut self, snapshot: CommitmentState, transition: Transition, height: u64) {
        let in_step = height == self.height.saturating_add(1)
            && self
                .world
                .finalize(snapshot.state_hash(), transition)
                .is_ok();
        if in_step {
            self.height = height;
            return;
        }
        warn!("in-memory world drifted from database, reloading");
        match self.db.load_world() {
            Ok(world) => {
                self.world = world;
                self.height = height;
            }
            Err(err) => {
                warn!(%err, "reload failed; will retry on next request");
            }
        }
    }
}
