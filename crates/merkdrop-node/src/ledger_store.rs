//! sled-backed ledger: the finalized `CommitmentState` plus the off-chain
//! storage that must move in lockstep with it.
//!
//! Finalization is one sled transaction over every tree: compare the
//! precondition hash, apply the transition's effects, write the new state.
//! A transition computed against an older snapshot fails with `StaleState`.

use std::path::Path;

use borsh::BorshDeserialize;
use merkdrop_core::{to_bytes, Amount, Hash32, PublicKeyBytes};
use merkdrop_state::{
    CommitmentState, Effect, HashedRecord, StateError, TokenLedger, Transition, World,
};
use sled::transaction::{
    abort, ConflictableTransactionResult, TransactionError, TransactionResult, Transactional,
    TransactionalTree,
};

use crate::error::NodeError;

const TREE_META: &str = "meta";
const TREE_RECORDS: &str = "records";
const TREE_CLAIMED: &str = "claimed";
const TREE_BALANCES: &str = "balances";
const KEY_STATE: &[u8] = b"state";
const KEY_HEIGHT: &[u8] = b"height";
const KEY_ADMIN: &[u8] = b"admin";
const KEY_RESERVE: &[u8] = b"reserve";

/// Handle to the ledger database. Cheap to clone; clones share the database.
#[derive(Clone)]
pub struct LedgerDb {
    meta: sled::Tree,
    records: sled::Tree,
    claimed: sled::Tree,
    balances: sled::Tree,
}

impl std::fmt::Debug for LedgerDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerDb").finish_non_exhaustive()
    }
}

impl LedgerDb {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, NodeError> {
        let db = sled::open(path)?;
        Ok(Self {
            meta: db.open_tree(TREE_META)?,
            records: db.open_tree(TREE_RECORDS)?,
            claimed: db.open_tree(TREE_CLAIMED)?,
            balances: db.open_tree(TREE_BALANCES)?,
        })
    }

    /// Finalized state, or `None` before deploy.
    pub fn state(&self) -> Result<Option<CommitmentState>, NodeError> {
        match self.meta.get(KEY_STATE)? {
            Some(bytes) => Ok(Some(CommitmentState::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Number of transitions finalized since deploy.
    pub fn height(&self) -> Result<u64, NodeError> {
        match self.meta.get(KEY_HEIGHT)? {
            Some(bytes) => decode_u64(&bytes),
            None => Ok(0),
        }
    }

    /// Admin key recorded at deploy.
    pub fn admin(&self) -> Result<Option<PublicKeyBytes>, NodeError> {
        self.read_key(KEY_ADMIN)
    }

    /// Reserve account recorded at deploy.
    pub fn reserve(&self) -> Result<Option<PublicKeyBytes>, NodeError> {
        self.read_key(KEY_RESERVE)
    }

    /// Write the genesis state and allowlist. Fails if already deployed.
    pub fn deploy(
        &self,
        admin: &PublicKeyBytes,
        reserve: &PublicKeyBytes,
        genesis: &CommitmentState,
        records: &[(u32, HashedRecord)],
    ) -> Result<(), NodeError> {
        let encoded = records
            .iter()
            .map(|(index, record)| Ok((index_key(*index), to_bytes(record)?)))
            .collect::<Result<Vec<_>, NodeError>>()?;
        let state_bytes = genesis.to_bytes().to_vec();

        let res: TransactionResult<(), NodeError> =
            (&self.meta, &self.records).transaction(|(meta, recs)| {
                if meta.get(KEY_STATE)?.is_some() {
                    return abort(NodeError::State(StateError::AlreadyDeployed));
                }
                for (key, bytes) in &encoded {
                    recs.insert(key.clone(), bytes.clone())?;
                }
                meta.insert(KEY_ADMIN, admin.as_bytes().to_vec())?;
                meta.insert(KEY_RESERVE, reserve.as_bytes().to_vec())?;
                meta.insert(KEY_STATE, state_bytes.clone())?;
                meta.insert(KEY_HEIGHT, 0u64.to_le_bytes().to_vec())?;
                Ok(())
            });
        flatten(res)
    }

    /// Accept `transition` iff the finalized state still hashes to
    /// `precondition`. Returns the new height.
    ///
    /// Transitions are serialized by precondition hash alone. Two claims on
    /// disjoint nullifier keys built from one snapshot are each valid, but
    /// only the first to finalize is accepted; the second fails with
    /// `StaleState` and must be rebuilt against the new state.
    pub fn finalize(&self, precondition: Hash32, transition: &Transition) -> Result<u64, NodeError> {
        let encoded_records = transition
            .effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::WriteRecord { index, record } => Some((*index, *record)),
                Effect::MarkClaimed { .. }
                | Effect::Disburse { .. }
                | Effect::Credit { .. }
                | Effect::Transfer { .. } => None,
            })
            .map(|(index, record)| Ok((index, to_bytes(&record)?)))
            .collect::<Result<Vec<_>, NodeError>>()?;
        let state_bytes = transition.state.to_bytes().to_vec();

        let res: TransactionResult<u64, NodeError> =
            (&self.meta, &self.records, &self.claimed, &self.balances).transaction(
                |(meta, recs, claimed, balances)| {
                    let current = match meta.get(KEY_STATE)? {
                        Some(bytes) => bytes,
                        None => return abort(NodeError::State(StateError::NotDeployed)),
                    };
                    let current = match CommitmentState::from_bytes(&current) {
                        Ok(state) => state,
                        Err(_) => return abort(NodeError::Corrupt("state")),
                    };
                    if current.state_hash() != precondition {
                        return abort(NodeError::State(StateError::StaleState));
                    }

                    let reserve = match meta.get(KEY_RESERVE)? {
                        Some(bytes) => match PublicKeyBytes::from_slice(&bytes) {
                            Ok(key) => key,
                            Err(_) => return abort(NodeError::Corrupt("reserve key")),
                        },
                        None => return abort(NodeError::Corrupt("reserve key missing")),
                    };

                    let mut written = encoded_records.iter();
                    for effect in &transition.effects {
                        match effect {
                            Effect::MarkClaimed { index } => {
                                let prior = claimed.insert(index_key(*index), Vec::<u8>::new())?;
                                if prior.is_some() {
                                    return abort(NodeError::State(StateError::AlreadyClaimed));
                                }
                            }
                            Effect::WriteRecord { .. } => {
                                if let Some((index, bytes)) = written.next() {
                                    recs.insert(index_key(*index), bytes.clone())?;
                                }
                            }
                            Effect::Disburse { recipient, amount } => {
                                move_balance(balances, &reserve, recipient, *amount, None)?;
                            }
                            Effect::Credit { recipient, amount } => {
                                credit(balances, recipient, *amount)?;
                            }
                            Effect::Transfer {
                                sender,
                                recipient,
                                amount,
                                nonce,
                            } => {
                                move_balance(balances, sender, recipient, *amount, Some(*nonce))?;
                            }
                        }
                    }

                    let height = match meta.get(KEY_HEIGHT)? {
                        Some(bytes) => match decode_u64(&bytes) {
                            Ok(h) => h,
                            Err(e) => return abort(e),
                        },
                        None => 0,
                    };
                    let next = height.saturating_add(1);
                    meta.insert(KEY_STATE, state_bytes.clone())?;
                    meta.insert(KEY_HEIGHT, next.to_le_bytes().to_vec())?;
                    Ok(next)
                },
            );
        flatten(res)
    }

    /// Rebuild the in-memory world from persisted storage.
    pub fn load_world(&self) -> Result<World, NodeError> {
        let state = self.state()?.ok_or(StateError::NotDeployed)?;
        let admin = self.admin()?.ok_or(NodeError::Corrupt("admin key missing"))?;
        let reserve = self
            .reserve()?
            .ok_or(NodeError::Corrupt("reserve key missing"))?;

        let mut records = Vec::new();
        for item in self.records.iter() {
            let (k, v) = item?;
            let record =
                HashedRecord::try_from_slice(&v).map_err(|_| NodeError::Corrupt("record"))?;
            records.push((decode_index(&k)?, record));
        }

        let mut claimed = Vec::new();
        for item in self.claimed.iter() {
            let (k, _) = item?;
            claimed.push(decode_index(&k)?);
        }

        let mut ledger = TokenLedger::new();
        for item in self.balances.iter() {
            let (k, v) = item?;
            let account =
                PublicKeyBytes::from_slice(&k).map_err(|_| NodeError::Corrupt("balance key"))?;
            let (held, nonce) = decode_account(&v)?;
            ledger.credit(account, held)?;
            ledger.restore_nonce(account, nonce);
        }

        Ok(World::restore(admin, reserve, state, records, claimed, ledger)?)
    }

    #[cfg(test)]
    pub(crate) fn put_raw_record(&self, index: u32, bytes: &[u8]) -> Result<(), NodeError> {
        self.records.insert(index_key(index), bytes)?;
        Ok(())
    }

    fn read_key(&self, key: &[u8]) -> Result<Option<PublicKeyBytes>, NodeError> {
        match self.meta.get(key)? {
            Some(bytes) => Ok(Some(
                PublicKeyBytes::from_slice(&bytes).map_err(|_| NodeError::Corrupt("public key"))?,
            )),
            None => Ok(None),
        }
    }
}

fn flatten<T>(res: TransactionResult<T, NodeError>) -> Result<T, NodeError> {
    match res {
        Ok(v) => Ok(v),
        Err(TransactionError::Abort(e)) => Err(e),
        Err(TransactionError::Storage(e)) => Err(NodeError::Storage(e)),
    }
}

/// Big-endian so sled iterates slots in index order.
fn index_key(index: u32) -> Vec<u8> {
    index.to_be_bytes().to_vec()
}

fn decode_index(bytes: &[u8]) -> Result<u32, NodeError> {
    let arr: [u8; 4] = bytes
        .try_into()
        .map_err(|_| NodeError::Corrupt("index key"))?;
    Ok(u32::from_be_bytes(arr))
}

fn decode_u64(bytes: &[u8]) -> Result<u64, NodeError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| NodeError::Corrupt("u64 value"))?;
    Ok(u64::from_le_bytes(arr))
}

/// Balance and next transfer nonce, stored as `units (u64 LE) || nonce (u64 LE)`.
fn decode_account(bytes: &[u8]) -> Result<(Amount, u64), NodeError> {
    if bytes.len() != 16 {
        return Err(NodeError::Corrupt("account entry"));
    }
    let units = decode_u64(&bytes[..8])?;
    let nonce = decode_u64(&bytes[8..])?;
    Ok((Amount::from_units(units), nonce))
}

fn encode_account(amount: Amount, nonce: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&amount.units().to_le_bytes());
    out.extend_from_slice(&nonce.to_le_bytes());
    out
}

fn account(
    tree: &TransactionalTree,
    key: &PublicKeyBytes,
) -> ConflictableTransactionResult<(Amount, u64), NodeError> {
    match tree.get(key.as_bytes().to_vec())? {
        Some(bytes) => match decode_account(&bytes) {
            Ok(entry) => Ok(entry),
            Err(e) => abort(e),
        },
        None => Ok((Amount::zero(), 0)),
    }
}

fn credit(
    tree: &TransactionalTree,
    key: &PublicKeyBytes,
    amount: Amount,
) -> ConflictableTransactionResult<(), NodeError> {
    let (held, nonce) = account(tree, key)?;
    let updated = match held.checked_add(amount) {
        Ok(v) => v,
        Err(_) => return abort(NodeError::State(StateError::Overflow)),
    };
    tree.insert(key.as_bytes().to_vec(), encode_account(updated, nonce))?;
    Ok(())
}

/// Debit `sender` and credit `recipient`. With `nonce` set, the sender's
/// stored nonce must match and advances by one.
fn move_balance(
    tree: &TransactionalTree,
    sender: &PublicKeyBytes,
    recipient: &PublicKeyBytes,
    amount: Amount,
    nonce: Option<u64>,
) -> ConflictableTransactionResult<(), NodeError> {
    let (held, stored_nonce) = account(tree, sender)?;
    let next_nonce = match nonce {
        Some(got) if got != stored_nonce => {
            return abort(NodeError::State(StateError::StaleNonce {
                expected: stored_nonce,
                got,
            }))
        }
        Some(_) => match stored_nonce.checked_add(1) {
            Some(n) => n,
            None => return abort(NodeError::State(StateError::Overflow)),
        },
        None => stored_nonce,
    };
    let remaining = match held.checked_sub(amount) {
        Ok(v) => v,
        Err(_) => return abort(NodeError::State(StateError::InsufficientBalance)),
    };
    tree.insert(sender.as_bytes().to_vec(), encode_account(remaining, next_nonce))?;
    credit(tree, recipient, amount)
}
