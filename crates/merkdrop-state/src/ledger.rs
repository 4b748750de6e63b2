//! Token balances held by the ledger.
//!
//! `total_supply` lives in `CommitmentState`; this tracks where that supply
//! sits, plus each account's transfer nonce. Effects are applied
//! all-or-nothing.

use hashbrown::HashMap;

use merkdrop_core::{Amount, PublicKeyBytes};

use crate::apply::Effect;
use crate::error::StateError;

/// Per-account balances and transfer nonces.
#[derive(Clone, Debug, Default)]
pub struct TokenLedger {
    balances: HashMap<PublicKeyBytes, Amount>,
    nonces: HashMap<PublicKeyBytes, u64>,
}

impl TokenLedger {
    /// Create a ledger with no balances.
    pub fn new() -> Self {
        Self {
            balances: HashMap::new(),
            nonces: HashMap::new(),
        }
    }

    /// Nonce the next transfer from `account` must carry.
    pub fn nonce_of(&self, account: &PublicKeyBytes) -> u64 {
        self.nonces.get(account).copied().unwrap_or(0)
    }

    /// Set an account's next nonce when rebuilding from storage.
    pub fn restore_nonce(&mut self, account: PublicKeyBytes, nonce: u64) {
        if nonce == 0 {
            self.nonces.remove(&account);
        } else {
            self.nonces.insert(account, nonce);
        }
    }

    /// Balance of `account` (zero if unknown).
    pub fn balance_of(&self, account: &PublicKeyBytes) -> Amount {
        self.balances.get(account).copied().unwrap_or_default()
    }

    /// Sum of all balances.
    pub fn circulating(&self) -> Result<Amount, StateError> {
        self.balances
            .values()
            .try_fold(Amount::zero(), |acc, v| acc.checked_add(*v))
            .map_err(StateError::from)
    }

    /// Non-zero balances, for persistence and inspection.
    pub fn accounts(&self) -> impl Iterator<Item = (&PublicKeyBytes, &Amount)> {
        self.balances.iter().filter(|(_, v)| **v != Amount::zero())
    }

    /// Add `amount` to `account`.
    pub fn credit(&mut self, account: PublicKeyBytes, amount: Amount) -> Result<(), StateError> {
        let updated = self.balance_of(&account).checked_add(amount)?;
        self.balances.insert(account, updated);
        Ok(())
    }

    /// Remove `amount` from `account`.
    pub fn debit(&mut self, account: PublicKeyBytes, amount: Amount) -> Result<(), StateError> {
        let updated = self
            .balance_of(&account)
            .checked_sub(amount)
            .map_err(|_| StateError::InsufficientBalance)?;
        self.balances.insert(account, updated);
        Ok(())
    }

    /// Move `amount` from `sender` to `recipient`.
    pub fn transfer(
        &mut self,
        sender: PublicKeyBytes,
        recipient: PublicKeyBytes,
        amount: Amount,
    ) -> Result<(), StateError> {
        self.debit(sender, amount)?;
        self.credit(recipient, amount)
    }

    /// Apply the balance-moving effects of a transition. `reserve` funds
    /// `Disburse`. On error nothing is applied.
    pub fn apply_effects(
        &mut self,
        reserve: &PublicKeyBytes,
        effects: &[Effect],
    ) -> Result<(), StateError> {
        let mut tmp = self.clone();
        for effect in effects {
            match effect {
                Effect::Disburse { recipient, amount } => {
                    tmp.transfer(*reserve, *recipient, *amount)?
                }
                Effect::Credit { recipient, amount } => tmp.credit(*recipient, *amount)?,
                Effect::Transfer {
                    sender,
                    recipient,
                    amount,
                    nonce,
                } => {
                    let expected = tmp.nonce_of(sender);
                    if *nonce != expected {
                        return Err(StateError::StaleNonce {
                            expected,
                            got: *nonce,
                        });
                    }
                    tmp.transfer(*sender, *recipient, *amount)?;
                    let next = expected.checked_add(1).ok_or(StateError::Overflow)?;
                    tmp.nonces.insert(*sender, next);
                }
                Effect::MarkClaimed { .. } | Effect::WriteRecord { .. } => {}
            }
        }
        *self = tmp;
        Ok(())
    }
}
