#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! merkdrop state machine.
//!
//! Responsibilities:
//! - Off-chain account tree and its membership witnesses
//! - Nullifier map recording which tree slots have claimed
//! - Pure transitions over the on-chain `CommitmentState` (claim, mint,
//!   send, award, re-anchor)
//! - Balances and the `World` context tying the pieces together
//!
//! Proofs of correct execution are produced outside this crate; the
//! transition functions here are deterministic so a prover can wrap them.

pub mod apply;
pub mod commitment;
pub mod error;
pub mod ledger;
pub mod merkle;
pub mod nullifier;
pub mod record;
pub mod world;

pub use apply::*;
pub use commitment::*;
pub use error::*;
pub use ledger::*;
pub use merkle::*;
pub use nullifier::*;
pub use record::*;
pub use world::*;
