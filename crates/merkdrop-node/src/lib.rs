#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Sled-backed sequencer, mock prover and ledger store for merkdrop.

pub mod error;
pub mod ledger_store;
pub mod prover;
pub mod sequencer;

pub use error::*;
pub use ledger_store::*;
pub use prover::*;
pub use sequencer::*;
