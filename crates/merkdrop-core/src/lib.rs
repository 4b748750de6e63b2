#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! merkdrop core: canonical types, constants, hashing, serialization and
//! admin-signature helpers shared by the state machine and the node.

pub mod constants;
pub mod crypto;
pub mod serialization;
pub mod types;

pub use constants::*;
pub use crypto::*;
pub use serialization::*;
pub use types::*;
