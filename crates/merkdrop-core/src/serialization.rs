//! Canonical serialization and hashing helpers.
//!
//! Rule: everything that is hashed or signed is encoded with Borsh or with an
//! explicit fixed layout. Never hash JSON.

use crate::constants::*;
use crate::types::{CoreError, Hash32};
use borsh::to_vec;

/// Encode a value with canonical Borsh encoding.
pub fn to_bytes<T: borsh::BorshSerialize>(v: &T) -> Result<Vec<u8>, CoreError> {
    to_vec(v).map_err(|_| CoreError::InvalidValue("borsh serialization failed"))
}

/// Hash bytes with blake3 under a domain separator and return 32 bytes.
pub fn hash32(domain_sep: &[u8], bytes: &[u8]) -> Hash32 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(domain_sep);
    hasher.update(bytes);
    Hash32(*hasher.finalize().as_bytes())
}

/// Hash two child digests into their parent: `BLAKE3(domain || left || right)`.
pub fn hash_pair(domain_sep: &[u8], left: &Hash32, right: &Hash32) -> Hash32 {
    let mut bytes = [0u8; 2 * HASH32_LEN];
    bytes[..HASH32_LEN].copy_from_slice(left.as_bytes());
    bytes[HASH32_LEN..].copy_from_slice(right.as_bytes());
    hash32(domain_sep, &bytes)
}
