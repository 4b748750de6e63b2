//! Admin authorization over secp256k1 ECDSA.
//!
//! The ledger only ever *verifies* admin signatures. Signing helpers exist for
//! operator tooling and fixtures.

use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};

use crate::constants::*;
use crate::types::{AdminSignature, Amount, CoreError, Hash32, PublicKeyBytes};

/// Message the admin signs to authorize minting `amount` to `recipient`.
///
/// Layout: `DS_MINT || amount (u64 LE) || recipient (33 bytes)`.
pub fn mint_message(amount: Amount, recipient: &PublicKeyBytes) -> Vec<u8> {
    authorization_message(DS_MINT, amount, recipient)
}

/// Message the admin signs to authorize a claim payout to `recipient`.
///
/// Layout: `DS_CLAIM || CLAIM_AMOUNT (u64 LE) || recipient (33 bytes)`.
pub fn claim_message(recipient: &PublicKeyBytes) -> Vec<u8> {
    authorization_message(DS_CLAIM, Amount::from_units(CLAIM_AMOUNT), recipient)
}

/// Message the admin signs to re-anchor the commitment at `root`.
///
/// Layout: `DS_SET_COMMITMENT || root (32 bytes)`.
pub fn commitment_message(root: &Hash32) -> Vec<u8> {
    let mut msg = Vec::with_capacity(DS_SET_COMMITMENT.len() + HASH32_LEN);
    msg.extend_from_slice(DS_SET_COMMITMENT);
    msg.extend_from_slice(root.as_bytes());
    msg
}

/// Message an account holder signs to send `amount` to `recipient`.
///
/// Layout: `DS_SEND || amount (u64 LE) || recipient (33 bytes) || nonce (u64 LE)`.
/// `nonce` is the sender's transfer count, so each signature spends once.
pub fn send_message(amount: Amount, recipient: &PublicKeyBytes, nonce: u64) -> Vec<u8> {
    let mut msg = authorization_message(DS_SEND, amount, recipient);
    msg.extend_from_slice(&nonce.to_le_bytes());
    msg
}

fn authorization_message(domain_sep: &[u8], amount: Amount, recipient: &PublicKeyBytes) -> Vec<u8> {
    let mut msg = Vec::with_capacity(domain_sep.len() + 8 + PUBLIC_KEY_LEN);
    msg.extend_from_slice(domain_sep);
    msg.extend_from_slice(&amount.units().to_le_bytes());
    msg.extend_from_slice(recipient.as_bytes());
    msg
}

/// Returns `true` iff `sig` is a valid signature by `signer` over `message`.
///
/// Malformed keys or signatures verify as `false`, never as an error.
pub fn verify_admin(sig: &AdminSignature, signer: &PublicKeyBytes, message: &[u8]) -> bool {
    let Ok(vk) = VerifyingKey::from_sec1_bytes(signer.as_bytes()) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(sig.as_bytes()) else {
        return false;
    };
    vk.verify(message, &signature).is_ok()
}

/// Sign `message` with `sk`.
pub fn sign_message(sk: &SigningKey, message: &[u8]) -> AdminSignature {
    let sig: Signature = sk.sign(message);
    let mut out = [0u8; SIGNATURE_LEN];
    out.copy_from_slice(&sig.to_bytes());
    AdminSignature(out)
}

/// Compressed public key for a signing key.
pub fn public_key_of(sk: &SigningKey) -> PublicKeyBytes {
    let point = sk.verifying_key().to_encoded_point(true);
    let mut out = [0u8; PUBLIC_KEY_LEN];
    out.copy_from_slice(point.as_bytes());
    PublicKeyBytes(out)
}

/// Parse a hex-encoded 32-byte secp256k1 secret key.
pub fn signing_key_from_hex(s: &str) -> Result<SigningKey, CoreError> {
    let s = s.trim();
    let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))?;
    SigningKey::from_slice(&bytes).map_err(|_| CoreError::InvalidKey("not a secp256k1 secret key"))
}
