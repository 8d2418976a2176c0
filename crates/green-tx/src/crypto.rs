//! Hash, ECDSA and scalar helpers over `secp256k1` and `bitcoin::hashes`

use crate::{Error, Result};
use bitcoin::hashes::hmac::{Hmac, HmacEngine};
use bitcoin::hashes::{hash160, sha256, sha256d, Hash, HashEngine};
use bitcoin::sighash::EcdsaSighashType;
use elements::confidential::Nonce;
use once_cell::sync::Lazy;
use rand::RngCore;
use secp256k1::ecdsa::Signature;
use secp256k1::{All, Message, PublicKey, Scalar, Secp256k1, SecretKey};

/// Shared signing/verification context
pub(crate) static SECP: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Sign all inputs and outputs
pub const SIGHASH_ALL: u32 = 0x01;
/// Sign the matching output and only this input
pub const SIGHASH_SINGLE_ANYONECANPAY: u32 = 0x83;

/// All-zero 32-byte scalar
pub const ZERO_SCALAR: [u8; 32] = [0u8; 32];

/// SHA-256
pub fn sha256(data: &[u8]) -> [u8; 32] {
    sha256::Hash::hash(data).to_byte_array()
}

/// Double SHA-256
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    sha256d::Hash::hash(data).to_byte_array()
}

/// RIPEMD-160 of SHA-256
pub fn hash160(data: &[u8]) -> [u8; 20] {
    hash160::Hash::hash(data).to_byte_array()
}

/// HMAC-SHA256 over the concatenation of `parts`
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut engine = HmacEngine::<sha256::Hash>::new(key);
    for part in parts {
        engine.input(part);
    }
    Hmac::<sha256::Hash>::from_engine(engine).to_byte_array()
}

/// Fresh random secret key
pub fn random_secret_key() -> SecretKey {
    SecretKey::new(&mut rand::thread_rng())
}

/// Fresh random 32 bytes
pub fn random_bytes() -> [u8; 32] {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// ECDSA-sign a 32-byte hash, optionally grinding for a low-R signature
pub fn sign_hash(key: &SecretKey, hash: &[u8; 32], low_r: bool) -> Result<Signature> {
    let msg = Message::from_digest(*hash);
    Ok(if low_r {
        SECP.sign_ecdsa_low_r(&msg, key)
    } else {
        SECP.sign_ecdsa(&msg, key)
    })
}

/// Verify an ECDSA signature, accepting either S form
pub fn verify_hash(public_key: &PublicKey, hash: &[u8; 32], signature: &Signature) -> bool {
    let msg = Message::from_digest(*hash);
    let mut normalized = *signature;
    normalized.normalize_s();
    SECP.verify_ecdsa(&msg, &normalized, public_key).is_ok()
}

fn sighash_type(sighash: u32) -> Result<EcdsaSighashType> {
    EcdsaSighashType::from_standard(sighash).map_err(|_| Error::UnsupportedSighash(sighash))
}

/// DER encoding with the trailing sighash byte
pub fn der_with_sighash(signature: &Signature, sighash: u32) -> Result<Vec<u8>> {
    let signature = bitcoin::ecdsa::Signature {
        signature: *signature,
        sighash_type: sighash_type(sighash)?,
    };
    Ok(signature.to_vec())
}

/// Split a DER signature with trailing sighash byte
pub fn parse_der_with_sighash(bytes: &[u8]) -> Result<(Signature, u32)> {
    let parsed = bitcoin::ecdsa::Signature::from_slice(bytes)
        .map_err(|e| Error::Encoding(format!("bad signature: {}", e)))?;
    Ok((parsed.signature, parsed.sighash_type.to_u32()))
}

/// Nonce shared by the holder of `secret` and of the key behind `public`:
/// the range proof nonce of an output whose nonce commitment is the public
/// key of `secret`
pub fn ecdh_nonce(public: &PublicKey, secret: &SecretKey) -> [u8; 32] {
    let (_, shared) = Nonce::with_ephemeral_sk(&SECP, *secret, public);
    shared.secret_bytes()
}

/// Parse a compressed public key
pub fn public_key(bytes: &[u8]) -> Result<PublicKey> {
    PublicKey::from_slice(bytes).map_err(|e| Error::InvalidKey(format!("public key: {}", e)))
}

/// True for the all-zero scalar
pub fn is_zero_scalar(scalar: &[u8; 32]) -> bool {
    scalar.iter().all(|b| *b == 0)
}

/// `a + b` modulo the curve order; zero stands for the additive identity
pub fn scalar_add(a: &[u8; 32], b: &[u8; 32]) -> Result<[u8; 32]> {
    if is_zero_scalar(a) {
        SecretKey::from_slice(b)?;
        return Ok(*b);
    }
    if is_zero_scalar(b) {
        SecretKey::from_slice(a)?;
        return Ok(*a);
    }
    let key = SecretKey::from_slice(a)?;
    let tweak = Scalar::from_be_bytes(*b)
        .map_err(|_| Error::Crypto("scalar out of range".to_string()))?;
    // The only failure left is a zero sum
    Ok(key
        .add_tweak(&tweak)
        .map(|sum| sum.secret_bytes())
        .unwrap_or(ZERO_SCALAR))
}
