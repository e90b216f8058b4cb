//! Ed25519 signing and P2PKH script derivation.
//!
//! # Signing scheme
//!
//! Transaction inputs are signed over a **sighash** that commits to the
//! coinbase flag, every input's prevout, and every output. Signatures and
//! public keys are excluded so inputs can be signed independently in any
//! order; the index of the input being signed is mixed in so a signature
//! cannot be transplanted onto another input of the same transaction.
//!
//! The script payload is `hash160 = RIPEMD160(SHA256(pubkey))`, the
//! classic P2PKH construction.

use ed25519_dalek::{Signer, Verifier};
use ripemd::Ripemd160;
use sha2::Digest;
use std::fmt;

use crate::codec::{self, Encodable};
use crate::error::CryptoError;
use crate::hash::{Hash256, dsha256, sha256};
use crate::types::{Script, Transaction};

/// Ed25519 keypair for signing transaction inputs.
pub struct KeyPair {
    signing_key: ed25519_dalek::SigningKey,
}

impl KeyPair {
    /// Generate a random keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            signing_key: ed25519_dalek::SigningKey::generate(&mut csprng),
        }
    }

    /// Create a keypair from 32-byte secret key material.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self {
            signing_key: ed25519_dalek::SigningKey::from_bytes(&bytes),
        }
    }

    /// Derive the public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    /// The P2PKH script locking outputs to this keypair.
    pub fn script(&self) -> Script {
        self.public_key().script()
    }

    /// Raw secret key bytes. Handle with care.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Sign a message, returning the raw 64-byte Ed25519 signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self::from_secret_bytes(self.secret_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("script", &self.script())
            .finish_non_exhaustive()
    }
}

/// Ed25519 public key for verifying signatures and deriving scripts.
#[derive(Clone)]
pub struct PublicKey {
    verifying_key: ed25519_dalek::VerifyingKey,
}

impl PublicKey {
    /// Create a public key from raw 32-byte material.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let vk = ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { verifying_key: vk })
    }

    /// Raw public key bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// The P2PKH script for this key: `hash160(pubkey)`.
    pub fn script(&self) -> Script {
        Script(hash160(&self.to_bytes()))
    }

    /// Verify an Ed25519 signature on a message.
    pub fn verify(&self, message: &[u8], signature: &[u8; 64]) -> Result<(), CryptoError> {
        let sig = ed25519_dalek::Signature::from_bytes(signature);
        self.verifying_key
            .verify(message, &sig)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.to_bytes()))
    }
}

/// `RIPEMD160(SHA256(data))` — the 20-byte P2PKH payload.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(sha256(data)).into()
}

/// Compute the signing hash for a transaction input.
///
/// Commits to the coinbase flag, all input prevouts, all outputs, and the
/// index of the input being signed, double-SHA256 over the canonical
/// encodings of those fields.
pub fn sighash(tx: &Transaction, input_index: usize) -> Result<Hash256, CryptoError> {
    if input_index >= tx.inputs.len() {
        return Err(CryptoError::InputIndexOutOfBounds {
            index: input_index,
            len: tx.inputs.len(),
        });
    }

    let mut data = Vec::new();
    data.push(tx.is_coinbase as u8);

    codec::write_varint(&mut data, tx.inputs.len() as u64);
    for input in &tx.inputs {
        input.prevout.encode(&mut data);
    }

    codec::write_varint(&mut data, tx.outputs.len() as u64);
    for output in &tx.outputs {
        output.encode(&mut data);
    }

    data.extend_from_slice(&(input_index as u32).to_le_bytes());

    Ok(dsha256(&data))
}

/// Sign a transaction input in place, filling its signature and pubkey slots.
pub fn sign_input(
    tx: &mut Transaction,
    input_index: usize,
    keypair: &KeyPair,
) -> Result<(), CryptoError> {
    let digest = sighash(tx, input_index)?;
    let signature = keypair.sign(digest.as_bytes());
    tx.inputs[input_index].signature = signature.to_vec();
    tx.inputs[input_index].pubkey = keypair.public_key().to_bytes().to_vec();
    Ok(())
}

/// Verify a transaction input against the script it claims to spend.
///
/// Checks that the input's public key hashes to `expected_script` and that
/// its signature verifies over the input's sighash.
pub fn verify_input(
    tx: &Transaction,
    input_index: usize,
    expected_script: &Script,
) -> Result<(), CryptoError> {
    let input = tx
        .inputs
        .get(input_index)
        .ok_or(CryptoError::InputIndexOutOfBounds {
            index: input_index,
            len: tx.inputs.len(),
        })?;

    let pubkey_bytes: [u8; 32] = input
        .pubkey
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    let pubkey = PublicKey::from_bytes(&pubkey_bytes)?;

    if &pubkey.script() != expected_script {
        return Err(CryptoError::VerificationFailed);
    }

    let signature: [u8; 64] = input
        .signature
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidSignature)?;

    let digest = sighash(tx, input_index)?;
    pubkey.verify(digest.as_bytes(), &signature)
}
