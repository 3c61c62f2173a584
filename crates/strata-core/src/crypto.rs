//! Ed25519 block signing and verification.
//!
//! A block's generator signs the bincode encoding of its header and
//! transactions. The resulting 64-byte signature is the block's identifier,
//! so a block that fails its own signature check has no trustworthy identity
//! and must never reach the history store.

use ed25519_dalek::{Signer, Verifier};
use std::fmt;

use crate::error::{CryptoError, StrataError};
use crate::types::{Block, BlockHeader, BlockId, Transaction};

/// Ed25519 keypair of a block generator.
///
/// Wraps [`ed25519_dalek::SigningKey`]. Use [`KeyPair::generate`] for random
/// keys or [`KeyPair::from_secret_bytes`] for deterministic derivation.
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

    /// Raw 32-byte public key.
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Sign a message, returning the raw 64-byte Ed25519 signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &hex::encode(self.public_key_bytes()))
            .finish_non_exhaustive()
    }
}

/// Sign a block on behalf of `keypair`.
///
/// The header's `generator` field is overwritten with the keypair's public
/// key before signing.
pub fn sign_block(
    mut header: BlockHeader,
    transactions: Vec<Transaction>,
    keypair: &KeyPair,
) -> Result<Block, StrataError> {
    header.generator = keypair.public_key_bytes();
    let message = Block::signing_bytes(&header, &transactions)?;
    let signature = BlockId(keypair.sign(&message));
    Ok(Block {
        header,
        transactions,
        signature,
    })
}

/// Verify a block's signature against its generator key.
pub fn verify_block(block: &Block) -> Result<(), StrataError> {
    let key = ed25519_dalek::VerifyingKey::from_bytes(&block.header.generator)
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    let message = Block::signing_bytes(&block.header, &block.transactions)?;
    let signature = ed25519_dalek::Signature::from_bytes(block.signature.as_bytes());
    key.verify(&message, &signature)
        .map_err(|_| CryptoError::VerificationFailed)?;
    Ok(())
}
