// SPDX-License-Identifier: MIT OR Apache-2.0
//! Secure token vault: host-bound encryption of the bearer token at rest.
//!
//! The vault is the only component that touches key material. Everyone
//! else sees either the plaintext token (in memory) or an opaque
//! [`SealedToken`]. A blob sealed on one machine/account context does not
//! unseal on another; unseal failure is an unrecoverable signal for this
//! install and surfaces as [`VaultError::UnsealFailed`]; there is no
//! plaintext fallback.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod host;

pub use host::HostContext;

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use outpost_core::SealedToken;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Blob framing version.
const BLOB_VERSION: u8 = 1;
/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;
/// GCM authentication tag length in bytes.
const TAG_LEN: usize = 16;
/// Domain-separation label mixed into the key derivation.
const KEY_DOMAIN: &str = "outpost.vault.v1";

/// Errors from sealing and unsealing.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// The OS crypto/randomness facility is unavailable.
    #[error("crypto facility unavailable: {0}")]
    CryptoUnavailable(String),
    /// The blob is structurally not a sealed token.
    #[error("sealed blob is malformed")]
    MalformedBlob,
    /// Decryption failed: wrong host, wrong account, wrong entropy, or
    /// tampered blob. Indistinguishable on purpose.
    #[error("token unseal failed on this host context")]
    UnsealFailed,
}

/// Capability for sealing the bearer token at rest.
///
/// The default implementation is [`HostBoundVault`]; tests substitute
/// their own context to simulate foreign hosts.
pub trait TokenVault: Send + Sync {
    /// Encrypt `plaintext`, binding it to this host context and the
    /// optional `entropy`. Each call yields a fresh blob.
    fn seal(&self, plaintext: &[u8], entropy: Option<&[u8]>) -> Result<SealedToken, VaultError>;

    /// Decrypt a blob previously produced by [`TokenVault::seal`] under
    /// the same host context and identical `entropy`.
    fn unseal(&self, sealed: &SealedToken, entropy: Option<&[u8]>) -> Result<Vec<u8>, VaultError>;
}

/// Portable host-bound vault.
///
/// The AES-256 key derives from stable host facts (machine id and account
/// name) under a fixed domain label, so the sealed blob is only useful on
/// the machine and account that produced it. Optional entropy is bound as
/// AEAD associated data: unseal requires the identical bytes.
#[derive(Debug, Clone)]
pub struct HostBoundVault {
    context: HostContext,
}

impl HostBoundVault {
    /// Vault bound to the current machine and account.
    ///
    /// When no machine-id source exists the binding weakens to
    /// hostname + account; this is logged once per process.
    pub fn new() -> Self {
        Self {
            context: HostContext::detect(),
        }
    }

    /// Vault bound to an explicit context. Intended for tests.
    pub fn with_context(context: HostContext) -> Self {
        Self { context }
    }

    fn key(&self) -> Key<Aes256Gcm> {
        let mut hasher = Sha256::new();
        hasher.update(KEY_DOMAIN.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.context.machine_binding().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.context.account.as_bytes());
        let digest = hasher.finalize();
        Key::<Aes256Gcm>::clone_from_slice(&digest)
    }
}

impl Default for HostBoundVault {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenVault for HostBoundVault {
    fn seal(&self, plaintext: &[u8], entropy: Option<&[u8]>) -> Result<SealedToken, VaultError> {
        let cipher = Aes256Gcm::new(&self.key());

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng()
            .try_fill_bytes(&mut nonce_bytes)
            .map_err(|e| VaultError::CryptoUnavailable(e.to_string()))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: entropy.unwrap_or_default(),
                },
            )
            .map_err(|_| VaultError::CryptoUnavailable("AEAD encryption failed".into()))?;

        let mut blob = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        blob.push(BLOB_VERSION);
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);

        SealedToken::from_bytes(blob).map_err(|_| VaultError::MalformedBlob)
    }

    fn unseal(&self, sealed: &SealedToken, entropy: Option<&[u8]>) -> Result<Vec<u8>, VaultError> {
        let blob = sealed.as_bytes();
        if blob.len() < 1 + NONCE_LEN + TAG_LEN {
            return Err(VaultError::MalformedBlob);
        }
        if blob[0] != BLOB_VERSION {
            return Err(VaultError::MalformedBlob);
        }

        let nonce = Nonce::from_slice(&blob[1..1 + NONCE_LEN]);
        let ciphertext = &blob[1 + NONCE_LEN..];

        let cipher = Aes256Gcm::new(&self.key());
        cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad: entropy.unwrap_or_default(),
                },
            )
            .map_err(|_| VaultError::UnsealFailed)
    }
}
