// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bearer-token handles: the in-memory shared cell and the sealed
//! at-rest form.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::{Arc, RwLock};

/// In-memory bearer token shared by the HTTP client, the control channel,
/// and the refresh procedure.
///
/// Readers observe either the old or the new value, never a torn one.
/// Only the refresh procedure writes.
#[derive(Debug, Clone, Default)]
pub struct SharedToken {
    inner: Arc<RwLock<String>>,
}

impl SharedToken {
    /// Create a cell holding `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(token.into())),
        }
    }

    /// Snapshot the current token.
    pub fn get(&self) -> String {
        self.inner.read().expect("token lock poisoned").clone()
    }

    /// Atomically replace the token.
    pub fn set(&self, token: impl Into<String>) {
        *self.inner.write().expect("token lock poisoned") = token.into();
    }
}

/// Errors decoding a sealed token from its text form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SealedTokenError {
    /// The base64 text could not be decoded.
    #[error("sealed token is not valid base64")]
    InvalidBase64,
    /// The blob is empty.
    #[error("sealed token is empty")]
    Empty,
}

/// Opaque, host-bound encrypted form of the bearer token.
///
/// Produced and consumed only by the vault; every other component treats
/// it as bytes. Serialises as a base64 string (the on-disk form).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedToken(Vec<u8>);

impl SealedToken {
    /// Wrap raw sealed bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, SealedTokenError> {
        if bytes.is_empty() {
            return Err(SealedTokenError::Empty);
        }
        Ok(Self(bytes))
    }

    /// Parse the on-disk base64 form.
    pub fn from_base64(text: &str) -> Result<Self, SealedTokenError> {
        let bytes = BASE64
            .decode(text.trim())
            .map_err(|_| SealedTokenError::InvalidBase64)?;
        Self::from_bytes(bytes)
    }

    /// The sealed bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The on-disk base64 form.
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.0)
    }
}

impl fmt::Display for SealedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl Serialize for SealedToken {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for SealedToken {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let text = String::deserialize(de)?;
        SealedToken::from_base64(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_token_swaps_atomically() {
        let t = SharedToken::new("t0");
        assert_eq!(t.get(), "t0");
        let clone = t.clone();
        clone.set("t1");
        assert_eq!(t.get(), "t1");
    }

    #[test]
    fn sealed_token_base64_round_trip() {
        let sealed = SealedToken::from_bytes(vec![1, 2, 3, 255]).unwrap();
        let text = sealed.to_base64();
        let back = SealedToken::from_base64(&text).unwrap();
        assert_eq!(back, sealed);
    }

    #[test]
    fn empty_and_garbage_blobs_rejected() {
        assert_eq!(SealedToken::from_bytes(vec![]), Err(SealedTokenError::Empty));
        assert_eq!(
            SealedToken::from_base64("!!not base64!!"),
            Err(SealedTokenError::InvalidBase64)
        );
    }

    #[test]
    fn serde_uses_base64_string() {
        let sealed = SealedToken::from_bytes(vec![0xde, 0xad]).unwrap();
        let json = serde_json::to_string(&sealed).unwrap();
        assert_eq!(json, format!("\"{}\"", sealed.to_base64()));
        let back: SealedToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sealed);
    }
}
