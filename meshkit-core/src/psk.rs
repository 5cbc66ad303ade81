//! Channel pre-shared key resolution.
//!
//! Accepted forms:
//! - `random`: a fresh 256 bit key
//! - `none`: no encryption
//! - `default`: the well-known default key (`simple1`)
//! - `simple0`..`simple254`: one of the well-known keys
//! - `0x<hex>` or `base64:<b64>` or plain base64 decoding to 16 or 32 bytes
//! - anything else: a passphrase, hashed to a 256 bit key

use crate::error::SessionError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Clone, PartialEq, Eq)]
pub enum Psk {
    None,
    Default,
    /// Index into the firmware's well-known key list
    Simple(u8),
    Key(Vec<u8>),
}

impl Psk {
    pub fn resolve(raw: &str) -> Result<Self, SessionError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SessionError::settings("psk", "empty key"));
        }

        match raw.to_ascii_lowercase().as_str() {
            "random" => return Ok(Self::random()),
            "none" => return Ok(Self::None),
            "default" => return Ok(Self::Default),
            _ => {}
        }

        if let Some(n) = raw.strip_prefix("simple")
            && !n.is_empty()
            && n.bytes().all(|b| b.is_ascii_digit())
        {
            let n: u8 = n
                .parse()
                .ok()
                .filter(|n| *n < 255)
                .ok_or_else(|| SessionError::settings("psk", format!("bad simple key '{raw}'")))?;
            return Ok(Self::Simple(n));
        }

        if let Some(hex_key) = raw.strip_prefix("0x") {
            let key = hex::decode(hex_key)
                .map_err(|e| SessionError::settings("psk", format!("bad hex key: {e}")))?;
            return Self::checked_key(key);
        }

        if let Some(b64) = raw.strip_prefix("base64:") {
            let key = STANDARD
                .decode(b64)
                .map_err(|e| SessionError::settings("psk", format!("bad base64 key: {e}")))?;
            return Self::checked_key(key);
        }

        if let Ok(key) = STANDARD.decode(raw)
            && is_aes_len(key.len())
        {
            return Ok(Self::Key(key));
        }

        Ok(Self::passphrase(raw))
    }

    pub fn random() -> Self {
        let mut key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self::Key(key)
    }

    pub fn passphrase(phrase: &str) -> Self {
        Self::Key(Sha256::digest(phrase.as_bytes()).to_vec())
    }

    fn checked_key(key: Vec<u8>) -> Result<Self, SessionError> {
        if is_aes_len(key.len()) {
            Ok(Self::Key(key))
        } else {
            Err(SessionError::settings(
                "psk",
                format!("key must be 16 or 32 bytes, got {}", key.len()),
            ))
        }
    }

    /// Bytes for `ChannelSettings::psk`
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::None => vec![0],
            Self::Default => vec![1],
            Self::Simple(n) => vec![n + 1],
            Self::Key(key) => key.clone(),
        }
    }

    /// Base64 form, the way Meshtastic apps display channel keys
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }
}

fn is_aes_len(len: usize) -> bool {
    len == 16 || len == 32
}

// Keys never end up in logs
impl fmt::Debug for Psk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("Psk::None"),
            Self::Default => f.write_str("Psk::Default"),
            Self::Simple(n) => write!(f, "Psk::Simple({n})"),
            Self::Key(key) => write!(f, "Psk::Key(<{} bytes>)", key.len()),
        }
    }
}
