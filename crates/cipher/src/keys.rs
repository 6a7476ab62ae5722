use hkdf::Hkdf;
use sha2::Sha256;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CipherError;
use crate::{HKDF_INFO, KEY_SIZE};

/// The minute-rotation index: `floor(wallClockMillis / 60000)`.
pub fn minute_epoch(now_ms: i64) -> i64 {
    now_ms.div_euclid(60_000)
}

/// The node's master secret, loaded from configuration as 64 hex chars.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; KEY_SIZE]);

impl MasterKey {
    pub fn from_hex(hex_key: &str) -> Result<Self, CipherError> {
        let trimmed = hex_key.trim();
        if trimmed.len() != KEY_SIZE * 2 {
            return Err(CipherError::InvalidMasterKey(format!(
                "expected {} characters, got {}",
                KEY_SIZE * 2,
                trimmed.len()
            )));
        }
        let bytes = hex::decode(trimmed)
            .map_err(|e| CipherError::InvalidMasterKey(e.to_string()))?;
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&bytes);
        Ok(Self(key))
    }

    /// Derive a 32-byte key for `key_id` (a minute key UUID or the fixed
    /// snapshot id). HKDF-SHA256 with the id as salt.
    pub fn derive(&self, key_id: &str) -> [u8; KEY_SIZE] {
        let hk = Hkdf::<Sha256>::new(Some(key_id.as_bytes()), &self.0);
        let mut okm = [0u8; KEY_SIZE];
        hk.expand(HKDF_INFO, &mut okm)
            .expect("32 bytes is a valid HKDF-SHA256 output length");
        okm
    }
}

/// A derived key scoped to one minute epoch.
#[derive(Clone)]
pub struct MinuteKey {
    pub key_uuid: String,
    pub raw_key: [u8; KEY_SIZE],
    pub minute_epoch: i64,
}

impl MinuteKey {
    pub fn generate(master: &MasterKey, now_ms: i64) -> Self {
        let epoch = minute_epoch(now_ms);
        let key_uuid = format!("enckey-{}-{}", epoch, Uuid::new_v4());
        let raw_key = master.derive(&key_uuid);
        Self {
            key_uuid,
            raw_key,
            minute_epoch: epoch,
        }
    }
}
