use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use parking_lot::Mutex;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::CipherError;
use crate::keys::{minute_epoch, MasterKey, MinuteKey};
use crate::{IV_SIZE, KEY_SIZE, TAG_SIZE};

/// The result of encrypting one archive payload.
pub struct EncryptedPackage {
    /// `IV ‖ AuthTag ‖ Ciphertext`.
    pub bytes: Vec<u8>,
    /// SHA-256 of the plaintext, lowercase hex.
    pub data_hash: String,
    /// Plaintext length in bytes.
    pub size: usize,
    pub raw_key: [u8; KEY_SIZE],
    pub key_uuid: String,
    pub package_uuid: String,
}

/// Owns the master key and the cached minute key.
///
/// All batches encrypted within one minute epoch share the cached key; the
/// cache rolls over lazily on the first encryption of the next minute.
pub struct PackageCipher {
    master: MasterKey,
    minute: Mutex<Option<MinuteKey>>,
}

impl PackageCipher {
    pub fn new(master: MasterKey) -> Self {
        Self {
            master,
            minute: Mutex::new(None),
        }
    }

    /// The current minute key, generating a fresh one when the cached key's
    /// epoch has passed.
    pub fn minute_key_at(&self, now_ms: i64) -> MinuteKey {
        let epoch = minute_epoch(now_ms);
        let mut slot = self.minute.lock();
        match slot.as_ref() {
            Some(key) if key.minute_epoch == epoch => key.clone(),
            _ => {
                let key = MinuteKey::generate(&self.master, now_ms);
                *slot = Some(key.clone());
                key
            }
        }
    }

    pub fn minute_key(&self) -> MinuteKey {
        self.minute_key_at(wall_clock_ms())
    }

    /// The key UUID that would tag an upload happening now. Used by the
    /// clear pipeline, which tags the twin's key without encrypting.
    pub fn current_key_uuid(&self) -> String {
        self.minute_key().key_uuid
    }

    /// Encrypt one batch payload under the current minute key.
    pub fn encrypt_package(
        &self,
        plaintext: &[u8],
        package_uuid: &str,
    ) -> Result<EncryptedPackage, CipherError> {
        self.encrypt_package_at(plaintext, package_uuid, wall_clock_ms())
    }

    pub fn encrypt_package_at(
        &self,
        plaintext: &[u8],
        package_uuid: &str,
        now_ms: i64,
    ) -> Result<EncryptedPackage, CipherError> {
        let data_hash = hex::encode(Sha256::digest(plaintext));
        let key = self.minute_key_at(now_ms);
        let bytes = seal(&key.raw_key, plaintext)?;
        Ok(EncryptedPackage {
            bytes,
            data_hash,
            size: plaintext.len(),
            raw_key: key.raw_key,
            key_uuid: key.key_uuid,
            package_uuid: package_uuid.to_string(),
        })
    }

    /// Encrypt under a key derived from a fixed id rather than a minute key.
    /// Used for the stats snapshot, whose key must be re-derivable at
    /// restore time.
    pub fn encrypt_with_key_id(
        &self,
        key_id: &str,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        seal(&self.master.derive(key_id), plaintext)
    }

    pub fn decrypt_with_key_id(
        &self,
        key_id: &str,
        package: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        crate::decrypt::decrypt_package(&self.master.derive(key_id), package)
    }
}

/// AES-256-GCM with a random 12-byte IV, emitted as `IV ‖ Tag ‖ Ciphertext`.
fn seal(raw_key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(raw_key));

    let mut iv = [0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);

    // aes-gcm appends the tag to the ciphertext; the wire layout wants it
    // up front, after the IV.
    let sealed = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| CipherError::EncryptionError(e.to_string()))?;
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_SIZE);

    let mut out = Vec::with_capacity(IV_SIZE + TAG_SIZE + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(tag);
    out.extend_from_slice(ciphertext);
    Ok(out)
}

fn wall_clock_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decrypt::decrypt_package;

    const MASTER_HEX: &str =
        "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn cipher() -> PackageCipher {
        PackageCipher::new(MasterKey::from_hex(MASTER_HEX).unwrap())
    }

    #[test]
    fn encrypt_then_decrypt_recovers_plaintext() {
        let cipher = cipher();
        let plaintext = b"batch of aircraft rows";
        let package = cipher
            .encrypt_package_at(plaintext, "pkg-uuid", 1_751_069_515_000)
            .unwrap();

        assert_eq!(package.size, plaintext.len());
        assert_eq!(package.bytes.len(), IV_SIZE + TAG_SIZE + plaintext.len());
        assert_eq!(
            package.data_hash,
            hex::encode(Sha256::digest(plaintext))
        );

        let recovered = decrypt_package(&package.raw_key, &package.bytes).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn same_minute_shares_the_key_uuid() {
        let cipher = cipher();
        let a = cipher
            .encrypt_package_at(b"a", "p1", 60_100)
            .unwrap();
        let b = cipher
            .encrypt_package_at(b"b", "p2", 60_200)
            .unwrap();
        assert_eq!(a.key_uuid, b.key_uuid);
    }

    #[test]
    fn minute_boundary_rotates_the_key() {
        let cipher = cipher();
        let before = cipher.encrypt_package_at(b"x", "p1", 59_900).unwrap();
        let after = cipher.encrypt_package_at(b"y", "p2", 60_100).unwrap();
        assert_ne!(before.key_uuid, after.key_uuid);
        assert_ne!(before.raw_key, after.raw_key);
    }

    #[test]
    fn fixed_key_id_round_trips_without_stored_state() {
        let writer = cipher();
        let sealed = writer
            .encrypt_with_key_id("system-stats-backup", b"{\"polls\":7}")
            .unwrap();

        // A fresh instance with the same master key can decrypt.
        let reader = cipher();
        let plain = reader
            .decrypt_with_key_id("system-stats-backup", &sealed)
            .unwrap();
        assert_eq!(plain, b"{\"polls\":7}");
    }

    #[test]
    fn tampering_is_rejected() {
        let cipher = cipher();
        let package = cipher
            .encrypt_package_at(b"payload", "pkg", 0)
            .unwrap();
        let mut tampered = package.bytes.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        assert!(decrypt_package(&package.raw_key, &tampered).is_err());
    }
}
