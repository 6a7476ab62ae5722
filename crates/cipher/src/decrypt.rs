use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use crate::error::CipherError;
use crate::keys::MasterKey;
use crate::{IV_SIZE, KEY_SIZE, TAG_SIZE};

/// Decrypt an `IV ‖ Tag ‖ Ciphertext` package with a raw derived key.
pub fn decrypt_package(
    raw_key: &[u8; KEY_SIZE],
    package: &[u8],
) -> Result<Vec<u8>, CipherError> {
    if package.len() < IV_SIZE + TAG_SIZE {
        return Err(CipherError::TruncatedPackage(package.len()));
    }
    let iv = &package[..IV_SIZE];
    let tag = &package[IV_SIZE..IV_SIZE + TAG_SIZE];
    let ciphertext = &package[IV_SIZE + TAG_SIZE..];

    // aes-gcm expects the tag appended to the ciphertext.
    let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_SIZE);
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(tag);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(raw_key));
    cipher
        .decrypt(Nonce::from_slice(iv), sealed.as_slice())
        .map_err(|_| {
            CipherError::DecryptionError("wrong key or corrupted package".to_string())
        })
}

/// Decrypt with a key re-derived from the master secret and a key id.
pub fn decrypt_with_key_id(
    master: &MasterKey,
    key_id: &str,
    package: &[u8],
) -> Result<Vec<u8>, CipherError> {
    decrypt_package(&master.derive(key_id), package)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_packages_are_rejected() {
        let key = [0u8; KEY_SIZE];
        assert!(matches!(
            decrypt_package(&key, &[0u8; 10]),
            Err(CipherError::TruncatedPackage(10))
        ));
    }
}
