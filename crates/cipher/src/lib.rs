//! Authenticated encryption for archive packages.
//!
//! Packages are encrypted with AES-256-GCM under a key derived from the
//! node's master secret by HKDF-SHA256. Keys rotate at minute boundaries:
//! every batch encrypted within the same minute epoch shares one key and one
//! key UUID of the form `enckey-{minuteEpoch}-{uuid}`. Stats snapshots use a
//! fixed derivation id instead, so the key can be re-derived at restore time
//! without any stored state.
//!
//! Wire layout of an encrypted package: `IV(12) ‖ AuthTag(16) ‖ Ciphertext`.

mod decrypt;
mod encrypt;
mod error;
mod keys;

pub use decrypt::{decrypt_package, decrypt_with_key_id};
pub use encrypt::{EncryptedPackage, PackageCipher};
pub use error::CipherError;
pub use keys::{minute_epoch, MasterKey, MinuteKey};

/// AES-GCM nonce length in bytes.
pub const IV_SIZE: usize = 12;
/// AES-GCM authentication tag length in bytes.
pub const TAG_SIZE: usize = 16;
/// Derived key length in bytes.
pub const KEY_SIZE: usize = 32;
/// HKDF info string binding derived keys to this scheme.
pub const HKDF_INFO: &[u8] = b"arweave-package-encryption";
