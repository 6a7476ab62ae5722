use thiserror::Error;

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("master key must be 64 hex characters: {0}")]
    InvalidMasterKey(String),

    #[error("encryption error: {0}")]
    EncryptionError(String),

    #[error("decryption error: {0}")]
    DecryptionError(String),

    #[error("encrypted package truncated: {0} bytes")]
    TruncatedPackage(usize),
}
