use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use hkdf::Hkdf;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;

/// The private-key JWK as stored under `keys/`.
#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    n: String,
    e: String,
    #[serde(default)]
    d: Option<String>,
}

/// The node's wallet: archive-network address plus the key used to sign
/// node descriptors and upload submissions.
///
/// The signing key is Ed25519, derived deterministically from the JWK
/// private material, so the same wallet file always signs identically.
pub struct Wallet {
    address: String,
    signing: SigningKey,
}

impl Wallet {
    /// Load the wallet JWK from disk. Fails fast on a missing file or a
    /// JWK without the required members.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("wallet key file not found: {:?}", path))?;
        let jwk: Jwk = serde_json::from_str(&raw)
            .with_context(|| format!("wallet key file is not a JWK: {:?}", path))?;

        if jwk.kty.is_empty() || jwk.n.is_empty() || jwk.e.is_empty() {
            return Err(anyhow!("wallet JWK is missing kty/n/e members"));
        }

        let modulus = URL_SAFE_NO_PAD
            .decode(jwk.n.as_bytes())
            .context("wallet JWK modulus is not base64url")?;
        let address = URL_SAFE_NO_PAD.encode(Sha256::digest(&modulus));

        // Signing seed: HKDF over the private exponent (or, for a
        // public-only JWK, the modulus) keeps the descriptor signature
        // stable across restarts.
        let ikm = match &jwk.d {
            Some(d) => URL_SAFE_NO_PAD
                .decode(d.as_bytes())
                .context("wallet JWK private exponent is not base64url")?,
            None => modulus.clone(),
        };
        let hk = Hkdf::<Sha256>::new(Some(b"node-descriptor-signing"), &ikm);
        let mut seed = [0u8; 32];
        hk.expand(b"ed25519-seed", &mut seed)
            .expect("32 bytes is a valid HKDF-SHA256 output length");
        let signing = SigningKey::from_bytes(&seed);

        info!("Loaded wallet {}", address);
        Ok(Self { address, signing })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message)
    }

    /// Hex signature over the SHA-256 of a payload, attached to gateway
    /// submissions.
    pub fn sign_payload(&self, payload: &[u8]) -> String {
        let digest = Sha256::digest(payload);
        hex::encode(self.sign(&digest).to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::Verifier;
    use std::io::Write;

    const TEST_JWK: &str = r#"{
        "kty": "RSA",
        "n": "sXchVtfrt3CTXL2yB1ZAHp8zBJDIlRDmHhhiliUA3BB0OoHXTSBEdP8VPYnB6d0C",
        "e": "AQAB",
        "d": "Fdo_ZWEW8FOmdXS5lYU0yeVQqc0C2bkzYGGJZJbkW_0"
    }"#;

    fn write_jwk(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_and_signs_deterministically() {
        let file = write_jwk(TEST_JWK);
        let a = Wallet::load(file.path()).unwrap();
        let b = Wallet::load(file.path()).unwrap();

        assert_eq!(a.address(), b.address());
        assert!(!a.address().is_empty());

        let sig_a = a.sign(b"node descriptor");
        let sig_b = b.sign(b"node descriptor");
        assert_eq!(sig_a.to_bytes(), sig_b.to_bytes());
        a.verifying_key()
            .verify(b"node descriptor", &sig_a)
            .unwrap();
    }

    #[test]
    fn rejects_a_jwk_without_required_members() {
        let file = write_jwk(r#"{"kty": "RSA", "n": "", "e": "AQAB"}"#);
        assert!(Wallet::load(file.path()).is_err());
    }

    #[test]
    fn rejects_a_missing_file() {
        assert!(Wallet::load(Path::new("/nonexistent/keys/wallet.json")).is_err());
    }
}
