use anyhow::{anyhow, Context, Result};
use rand::RngCore;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Alias reachable from inside a container when an antenna URL points at
/// the host's loopback.
const HOST_GATEWAY_ALIAS: &str = "host.docker.internal";

#[derive(Debug, Clone, Deserialize)]
pub struct AntennaConfig {
    pub id: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Filename in the local `keys/` directory holding the JWK.
    pub private_key_name: String,
    /// Derived from the key file at boot; a configured value is ignored.
    #[serde(default)]
    pub public_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    /// Master encryption key, 64 hex chars.
    pub encryption_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Session secret for the operator surface; generated when missing.
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// When false the operator HTTP surface answers 404 on every request.
    pub enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub gateway_url: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            gateway_url: "https://gateway.derad.network".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeyShareConfig {
    pub url: String,
}

impl Default for KeyShareConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:4800".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub beast_port: u16,
    pub api_port: u16,
    pub node_type: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            beast_port: 30005,
            api_port: 8080,
            node_type: "ground-station".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub antennas: Vec<AntennaConfig>,
    pub wallet: WalletConfig,
    pub data: DataConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub keyshare: KeyShareConfig,
    #[serde(default)]
    pub node: NodeConfig,
}

impl Config {
    pub fn from_toml(toml_str: &str) -> Result<Config, toml::de::Error> {
        toml::de::from_str(toml_str)
    }

    /// Load, validate and normalize the configuration.
    pub fn load(path: &Path) -> Result<Config> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {:?}", path))?;
        let mut config =
            Config::from_toml(&raw).with_context(|| format!("parsing config file {:?}", path))?;

        config.validate()?;
        config.ensure_auth_secret();
        if running_in_container() {
            config.rewrite_local_urls();
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.antennas.iter().any(|a| a.enabled) {
            return Err(anyhow!("at least one enabled antenna is required"));
        }
        let key = self.data.encryption_key.trim();
        if key.len() != 64 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(anyhow!("data.encryption_key must be 64 hex characters"));
        }
        if self.wallet.private_key_name.trim().is_empty() {
            return Err(anyhow!("wallet.private_key_name is required"));
        }
        if self.database.path.trim().is_empty() {
            return Err(anyhow!("database.path is required"));
        }
        Ok(())
    }

    /// Path of the wallet JWK under the local `keys/` directory.
    pub fn wallet_key_path(&self) -> PathBuf {
        Path::new("keys").join(&self.wallet.private_key_name)
    }

    pub fn enabled_antennas(&self) -> impl Iterator<Item = &AntennaConfig> {
        self.antennas.iter().filter(|a| a.enabled)
    }

    fn ensure_auth_secret(&mut self) {
        if self.auth.secret.as_deref().map_or(true, |s| s.is_empty()) {
            let mut bytes = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut bytes);
            self.auth.secret = Some(hex::encode(bytes));
            warn!("auth.secret was missing, generated one for this run");
        }
    }

    fn rewrite_local_urls(&mut self) {
        for antenna in &mut self.antennas {
            let rewritten = rewrite_loopback(&antenna.url);
            if rewritten != antenna.url {
                info!(
                    "Antenna {} URL rewritten for container networking: {} -> {}",
                    antenna.id, antenna.url, rewritten
                );
                antenna.url = rewritten;
            }
        }
    }
}

fn default_true() -> bool {
    true
}

fn running_in_container() -> bool {
    Path::new("/.dockerenv").exists()
        || std::env::var("TRACKER_CONTAINER").map_or(false, |v| v == "1")
}

fn rewrite_loopback(url: &str) -> String {
    for host in ["localhost", "127.0.0.1", "[::1]"] {
        let needle = format!("://{}", host);
        if url.contains(&needle) {
            return url.replacen(&needle, &format!("://{}", HOST_GATEWAY_ALIAS), 1);
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[antennas]]
        id = "antenna-1"
        url = "http://127.0.0.1:8080/data/aircraft.json"

        [[antennas]]
        id = "antenna-2"
        url = "https://feed.example.net/aircraft.json"
        enabled = false

        [wallet]
        private_key_name = "wallet.json"

        [data]
        encryption_key = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f"

        [database]
        path = "./tracker.sqlite"
    "#;

    #[test]
    fn parses_and_validates_the_sample() {
        let config = Config::from_toml(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.enabled_antennas().count(), 1);
        assert!(config.api.enabled);
        assert_eq!(config.node.beast_port, 30005);
        assert_eq!(
            config.wallet_key_path(),
            Path::new("keys").join("wallet.json")
        );
    }

    #[test]
    fn rejects_bad_master_keys_and_empty_antennas() {
        let mut config = Config::from_toml(SAMPLE).unwrap();
        config.data.encryption_key = "deadbeef".into();
        assert!(config.validate().is_err());

        let mut config = Config::from_toml(SAMPLE).unwrap();
        for antenna in &mut config.antennas {
            antenna.enabled = false;
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn generates_an_auth_secret_when_missing() {
        let mut config = Config::from_toml(SAMPLE).unwrap();
        assert!(config.auth.secret.is_none());
        config.ensure_auth_secret();
        let secret = config.auth.secret.clone().unwrap();
        assert_eq!(secret.len(), 64);

        // An existing secret is left alone.
        config.ensure_auth_secret();
        assert_eq!(config.auth.secret.unwrap(), secret);
    }

    #[test]
    fn loopback_urls_are_rewritten_for_containers() {
        assert_eq!(
            rewrite_loopback("http://127.0.0.1:8080/data/aircraft.json"),
            "http://host.docker.internal:8080/data/aircraft.json"
        );
        assert_eq!(
            rewrite_loopback("http://localhost/x"),
            "http://host.docker.internal/x"
        );
        assert_eq!(
            rewrite_loopback("http://[::1]:8080/x"),
            "http://host.docker.internal:8080/x"
        );
        assert_eq!(
            rewrite_loopback("https://feed.example.net/a.json"),
            "https://feed.example.net/a.json"
        );
    }
}
