use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};

use archive::{GatewayClient, Tag, APP_NAME};

use crate::config::Config;
use crate::stats::wall_clock_ms;

const IP_LOOKUP_URL: &str = "https://api.ipify.org";
const IP_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Publish the signed node descriptor at boot. Purely informational; a
/// failure never blocks startup.
pub async fn register_node(gateway: &GatewayClient, config: &Config) -> Result<String> {
    let public_ip = match lookup_public_ip().await {
        Ok(ip) => ip,
        Err(e) => {
            warn!("Public IP lookup failed: {:#}", e);
            "unknown".to_string()
        }
    };

    let now_ms = wall_clock_ms();
    let node_info = node_descriptor(config, gateway.wallet().address(), &public_ip, now_ms);

    // serde_json maps serialise with sorted keys, which is the canonical
    // form the signature covers.
    let message = node_info.to_string();
    let signature = hex::encode(gateway.wallet().sign(message.as_bytes()).to_bytes());

    let blob = json!({
        "nodeInfo": node_info,
        "signature": signature,
        "message": message,
    });

    let tags = vec![
        Tag::new("App-Name", APP_NAME),
        Tag::new("Type", "node-registration"),
        Tag::new("Node-Type", &config.node.node_type),
        Tag::new("Version", env!("CARGO_PKG_VERSION")),
        Tag::new("Wallet-Address", gateway.wallet().address()),
        Tag::new("Timestamp", now_ms.to_string()),
    ];

    let payload = serde_json::to_vec(&blob).context("serialising node descriptor")?;
    let tx_id = gateway
        .upload(&payload, &tags, None)
        .await
        .map_err(|e| anyhow!("node registration upload failed: {}", e))?;

    info!("Node descriptor published as {}", tx_id);
    Ok(tx_id)
}

fn node_descriptor(config: &Config, wallet_address: &str, public_ip: &str, now_ms: i64) -> Value {
    json!({
        "apiPort": config.node.api_port,
        "beastPort": config.node.beast_port,
        "nodeType": config.node.node_type,
        "publicIP": public_ip,
        "timestamp": now_ms,
        "version": env!("CARGO_PKG_VERSION"),
        "walletAddress": wallet_address,
    })
}

async fn lookup_public_ip() -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(IP_LOOKUP_TIMEOUT)
        .build()?;
    let ip = client
        .get(IP_LOOKUP_URL)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?
        .trim()
        .to_string();
    if ip.is_empty() {
        return Err(anyhow!("empty public IP response"));
    }
    Ok(ip)
}
