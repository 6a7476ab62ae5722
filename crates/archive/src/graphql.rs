use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::debug;

use crate::gateway::GatewayClient;

/// One tag predicate of a transaction query.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TagFilter {
    pub name: String,
    pub values: Vec<String>,
}

const LATEST_TX_QUERY: &str = "\
query($owners: [String!], $tags: [TagFilter!]) {\
  transactions(owners: $owners, tags: $tags, first: 1, sort: HEIGHT_DESC) {\
    edges { node { id } }\
  }\
}";

impl GatewayClient {
    /// Id of the most recent transaction owned by this wallet matching all
    /// tag filters, or `None` when the network has never seen one.
    pub async fn latest_owned_tx(&self, tags: &[TagFilter]) -> Result<Option<String>> {
        let body = json!({
            "query": LATEST_TX_QUERY,
            "variables": {
                "owners": [self.wallet().address()],
                "tags": tags,
            }
        });

        let response = self
            .http()
            .post(self.graphql_url())
            .json(&body)
            .send()
            .await
            .context("graphql request failed")?;

        let info: Value = response
            .json()
            .await
            .context("graphql response was not JSON")?;

        let tx_id = info
            .pointer("/data/transactions/edges/0/node/id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        debug!("Latest owned tx for {:?}: {:?}", tags, tx_id);
        Ok(tx_id)
    }
}
