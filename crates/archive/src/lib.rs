//! Client for the permanent-storage archive network.
//!
//! Uploads a payload with a tag list through the network gateway and
//! returns the transaction id the gateway reports. Retry policy lives with
//! the caller; this client makes exactly one attempt and classifies
//! failures as retryable or fatal.

mod gateway;
mod graphql;
mod tags;
mod wallet;

pub use gateway::{GatewayClient, GatewayConfig, ProgressFn, UploadError};
pub use graphql::TagFilter;
pub use tags::{sanitize_tag_value, tag_list_bytes, Tag, MAX_TAG_LIST_BYTES};
pub use wallet::Wallet;

/// App name stamped on every upload this node makes.
pub const APP_NAME: &str = "DeradNetworkBackup";
