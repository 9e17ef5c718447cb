#![deny(missing_docs)]
#![doc = "Stratum service library: configuration and the service environment."]

pub mod config;
pub mod env;

pub use config::{BasicAuth, LogConfig, StratumConfig};
pub use env::{Environment, TXN_TABLE};

use stratum_timestamp::TimestampClient;

/// Request one timestamp from the server at `addr`.
pub async fn health_check(addr: &str) -> anyhow::Result<u64> {
    let client = TimestampClient::connect(addr).await?;
    Ok(client.next().await?)
}
