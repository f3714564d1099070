//! Gas price service client.
//!
//! The service answers with a JSON document of recommended prices keyed by
//! speed (`safeLow`, `average`, `fast`, ...), each in tenths of a gwei.

use crate::config::NodeConfig;
use alloy_primitives::U256;
use async_trait::async_trait;
use repminer_core::{FixedGasPrice, GasPriceOracle, MiningError, Result};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Wei per tenth of a gwei.
const WEI_PER_DECIGWEI: f64 = 100_000_000.0;

/// Reads gas prices from an HTTP fee service.
#[derive(Clone)]
pub struct HttpGasOracle {
    url: String,
    speed: String,
    http: Client,
}

impl HttpGasOracle {
    /// Creates an oracle reading the `speed` field of the document at `url`.
    pub fn new(url: impl Into<String>, speed: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| MiningError::GasOracle(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            speed: speed.into(),
            http,
        })
    }

    /// Returns the configured URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl GasPriceOracle for HttpGasOracle {
    async fn gas_price(&self) -> Result<U256> {
        let document: serde_json::Value = self
            .http
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| MiningError::GasOracle(e.to_string()))?
            .json()
            .await
            .map_err(|e| MiningError::GasOracle(e.to_string()))?;

        let field = document.get(&self.speed).ok_or_else(|| {
            MiningError::GasOracle(format!("field {} missing from response", self.speed))
        })?;
        let decigwei = field
            .as_f64()
            .or_else(|| field.as_str().and_then(|s| s.parse().ok()))
            .filter(|v: &f64| v.is_finite() && *v >= 0.0)
            .ok_or_else(|| {
                MiningError::GasOracle(format!("unusable {} value: {field}", self.speed))
            })?;

        let wei = U256::from((decigwei * WEI_PER_DECIGWEI).round() as u128);
        tracing::debug!(speed = %self.speed, %wei, "fetched gas price");
        Ok(wei)
    }
}

/// The gas price source selected by `config`.
///
/// A fixed default price is used when no service URL is configured.
pub fn gas_oracle_from_config(config: &NodeConfig) -> Result<Arc<dyn GasPriceOracle>> {
    match &config.gas_oracle_url {
        Some(url) => Ok(Arc::new(HttpGasOracle::new(
            url.clone(),
            config.gas_oracle_speed.clone(),
        )?)),
        None => Ok(Arc::new(FixedGasPrice::default())),
    }
}
