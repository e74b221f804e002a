//! Operator settings file.
//!
//! Stores defaults in ~/.earnflow/config.toml.
//! Settings are resolved with env var > config.toml > default priority.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    /// Onboarding (terms signature) service.
    #[serde(default)]
    pub onboarding: OnboardingSettings,

    /// Transaction confirmation polling.
    #[serde(default)]
    pub chain: ChainSettings,

    /// Deployed contract addresses.
    #[serde(default)]
    pub contracts: ContractsSettings,

    /// External price and rewards APIs.
    #[serde(default)]
    pub prices: PriceSettings,

    /// Per-pool configuration tables.
    #[serde(default)]
    pub pools: PoolSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OnboardingSettings {
    /// Base URL of the onboarding API. Onboarding is disabled when unset.
    #[serde(default)]
    pub api_endpoint: Option<String>,

    /// Request timeout in milliseconds.
    #[serde(default = "default_onboarding_timeout_ms")]
    pub timeout_ms: u64,

    /// Attempts per request for connect/timeout/5xx failures.
    #[serde(default = "default_onboarding_max_retries")]
    pub max_retries: u32,

    /// JSON file holding per-address signed versions.
    #[serde(default)]
    pub store_path: Option<String>,
}

fn default_onboarding_timeout_ms() -> u64 {
    10_000
}

fn default_onboarding_max_retries() -> u32 {
    3
}

impl Default for OnboardingSettings {
    fn default() -> Self {
        Self {
            api_endpoint: None,
            timeout_ms: default_onboarding_timeout_ms(),
            max_retries: default_onboarding_max_retries(),
            store_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_confirmation_timeout_ms")]
    pub confirmation_timeout_ms: u64,

    #[serde(default = "default_safe_poll_interval_ms")]
    pub safe_poll_interval_ms: u64,

    /// Safe proposals wait for co-signers, so this is much longer.
    #[serde(default = "default_safe_proposal_timeout_ms")]
    pub safe_proposal_timeout_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    4_000
}

fn default_confirmation_timeout_ms() -> u64 {
    180_000
}

fn default_safe_poll_interval_ms() -> u64 {
    15_000
}

fn default_safe_proposal_timeout_ms() -> u64 {
    3_600_000
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            confirmation_timeout_ms: default_confirmation_timeout_ms(),
            safe_poll_interval_ms: default_safe_poll_interval_ms(),
            safe_proposal_timeout_ms: default_safe_proposal_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ContractsSettings {
    #[serde(default)]
    pub bold_token: Option<String>,

    /// Spender approved for pool-0 redemptions.
    #[serde(default)]
    pub pool0_redeemer: Option<String>,

    /// Merkl-style distributor used by pool-2 claims.
    #[serde(default)]
    pub pool2_distributor: Option<String>,

    /// Collateral symbol -> PriceFeed contract address.
    #[serde(default)]
    pub price_feeds: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceSettings {
    #[serde(default = "default_coingecko_api_url")]
    pub coingecko_api_url: String,

    #[serde(default)]
    pub coingecko_api_key: Option<String>,

    /// "demo" or "pro". Selects the API key header.
    #[serde(default)]
    pub coingecko_api_type: Option<String>,

    #[serde(default = "default_curve_api_url")]
    pub curve_api_url: String,

    #[serde(default = "default_merkl_api_url")]
    pub merkl_api_url: String,

    #[serde(default = "default_price_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_coingecko_api_url() -> String {
    "https://api.coingecko.com".to_string()
}

fn default_curve_api_url() -> String {
    "https://api.curve.finance/v1/getPools/ethereum/factory-stable-ng".to_string()
}

fn default_merkl_api_url() -> String {
    "https://api.merkl.xyz/v4".to_string()
}

fn default_price_timeout_ms() -> u64 {
    10_000
}

impl Default for PriceSettings {
    fn default() -> Self {
        Self {
            coingecko_api_url: default_coingecko_api_url(),
            coingecko_api_key: None,
            coingecko_api_type: None,
            curve_api_url: default_curve_api_url(),
            merkl_api_url: default_merkl_api_url(),
            timeout_ms: default_price_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PoolSettings {
    /// Pool-1 symbol (e.g. "BOLD-USDC") -> Curve pool.
    #[serde(default)]
    pub pool1: BTreeMap<String, Pool1Settings>,

    /// Pool-2 id -> Merkl/Uniswap identifiers.
    #[serde(default)]
    pub pool2: BTreeMap<String, Pool2Settings>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pool1Settings {
    pub curve_pool_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pool2Settings {
    pub opportunity_id: String,
    pub uniswap_pool_id: String,
    pub reward_token: String,
}

impl Settings {
    /// Default TOML config file path (~/.earnflow/config.toml).
    pub fn default_toml_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".earnflow")
            .join("config.toml")
    }

    /// Load settings from a TOML file.
    ///
    /// Returns `Ok(None)` if the file does not exist.
    pub fn load_toml(path: &std::path::Path) -> Result<Option<Self>, String> {
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(format!("failed to read {}: {}", path.display(), e)),
        };

        toml::from_str(&data)
            .map(Some)
            .map_err(|e| format!("invalid TOML in {}: {}", path.display(), e))
    }

    /// Merge values from `other` into `self`, preferring `other` for
    /// fields that differ from the default.
    pub fn merge_from(&mut self, other: &Self) {
        let default_json = match serde_json::to_value(Self::default()) {
            Ok(v) => v,
            Err(_) => return,
        };
        let other_json = match serde_json::to_value(other) {
            Ok(v) => v,
            Err(_) => return,
        };
        let mut self_json = match serde_json::to_value(&*self) {
            Ok(v) => v,
            Err(_) => return,
        };

        merge_non_default(&mut self_json, &other_json, &default_json);

        if let Ok(merged) = serde_json::from_value(self_json) {
            *self = merged;
        }
    }
}

fn merge_non_default(
    target: &mut serde_json::Value,
    other: &serde_json::Value,
    defaults: &serde_json::Value,
) {
    match (target, other, defaults) {
        (
            serde_json::Value::Object(t),
            serde_json::Value::Object(o),
            serde_json::Value::Object(d),
        ) => {
            for (key, other_val) in o {
                let default_val = d.get(key).cloned().unwrap_or(serde_json::Value::Null);
                if let Some(target_val) = t.get_mut(key) {
                    merge_non_default(target_val, other_val, &default_val);
                } else if other_val != &default_val {
                    t.insert(key.clone(), other_val.clone());
                }
            }
        }
        (target, other, defaults) => {
            if other != defaults {
                *target = other.clone();
            }
        }
    }
}
