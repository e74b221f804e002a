//! Configuration for earnflow.
//!
//! Settings are loaded with priority: env var > TOML config file > default.
//! A `./.env` file is loaded via dotenvy before resolution and never
//! overrides variables already set in the process environment.

pub(crate) mod helpers;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::settings::Settings;
use crate::types::Address;

use self::helpers::{normalize_variant, optional_env, parse_optional_env, require_positive};

/// Main configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub onboarding: OnboardingConfig,
    pub chain: ChainConfig,
    pub contracts: ContractsConfig,
    pub prices: PriceConfig,
    pub pools: PoolsConfig,
}

/// Onboarding API client and durable cache.
#[derive(Debug, Clone)]
pub struct OnboardingConfig {
    /// `None` disables the onboarding gate.
    pub api_endpoint: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub store_path: PathBuf,
}

impl OnboardingConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let api_endpoint = optional_env("ONBOARD_API_ENDPOINT")?
            .or_else(|| settings.onboarding.api_endpoint.clone())
            .map(|endpoint| helpers::validate_endpoint("ONBOARD_API_ENDPOINT", &endpoint))
            .transpose()?;

        let timeout_ms = parse_optional_env::<u64>("ONBOARD_TIMEOUT_MS", "a positive integer")?
            .unwrap_or(settings.onboarding.timeout_ms);
        require_positive("ONBOARD_TIMEOUT_MS", timeout_ms)?;

        let max_retries =
            parse_optional_env::<u32>("ONBOARD_MAX_RETRIES", "a non-negative integer")?
                .unwrap_or(settings.onboarding.max_retries);

        let store_path = optional_env("ONBOARD_STORE_PATH")?
            .or_else(|| settings.onboarding.store_path.clone())
            .map(PathBuf::from)
            .unwrap_or_else(default_onboarding_store_path);

        Ok(Self {
            api_endpoint,
            timeout: Duration::from_millis(timeout_ms),
            max_retries,
            store_path,
        })
    }
}

fn default_onboarding_store_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".earnflow")
        .join("onboarding.json")
}

/// Confirmation polling cadence and deadlines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub poll_interval: Duration,
    pub confirmation_timeout: Duration,
    pub safe_poll_interval: Duration,
    pub safe_proposal_timeout: Duration,
}

impl ChainConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let resolve_ms = |key: &str, fallback: u64| -> Result<Duration, ConfigError> {
            let ms = parse_optional_env::<u64>(key, "a positive integer")?.unwrap_or(fallback);
            require_positive(key, ms).map(Duration::from_millis)
        };

        let poll_interval = resolve_ms("CHAIN_POLL_INTERVAL_MS", settings.chain.poll_interval_ms)?;
        let confirmation_timeout = resolve_ms(
            "CHAIN_CONFIRMATION_TIMEOUT_MS",
            settings.chain.confirmation_timeout_ms,
        )?;
        let safe_poll_interval =
            resolve_ms("SAFE_POLL_INTERVAL_MS", settings.chain.safe_poll_interval_ms)?;
        let safe_proposal_timeout = resolve_ms(
            "SAFE_PROPOSAL_TIMEOUT_MS",
            settings.chain.safe_proposal_timeout_ms,
        )?;

        if poll_interval > confirmation_timeout {
            return Err(ConfigError::InvalidValue {
                key: "CHAIN_POLL_INTERVAL_MS".to_string(),
                message: "must not exceed CHAIN_CONFIRMATION_TIMEOUT_MS".to_string(),
            });
        }

        Ok(Self {
            poll_interval,
            confirmation_timeout,
            safe_poll_interval,
            safe_proposal_timeout,
        })
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        let settings = crate::settings::ChainSettings::default();
        Self {
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            confirmation_timeout: Duration::from_millis(settings.confirmation_timeout_ms),
            safe_poll_interval: Duration::from_millis(settings.safe_poll_interval_ms),
            safe_proposal_timeout: Duration::from_millis(settings.safe_proposal_timeout_ms),
        }
    }
}

/// Deployed contract addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractsConfig {
    pub bold_token: Option<Address>,
    pub pool0_redeemer: Option<Address>,
    pub pool2_distributor: Option<Address>,
    /// Collateral symbol -> PriceFeed contract.
    pub price_feeds: BTreeMap<String, Address>,
}

impl ContractsConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let bold_token = resolve_address("CONTRACT_BOLD_TOKEN", &settings.contracts.bold_token)?;
        let pool0_redeemer =
            resolve_address("CONTRACT_POOL0_REDEEMER", &settings.contracts.pool0_redeemer)?;
        let pool2_distributor = resolve_address(
            "CONTRACT_POOL2_DISTRIBUTOR",
            &settings.contracts.pool2_distributor,
        )?;

        let mut price_feeds = BTreeMap::new();
        for (symbol, raw) in &settings.contracts.price_feeds {
            let key = format!("contracts.price_feeds.{symbol}");
            let address = parse_address(&key, raw)?;
            price_feeds.insert(symbol.to_ascii_uppercase(), address);
        }

        Ok(Self {
            bold_token,
            pool0_redeemer,
            pool2_distributor,
            price_feeds,
        })
    }

    /// Spender approved before a pool-0 claim. Falls back to the BOLD token
    /// itself until a dedicated redeemer is deployed.
    pub fn pool0_spender(&self) -> Option<&Address> {
        self.pool0_redeemer.as_ref().or(self.bold_token.as_ref())
    }
}

fn resolve_address(key: &str, fallback: &Option<String>) -> Result<Option<Address>, ConfigError> {
    optional_env(key)?
        .or_else(|| fallback.clone())
        .map(|raw| parse_address(key, &raw))
        .transpose()
}

fn parse_address(key: &str, raw: &str) -> Result<Address, ConfigError> {
    raw.parse().map_err(|message| ConfigError::InvalidValue {
        key: key.to_string(),
        message,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoinGeckoApiType {
    Demo,
    Pro,
}

impl CoinGeckoApiType {
    fn parse(value: &str, key: &str) -> Result<Self, ConfigError> {
        match normalize_variant(value).as_str() {
            "demo" => Ok(Self::Demo),
            "pro" => Ok(Self::Pro),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected 'demo' or 'pro', got '{value}'"),
            }),
        }
    }

    pub fn header_name(self) -> &'static str {
        match self {
            Self::Demo => "x-cg-demo-api-key",
            Self::Pro => "x-cg-pro-api-key",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoinGeckoApiKey {
    pub api_type: CoinGeckoApiType,
    pub key: SecretString,
}

/// External price and rewards endpoints.
#[derive(Debug, Clone)]
pub struct PriceConfig {
    pub coingecko_api_url: String,
    pub coingecko_api_key: Option<CoinGeckoApiKey>,
    pub curve_api_url: String,
    pub merkl_api_url: String,
    pub timeout: Duration,
}

impl PriceConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let coingecko_api_url = helpers::validate_endpoint(
            "COINGECKO_API_URL",
            &optional_env("COINGECKO_API_URL")?
                .unwrap_or_else(|| settings.prices.coingecko_api_url.clone()),
        )?;
        let curve_api_url = helpers::validate_endpoint(
            "CURVE_API_URL",
            &optional_env("CURVE_API_URL")?.unwrap_or_else(|| settings.prices.curve_api_url.clone()),
        )?;
        let merkl_api_url = helpers::validate_endpoint(
            "MERKL_API_URL",
            &optional_env("MERKL_API_URL")?.unwrap_or_else(|| settings.prices.merkl_api_url.clone()),
        )?;

        let api_key =
            optional_env("COINGECKO_API_KEY")?.or_else(|| settings.prices.coingecko_api_key.clone());
        let api_type = optional_env("COINGECKO_API_TYPE")?
            .or_else(|| settings.prices.coingecko_api_type.clone());
        let coingecko_api_key = match (api_key, api_type) {
            (Some(key), Some(api_type)) => Some(CoinGeckoApiKey {
                api_type: CoinGeckoApiType::parse(&api_type, "COINGECKO_API_TYPE")?,
                key: SecretString::from(key),
            }),
            (Some(_), None) => {
                return Err(ConfigError::MissingRequired {
                    key: "COINGECKO_API_TYPE".to_string(),
                    hint: "Set it to 'demo' or 'pro' when COINGECKO_API_KEY is provided."
                        .to_string(),
                });
            }
            (None, _) => None,
        };

        let timeout_ms = parse_optional_env::<u64>("PRICE_TIMEOUT_MS", "a positive integer")?
            .unwrap_or(settings.prices.timeout_ms);
        require_positive("PRICE_TIMEOUT_MS", timeout_ms)?;

        Ok(Self {
            coingecko_api_url,
            coingecko_api_key,
            curve_api_url,
            merkl_api_url,
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool1Config {
    pub curve_pool_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool2Config {
    pub opportunity_id: String,
    pub uniswap_pool_id: String,
    pub reward_token: Address,
}

/// Per-pool tables, keyed by pool id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolsConfig {
    pub pool1: BTreeMap<String, Pool1Config>,
    pub pool2: BTreeMap<String, Pool2Config>,
}

impl PoolsConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let pool1 = settings
            .pools
            .pool1
            .iter()
            .map(|(id, pool)| {
                (
                    id.clone(),
                    Pool1Config {
                        curve_pool_id: pool.curve_pool_id.clone(),
                    },
                )
            })
            .collect();

        let mut pool2 = BTreeMap::new();
        for (id, pool) in &settings.pools.pool2 {
            let reward_token =
                parse_address(&format!("pools.pool2.{id}.reward_token"), &pool.reward_token)?;
            pool2.insert(
                id.clone(),
                Pool2Config {
                    opportunity_id: pool.opportunity_id.clone(),
                    uniswap_pool_id: pool.uniswap_pool_id.clone(),
                    reward_token,
                },
            );
        }

        Ok(Self { pool1, pool2 })
    }
}

impl Config {
    /// Load configuration from environment variables and the default TOML file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_toml(None)
    }

    /// Load from env with an optional TOML config file overlay.
    pub fn from_env_with_toml(toml_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let mut settings = Settings::default();
        Self::apply_toml_overlay(&mut settings, toml_path)?;
        Self::build(&settings)
    }

    /// Load and merge a TOML config file into settings.
    ///
    /// If `explicit_path` is `Some`, loads from that path (errors are fatal).
    /// If `None`, tries `~/.earnflow/config.toml` (missing file is ignored).
    fn apply_toml_overlay(
        settings: &mut Settings,
        explicit_path: Option<&std::path::Path>,
    ) -> Result<(), ConfigError> {
        let path = explicit_path
            .map(std::path::PathBuf::from)
            .unwrap_or_else(Settings::default_toml_path);

        match Settings::load_toml(&path) {
            Ok(Some(toml_settings)) => {
                settings.merge_from(&toml_settings);
                tracing::debug!("Loaded TOML config from {}", path.display());
            }
            Ok(None) => {
                if explicit_path.is_some() {
                    return Err(ConfigError::ParseError(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
            }
            Err(e) => {
                if explicit_path.is_some() {
                    return Err(ConfigError::ParseError(format!(
                        "Failed to load config file {}: {}",
                        path.display(),
                        e
                    )));
                }
                tracing::warn!("Failed to load default config file: {}", e);
            }
        }
        Ok(())
    }

    /// Resolve every section from already-merged settings.
    pub fn build(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            onboarding: OnboardingConfig::resolve(settings)?,
            chain: ChainConfig::resolve(settings)?,
            contracts: ContractsConfig::resolve(settings)?,
            prices: PriceConfig::resolve(settings)?,
            pools: PoolsConfig::resolve(settings)?,
        })
    }
}
