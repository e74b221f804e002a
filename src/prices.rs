//! USD price lookup per token symbol.
//!
//! Prices are never defaulted: an unsupported symbol or a missing quote is
//! an error.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::try_join_all;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::config::{CoinGeckoApiKey, ContractsConfig, Pool1Config, PoolsConfig, PriceConfig};
use crate::error::{HttpError, PriceError, WalletError};
use crate::http::JsonClient;
use crate::types::{Address, Amount, TOKEN_DECIMALS};
use crate::wallet::{ContractCall, Wallet, read_amount};

pub const BOLD_SYMBOL: &str = "BOLD";
pub const DEFI_SYMBOL: &str = "DEFI";

/// Collateral tokens priced by their branch's price feed contract.
pub const COLLATERAL_SYMBOLS: &[&str] = &[
    "WBTC", "LINK", "UNI", "AAVE", "ENA", "LDO", "CRV", "FXS", "SKY", "LQTY",
];

/// WBTC feeds report with 10 extra decimals.
const WBTC_FEED_DECIMALS: u32 = TOKEN_DECIMALS + 10;

fn coingecko_id(symbol: &str) -> Option<&'static str> {
    match symbol {
        "LQTY" => Some("liquity"),
        "LUSD" => Some("liquity-usd"),
        _ => None,
    }
}

pub fn is_collateral_symbol(symbol: &str) -> bool {
    COLLATERAL_SYMBOLS.contains(&symbol)
}

#[derive(Debug, Deserialize)]
struct CoinGeckoQuote {
    usd: Decimal,
}

#[derive(Debug, Deserialize)]
struct CurvePoolsResponse {
    data: CurvePoolsData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurvePoolsData {
    pool_data: Vec<CurvePool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurvePool {
    id: String,
    usd_total: Decimal,
    /// Raw 18-decimal integer, sent as a string or a number.
    total_supply: Value,
}

pub struct PriceFeed {
    coingecko: JsonClient,
    coingecko_key: Option<CoinGeckoApiKey>,
    curve: JsonClient,
    price_feeds: BTreeMap<String, Address>,
    pool1: BTreeMap<String, Pool1Config>,
    wallet: Option<Arc<dyn Wallet>>,
}

impl PriceFeed {
    pub fn new(
        prices: &PriceConfig,
        contracts: &ContractsConfig,
        pools: &PoolsConfig,
    ) -> Result<Self, HttpError> {
        Ok(Self {
            coingecko: JsonClient::new("coingecko", &prices.coingecko_api_url, prices.timeout, 2)?,
            coingecko_key: prices.coingecko_api_key.clone(),
            curve: JsonClient::new("curve", &prices.curve_api_url, prices.timeout, 2)?,
            price_feeds: contracts.price_feeds.clone(),
            pool1: pools.pool1.clone(),
            wallet: None,
        })
    }

    /// Wallet used to read collateral price feeds.
    pub fn with_wallet(mut self, wallet: Arc<dyn Wallet>) -> Self {
        self.wallet = Some(wallet);
        self
    }

    /// USD price of one unit of `symbol`.
    #[instrument(skip(self))]
    pub async fn price(&self, symbol: &str) -> Result<Amount, PriceError> {
        let price = if let Some(id) = coingecko_id(symbol) {
            self.coingecko_price(symbol, id).await?
        } else if is_collateral_symbol(symbol) {
            self.collateral_price(symbol).await?
        } else if symbol == BOLD_SYMBOL || symbol == DEFI_SYMBOL {
            Amount::ONE
        } else if let Some(pool) = self.pool1.get(symbol) {
            self.curve_lp_price(&pool.curve_pool_id).await?
        } else {
            return Err(PriceError::UnknownToken {
                symbol: symbol.to_string(),
            });
        };
        debug!(%price, "price resolved");
        Ok(price)
    }

    /// Prices for several symbols, looked up concurrently. Fails if any
    /// single lookup fails.
    pub async fn prices(&self, symbols: &[&str]) -> Result<Vec<(String, Amount)>, PriceError> {
        try_join_all(symbols.iter().map(|symbol| async move {
            let price = self.price(symbol).await?;
            Ok::<_, PriceError>((symbol.to_string(), price))
        }))
        .await
    }

    async fn coingecko_price(&self, symbol: &str, id: &'static str) -> Result<Amount, PriceError> {
        let url = self.coingecko.join("api/v3/simple/price");
        let quotes: HashMap<String, CoinGeckoQuote> = self
            .coingecko
            .send_with_retry("coingecko_simple_price", || {
                let req = self
                    .coingecko
                    .http()
                    .get(&url)
                    .query(&[("vs_currencies", "usd"), ("ids", id)])
                    .header("accept", "application/json");
                match &self.coingecko_key {
                    Some(key) => req.header(key.api_type.header_name(), key.key.expose_secret()),
                    None => req,
                }
            })
            .await?;
        quotes
            .get(id)
            .map(|quote| Amount::new(quote.usd))
            .ok_or_else(|| PriceError::MissingQuote {
                symbol: symbol.to_string(),
            })
    }

    async fn collateral_price(&self, symbol: &str) -> Result<Amount, PriceError> {
        let feed = self
            .price_feeds
            .get(symbol)
            .ok_or_else(|| PriceError::MissingPriceFeed {
                symbol: symbol.to_string(),
            })?;
        let wallet = self.wallet.as_deref().ok_or(WalletError::NotConnected)?;
        let decimals = if symbol == "WBTC" {
            WBTC_FEED_DECIMALS
        } else {
            TOKEN_DECIMALS
        };
        let call = ContractCall::new(feed.clone(), "fetchPrice");
        Ok(read_amount(wallet, &call, decimals).await?)
    }

    async fn curve_lp_price(&self, curve_pool_id: &str) -> Result<Amount, PriceError> {
        let response: CurvePoolsResponse = self.curve.get_json("curve_get_pools", "").await?;
        let pool = response
            .data
            .pool_data
            .into_iter()
            .find(|pool| pool.id == curve_pool_id)
            .ok_or_else(|| PriceError::UnknownPool {
                pool_id: curve_pool_id.to_string(),
            })?;

        let raw_supply = match &pool.total_supply {
            Value::String(raw) => raw.clone(),
            Value::Number(n) => n.to_string(),
            other => {
                return Err(HttpError::Decode(format!("curve totalSupply: unexpected {other}")).into());
            }
        };
        let supply = Amount::from_raw(&raw_supply, TOKEN_DECIMALS)
            .map_err(|reason| HttpError::Decode(format!("curve totalSupply: {reason}")))?;
        pool.usd_total
            .checked_div(supply.value())
            .map(Amount::new)
            .ok_or_else(|| PriceError::MissingQuote {
                symbol: curve_pool_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoinGeckoApiType;
    use crate::fake::FakeWallet;
    use rust_decimal_macros::dec;
    use secrecy::SecretString;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn feed(server: &MockServer, key: Option<CoinGeckoApiKey>) -> PriceFeed {
        let prices = PriceConfig {
            coingecko_api_url: server.uri(),
            coingecko_api_key: key,
            curve_api_url: format!("{}/v1/getPools/ethereum/factory-stable-ng", server.uri()),
            merkl_api_url: server.uri(),
            timeout: Duration::from_secs(1),
        };
        let mut contracts = ContractsConfig::default();
        contracts.price_feeds.insert(
            "WBTC".to_string(),
            "0x00000000000000000000000000000000000000f1".parse().expect("address"),
        );
        contracts.price_feeds.insert(
            "LINK".to_string(),
            "0x00000000000000000000000000000000000000f2".parse().expect("address"),
        );
        let mut pools = PoolsConfig::default();
        pools.pool1.insert(
            "BOLD-USDC".to_string(),
            Pool1Config {
                curve_pool_id: "factory-stable-ng-42".to_string(),
            },
        );
        PriceFeed::new(&prices, &contracts, &pools).expect("feed")
    }

    #[tokio::test]
    async fn stable_tokens_are_one_dollar() {
        let server = MockServer::start().await;
        let feed = feed(&server, None);
        assert_eq!(feed.price("BOLD").await.expect("bold"), Amount::ONE);
        assert_eq!(feed.price("DEFI").await.expect("defi"), Amount::ONE);
    }

    #[tokio::test]
    async fn batch_lookup_fails_on_any_unknown_symbol() {
        let server = MockServer::start().await;
        let feed = feed(&server, None);
        let prices = feed.prices(&["BOLD", "DEFI"]).await.expect("prices");
        assert_eq!(
            prices,
            vec![("BOLD".to_string(), Amount::ONE), ("DEFI".to_string(), Amount::ONE)]
        );
        assert!(feed.prices(&["BOLD", "XYZ"]).await.is_err());
    }

    #[tokio::test]
    async fn unsupported_symbol_is_an_error() {
        let server = MockServer::start().await;
        let err = feed(&server, None).price("XYZ").await.expect_err("unknown");
        assert!(matches!(err, PriceError::UnknownToken { ref symbol } if symbol == "XYZ"));
    }

    #[tokio::test]
    async fn coingecko_price_sends_api_key_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/simple/price"))
            .and(query_param("vs_currencies", "usd"))
            .and(query_param("ids", "liquity"))
            .and(header("x-cg-demo-api-key", "demo-key"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "liquity": { "usd": 0.75 } })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let key = CoinGeckoApiKey {
            api_type: CoinGeckoApiType::Demo,
            key: SecretString::from("demo-key".to_string()),
        };
        let price = feed(&server, Some(key)).price("LQTY").await.expect("price");
        assert_eq!(price.value(), dec!(0.75));
    }

    #[tokio::test]
    async fn coingecko_missing_quote_is_not_defaulted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/simple/price"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let err = feed(&server, None).price("LUSD").await.expect_err("missing");
        assert!(matches!(err, PriceError::MissingQuote { .. }));
    }

    #[tokio::test]
    async fn collateral_reads_price_feed() {
        let server = MockServer::start().await;
        let wallet = Arc::new(FakeWallet::new());
        wallet.push_read("fetchPrice", json!(["15000000000000000000", true]));
        let feed = feed(&server, None).with_wallet(wallet.clone());
        assert_eq!(feed.price("LINK").await.expect("link").value(), dec!(15));

        let wallet = Arc::new(FakeWallet::new());
        wallet.push_read("fetchPrice", json!(["650000000000000000000000000000000", true]));
        let feed = feed.with_wallet(wallet);
        assert_eq!(feed.price("WBTC").await.expect("wbtc").value(), dec!(65000));
    }

    #[tokio::test]
    async fn collateral_without_feed_is_an_error() {
        let server = MockServer::start().await;
        let feed = feed(&server, None).with_wallet(Arc::new(FakeWallet::new()));
        let err = feed.price("UNI").await.expect_err("no feed");
        assert!(matches!(err, PriceError::MissingPriceFeed { .. }));
    }

    #[tokio::test]
    async fn pool1_lp_price_from_curve() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/getPools/ethereum/factory-stable-ng"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "poolData": [
                    { "id": "factory-stable-ng-7", "usdTotal": 10, "totalSupply": "1" },
                    { "id": "factory-stable-ng-42", "usdTotal": 2040000.5, "totalSupply": "2000000000000000000000000" },
                ]}
            })))
            .mount(&server)
            .await;

        let price = feed(&server, None).price("BOLD-USDC").await.expect("lp");
        assert_eq!(price.value(), dec!(1.02000025));
    }

    #[tokio::test]
    async fn missing_curve_pool_is_unknown_pool() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/getPools/ethereum/factory-stable-ng"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "data": { "poolData": [] } })),
            )
            .mount(&server)
            .await;

        let err = feed(&server, None).price("BOLD-USDC").await.expect_err("missing");
        assert!(matches!(err, PriceError::UnknownPool { ref pool_id } if pool_id == "factory-stable-ng-42"));
    }
}
