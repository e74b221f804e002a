//! Pool positions and reward arithmetic.
//!
//! Pool 0 is the DEFI redemption pool (rewards are redeemed for BOLD at a
//! fixed price), pool 1 the BOLD stability pools, pool 2 the Uniswap v4
//! pools whose rewards are distributed through Merkl proofs.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{Pool2Config, PoolsConfig, PriceConfig};
use crate::error::{HttpError, PriceError};
use crate::http::JsonClient;
use crate::types::{Address, Amount, TOKEN_DECIMALS, TxHash, amount_input};

/// BOLD paid per redeemed DEFI.
pub const POOL0_REDEMPTION_PRICE: Decimal = dec!(0.1);

const MERKL_CHAIN_ID: u64 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardAmounts {
    #[serde(deserialize_with = "amount_input::deserialize")]
    pub defi: Amount,
}

/// `type` tag of a pool-1 position. Optional on input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pool1Tag {
    #[default]
    #[serde(rename = "pool1")]
    Pool1,
}

/// `type` tag of a pool-2 position. Optional on input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pool2Tag {
    #[default]
    #[serde(rename = "pool2")]
    Pool2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionPool1 {
    #[serde(rename = "type", default)]
    pub tag: Pool1Tag,
    pub owner: Address,
    pub pool_id: String,
    #[serde(deserialize_with = "amount_input::deserialize")]
    pub deposit: Amount,
    pub rewards: RewardAmounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LpToken {
    pub symbol: String,
}

/// One Uniswap LP position backing a pool-2 deposit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool2Position {
    #[serde(rename = "type")]
    pub kind: String,
    pub fee_tier: u32,
    #[serde(rename = "amountUSD", deserialize_with = "amount_input::deserialize")]
    pub amount_usd: Amount,
    pub token_id: String,
    pub lp_token: LpToken,
}

/// Arguments to the distributor's `claim(users, tokens, amounts, proofs)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ClaimDataInput")]
pub struct Pool2ClaimData {
    pub users: Vec<Address>,
    pub tokens: Vec<Address>,
    /// Raw integer amounts.
    pub amounts: Vec<String>,
    pub proofs: Vec<Vec<String>>,
}

/// Base-10 unsigned integer, sent as a string or a JSON number.
struct RawUint(String);

impl<'de> Deserialize<'de> for RawUint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        let raw = match Value::deserialize(deserializer)? {
            Value::String(s) => s,
            Value::Number(n) if n.is_u64() => n.to_string(),
            other => {
                return Err(D::Error::custom(format!(
                    "expected an unsigned integer, got {other}"
                )));
            }
        };
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(D::Error::custom(format!(
                "'{raw}' is not a base-10 unsigned integer"
            )));
        }
        Ok(Self(raw))
    }
}

#[derive(Deserialize)]
struct ClaimDataInput {
    users: Vec<Address>,
    tokens: Vec<Address>,
    amounts: Vec<RawUint>,
    proofs: Vec<Vec<TxHash>>,
}

impl TryFrom<ClaimDataInput> for Pool2ClaimData {
    type Error = String;

    fn try_from(input: ClaimDataInput) -> Result<Self, Self::Error> {
        let claim = Self {
            users: input.users,
            tokens: input.tokens,
            amounts: input.amounts.into_iter().map(|raw| raw.0).collect(),
            proofs: input
                .proofs
                .into_iter()
                .map(|proof| proof.iter().map(ToString::to_string).collect())
                .collect(),
        };
        if !claim.is_consistent() {
            return Err("users, tokens, amounts and proofs must have the same length".to_string());
        }
        Ok(claim)
    }
}

impl Pool2ClaimData {
    /// All four arrays describe the same claims.
    pub fn is_consistent(&self) -> bool {
        let n = self.users.len();
        self.tokens.len() == n && self.amounts.len() == n && self.proofs.len() == n
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionPool2 {
    #[serde(rename = "type", default)]
    pub tag: Pool2Tag,
    pub owner: Address,
    pub pool_id: String,
    #[serde(deserialize_with = "amount_input::deserialize")]
    pub deposit: Amount,
    pub rewards: RewardAmounts,
    #[serde(default)]
    pub positions: Vec<Pool2Position>,
    pub claim_data: Pool2ClaimData,
}

/// DEFI redeemed from `total` at `proportion`.
pub fn pool0_redeem_amount(total: Amount, proportion: Amount) -> Amount {
    total * proportion
}

/// BOLD needed to redeem `defi` rewards.
pub fn pool0_redemption_cost(defi: Amount) -> Amount {
    defi * Amount::new(POOL0_REDEMPTION_PRICE)
}

pub fn is_pool1_position_active(position: Option<&PositionPool1>) -> bool {
    position.is_some_and(|p| !p.deposit.is_zero() || !p.rewards.defi.is_zero())
}

pub fn is_pool2_position_active(position: Option<&PositionPool2>) -> bool {
    position.is_some_and(|p| !p.deposit.is_zero() || !p.rewards.defi.is_zero())
}

/// A pool-2 LP position as reported by the positions API.
#[derive(Debug, Clone, PartialEq)]
pub struct Pool2PositionRecord {
    pub status: String,
    pub position: Pool2Position,
}

/// USD value of every position that is not closed.
pub fn pool2_deposit(records: &[Pool2PositionRecord]) -> Amount {
    records
        .iter()
        .filter(|r| r.status != "closed")
        .fold(Amount::ZERO, |acc, r| acc.saturating_add(r.position.amount_usd))
}

#[derive(Debug, Clone, Deserialize)]
pub struct MerklChainRewards {
    #[serde(default)]
    pub rewards: Vec<MerklReward>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MerklReward {
    pub recipient: String,
    pub amount: String,
    pub claimed: String,
    #[serde(default)]
    pub proofs: Vec<String>,
    pub token: MerklToken,
    #[serde(default)]
    pub breakdowns: Vec<MerklBreakdown>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MerklToken {
    pub address: String,
    pub symbol: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerklBreakdown {
    #[serde(default)]
    pub reason: String,
    pub amount: String,
    pub claimed: String,
    pub campaign_id: String,
}

/// Claimable rewards from a single campaign or pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardBreakdown {
    pub pool_id: Option<String>,
    pub protocol: Option<String>,
    pub campaign_id: String,
    pub amount: Amount,
    pub token_address: Address,
    pub token_symbol: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool2Rewards {
    pub total: Amount,
    pub claim_data: Pool2ClaimData,
    pub breakdowns: Vec<RewardBreakdown>,
}

fn invalid_rewards(reason: impl Into<String>) -> PriceError {
    PriceError::InvalidRewards {
        reason: reason.into(),
    }
}

/// Unclaimed part of a raw `amount`/`claimed` pair; zero when fully claimed.
fn claimable_raw(amount: &str, claimed: &str) -> Result<u128, PriceError> {
    let amount: u128 = amount
        .parse()
        .map_err(|e| invalid_rewards(format!("amount '{amount}': {e}")))?;
    let claimed: u128 = claimed
        .parse()
        .map_err(|e| invalid_rewards(format!("claimed '{claimed}': {e}")))?;
    Ok(amount.saturating_sub(claimed))
}

/// Build claim arguments and per-pool breakdowns for `account` from Merkl
/// user rewards, keeping only `reward_token` rewards addressed to `account`.
pub fn aggregate_pool2_rewards(
    chains: &[MerklChainRewards],
    account: &Address,
    reward_token: &Address,
) -> Result<Pool2Rewards, PriceError> {
    let mut out = Pool2Rewards::default();

    for reward in chains.iter().flat_map(|c| c.rewards.iter()) {
        let token: Address = reward.token.address.parse().map_err(invalid_rewards)?;
        if &token != reward_token {
            continue;
        }
        let Ok(recipient) = reward.recipient.parse::<Address>() else {
            continue;
        };
        if &recipient != account {
            continue;
        }
        let claimable = claimable_raw(&reward.amount, &reward.claimed)?;
        if claimable == 0 {
            continue;
        }

        let proof = reward
            .proofs
            .iter()
            .map(|node| node.parse::<TxHash>().map(|hash| hash.to_string()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(invalid_rewards)?;

        out.total = out.total.saturating_add(
            Amount::from_raw(&claimable.to_string(), TOKEN_DECIMALS).map_err(invalid_rewards)?,
        );
        out.claim_data.users.push(recipient);
        out.claim_data.tokens.push(token.clone());
        // The distributor takes the cumulative amount, not the unclaimed delta.
        out.claim_data.amounts.push(reward.amount.clone());
        out.claim_data.proofs.push(proof);

        for breakdown in &reward.breakdowns {
            let pending = claimable_raw(&breakdown.amount, &breakdown.claimed)?;
            if pending == 0 {
                continue;
            }
            let amount =
                Amount::from_raw(&pending.to_string(), TOKEN_DECIMALS).map_err(invalid_rewards)?;
            let mut parts = breakdown.reason.split('_');
            let protocol = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
            let pool_id = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
            let key = pool_id.clone().unwrap_or_else(|| breakdown.campaign_id.clone());

            let existing = out.breakdowns.iter_mut().find(|b| {
                b.pool_id.as_deref().unwrap_or(b.campaign_id.as_str()) == key
            });
            match existing {
                Some(entry) => entry.amount = entry.amount.saturating_add(amount),
                None => out.breakdowns.push(RewardBreakdown {
                    pool_id,
                    protocol,
                    campaign_id: breakdown.campaign_id.clone(),
                    amount,
                    token_address: token.clone(),
                    token_symbol: reward.token.symbol.clone(),
                }),
            }
        }
    }

    Ok(out)
}

/// Merkl rewards API client.
#[derive(Debug, Clone)]
pub struct MerklClient {
    http: JsonClient,
    pools: PoolsConfig,
}

impl MerklClient {
    pub fn new(prices: &PriceConfig, pools: PoolsConfig) -> Result<Self, HttpError> {
        Ok(Self {
            http: JsonClient::new("merkl", &prices.merkl_api_url, prices.timeout, 2)?,
            pools,
        })
    }

    pub fn with_client(http: JsonClient, pools: PoolsConfig) -> Self {
        Self { http, pools }
    }

    fn pool(&self, pool_id: &str) -> Result<&Pool2Config, PriceError> {
        self.pools
            .pool2
            .get(pool_id)
            .ok_or_else(|| PriceError::UnknownPool {
                pool_id: pool_id.to_string(),
            })
    }

    /// Claimable rewards for `account` in the pool-2 pool `pool_id`.
    pub async fn pool2_rewards(
        &self,
        pool_id: &str,
        account: &Address,
    ) -> Result<Pool2Rewards, PriceError> {
        let pool = self.pool(pool_id)?;
        let path = format!("users/{account}/rewards?chainId={MERKL_CHAIN_ID}");
        let chains: Vec<MerklChainRewards> = self.http.get_json("merkl_user_rewards", &path).await?;
        let rewards = aggregate_pool2_rewards(&chains, account, &pool.reward_token)
            .inspect_err(|e| warn!(pool_id, %account, error = %e, "malformed merkl rewards"))?;
        debug!(
            pool_id,
            %account,
            claims = rewards.claim_data.users.len(),
            total = %rewards.total,
            "aggregated pool2 rewards"
        );
        Ok(rewards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ACCOUNT: &str = "0x00000000000000000000000000000000000000a1";
    const OTHER: &str = "0x00000000000000000000000000000000000000b2";
    const DEFI: &str = "0x00000000000000000000000000000000000000d1";
    const WETH: &str = "0x00000000000000000000000000000000000000e1";
    const PROOF_A: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const PROOF_B: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn addr(raw: &str) -> Address {
        raw.parse().expect("address")
    }

    fn merkl_payload() -> serde_json::Value {
        json!([{
            "chain": { "id": 1 },
            "rewards": [
                {
                    "root": "0x00",
                    "recipient": ACCOUNT,
                    "amount": "5000000000000000000",
                    "claimed": "1000000000000000000",
                    "pending": "0",
                    "proofs": [PROOF_A, PROOF_B],
                    "token": { "address": DEFI, "chainId": 1, "symbol": "DEFI", "decimals": 18, "price": 1 },
                    "breakdowns": [
                        { "reason": "UniswapV4_0xpool", "amount": "3000000000000000000", "claimed": "0", "pending": "0", "campaignId": "c1" },
                        { "reason": "UniswapV4_0xpool", "amount": "2000000000000000000", "claimed": "1000000000000000000", "pending": "0", "campaignId": "c2" },
                        { "reason": "Other", "amount": "1", "claimed": "1", "pending": "0", "campaignId": "c3" }
                    ]
                },
                {
                    "recipient": ACCOUNT,
                    "amount": "7",
                    "claimed": "0",
                    "proofs": [],
                    "token": { "address": WETH, "symbol": "WETH" },
                    "breakdowns": []
                },
                {
                    "recipient": OTHER,
                    "amount": "9",
                    "claimed": "0",
                    "proofs": [],
                    "token": { "address": DEFI, "symbol": "DEFI" }
                },
                {
                    "recipient": ACCOUNT,
                    "amount": "4",
                    "claimed": "4",
                    "proofs": [],
                    "token": { "address": DEFI, "symbol": "DEFI" }
                }
            ]
        }])
    }

    #[test]
    fn redemption_cost_is_a_tenth_of_redeemed_defi() {
        let redeemed = pool0_redeem_amount(Amount::new(dec!(1000)), Amount::new(dec!(0.5)));
        assert_eq!(redeemed.value(), dec!(500));
        assert_eq!(pool0_redemption_cost(redeemed).value(), dec!(50));
    }

    #[test]
    fn position_is_active_with_deposit_or_rewards() {
        let mut position = PositionPool1 {
            tag: Pool1Tag::Pool1,
            owner: addr(ACCOUNT),
            pool_id: "BOLD-USDC".to_string(),
            deposit: Amount::ZERO,
            rewards: RewardAmounts::default(),
        };
        assert!(!is_pool1_position_active(Some(&position)));
        assert!(!is_pool1_position_active(None));
        position.rewards.defi = Amount::new(dec!(0.01));
        assert!(is_pool1_position_active(Some(&position)));
    }

    #[test]
    fn deposit_skips_closed_positions() {
        let record = |status: &str, usd| Pool2PositionRecord {
            status: status.to_string(),
            position: Pool2Position {
                kind: "v4".to_string(),
                fee_tier: 3000,
                amount_usd: Amount::new(usd),
                token_id: "1".to_string(),
                lp_token: LpToken {
                    symbol: "DEFI/WETH".to_string(),
                },
            },
        };
        let records = [record("open", dec!(10)), record("closed", dec!(99)), record("open", dec!(2.5))];
        assert_eq!(pool2_deposit(&records).value(), dec!(12.5));
    }

    #[test]
    fn aggregation_filters_token_recipient_and_claimed() {
        let chains: Vec<MerklChainRewards> =
            serde_json::from_value(merkl_payload()).expect("payload");
        let rewards = aggregate_pool2_rewards(&chains, &addr(ACCOUNT), &addr(DEFI)).expect("agg");

        assert_eq!(rewards.total.value(), dec!(4));
        assert_eq!(rewards.claim_data.users, vec![addr(ACCOUNT)]);
        assert_eq!(rewards.claim_data.tokens, vec![addr(DEFI)]);
        assert_eq!(rewards.claim_data.amounts, vec!["5000000000000000000".to_string()]);
        assert_eq!(
            rewards.claim_data.proofs,
            vec![vec![PROOF_A.to_string(), PROOF_B.to_string()]]
        );
        assert!(rewards.claim_data.is_consistent());

        assert_eq!(rewards.breakdowns.len(), 1);
        let breakdown = &rewards.breakdowns[0];
        assert_eq!(breakdown.pool_id.as_deref(), Some("0xpool"));
        assert_eq!(breakdown.protocol.as_deref(), Some("UniswapV4"));
        assert_eq!(breakdown.amount.value(), dec!(4));
        assert_eq!(breakdown.token_symbol, "DEFI");
    }

    #[test]
    fn aggregation_rejects_malformed_rewards() {
        let mut payload = merkl_payload();
        payload[0]["rewards"][0]["claimed"] = json!("lots");
        let chains: Vec<MerklChainRewards> = serde_json::from_value(payload).expect("payload");
        let err = aggregate_pool2_rewards(&chains, &addr(ACCOUNT), &addr(DEFI)).expect_err("bad");
        assert!(matches!(err, PriceError::InvalidRewards { ref reason } if reason.contains("lots")));

        let mut payload = merkl_payload();
        payload[0]["rewards"][0]["proofs"] = json!(["0xaa"]);
        let chains: Vec<MerklChainRewards> = serde_json::from_value(payload).expect("payload");
        let err = aggregate_pool2_rewards(&chains, &addr(ACCOUNT), &addr(DEFI)).expect_err("bad");
        assert!(matches!(err, PriceError::InvalidRewards { .. }));
    }

    #[test]
    fn claim_data_input_is_checked() {
        let claim: Pool2ClaimData = serde_json::from_value(json!({
            "users": [ACCOUNT],
            "tokens": [DEFI],
            "amounts": [5],
            "proofs": [[PROOF_A]],
        }))
        .expect("claim data");
        assert_eq!(claim.amounts, vec!["5".to_string()]);

        let mismatched = json!({
            "users": [ACCOUNT, OTHER],
            "tokens": [DEFI],
            "amounts": ["5"],
            "proofs": [[PROOF_A]],
        });
        assert!(serde_json::from_value::<Pool2ClaimData>(mismatched).is_err());

        let signed = json!({
            "users": [ACCOUNT],
            "tokens": [DEFI],
            "amounts": ["-5"],
            "proofs": [[PROOF_A]],
        });
        assert!(serde_json::from_value::<Pool2ClaimData>(signed).is_err());
    }

    #[tokio::test]
    async fn client_fetches_and_aggregates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/users/{ACCOUNT}/rewards")))
            .and(query_param("chainId", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(merkl_payload()))
            .expect(1)
            .mount(&server)
            .await;

        let mut pool2 = BTreeMap::new();
        pool2.insert(
            "DEFI-WETH".to_string(),
            Pool2Config {
                opportunity_id: "opp".to_string(),
                uniswap_pool_id: "0xpool".to_string(),
                reward_token: addr(DEFI),
            },
        );
        let http = JsonClient::new("merkl", &server.uri(), Duration::from_secs(1), 1).expect("client");
        let client = MerklClient::with_client(
            http,
            PoolsConfig {
                pool1: BTreeMap::new(),
                pool2,
            },
        );

        let rewards = client.pool2_rewards("DEFI-WETH", &addr(ACCOUNT)).await.expect("rewards");
        assert_eq!(rewards.total.value(), dec!(4));

        let err = client
            .pool2_rewards("NOPE", &addr(ACCOUNT))
            .await
            .expect_err("unknown pool");
        assert!(matches!(err, PriceError::UnknownPool { .. }));
    }
}
