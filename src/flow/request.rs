//! Flow request parsing.
//!
//! Requests arrive as untyped JSON (from a URL, storage or another screen).
//! Every field is checked while deserializing and any failure names the
//! dotted path of the offending field, so nothing unvalidated reaches a
//! wallet prompt.

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ValidationError;
use crate::pools::{PositionPool1, PositionPool2};
use crate::types::{Amount, amount_input};

/// Deserialize `raw`, reporting the failing field by its path.
fn from_value<T: DeserializeOwned>(raw: &Value) -> Result<T, ValidationError> {
    serde_path_to_error::deserialize(raw).map_err(|err| {
        let path = err.path().to_string();
        let reason = err.into_inner().to_string();
        if let Some(name) = reason
            .strip_prefix("missing field `")
            .and_then(|rest| rest.split('`').next())
        {
            let field = if path == "." {
                name.to_string()
            } else {
                format!("{path}.{name}")
            };
            return ValidationError::MissingField { field };
        }
        let field = if path == "." {
            "<request>".to_string()
        } else {
            path
        };
        ValidationError::InvalidValue { field, reason }
    })
}

fn proportion<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
    let value = amount_input::deserialize(deserializer)?;
    if value > Amount::ONE {
        return Err(D::Error::custom("must be between 0 and 1"));
    }
    Ok(value)
}

/// A `[path, label]` navigation link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavLink(pub String, pub String);

impl NavLink {
    pub fn path(&self) -> &str {
        &self.0
    }

    pub fn label(&self) -> &str {
        &self.1
    }
}

/// Navigation hints carried by every request and passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLinks {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub back_link: Option<NavLink>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_link: Option<NavLink>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlowTag {
    flow_id: String,
}

/// A request body bound to exactly one flow id.
pub trait FlowRequestBody:
    Sized + Clone + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const FLOW_ID: &'static str;

    fn parse(raw: &Value) -> Result<Self, ValidationError> {
        let FlowTag { flow_id } = from_value(raw)?;
        if flow_id != Self::FLOW_ID {
            return Err(ValidationError::InvalidValue {
                field: "flowId".to_string(),
                reason: format!("expected \"{}\", got \"{flow_id}\"", Self::FLOW_ID),
            });
        }
        // Flattened fields lose their path, so links are checked on their own first.
        from_value::<RequestLinks>(raw)?;
        from_value(raw)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool0ClaimRewardsRequest {
    #[serde(flatten)]
    pub links: RequestLinks,
    #[serde(deserialize_with = "amount_input::deserialize")]
    pub total_rewards_amount: Amount,
    /// Fraction in `[0, 1]` of the total rewards to redeem.
    #[serde(deserialize_with = "proportion")]
    pub redemption_proportion: Amount,
}

impl FlowRequestBody for Pool0ClaimRewardsRequest {
    const FLOW_ID: &'static str = "pool0ClaimRewards";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool1ClaimRewardsRequest {
    #[serde(flatten)]
    pub links: RequestLinks,
    pub earn_position: PositionPool1,
}

impl FlowRequestBody for Pool1ClaimRewardsRequest {
    const FLOW_ID: &'static str = "pool1ClaimRewards";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool1UpdateRequest {
    #[serde(flatten)]
    pub links: RequestLinks,
    pub pool_id: String,
    pub claim_rewards: bool,
    pub earn_position: PositionPool1,
    #[serde(deserialize_with = "amount_input::deserialize")]
    pub pool_deposit: Amount,
    pub prev_earn_position: PositionPool1,
    #[serde(deserialize_with = "amount_input::deserialize")]
    pub prev_pool_deposit: Amount,
}

impl FlowRequestBody for Pool1UpdateRequest {
    const FLOW_ID: &'static str = "pool1Update";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool2ClaimRewardsRequest {
    #[serde(flatten)]
    pub links: RequestLinks,
    pub earn_position: PositionPool2,
}

impl FlowRequestBody for Pool2ClaimRewardsRequest {
    const FLOW_ID: &'static str = "pool2ClaimRewards";
}

/// Any supported flow request, discriminated by `flowId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "flowId")]
pub enum FlowRequest {
    #[serde(rename = "pool0ClaimRewards")]
    Pool0ClaimRewards(Pool0ClaimRewardsRequest),
    #[serde(rename = "pool1ClaimRewards")]
    Pool1ClaimRewards(Pool1ClaimRewardsRequest),
    #[serde(rename = "pool1Update")]
    Pool1Update(Pool1UpdateRequest),
    #[serde(rename = "pool2ClaimRewards")]
    Pool2ClaimRewards(Pool2ClaimRewardsRequest),
}

impl FlowRequest {
    /// Select the variant by `flowId` and validate its fields.
    pub fn parse(raw: &Value) -> Result<Self, ValidationError> {
        let FlowTag { flow_id } = from_value(raw)?;
        match flow_id.as_str() {
            Pool0ClaimRewardsRequest::FLOW_ID => {
                Pool0ClaimRewardsRequest::parse(raw).map(Self::Pool0ClaimRewards)
            }
            Pool1ClaimRewardsRequest::FLOW_ID => {
                Pool1ClaimRewardsRequest::parse(raw).map(Self::Pool1ClaimRewards)
            }
            Pool1UpdateRequest::FLOW_ID => Pool1UpdateRequest::parse(raw).map(Self::Pool1Update),
            Pool2ClaimRewardsRequest::FLOW_ID => {
                Pool2ClaimRewardsRequest::parse(raw).map(Self::Pool2ClaimRewards)
            }
            _ => Err(ValidationError::UnknownFlow { flow_id }),
        }
    }

    pub fn flow_id(&self) -> &'static str {
        match self {
            Self::Pool0ClaimRewards(_) => Pool0ClaimRewardsRequest::FLOW_ID,
            Self::Pool1ClaimRewards(_) => Pool1ClaimRewardsRequest::FLOW_ID,
            Self::Pool1Update(_) => Pool1UpdateRequest::FLOW_ID,
            Self::Pool2ClaimRewards(_) => Pool2ClaimRewardsRequest::FLOW_ID,
        }
    }

    pub fn links(&self) -> &RequestLinks {
        match self {
            Self::Pool0ClaimRewards(r) => &r.links,
            Self::Pool1ClaimRewards(r) => &r.links,
            Self::Pool1Update(r) => &r.links,
            Self::Pool2ClaimRewards(r) => &r.links,
        }
    }
}
