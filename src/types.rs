//! Primitive chain types shared by the flow engine and the onboarding reconciler.

use std::fmt;
use std::ops::Mul;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

static ADDRESS_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").ok());
static HASH_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").ok());

fn is_match(re: &LazyLock<Option<Regex>>, value: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(value))
}

/// Token amounts are 18-decimal fixed point.
pub const TOKEN_DECIMALS: u32 = 18;

/// An EVM account or contract address, stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(String);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if !is_match(&ADDRESS_RE, trimmed) {
            return Err(format!("'{trimmed}' is not a 0x-prefixed 20-byte hex address"));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A 32-byte transaction (or Safe transaction) hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxHash(String);

impl TxHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TxHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if !is_match(&HASH_RE, trimmed) {
            return Err(format!("'{trimmed}' is not a 0x-prefixed 32-byte hex hash"));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// How the connected account sends transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderKind {
    /// Externally owned account; a write returns a mined-transaction hash.
    Eoa,
    /// Safe multisig; a write returns a proposal hash that co-signers execute later.
    Safe,
}

/// Identifier returned by a commit, awaited by a verify.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "hash", rename_all = "snake_case")]
pub enum TxHandle {
    Transaction(TxHash),
    SafeProposal(TxHash),
}

impl TxHandle {
    pub fn transaction(hash: TxHash) -> Self {
        Self::Transaction(hash)
    }

    pub fn safe_proposal(hash: TxHash) -> Self {
        Self::SafeProposal(hash)
    }

    pub fn hash(&self) -> &TxHash {
        match self {
            Self::Transaction(hash) | Self::SafeProposal(hash) => hash,
        }
    }
}

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transaction(hash) => write!(f, "{hash}"),
            Self::SafeProposal(hash) => write!(f, "safe:{hash}"),
        }
    }
}

/// Fixed-point token amount.
///
/// Raw on-chain integers too large for `Decimal` (such as unlimited
/// approvals) saturate to `Decimal::MAX`, which still compares as covering
/// any representable amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(Decimal);

impl Amount {
    pub const ZERO: Amount = Amount(Decimal::ZERO);
    pub const ONE: Amount = Amount(Decimal::ONE);
    pub const MAX: Amount = Amount(Decimal::MAX);

    pub fn new(value: Decimal) -> Self {
        Self(value.round_dp(TOKEN_DECIMALS))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn saturating_sub(self, rhs: Amount) -> Amount {
        Self::new(self.0.checked_sub(rhs.0).unwrap_or(Decimal::MIN))
    }

    pub fn saturating_add(self, rhs: Amount) -> Amount {
        Self::new(self.0.checked_add(rhs.0).unwrap_or(Decimal::MAX))
    }

    /// Parse a non-negative raw integer (e.g. a `uint256` rendered in base 10)
    /// scaled by `decimals`.
    pub fn from_raw(raw: &str, decimals: u32) -> Result<Self, String> {
        let digits = raw.trim();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("'{digits}' is not a base-10 unsigned integer"));
        }
        let digits = digits.trim_start_matches('0');
        if digits.is_empty() {
            return Ok(Self::ZERO);
        }

        let scale = decimals as usize;
        let literal = if scale == 0 {
            digits.to_string()
        } else if digits.len() > scale {
            let (int_part, frac_part) = digits.split_at(digits.len() - scale);
            format!("{int_part}.{frac_part}")
        } else {
            format!("0.{}{digits}", "0".repeat(scale - digits.len()))
        };

        Ok(match Decimal::from_str(&literal) {
            Ok(value) => Self::new(value),
            Err(_) => Self::MAX,
        })
    }

    /// Render as a raw base-10 integer scaled by `decimals`.
    pub fn to_raw(&self, decimals: u32) -> String {
        let rounded = self.0.round_dp(decimals).abs();
        let rendered = rounded.to_string();
        let (int_part, frac_part) = rendered.split_once('.').unwrap_or((&rendered, ""));
        let mut raw = String::with_capacity(int_part.len() + decimals as usize);
        raw.push_str(int_part);
        raw.push_str(frac_part);
        raw.push_str(&"0".repeat(decimals as usize - frac_part.len()));

        let trimmed = raw.trim_start_matches('0');
        let body = if trimmed.is_empty() { "0" } else { trimmed };
        if self.is_negative() {
            format!("-{body}")
        } else {
            body.to_string()
        }
    }
}

/// Rounds to token precision and saturates on overflow.
impl Mul for Amount {
    type Output = Amount;

    fn mul(self, rhs: Amount) -> Amount {
        Self::new(self.0.checked_mul(rhs.0).unwrap_or(Decimal::MAX))
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Self::new(value)
    }
}

impl FromStr for Amount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim())
            .map(Self::new)
            .map_err(|e| format!("'{}' is not a decimal amount: {e}", s.trim()))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.normalize().to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        <Decimal as Deserialize>::deserialize(deserializer).map(Self::new)
    }
}

/// Amount fields of incoming requests: a decimal string, a JSON number or a
/// `[raw, decimals]` fixed-point pair. Negative values are rejected.
///
/// Use with `#[serde(deserialize_with = "amount_input::deserialize")]`.
pub mod amount_input {
    use std::str::FromStr;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    use super::Amount;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        let amount = match Value::deserialize(deserializer)? {
            Value::String(s) => Amount::from_str(&s).map_err(D::Error::custom)?,
            Value::Number(n) => Amount::from_str(&n.to_string()).map_err(D::Error::custom)?,
            Value::Array(pair) if pair.len() == 2 => {
                let raw = match &pair[0] {
                    Value::String(s) => s.clone(),
                    Value::Number(n) if n.is_u64() => n.to_string(),
                    _ => return Err(D::Error::custom("fixed-point value must be an integer")),
                };
                let decimals = pair[1]
                    .as_u64()
                    .and_then(|d| u32::try_from(d).ok())
                    .ok_or_else(|| D::Error::custom("fixed-point decimals must be an integer"))?;
                Amount::from_raw(&raw, decimals).map_err(D::Error::custom)?
            }
            other => return Err(D::Error::custom(format!("expected an amount, got {other}"))),
        };
        if amount.is_negative() {
            return Err(D::Error::custom("must not be negative"));
        }
        Ok(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn address_is_case_insensitive() {
        let upper: Address = "0xABCDEF0123456789ABCDEF0123456789ABCDEF01"
            .parse()
            .expect("address");
        let lower: Address = "0xabcdef0123456789abcdef0123456789abcdef01"
            .parse()
            .expect("address");
        assert_eq!(upper, lower);
        assert_eq!(upper.to_string(), "0xabcdef0123456789abcdef0123456789abcdef01");
    }

    #[test]
    fn address_rejects_short_or_unprefixed() {
        assert!("0x1234".parse::<Address>().is_err());
        assert!("abcdef0123456789abcdef0123456789abcdef01".parse::<Address>().is_err());
        assert!("0xzzcdef0123456789abcdef0123456789abcdef01".parse::<Address>().is_err());
    }

    #[test]
    fn amount_from_raw_scales_by_decimals() {
        let amount = Amount::from_raw("1500000000000000000", 18).expect("raw");
        assert_eq!(amount.value(), dec!(1.5));

        let small = Amount::from_raw("1", 18).expect("raw");
        assert_eq!(small.value(), dec!(0.000000000000000001));

        assert_eq!(Amount::from_raw("0000", 18).expect("raw"), Amount::ZERO);
        assert!(Amount::from_raw("-1", 18).is_err());
        assert!(Amount::from_raw("0x10", 18).is_err());
    }

    #[test]
    fn unlimited_allowance_saturates() {
        let max_uint256 =
            "115792089237316195423570985008687907853269984665640564039457584007913129639935";
        let amount = Amount::from_raw(max_uint256, 18).expect("raw");
        assert_eq!(amount, Amount::MAX);
        assert!(amount >= Amount::new(dec!(1_000_000_000)));
    }

    #[test]
    fn amount_to_raw_is_exact() {
        assert_eq!(Amount::new(dec!(1.5)).to_raw(18), "1500000000000000000");
        assert_eq!(Amount::new(dec!(250)).to_raw(18), "250000000000000000000");
        assert_eq!(Amount::ZERO.to_raw(18), "0");
        assert_eq!(Amount::new(dec!(0.1)).to_raw(6), "100000");
    }

    #[test]
    fn amount_serializes_as_string() {
        let json = serde_json::to_value(Amount::new(dec!(12.50))).expect("json");
        assert_eq!(json, serde_json::json!("12.5"));

        let parsed: Amount = serde_json::from_value(serde_json::json!("3.25")).expect("parse");
        assert_eq!(parsed.value(), dec!(3.25));
    }

    #[test]
    fn amount_deserializes_from_string_or_number() {
        let parsed: Amount = serde_json::from_value(serde_json::json!("1.5")).expect("string");
        assert_eq!(parsed, Amount::new(dec!(1.5)));
        let parsed: Amount = serde_json::from_value(serde_json::json!(2)).expect("number");
        assert_eq!(parsed, Amount::new(dec!(2)));
    }

    #[test]
    fn amount_input_rejects_negative_values() {
        #[derive(Debug, serde::Deserialize)]
        struct Wrapper {
            #[serde(deserialize_with = "amount_input::deserialize")]
            value: Amount,
        }

        let parsed: Wrapper =
            serde_json::from_value(serde_json::json!({ "value": ["1500000", 6] })).expect("pair");
        assert_eq!(parsed.value, Amount::new(dec!(1.5)));
        let err = serde_json::from_value::<Wrapper>(serde_json::json!({ "value": "-1" }))
            .expect_err("negative");
        assert!(err.to_string().contains("must not be negative"));
    }
}
