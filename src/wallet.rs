//! Wallet and chain collaborators.
//!
//! The crate never talks to an RPC node directly. Reads, writes and message
//! signatures go through [`Wallet`]; confirmation status goes through
//! [`ConfirmationTracker`].

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::WalletError;
use crate::types::{Address, Amount, SenderKind, TxHandle, TxHash};

/// A contract function invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContractCall {
    pub address: Address,
    pub function: &'static str,
    pub args: Vec<Value>,
}

impl ContractCall {
    pub fn new(address: Address, function: &'static str) -> Self {
        Self {
            address,
            function,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }
}

/// Connected wallet capability.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Currently connected account, if any.
    fn account(&self) -> Option<Address>;

    fn sender_kind(&self) -> SenderKind;

    /// Account-changed notifications.
    fn subscribe_account(&self) -> watch::Receiver<Option<Address>>;

    async fn read_contract(&self, call: &ContractCall) -> Result<Value, WalletError>;

    /// Submit a transaction. Returns a mined-transaction handle for EOAs and
    /// a proposal handle for Safe accounts.
    async fn write_contract(&self, call: &ContractCall) -> Result<TxHandle, WalletError>;

    /// Personal-sign `message` with `account`. Declines map to
    /// [`WalletError::UserRejected`].
    async fn sign_message(&self, account: &Address, message: &str)
    -> Result<String, WalletError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptStatus {
    Pending,
    Confirmed,
    Reverted { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalStatus {
    Pending,
    Executed { tx: TxHash },
    Rejected { reason: String },
}

/// Chain-side confirmation lookups.
#[async_trait]
pub trait ConfirmationTracker: Send + Sync {
    async fn receipt_status(&self, tx: &TxHash) -> Result<ReceiptStatus, WalletError>;

    async fn proposal_status(&self, safe_tx: &TxHash) -> Result<ProposalStatus, WalletError>;
}

/// An address observed without signing capability. Every chain operation
/// fails; used where only the account identity matters.
#[derive(Debug)]
pub struct WatchOnlyWallet {
    account: watch::Sender<Option<Address>>,
}

impl WatchOnlyWallet {
    pub fn new(account: Address) -> Self {
        let (account, _) = watch::channel(Some(account));
        Self { account }
    }

    fn unsupported(method: &str) -> WalletError {
        WalletError::Rpc {
            method: method.to_string(),
            reason: "watch-only wallet".to_string(),
        }
    }
}

#[async_trait]
impl Wallet for WatchOnlyWallet {
    fn account(&self) -> Option<Address> {
        self.account.borrow().clone()
    }

    fn sender_kind(&self) -> SenderKind {
        SenderKind::Eoa
    }

    fn subscribe_account(&self) -> watch::Receiver<Option<Address>> {
        self.account.subscribe()
    }

    async fn read_contract(&self, call: &ContractCall) -> Result<Value, WalletError> {
        Err(Self::unsupported(call.function))
    }

    async fn write_contract(&self, call: &ContractCall) -> Result<TxHandle, WalletError> {
        Err(Self::unsupported(call.function))
    }

    async fn sign_message(&self, _account: &Address, _message: &str) -> Result<String, WalletError> {
        Err(WalletError::NotConnected)
    }
}

/// Read a `uint256` return value as an [`Amount`] with `decimals` precision.
///
/// Accepts a base-10 string, a JSON integer, or a one-element array holding
/// either (multi-return functions such as `fetchPrice`).
pub async fn read_amount(
    wallet: &dyn Wallet,
    call: &ContractCall,
    decimals: u32,
) -> Result<Amount, WalletError> {
    let value = wallet.read_contract(call).await?;
    amount_from_value(&value, decimals).map_err(|reason| WalletError::InvalidReturn {
        method: call.function.to_string(),
        reason,
    })
}

fn amount_from_value(value: &Value, decimals: u32) -> Result<Amount, String> {
    match value {
        Value::String(raw) => Amount::from_raw(raw, decimals),
        Value::Number(n) if n.is_u64() => Amount::from_raw(&n.to_string(), decimals),
        Value::Array(items) => match items.first() {
            Some(first) => amount_from_value(first, decimals),
            None => Err("empty return tuple".to_string()),
        },
        other => Err(format!("expected unsigned integer, got {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn amount_from_string_and_number() {
        assert_eq!(
            amount_from_value(&json!("2000000000000000000"), 18)
                .expect("amount")
                .value(),
            dec!(2)
        );
        assert_eq!(
            amount_from_value(&json!(5), 0).expect("amount").value(),
            dec!(5)
        );
    }

    #[test]
    fn amount_from_tuple_takes_first_element() {
        let value = json!(["1000000000000000000", true]);
        assert_eq!(
            amount_from_value(&value, 18).expect("amount").value(),
            dec!(1)
        );
    }

    #[test]
    fn amount_rejects_negative_and_bool() {
        assert!(amount_from_value(&json!(-1), 18).is_err());
        assert!(amount_from_value(&json!(true), 18).is_err());
        assert!(amount_from_value(&json!([]), 18).is_err());
    }

    #[tokio::test]
    async fn watch_only_wallet_cannot_sign_or_send() {
        let account: Address = "0x00000000000000000000000000000000000000ab"
            .parse()
            .expect("address");
        let wallet = WatchOnlyWallet::new(account.clone());
        assert_eq!(wallet.account(), Some(account.clone()));
        assert_eq!(
            wallet.sign_message(&account, "hello").await,
            Err(WalletError::NotConnected)
        );
        let call = ContractCall::new(account, "approve");
        assert!(matches!(
            wallet.write_contract(&call).await,
            Err(WalletError::Rpc { .. })
        ));
    }

    #[test]
    fn contract_call_builder_collects_args() {
        let token: Address = "0x00000000000000000000000000000000000000aa"
            .parse()
            .expect("address");
        let call = ContractCall::new(token.clone(), "allowance")
            .arg(token.to_string())
            .arg("0");
        assert_eq!(call.function, "allowance");
        assert_eq!(call.args.len(), 2);
    }
}
