//! Error types for earnflow.

use std::time::Duration;

use serde::Serialize;

use crate::types::TxHandle;

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),

    #[error("Onboarding error: {0}")]
    Onboarding(#[from] OnboardingError),

    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("Price error: {0}")]
    Price(#[from] PriceError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// A flow request (or one of its fields) failed structural validation.
///
/// `field` is a dotted path into the request, e.g. `earnPosition.deposit`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Unknown flow id: {flow_id}")]
    UnknownFlow { flow_id: String },
}

impl ValidationError {
    /// Dotted path of the offending field.
    pub fn field(&self) -> &str {
        match self {
            Self::MissingField { field } | Self::InvalidValue { field, .. } => field,
            Self::UnknownFlow { .. } => "flowId",
        }
    }
}

/// Errors raised by the wallet / chain collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    #[error("User rejected the request: {reason}")]
    UserRejected { reason: String },

    #[error("No account connected")]
    NotConnected,

    #[error("RPC call {method} failed: {reason}")]
    Rpc { method: String, reason: String },

    #[error("Unexpected contract return for {method}: {reason}")]
    InvalidReturn { method: String, reason: String },
}

/// Failures while committing or confirming a single transaction.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("Transaction {handle} reverted: {reason}")]
    Reverted { handle: TxHandle, reason: String },

    #[error("Transaction {handle} not confirmed after {waited:?}")]
    Timeout { handle: TxHandle, waited: Duration },

    #[error("Safe proposal {handle} rejected: {reason}")]
    ProposalRejected { handle: TxHandle, reason: String },

    #[error("Contract address not configured: {name}")]
    MissingContract { name: &'static str },

    #[error("Commit failed: {0}")]
    Wallet(#[from] WalletError),
}

/// Flow planning / execution errors.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Planning {flow_id} failed: {source}")]
    Planning {
        flow_id: &'static str,
        #[source]
        source: WalletError,
    },

    #[error("Step {step_id} ({step_name}) failed: {source}")]
    StepFailed {
        step_id: &'static str,
        step_name: String,
        #[source]
        source: TransactionError,
    },

    #[error("Contract address not configured: {name}")]
    MissingContract { name: &'static str },

    #[error("Flow {flow_id} was already started")]
    AlreadyStarted { flow_id: &'static str },

}

/// Onboarding (terms signature) errors.
#[derive(Debug, thiserror::Error)]
pub enum OnboardingError {
    #[error("Signature rejected by wallet: {reason}")]
    SignatureRejected { reason: String },

    #[error("Server did not accept signature for {address} (request {request_id})")]
    VerificationFailed { address: String, request_id: String },

    #[error("Onboarding API error: {0}")]
    Api(#[from] HttpError),

    #[error("Signed terms version {signed} is older than the required version {required}")]
    OutdatedVersion { signed: u32, required: u32 },

    #[error("No account connected")]
    NoAccount,

    #[error("Active account changed from {expected} while signing")]
    AccountChanged { expected: String },

    #[error("Wallet error: {0}")]
    Wallet(WalletError),
}

/// HTTP transport errors for the external JSON services.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("config error: {0}")]
    Config(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("http status {status} body={body}")]
    HttpStatus { status: u16, body: String },

    #[error("decode error: {0}")]
    Decode(String),
}

impl HttpError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            Self::Config(_) | Self::Decode(_) => false,
        }
    }
}

/// Price lookup errors. Prices are never defaulted.
#[derive(Debug, thiserror::Error)]
pub enum PriceError {
    #[error("Unsupported token: {symbol}")]
    UnknownToken { symbol: String },

    #[error("Unknown pool: {pool_id}")]
    UnknownPool { pool_id: String },

    #[error("No price feed configured for collateral {symbol}")]
    MissingPriceFeed { symbol: String },

    #[error("Price source returned no price for {symbol}")]
    MissingQuote { symbol: String },

    #[error("Malformed rewards data: {reason}")]
    InvalidRewards { reason: String },

    #[error("Price source error: {0}")]
    Http(#[from] HttpError),

    #[error("Price feed read failed: {0}")]
    Chain(#[from] WalletError),
}

/// Errors from the durable key/value store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to write {path}: {reason}")]
    Write { path: String, reason: String },
}

/// Failure domains surfaced to UI consumers.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorDomain {
    Config,
    Validation,
    Wallet,
    Chain,
    Onboarding,
    Network,
    Pricing,
    Storage,
}

/// Structured error payload for display and status events.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub domain: ErrorDomain,
    pub code: &'static str,
    pub retryable: bool,
    pub message: String,
}

impl ErrorPayload {
    fn new(
        domain: ErrorDomain,
        code: &'static str,
        retryable: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            domain,
            code,
            retryable,
            message: message.into(),
        }
    }
}

impl WalletError {
    fn to_error_payload(&self) -> ErrorPayload {
        match self {
            Self::UserRejected { .. } => ErrorPayload::new(
                ErrorDomain::Wallet,
                "wallet.user_rejected",
                true,
                self.to_string(),
            ),
            Self::NotConnected => ErrorPayload::new(
                ErrorDomain::Wallet,
                "wallet.not_connected",
                true,
                self.to_string(),
            ),
            Self::Rpc { .. } => {
                ErrorPayload::new(ErrorDomain::Chain, "chain.rpc_failed", true, self.to_string())
            }
            Self::InvalidReturn { .. } => ErrorPayload::new(
                ErrorDomain::Chain,
                "chain.invalid_return",
                false,
                self.to_string(),
            ),
        }
    }
}

impl TransactionError {
    fn to_error_payload(&self) -> ErrorPayload {
        match self {
            Self::Reverted { .. } => ErrorPayload::new(
                ErrorDomain::Chain,
                "chain.tx_reverted",
                false,
                self.to_string(),
            ),
            Self::Timeout { .. } => ErrorPayload::new(
                ErrorDomain::Chain,
                "chain.tx_timeout",
                true,
                self.to_string(),
            ),
            Self::ProposalRejected { .. } => ErrorPayload::new(
                ErrorDomain::Chain,
                "chain.safe_proposal_rejected",
                false,
                self.to_string(),
            ),
            Self::MissingContract { .. } => ErrorPayload::new(
                ErrorDomain::Config,
                "config.missing_contract",
                false,
                self.to_string(),
            ),
            Self::Wallet(err) => err.to_error_payload(),
        }
    }
}

impl FlowError {
    /// Display payload; step failures keep the code of their cause.
    pub fn to_error_payload(&self) -> ErrorPayload {
        match self {
            Self::Validation(inner) => ErrorPayload::new(
                ErrorDomain::Validation,
                "validation.request_invalid",
                false,
                inner.to_string(),
            ),
            Self::Planning { source, .. } => {
                let mut payload = source.to_error_payload();
                payload.message = self.to_string();
                payload
            }
            Self::StepFailed { source, .. } => {
                let mut payload = source.to_error_payload();
                payload.message = self.to_string();
                payload
            }
            Self::MissingContract { .. } => ErrorPayload::new(
                ErrorDomain::Config,
                "config.missing_contract",
                false,
                self.to_string(),
            ),
            Self::AlreadyStarted { .. } => ErrorPayload::new(
                ErrorDomain::Validation,
                "flow.already_started",
                false,
                self.to_string(),
            ),
        }
    }
}

impl HttpError {
    fn to_error_payload(&self) -> ErrorPayload {
        let code = match self {
            Self::Config(_) => "network.misconfigured",
            Self::Network(_) => "network.unreachable",
            Self::HttpStatus { .. } => "network.http_status",
            Self::Decode(_) => "network.decode_failed",
        };
        ErrorPayload::new(
            ErrorDomain::Network,
            code,
            self.is_retryable(),
            self.to_string(),
        )
    }
}

impl OnboardingError {
    fn to_error_payload(&self) -> ErrorPayload {
        match self {
            Self::SignatureRejected { .. } => ErrorPayload::new(
                ErrorDomain::Onboarding,
                "onboarding.signature_rejected",
                true,
                self.to_string(),
            ),
            Self::VerificationFailed { .. } => ErrorPayload::new(
                ErrorDomain::Onboarding,
                "onboarding.verification_failed",
                true,
                self.to_string(),
            ),
            Self::Api(err) => err.to_error_payload(),
            Self::OutdatedVersion { .. } => ErrorPayload::new(
                ErrorDomain::Onboarding,
                "onboarding.outdated_version",
                true,
                self.to_string(),
            ),
            Self::NoAccount => ErrorPayload::new(
                ErrorDomain::Onboarding,
                "onboarding.no_account",
                false,
                self.to_string(),
            ),
            Self::AccountChanged { .. } => ErrorPayload::new(
                ErrorDomain::Onboarding,
                "onboarding.account_changed",
                true,
                self.to_string(),
            ),
            Self::Wallet(err) => err.to_error_payload(),
        }
    }
}

impl PriceError {
    fn to_error_payload(&self) -> ErrorPayload {
        match self {
            Self::UnknownToken { .. } => ErrorPayload::new(
                ErrorDomain::Pricing,
                "pricing.unknown_token",
                false,
                self.to_string(),
            ),
            Self::UnknownPool { .. } => ErrorPayload::new(
                ErrorDomain::Pricing,
                "pricing.unknown_pool",
                false,
                self.to_string(),
            ),
            Self::MissingPriceFeed { .. } => ErrorPayload::new(
                ErrorDomain::Config,
                "pricing.missing_feed",
                false,
                self.to_string(),
            ),
            Self::MissingQuote { .. } => ErrorPayload::new(
                ErrorDomain::Pricing,
                "pricing.missing_quote",
                true,
                self.to_string(),
            ),
            Self::InvalidRewards { .. } => ErrorPayload::new(
                ErrorDomain::Pricing,
                "pricing.invalid_rewards",
                false,
                self.to_string(),
            ),
            Self::Http(err) => err.to_error_payload(),
            Self::Chain(err) => err.to_error_payload(),
        }
    }
}

impl Error {
    /// Map any crate error to a stable, display-oriented payload.
    pub fn to_error_payload(&self) -> ErrorPayload {
        match self {
            Self::Config(err) => {
                ErrorPayload::new(ErrorDomain::Config, "config.invalid", false, err.to_string())
            }
            Self::Validation(err) => ErrorPayload::new(
                ErrorDomain::Validation,
                "validation.request_invalid",
                false,
                err.to_string(),
            ),
            Self::Wallet(err) => err.to_error_payload(),
            Self::Transaction(err) => err.to_error_payload(),
            Self::Flow(err) => err.to_error_payload(),
            Self::Onboarding(err) => err.to_error_payload(),
            Self::Http(err) => err.to_error_payload(),
            Self::Price(err) => err.to_error_payload(),
            Self::Store(err) => ErrorPayload::new(
                ErrorDomain::Storage,
                "storage.io",
                false,
                err.to_string(),
            ),
        }
    }
}
