//! earnflow: transaction flows and onboarding for a DeFi earn front-end.
//!
//! Two engines sit at the core:
//!
//! - [`flow`] plans and runs multi-step transaction flows (approve, deposit,
//!   withdraw, claim) against a connected [`wallet::Wallet`], publishing
//!   per-step progress on a watch channel.
//! - [`onboarding`] decides per connected account whether the current terms
//!   of service have been signed, consulting a durable cache before the
//!   remote service, and gates actions on the result.
//!
//! [`prices`] and [`pools`] provide the data the flows display.

pub mod cli;
pub mod config;
pub mod error;
pub mod fake;
pub mod flow;
pub mod http;
pub mod onboarding;
pub mod pools;
pub mod prices;
pub mod settings;
pub mod types;
pub mod wallet;

pub use config::Config;
pub use error::{Error, ErrorPayload, Result};
pub use flow::{FlowEnv, FlowRequest, FlowRunner, FlowSnapshot, run_raw};
pub use onboarding::{OnboardingReconciler, OnboardingStatus};
pub use prices::PriceFeed;
