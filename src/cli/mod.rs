//! Command-line interface.

mod doctor;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::flow::FlowRequest;
use crate::onboarding::{FileStore, HttpOnboardingApi, OnboardingReconciler};
use crate::prices::PriceFeed;
use crate::types::Address;
use crate::wallet::WatchOnlyWallet;

pub use doctor::run_doctor_command;

#[derive(Parser, Debug)]
#[command(name = "earnflow", version, about = "Earn transaction flows and onboarding tools")]
pub struct Cli {
    /// TOML config file (defaults to ~/.earnflow/config.toml).
    #[arg(long, global = true, env = "EARNFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Validate a flow request and print its review summary.
    Validate {
        /// Path to a JSON flow request.
        request: PathBuf,
    },

    /// Reconcile the onboarding status of an address.
    OnboardStatus {
        address: String,
    },

    /// Look up USD prices of one or more token symbols.
    Price {
        #[arg(required = true)]
        symbols: Vec<String>,
    },

    /// Check configuration and external endpoints.
    Doctor {
        /// Exit non-zero when any check fails.
        #[arg(long)]
        strict: bool,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let config_path = self.config.as_deref();
        match self.command {
            Command::Validate { request } => validate(&request),
            Command::OnboardStatus { address } => onboard_status(config_path, &address).await,
            Command::Price { symbols } => price(config_path, &symbols).await,
            Command::Doctor { strict } => run_doctor_command(config_path, strict).await,
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    Config::from_env_with_toml(path).context("failed to load configuration")
}

fn validate(path: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("{} is not JSON", path.display()))?;
    let request = FlowRequest::parse(&value)?;
    let summary = request.describe();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn onboard_status(config_path: Option<&Path>, address: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let address: Address = address
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let api = HttpOnboardingApi::new(&config.onboarding)?;
    let store = FileStore::new(&config.onboarding.store_path);
    let reconciler = OnboardingReconciler::new(
        Arc::new(api),
        Arc::new(store),
        Arc::new(WatchOnlyWallet::new(address.clone())),
    );
    reconciler.switch_account(Some(address)).await;
    println!("{}", serde_json::to_string_pretty(&reconciler.snapshot())?);
    Ok(())
}

async fn price(config_path: Option<&Path>, symbols: &[String]) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let feed = PriceFeed::new(&config.prices, &config.contracts, &config.pools)?;
    let symbols: Vec<&str> = symbols.iter().map(String::as_str).collect();
    for (symbol, price) in feed.prices(&symbols).await? {
        println!("{symbol}\t{price}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["earnflow", "validate", "req.json"]).expect("parse");
        assert!(matches!(cli.command, Command::Validate { ref request } if request == Path::new("req.json")));

        let cli = Cli::try_parse_from(["earnflow", "--json-logs", "price", "LQTY", "BOLD"])
            .expect("parse");
        assert!(cli.json_logs);
        assert!(matches!(cli.command, Command::Price { ref symbols } if symbols == &["LQTY", "BOLD"]));
        assert!(Cli::try_parse_from(["earnflow", "price"]).is_err());

        let cli = Cli::try_parse_from(["earnflow", "doctor", "--strict"]).expect("parse");
        assert!(matches!(cli.command, Command::Doctor { strict: true }));
    }

    #[test]
    fn validate_rejects_invalid_request() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("request.json");
        std::fs::write(&path, r#"{"flowId": "pool9Claim"}"#).expect("write");
        assert!(validate(&path).is_err());
    }

    #[test]
    fn validate_accepts_claim_request() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("request.json");
        std::fs::write(
            &path,
            r#"{
                "flowId": "pool0ClaimRewards",
                "backLink": ["/earn", "Back"],
                "successLink": ["/earn", "Back to earn"],
                "totalRewardsAmount": "100",
                "redemptionProportion": "0.5"
            }"#,
        )
        .expect("write");
        validate(&path).expect("valid");
    }
}
