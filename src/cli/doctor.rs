//! `earnflow doctor` - configuration and endpoint diagnostics.
//!
//! Resolves every configuration section and checks the external services the
//! crate depends on. Each check reports pass/fail/skip with a short detail.

use std::path::Path;

use crate::config::Config;
use crate::onboarding::{FileStore, HttpOnboardingApi, OnboardingApi};
use crate::prices::PriceFeed;

/// Run diagnostic checks and print results.
pub async fn run_doctor_command(config_path: Option<&Path>, strict: bool) -> anyhow::Result<()> {
    println!("earnflow doctor");
    println!("===============\n");

    let mut passed = 0u32;
    let mut failed = 0u32;

    let config = match Config::from_env_with_toml(config_path) {
        Ok(config) => {
            check(
                "Configuration",
                CheckResult::Pass("all sections resolved".to_string()),
                &mut passed,
                &mut failed,
            );
            config
        }
        Err(e) => {
            check(
                "Configuration",
                CheckResult::Fail(e.to_string()),
                &mut passed,
                &mut failed,
            );
            summarize(passed, failed, strict)?;
            return Ok(());
        }
    };

    check(
        "Contract addresses",
        check_contracts(&config),
        &mut passed,
        &mut failed,
    );

    check(
        "Onboarding store",
        check_onboarding_store(&config.onboarding.store_path),
        &mut passed,
        &mut failed,
    );

    check(
        "Onboarding API",
        check_onboarding_api(&config).await,
        &mut passed,
        &mut failed,
    );

    check(
        "CoinGecko price",
        check_price(&config, "LQTY").await,
        &mut passed,
        &mut failed,
    );

    summarize(passed, failed, strict)
}

fn summarize(passed: u32, failed: u32, strict: bool) -> anyhow::Result<()> {
    println!();
    println!("  {passed} passed, {failed} failed");

    if failed > 0 && strict {
        anyhow::bail!("doctor strict mode failed with {failed} check(s)");
    }
    Ok(())
}

fn check(name: &str, result: CheckResult, passed: &mut u32, failed: &mut u32) {
    match result {
        CheckResult::Pass(detail) => {
            *passed += 1;
            println!("  [pass] {name}: {detail}");
        }
        CheckResult::Fail(detail) => {
            *failed += 1;
            println!("  [FAIL] {name}: {detail}");
        }
        CheckResult::Skip(reason) => {
            println!("  [skip] {name}: {reason}");
        }
    }
}

#[derive(Debug)]
enum CheckResult {
    Pass(String),
    Fail(String),
    Skip(String),
}

fn check_contracts(config: &Config) -> CheckResult {
    let contracts = &config.contracts;
    let mut missing = Vec::new();
    if contracts.bold_token.is_none() {
        missing.push("CONTRACT_BOLD_TOKEN");
    }
    if contracts.pool2_distributor.is_none() {
        missing.push("CONTRACT_POOL2_DISTRIBUTOR");
    }
    if missing.is_empty() {
        CheckResult::Pass(format!(
            "{} collateral price feed(s) configured",
            contracts.price_feeds.len()
        ))
    } else {
        CheckResult::Fail(format!("not set: {}", missing.join(", ")))
    }
}

fn check_onboarding_store(path: &Path) -> CheckResult {
    match FileStore::new(path).entry_count() {
        Ok(count) => CheckResult::Pass(format!("{} ({count} cached)", path.display())),
        Err(e) => CheckResult::Fail(format!("{e}; the file will be reset on the next write")),
    }
}

async fn check_onboarding_api(config: &Config) -> CheckResult {
    if config.onboarding.api_endpoint.is_none() {
        return CheckResult::Skip("ONBOARD_API_ENDPOINT not set".to_string());
    }
    let api = match HttpOnboardingApi::new(&config.onboarding) {
        Ok(api) => api,
        Err(e) => return CheckResult::Fail(e.to_string()),
    };
    match api.sign_message_version().await {
        Ok(version) => CheckResult::Pass(format!("required terms version {version}")),
        Err(e) => CheckResult::Fail(e.to_string()),
    }
}

async fn check_price(config: &Config, symbol: &str) -> CheckResult {
    let feed = match PriceFeed::new(&config.prices, &config.contracts, &config.pools) {
        Ok(feed) => feed,
        Err(e) => return CheckResult::Fail(e.to_string()),
    };
    match feed.price(symbol).await {
        Ok(price) => CheckResult::Pass(format!("{symbol} = ${price}")),
        Err(e) => CheckResult::Fail(e.to_string()),
    }
}
