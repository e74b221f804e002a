//! Deposit to or withdraw from a pool-1 stability pool.

use async_trait::async_trait;
use tracing::debug;

use crate::error::{FlowError, TransactionError};
use crate::flow::request::Pool1UpdateRequest;
use crate::flow::{DetailRow, FlowContext, FlowDeclaration, FlowStep, format_token};
use crate::types::TxHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool1Step {
    Deposit,
    Withdraw,
}

impl FlowStep for Pool1Step {
    fn id(&self) -> &'static str {
        match self {
            Self::Deposit => "provideToStabilityPool",
            Self::Withdraw => "withdrawFromStabilityPool",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Pool1Update;

impl Pool1Update {
    fn direction(request: &Pool1UpdateRequest) -> Pool1Step {
        if request.earn_position.deposit > request.prev_earn_position.deposit {
            Pool1Step::Deposit
        } else {
            Pool1Step::Withdraw
        }
    }
}

/// `BOLD-USDC` -> `BOLD/USDC LP`.
pub(crate) fn lp_symbol(pool_id: &str) -> String {
    format!("{} LP", pool_id.replacen('-', "/", 1))
}

#[async_trait]
impl FlowDeclaration for Pool1Update {
    type Request = Pool1UpdateRequest;
    type Step = Pool1Step;

    fn step_name(&self, step: Pool1Step, _request: &Pool1UpdateRequest) -> String {
        match step {
            Pool1Step::Deposit => "Deposit".to_string(),
            Pool1Step::Withdraw => "Withdraw".to_string(),
        }
    }

    fn details(&self, request: &Pool1UpdateRequest) -> Vec<DetailRow> {
        let new = request.earn_position.deposit;
        let prev = request.prev_earn_position.deposit;
        let (label, change) = match Self::direction(request) {
            Pool1Step::Deposit => ("You deposit", new.saturating_sub(prev)),
            Pool1Step::Withdraw => ("You withdraw", prev.saturating_sub(new)),
        };

        let mut rows = vec![DetailRow::new(
            label,
            format_token(change, &lp_symbol(&request.pool_id)),
        )];
        let defi = request.earn_position.rewards.defi;
        if !defi.is_zero() {
            let label = if request.claim_rewards {
                "Claim DEFI rewards"
            } else {
                "Compound DEFI rewards"
            };
            rows.push(DetailRow::new(label, format_token(defi, "DEFI")));
        }
        rows
    }

    async fn get_steps(
        &self,
        ctx: &FlowContext<Pool1UpdateRequest>,
    ) -> Result<Vec<Pool1Step>, FlowError> {
        let step = Self::direction(&ctx.request);
        debug!(
            pool_id = %ctx.request.pool_id,
            claim_rewards = ctx.request.claim_rewards,
            step = step.id(),
            "pool1 update planned"
        );
        Ok(vec![step])
    }

    async fn commit(
        &self,
        _step: Pool1Step,
        _ctx: &FlowContext<Pool1UpdateRequest>,
    ) -> Result<Option<TxHandle>, TransactionError> {
        // Stability pool contracts are not deployed yet.
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::request::RequestLinks;
    use crate::pools::{Pool1Tag, PositionPool1, RewardAmounts};
    use crate::types::Amount;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn position(deposit: Decimal, defi: Decimal) -> PositionPool1 {
        PositionPool1 {
            tag: Pool1Tag::Pool1,
            owner: "0x00000000000000000000000000000000000000a1"
                .parse()
                .expect("address"),
            pool_id: "BOLD-USDC".to_string(),
            deposit: Amount::new(deposit),
            rewards: RewardAmounts {
                defi: Amount::new(defi),
            },
        }
    }

    fn request(prev: Decimal, new: Decimal, defi: Decimal) -> Pool1UpdateRequest {
        Pool1UpdateRequest {
            links: RequestLinks::default(),
            pool_id: "BOLD-USDC".to_string(),
            claim_rewards: true,
            earn_position: position(new, defi),
            pool_deposit: Amount::new(dec!(1000)),
            prev_earn_position: position(prev, Decimal::ZERO),
            prev_pool_deposit: Amount::new(dec!(990)),
        }
    }

    #[test]
    fn increase_is_a_deposit() {
        let req = request(dec!(10), dec!(20), dec!(0));
        assert_eq!(Pool1Update::direction(&req), Pool1Step::Deposit);
        assert_eq!(Pool1Step::Deposit.id(), "provideToStabilityPool");
        let rows = Pool1Update.details(&req);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].label, "You deposit");
        assert_eq!(rows[0].value, "10 BOLD/USDC LP");
    }

    #[test]
    fn equal_or_lower_is_a_withdrawal() {
        let req = request(dec!(20), dec!(20), dec!(0));
        assert_eq!(Pool1Update::direction(&req), Pool1Step::Withdraw);

        let req = request(dec!(20), dec!(5), dec!(1.5));
        assert_eq!(Pool1Update::direction(&req), Pool1Step::Withdraw);
        let rows = Pool1Update.details(&req);
        assert_eq!(rows[0].label, "You withdraw");
        assert_eq!(rows[0].value, "15 BOLD/USDC LP");
        assert_eq!(rows[1], DetailRow::new("Claim DEFI rewards", "1.5 DEFI"));

        let mut compound = req.clone();
        compound.claim_rewards = false;
        assert_eq!(Pool1Update.details(&compound)[1].label, "Compound DEFI rewards");
        assert_eq!(Pool1Update.step_name(Pool1Step::Withdraw, &req), "Withdraw");
    }
}
