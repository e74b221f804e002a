//! Redeem DEFI rewards from pool 0, paying for them in BOLD.

use async_trait::async_trait;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::error::{FlowError, TransactionError};
use crate::flow::request::Pool0ClaimRewardsRequest;
use crate::flow::{DetailRow, FlowContext, FlowDeclaration, FlowStep, format_token};
use crate::pools::{pool0_redeem_amount, pool0_redemption_cost};
use crate::types::{Address, Amount, TOKEN_DECIMALS, TxHandle};
use crate::wallet::{ContractCall, read_amount};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool0Step {
    ApproveBold,
    ClaimRewards,
}

impl FlowStep for Pool0Step {
    fn id(&self) -> &'static str {
        match self {
            Self::ApproveBold => "approveBold",
            Self::ClaimRewards => "claimRewards",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Pool0ClaimRewards;

impl Pool0ClaimRewards {
    fn cost(request: &Pool0ClaimRewardsRequest) -> Amount {
        pool0_redemption_cost(pool0_redeem_amount(
            request.total_rewards_amount,
            request.redemption_proportion,
        ))
    }

    fn bold_token(ctx: &FlowContext<Pool0ClaimRewardsRequest>) -> Option<&Address> {
        ctx.contracts.bold_token.as_ref()
    }
}

#[async_trait]
impl FlowDeclaration for Pool0ClaimRewards {
    type Request = Pool0ClaimRewardsRequest;
    type Step = Pool0Step;

    fn step_name(&self, step: Pool0Step, _request: &Pool0ClaimRewardsRequest) -> String {
        match step {
            Pool0Step::ApproveBold => "Approve BOLD".to_string(),
            Pool0Step::ClaimRewards => "Claim rewards".to_string(),
        }
    }

    fn details(&self, request: &Pool0ClaimRewardsRequest) -> Vec<DetailRow> {
        let redeemed =
            pool0_redeem_amount(request.total_rewards_amount, request.redemption_proportion);
        let percent = Amount::new(request.redemption_proportion.value() * dec!(100));
        vec![
            DetailRow::new("Redemption proportion", format!("{percent}%")),
            DetailRow::new("DEFI to redeem", format_token(redeemed, "DEFI")),
            DetailRow::new("BOLD required", format_token(Self::cost(request), "BOLD")),
        ]
    }

    async fn get_steps(
        &self,
        ctx: &FlowContext<Pool0ClaimRewardsRequest>,
    ) -> Result<Vec<Pool0Step>, FlowError> {
        let bold = Self::bold_token(ctx).ok_or(FlowError::MissingContract { name: "bold_token" })?;
        let spender = ctx
            .contracts
            .pool0_spender()
            .ok_or(FlowError::MissingContract {
                name: "pool0_redeemer",
            })?;

        let call = ContractCall::new(bold.clone(), "allowance")
            .arg(ctx.account.as_str())
            .arg(spender.as_str());
        let allowance = read_amount(ctx.wallet.as_ref(), &call, TOKEN_DECIMALS)
            .await
            .map_err(|source| FlowError::Planning {
                flow_id: self.flow_id(),
                source,
            })?;

        let cost = Self::cost(&ctx.request);
        debug!(%allowance, %cost, "pool0 allowance check");

        let mut steps = Vec::with_capacity(2);
        if allowance < cost {
            steps.push(Pool0Step::ApproveBold);
        }
        steps.push(Pool0Step::ClaimRewards);
        Ok(steps)
    }

    async fn commit(
        &self,
        step: Pool0Step,
        ctx: &FlowContext<Pool0ClaimRewardsRequest>,
    ) -> Result<Option<TxHandle>, TransactionError> {
        match step {
            Pool0Step::ApproveBold => {
                let bold = Self::bold_token(ctx)
                    .ok_or(TransactionError::MissingContract { name: "bold_token" })?;
                let spender = ctx
                    .contracts
                    .pool0_spender()
                    .ok_or(TransactionError::MissingContract {
                        name: "pool0_redeemer",
                    })?;
                let call = ContractCall::new(bold.clone(), "approve")
                    .arg(spender.as_str())
                    .arg(Self::cost(&ctx.request).to_raw(TOKEN_DECIMALS));
                Ok(Some(ctx.wallet.write_contract(&call).await?))
            }
            // The redeemer has no claim entry point yet.
            Pool0Step::ClaimRewards => Ok(None),
        }
    }
}
