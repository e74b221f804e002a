//! Claim Merkl-distributed rewards for pool-2 LP positions.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{FlowError, TransactionError};
use crate::flow::request::Pool2ClaimRewardsRequest;
use crate::flow::{DetailRow, FlowContext, FlowDeclaration, FlowStep, format_token};
use crate::pools::Pool2ClaimData;
use crate::types::TxHandle;
use crate::wallet::ContractCall;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool2ClaimStep {
    ClaimRewards,
}

impl FlowStep for Pool2ClaimStep {
    fn id(&self) -> &'static str {
        "claimRewards"
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Pool2ClaimRewards;

fn claim_call(distributor: crate::types::Address, claim: &Pool2ClaimData) -> ContractCall {
    let strings = |items: Vec<String>| Value::Array(items.into_iter().map(Value::String).collect());
    ContractCall::new(distributor, "claim")
        .arg(strings(claim.users.iter().map(|a| a.to_string()).collect()))
        .arg(strings(claim.tokens.iter().map(|a| a.to_string()).collect()))
        .arg(strings(claim.amounts.clone()))
        .arg(Value::Array(
            claim.proofs.iter().map(|p| strings(p.clone())).collect(),
        ))
}

#[async_trait]
impl FlowDeclaration for Pool2ClaimRewards {
    type Request = Pool2ClaimRewardsRequest;
    type Step = Pool2ClaimStep;

    fn step_name(&self, _step: Pool2ClaimStep, _request: &Pool2ClaimRewardsRequest) -> String {
        "Claim rewards".to_string()
    }

    fn details(&self, request: &Pool2ClaimRewardsRequest) -> Vec<DetailRow> {
        vec![DetailRow::new(
            "Claim DEFI rewards",
            format_token(request.earn_position.rewards.defi, "DEFI"),
        )]
    }

    async fn get_steps(
        &self,
        _ctx: &FlowContext<Pool2ClaimRewardsRequest>,
    ) -> Result<Vec<Pool2ClaimStep>, FlowError> {
        Ok(vec![Pool2ClaimStep::ClaimRewards])
    }

    async fn commit(
        &self,
        _step: Pool2ClaimStep,
        ctx: &FlowContext<Pool2ClaimRewardsRequest>,
    ) -> Result<Option<TxHandle>, TransactionError> {
        let distributor = ctx
            .contracts
            .pool2_distributor
            .clone()
            .ok_or(TransactionError::MissingContract {
                name: "pool2_distributor",
            })?;
        let call = claim_call(distributor, &ctx.request.earn_position.claim_data);
        Ok(Some(ctx.wallet.write_contract(&call).await?))
    }
}
