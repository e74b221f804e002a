//! Claim DEFI rewards accrued on a pool-1 position.

use async_trait::async_trait;

use crate::error::{FlowError, TransactionError};
use crate::flow::request::Pool1ClaimRewardsRequest;
use crate::flow::{DetailRow, FlowContext, FlowDeclaration, FlowStep, format_token};
use crate::types::TxHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool1ClaimStep {
    ClaimRewards,
}

impl FlowStep for Pool1ClaimStep {
    fn id(&self) -> &'static str {
        "claimRewards"
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Pool1ClaimRewards;

#[async_trait]
impl FlowDeclaration for Pool1ClaimRewards {
    type Request = Pool1ClaimRewardsRequest;
    type Step = Pool1ClaimStep;

    fn step_name(&self, _step: Pool1ClaimStep, _request: &Pool1ClaimRewardsRequest) -> String {
        "Claim rewards".to_string()
    }

    fn details(&self, request: &Pool1ClaimRewardsRequest) -> Vec<DetailRow> {
        vec![DetailRow::new(
            "Claim DEFI rewards",
            format_token(request.earn_position.rewards.defi, "DEFI"),
        )]
    }

    async fn get_steps(
        &self,
        _ctx: &FlowContext<Pool1ClaimRewardsRequest>,
    ) -> Result<Vec<Pool1ClaimStep>, FlowError> {
        Ok(vec![Pool1ClaimStep::ClaimRewards])
    }

    async fn commit(
        &self,
        _step: Pool1ClaimStep,
        _ctx: &FlowContext<Pool1ClaimRewardsRequest>,
    ) -> Result<Option<TxHandle>, TransactionError> {
        Ok(None)
    }
}
