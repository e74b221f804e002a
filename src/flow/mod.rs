//! Transaction flows.
//!
//! A flow turns a validated request into an ordered list of steps, each of
//! which commits at most one transaction and then waits for it to confirm.
//! Declarations are stateless; per-run data lives in [`FlowContext`] and the
//! run itself is driven by [`engine::FlowRunner`].

pub mod engine;
pub mod registry;
pub mod request;
pub mod verify;

mod pool0_claim_rewards;
mod pool1_claim_rewards;
mod pool1_update;
mod pool2_claim_rewards;

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::config::{ChainConfig, ContractsConfig};
use crate::error::{FlowError, TransactionError, ValidationError, WalletError};
use crate::types::{Address, SenderKind, TxHandle};
use crate::wallet::{ConfirmationTracker, Wallet};

pub use engine::{FlowRunner, FlowSnapshot, FlowState, RunPhase, StepSnapshot, StepStatus};
pub use pool0_claim_rewards::{Pool0ClaimRewards, Pool0Step};
pub use pool1_claim_rewards::{Pool1ClaimRewards, Pool1ClaimStep};
pub use pool1_update::{Pool1Step, Pool1Update};
pub use pool2_claim_rewards::{Pool2ClaimRewards, Pool2ClaimStep};
pub use registry::{FlowExecution, FlowSummary, prepare, run_flow, run_raw};
pub use request::{FlowRequest, FlowRequestBody, NavLink, RequestLinks};
pub use verify::{ReceiptPolling, SafeProposalPolling, VerificationStrategy, verification_strategy_for};

/// Title shown above every flow's review screen.
pub const DEFAULT_FLOW_TITLE: &str = "Review & Send Transaction";

/// A step kind declared by a flow.
pub trait FlowStep: Copy + Debug + PartialEq + Eq + Send + Sync + 'static {
    /// Stable identifier, e.g. `approveBold`.
    fn id(&self) -> &'static str;
}

/// One label/value line of a flow summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetailRow {
    pub label: String,
    pub value: String,
}

impl DetailRow {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Everything a single flow invocation needs. Built once per run.
pub struct FlowContext<R> {
    pub request: R,
    pub account: Address,
    pub sender: SenderKind,
    pub wallet: Arc<dyn Wallet>,
    pub verifier: Arc<dyn VerificationStrategy>,
    pub contracts: ContractsConfig,
}

impl<R: Clone> Clone for FlowContext<R> {
    fn clone(&self) -> Self {
        Self {
            request: self.request.clone(),
            account: self.account.clone(),
            sender: self.sender,
            wallet: Arc::clone(&self.wallet),
            verifier: Arc::clone(&self.verifier),
            contracts: self.contracts.clone(),
        }
    }
}

/// Static shape of a flow: how to parse, describe, plan and execute it.
#[async_trait]
pub trait FlowDeclaration: Send + Sync + 'static {
    type Request: FlowRequestBody;
    type Step: FlowStep;

    fn flow_id(&self) -> &'static str {
        <Self::Request as FlowRequestBody>::FLOW_ID
    }

    fn title(&self) -> &'static str {
        DEFAULT_FLOW_TITLE
    }

    fn parse_request(&self, raw: &Value) -> Result<Self::Request, ValidationError> {
        <Self::Request as FlowRequestBody>::parse(raw)
    }

    fn step_name(&self, step: Self::Step, request: &Self::Request) -> String;

    fn details(&self, request: &Self::Request) -> Vec<DetailRow>;

    /// Plan the steps for this invocation. Read-only against the chain.
    async fn get_steps(
        &self,
        ctx: &FlowContext<Self::Request>,
    ) -> Result<Vec<Self::Step>, FlowError>;

    /// Submit the step's transaction, or `None` when there is nothing to send.
    async fn commit(
        &self,
        step: Self::Step,
        ctx: &FlowContext<Self::Request>,
    ) -> Result<Option<TxHandle>, TransactionError>;

    async fn verify(
        &self,
        _step: Self::Step,
        ctx: &FlowContext<Self::Request>,
        handle: &TxHandle,
    ) -> Result<(), TransactionError> {
        ctx.verifier.verify(handle).await
    }
}

/// Shared collaborators from which per-run contexts are built.
#[derive(Clone)]
pub struct FlowEnv {
    pub wallet: Arc<dyn Wallet>,
    pub tracker: Arc<dyn ConfirmationTracker>,
    pub chain: ChainConfig,
    pub contracts: ContractsConfig,
}

impl FlowEnv {
    pub fn new(
        wallet: Arc<dyn Wallet>,
        tracker: Arc<dyn ConfirmationTracker>,
        chain: ChainConfig,
        contracts: ContractsConfig,
    ) -> Self {
        Self {
            wallet,
            tracker,
            chain,
            contracts,
        }
    }

    /// Bind `request` to the connected account and its verification strategy.
    pub fn context<R: FlowRequestBody>(&self, request: R) -> Result<FlowContext<R>, FlowError> {
        let account = self.wallet.account().ok_or(FlowError::Planning {
            flow_id: R::FLOW_ID,
            source: WalletError::NotConnected,
        })?;
        let sender = self.wallet.sender_kind();
        Ok(FlowContext {
            request,
            account,
            sender,
            wallet: Arc::clone(&self.wallet),
            verifier: verification_strategy_for(sender, &self.chain, Arc::clone(&self.tracker)),
            contracts: self.contracts.clone(),
        })
    }
}

/// Amount formatted with a unit suffix, as shown in detail rows.
pub(crate) fn format_token(amount: crate::types::Amount, symbol: &str) -> String {
    format!("{amount} {symbol}")
}
