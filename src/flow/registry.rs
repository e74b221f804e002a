//! Dispatch from a parsed [`FlowRequest`] to its declaration.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::info;

use crate::error::FlowError;
use crate::flow::request::{FlowRequest, RequestLinks};
use crate::flow::{
    DetailRow, FlowDeclaration, FlowEnv, FlowRunner, FlowSnapshot, Pool0ClaimRewards,
    Pool1ClaimRewards, Pool1Update, Pool2ClaimRewards,
};

/// A prepared run with its request type erased.
#[async_trait]
pub trait FlowExecution: Send {
    fn flow_id(&self) -> &'static str;

    fn subscribe(&self) -> watch::Receiver<FlowSnapshot>;

    async fn run(&mut self) -> Result<FlowSnapshot, FlowError>;
}

#[async_trait]
impl<F: FlowDeclaration> FlowExecution for FlowRunner<F> {
    fn flow_id(&self) -> &'static str {
        FlowRunner::flow_id(self)
    }

    fn subscribe(&self) -> watch::Receiver<FlowSnapshot> {
        FlowRunner::subscribe(self)
    }

    async fn run(&mut self) -> Result<FlowSnapshot, FlowError> {
        FlowRunner::run(self).await
    }
}

fn runner<F: FlowDeclaration>(
    flow: F,
    request: F::Request,
    env: &FlowEnv,
) -> Result<Box<dyn FlowExecution>, FlowError> {
    let ctx = env.context(request)?;
    Ok(Box::new(FlowRunner::new(Arc::new(flow), ctx)))
}

/// Bind a request to its declaration and the connected wallet.
pub fn prepare(request: FlowRequest, env: &FlowEnv) -> Result<Box<dyn FlowExecution>, FlowError> {
    match request {
        FlowRequest::Pool0ClaimRewards(r) => runner(Pool0ClaimRewards, r, env),
        FlowRequest::Pool1ClaimRewards(r) => runner(Pool1ClaimRewards, r, env),
        FlowRequest::Pool1Update(r) => runner(Pool1Update, r, env),
        FlowRequest::Pool2ClaimRewards(r) => runner(Pool2ClaimRewards, r, env),
    }
}

pub async fn run_flow(request: FlowRequest, env: &FlowEnv) -> Result<FlowSnapshot, FlowError> {
    prepare(request, env)?.run().await
}

/// Validate an untyped request, then run it. Invalid input never reaches the wallet.
pub async fn run_raw(raw: &Value, env: &FlowEnv) -> Result<FlowSnapshot, FlowError> {
    let request = FlowRequest::parse(raw)?;
    info!(flow_id = request.flow_id(), "request validated");
    run_flow(request, env).await
}

/// What a review screen shows before any step runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowSummary {
    pub flow_id: &'static str,
    pub title: &'static str,
    pub details: Vec<DetailRow>,
    #[serde(flatten)]
    pub links: RequestLinks,
}

fn summarize<F: FlowDeclaration>(flow: F, request: &F::Request, links: &RequestLinks) -> FlowSummary {
    FlowSummary {
        flow_id: flow.flow_id(),
        title: flow.title(),
        details: flow.details(request),
        links: links.clone(),
    }
}

impl FlowRequest {
    pub fn describe(&self) -> FlowSummary {
        let links = self.links();
        match self {
            Self::Pool0ClaimRewards(r) => summarize(Pool0ClaimRewards, r, links),
            Self::Pool1ClaimRewards(r) => summarize(Pool1ClaimRewards, r, links),
            Self::Pool1Update(r) => summarize(Pool1Update, r, links),
            Self::Pool2ClaimRewards(r) => summarize(Pool2ClaimRewards, r, links),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn describe_uses_declaration_rows() {
        let request = FlowRequest::parse(&json!({
            "flowId": "pool0ClaimRewards",
            "successLink": ["/earn", "Back to earn"],
            "totalRewardsAmount": "200",
            "redemptionProportion": "1",
        }))
        .expect("parse");

        let summary = request.describe();
        assert_eq!(summary.flow_id, "pool0ClaimRewards");
        assert_eq!(summary.title, "Review & Send Transaction");
        assert_eq!(summary.details.len(), 3);
        assert_eq!(summary.details[2].value, "20 BOLD");

        let json = serde_json::to_value(&summary).expect("serialize");
        assert_eq!(json["successLink"], json!(["/earn", "Back to earn"]));
    }
}
