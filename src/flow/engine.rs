//! Sequential flow execution.
//!
//! A run plans its steps, then commits and verifies them one at a time.
//! The first failure stops the run; later steps stay `Pending` and nothing
//! is rolled back. Every transition is published as a [`FlowSnapshot`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

use crate::error::{ErrorPayload, FlowError, TransactionError};
use crate::flow::{FlowContext, FlowDeclaration, FlowStep};
use crate::types::TxHandle;

/// Per-step progress. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Active,
    AwaitingConfirmation,
    Done,
    Failed,
}

impl StepStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Active => 1,
            Self::AwaitingConfirmation => 2,
            Self::Done | Self::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(self, next: StepStatus) -> bool {
        match next {
            Self::Failed => matches!(self, Self::Active | Self::AwaitingConfirmation),
            _ => !self.is_terminal() && next.rank() > self.rank(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Committing,
    Verifying,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FlowState {
    NotStarted,
    Planning,
    Running { step: usize, phase: RunPhase },
    Completed,
    Failed {
        #[serde(skip_serializing_if = "Option::is_none")]
        step_id: Option<&'static str>,
        error: ErrorPayload,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepSnapshot {
    pub id: &'static str,
    pub name: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<TxHandle>,
}

/// Observable state of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowSnapshot {
    pub flow_id: &'static str,
    pub run_id: Uuid,
    pub title: &'static str,
    #[serde(flatten)]
    pub state: FlowState,
    pub steps: Vec<StepSnapshot>,
    pub updated_at: DateTime<Utc>,
}

impl FlowSnapshot {
    fn new(flow_id: &'static str, title: &'static str) -> Self {
        Self {
            flow_id,
            run_id: Uuid::new_v4(),
            title,
            state: FlowState::NotStarted,
            steps: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, FlowState::Completed | FlowState::Failed { .. })
    }

    pub fn step(&self, id: &str) -> Option<&StepSnapshot> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Single-line JSON rendering for logs and status pipes.
    pub fn to_status_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                "{{\"flow_id\":\"{}\",\"state\":\"unserializable\",\"error\":\"{e}\"}}",
                self.flow_id
            )
        })
    }
}

/// Drives one invocation of a flow declaration.
pub struct FlowRunner<F: FlowDeclaration> {
    flow: Arc<F>,
    ctx: FlowContext<F::Request>,
    status: watch::Sender<FlowSnapshot>,
    started: bool,
}

impl<F: FlowDeclaration> FlowRunner<F> {
    pub fn new(flow: Arc<F>, ctx: FlowContext<F::Request>) -> Self {
        let (status, _) = watch::channel(FlowSnapshot::new(flow.flow_id(), flow.title()));
        Self {
            flow,
            ctx,
            status,
            started: false,
        }
    }

    pub fn flow_id(&self) -> &'static str {
        self.flow.flow_id()
    }

    pub fn subscribe(&self) -> watch::Receiver<FlowSnapshot> {
        self.status.subscribe()
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        self.status.borrow().clone()
    }

    /// A fresh runner for the same request. It re-plans from current chain state.
    pub fn restart(&self) -> Self {
        Self::new(Arc::clone(&self.flow), self.ctx.clone())
    }

    fn publish(&self, update: impl FnOnce(&mut FlowSnapshot)) {
        self.status.send_modify(|snapshot| {
            update(snapshot);
            snapshot.updated_at = Utc::now();
        });
    }

    fn set_step_status(&self, index: usize, next: StepStatus) {
        self.publish(|snapshot| {
            if let Some(step) = snapshot.steps.get_mut(index)
                && step.status.can_advance_to(next)
            {
                step.status = next;
            }
        });
    }

    fn fail(&self, index: Option<usize>, err: &FlowError) {
        let payload = err.to_error_payload();
        self.publish(|snapshot| {
            let step_id = index.and_then(|i| snapshot.steps.get_mut(i)).map(|step| {
                if step.status.can_advance_to(StepStatus::Failed) {
                    step.status = StepStatus::Failed;
                }
                step.id
            });
            snapshot.state = FlowState::Failed {
                step_id,
                error: payload,
            };
        });
    }

    /// Plan and execute every step in order, stopping at the first failure.
    pub async fn run(&mut self) -> Result<FlowSnapshot, FlowError> {
        let flow_id = self.flow.flow_id();
        if self.started {
            return Err(FlowError::AlreadyStarted { flow_id });
        }
        self.started = true;

        let run_id = self.status.borrow().run_id;
        let span = info_span!("flow_run", flow_id, %run_id, account = %self.ctx.account);
        self.execute().instrument(span).await
    }

    async fn execute(&self) -> Result<FlowSnapshot, FlowError> {
        self.publish(|s| s.state = FlowState::Planning);
        let steps = match self.flow.get_steps(&self.ctx).await {
            Ok(steps) => steps,
            Err(err) => {
                error!(error = %err, "planning failed");
                self.fail(None, &err);
                return Err(err);
            }
        };

        let planned: Vec<StepSnapshot> = steps
            .iter()
            .map(|step| StepSnapshot {
                id: step.id(),
                name: self.flow.step_name(*step, &self.ctx.request),
                status: StepStatus::Pending,
                handle: None,
            })
            .collect();
        info!(steps = ?planned.iter().map(|s| s.id).collect::<Vec<_>>(), "planned");
        self.publish(|s| s.steps = planned);

        for (index, step) in steps.iter().copied().enumerate() {
            if let Err(source) = self.execute_step(index, step).await {
                let err = FlowError::StepFailed {
                    step_id: step.id(),
                    step_name: self.flow.step_name(step, &self.ctx.request),
                    source,
                };
                error!(step = step.id(), error = %err, "step failed");
                self.fail(Some(index), &err);
                return Err(err);
            }
        }

        self.publish(|s| s.state = FlowState::Completed);
        info!("flow completed");
        Ok(self.snapshot())
    }

    async fn execute_step(&self, index: usize, step: F::Step) -> Result<(), TransactionError> {
        self.publish(|s| {
            s.state = FlowState::Running {
                step: index,
                phase: RunPhase::Committing,
            };
        });
        self.set_step_status(index, StepStatus::Active);

        let Some(handle) = self.flow.commit(step, &self.ctx).await? else {
            info!(step = step.id(), "nothing to submit");
            self.set_step_status(index, StepStatus::Done);
            return Ok(());
        };
        info!(step = step.id(), %handle, "submitted");

        self.publish(|s| {
            s.state = FlowState::Running {
                step: index,
                phase: RunPhase::Verifying,
            };
            if let Some(snapshot) = s.steps.get_mut(index) {
                snapshot.handle = Some(handle.clone());
            }
        });
        self.set_step_status(index, StepStatus::AwaitingConfirmation);

        self.flow.verify(step, &self.ctx, &handle).await?;
        self.set_step_status(index, StepStatus::Done);
        info!(step = step.id(), "confirmed");
        Ok(())
    }
}
