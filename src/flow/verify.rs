//! Confirmation strategies for committed steps.
//!
//! An EOA commit yields a mined-transaction hash and is confirmed by polling
//! its receipt. A Safe commit yields a proposal hash that co-signers execute
//! later, so it is polled on a slower cadence until it resolves to a
//! transaction, whose receipt is then polled in turn.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

use crate::config::ChainConfig;
use crate::error::TransactionError;
use crate::types::{SenderKind, TxHandle, TxHash};
use crate::wallet::{ConfirmationTracker, ProposalStatus, ReceiptStatus};

#[async_trait]
pub trait VerificationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Resolve once `handle` is confirmed on chain.
    async fn verify(&self, handle: &TxHandle) -> Result<(), TransactionError>;
}

/// Polls transaction receipts until confirmed, reverted or timed out.
pub struct ReceiptPolling {
    tracker: Arc<dyn ConfirmationTracker>,
    interval: Duration,
    timeout: Duration,
}

impl ReceiptPolling {
    pub fn new(tracker: Arc<dyn ConfirmationTracker>, interval: Duration, timeout: Duration) -> Self {
        Self {
            tracker,
            interval,
            timeout,
        }
    }

    async fn wait_for_receipt(&self, handle: &TxHandle, tx: &TxHash) -> Result<(), TransactionError> {
        let poll = async {
            let mut attempt: u32 = 0;
            loop {
                attempt += 1;
                match self.tracker.receipt_status(tx).await {
                    Ok(ReceiptStatus::Confirmed) => {
                        info!(%tx, attempt, "transaction confirmed");
                        return Ok(());
                    }
                    Ok(ReceiptStatus::Reverted { reason }) => {
                        warn!(%tx, %reason, "transaction reverted");
                        return Err(TransactionError::Reverted {
                            handle: handle.clone(),
                            reason,
                        });
                    }
                    Ok(ReceiptStatus::Pending) => debug!(%tx, attempt, "receipt pending"),
                    // RPC hiccups are not a verdict on the transaction.
                    Err(err) => warn!(%tx, attempt, error = %err, "receipt lookup failed"),
                }
                sleep(self.interval).await;
            }
        };

        timeout(self.timeout, poll)
            .await
            .unwrap_or_else(|_| {
                Err(TransactionError::Timeout {
                    handle: handle.clone(),
                    waited: self.timeout,
                })
            })
    }
}

#[async_trait]
impl VerificationStrategy for ReceiptPolling {
    fn name(&self) -> &'static str {
        "receipt_polling"
    }

    #[instrument(skip_all, fields(strategy = "receipt_polling", handle = %handle))]
    async fn verify(&self, handle: &TxHandle) -> Result<(), TransactionError> {
        self.wait_for_receipt(handle, handle.hash()).await
    }
}

/// Polls a Safe proposal until it is executed, then confirms the executing
/// transaction through receipt polling.
pub struct SafeProposalPolling {
    tracker: Arc<dyn ConfirmationTracker>,
    interval: Duration,
    timeout: Duration,
    receipts: ReceiptPolling,
}

impl SafeProposalPolling {
    pub fn new(
        tracker: Arc<dyn ConfirmationTracker>,
        interval: Duration,
        timeout: Duration,
        receipts: ReceiptPolling,
    ) -> Self {
        Self {
            tracker,
            interval,
            timeout,
            receipts,
        }
    }

    async fn wait_for_execution(
        &self,
        handle: &TxHandle,
        proposal: &TxHash,
    ) -> Result<TxHash, TransactionError> {
        let poll = async {
            loop {
                match self.tracker.proposal_status(proposal).await {
                    Ok(ProposalStatus::Executed { tx }) => return Ok(tx),
                    Ok(ProposalStatus::Rejected { reason }) => {
                        return Err(TransactionError::ProposalRejected {
                            handle: handle.clone(),
                            reason,
                        });
                    }
                    Ok(ProposalStatus::Pending) => debug!(%proposal, "proposal awaiting signatures"),
                    Err(err) => warn!(%proposal, error = %err, "proposal lookup failed"),
                }
                sleep(self.interval).await;
            }
        };

        timeout(self.timeout, poll)
            .await
            .unwrap_or_else(|_| {
                Err(TransactionError::Timeout {
                    handle: handle.clone(),
                    waited: self.timeout,
                })
            })
    }
}

#[async_trait]
impl VerificationStrategy for SafeProposalPolling {
    fn name(&self) -> &'static str {
        "safe_proposal_polling"
    }

    #[instrument(skip_all, fields(strategy = "safe_proposal_polling", handle = %handle))]
    async fn verify(&self, handle: &TxHandle) -> Result<(), TransactionError> {
        match handle {
            TxHandle::Transaction(_) => self.receipts.verify(handle).await,
            TxHandle::SafeProposal(proposal) => {
                let tx = self.wait_for_execution(handle, proposal).await?;
                info!(%proposal, %tx, "proposal executed");
                let executed = TxHandle::transaction(tx);
                self.receipts.wait_for_receipt(&executed, executed.hash()).await
            }
        }
    }
}

/// Pick the confirmation strategy for the connected sender.
pub fn verification_strategy_for(
    sender: SenderKind,
    chain: &ChainConfig,
    tracker: Arc<dyn ConfirmationTracker>,
) -> Arc<dyn VerificationStrategy> {
    let receipts = ReceiptPolling::new(
        Arc::clone(&tracker),
        chain.poll_interval,
        chain.confirmation_timeout,
    );
    match sender {
        SenderKind::Eoa => Arc::new(receipts),
        SenderKind::Safe => Arc::new(SafeProposalPolling::new(
            tracker,
            chain.safe_poll_interval,
            chain.safe_proposal_timeout,
            receipts,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WalletError;
    use crate::fake::FakeChain;

    fn hash(byte: char) -> TxHash {
        format!("0x{}", byte.to_string().repeat(64)).parse().expect("hash")
    }

    fn fast_chain() -> ChainConfig {
        ChainConfig {
            poll_interval: Duration::from_millis(5),
            confirmation_timeout: Duration::from_millis(200),
            safe_poll_interval: Duration::from_millis(5),
            safe_proposal_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn receipt_polling_waits_through_pending_and_rpc_errors() {
        let chain = Arc::new(FakeChain::new());
        let tx = hash('a');
        chain.push_receipt(&tx, ReceiptStatus::Pending);
        chain.push_receipt_error(
            &tx,
            WalletError::Rpc {
                method: "eth_getTransactionReceipt".to_string(),
                reason: "connection reset".to_string(),
            },
        );
        chain.push_receipt(&tx, ReceiptStatus::Confirmed);

        let strategy = verification_strategy_for(SenderKind::Eoa, &fast_chain(), chain.clone());
        assert_eq!(strategy.name(), "receipt_polling");
        strategy
            .verify(&TxHandle::transaction(tx.clone()))
            .await
            .expect("confirmed");
        assert_eq!(chain.receipt_lookups(&tx), 3);
    }

    #[tokio::test]
    async fn receipt_polling_reports_revert() {
        let chain = Arc::new(FakeChain::new());
        let tx = hash('b');
        chain.push_receipt(
            &tx,
            ReceiptStatus::Reverted {
                reason: "out of gas".to_string(),
            },
        );

        let strategy = verification_strategy_for(SenderKind::Eoa, &fast_chain(), chain);
        let err = strategy
            .verify(&TxHandle::transaction(tx))
            .await
            .expect_err("reverted");
        assert!(matches!(err, TransactionError::Reverted { ref reason, .. } if reason == "out of gas"));
    }

    #[tokio::test]
    async fn receipt_polling_times_out() {
        let chain = Arc::new(FakeChain::new());
        let tx = hash('c');
        chain.push_receipt(&tx, ReceiptStatus::Pending);

        let mut config = fast_chain();
        config.confirmation_timeout = Duration::from_millis(30);
        let strategy = verification_strategy_for(SenderKind::Eoa, &config, chain);
        let err = strategy
            .verify(&TxHandle::transaction(tx))
            .await
            .expect_err("timeout");
        assert!(matches!(err, TransactionError::Timeout { waited, .. } if waited == Duration::from_millis(30)));
    }

    #[tokio::test]
    async fn safe_proposal_resolves_to_executed_receipt() {
        let chain = Arc::new(FakeChain::new());
        let proposal = hash('d');
        let executed = hash('e');
        chain.push_proposal(&proposal, ProposalStatus::Pending);
        chain.push_proposal(
            &proposal,
            ProposalStatus::Executed {
                tx: executed.clone(),
            },
        );
        chain.push_receipt(&executed, ReceiptStatus::Confirmed);

        let strategy = verification_strategy_for(SenderKind::Safe, &fast_chain(), chain.clone());
        assert_eq!(strategy.name(), "safe_proposal_polling");
        strategy
            .verify(&TxHandle::safe_proposal(proposal))
            .await
            .expect("executed");
        assert_eq!(chain.receipt_lookups(&executed), 1);
    }

    #[tokio::test]
    async fn rejected_safe_proposal_fails() {
        let chain = Arc::new(FakeChain::new());
        let proposal = hash('f');
        chain.push_proposal(
            &proposal,
            ProposalStatus::Rejected {
                reason: "owners rejected".to_string(),
            },
        );

        let strategy = verification_strategy_for(SenderKind::Safe, &fast_chain(), chain);
        let err = strategy
            .verify(&TxHandle::safe_proposal(proposal))
            .await
            .expect_err("rejected");
        assert!(matches!(err, TransactionError::ProposalRejected { .. }));
    }
}
