//! Actions gated on onboarding.

use std::sync::Arc;

use tracing::debug;

use crate::onboarding::OnboardingStatus;
use crate::onboarding::reconciler::OnboardingReconciler;

/// What happened when a guarded action was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    /// Status still unknown; nothing ran and no prompt was shown.
    Ignored,
    /// Not onboarded; the sign modal opened with the action bound to it.
    Prompted,
    Ran,
}

/// An action that only runs for an onboarded account. Otherwise it opens
/// the sign modal and runs once signing succeeds.
#[derive(Clone)]
pub struct GuardedAction {
    reconciler: Arc<OnboardingReconciler>,
    action: Arc<dyn Fn() + Send + Sync>,
}

impl GuardedAction {
    pub fn new(reconciler: Arc<OnboardingReconciler>, action: Arc<dyn Fn() + Send + Sync>) -> Self {
        Self { reconciler, action }
    }

    pub fn invoke(&self) -> GuardOutcome {
        match self.reconciler.status() {
            OnboardingStatus::Unknown => {
                debug!("onboarding status unknown, ignoring action");
                GuardOutcome::Ignored
            }
            OnboardingStatus::NotOnboarded => {
                let action = Arc::clone(&self.action);
                self.reconciler.open_modal(Some(Box::new(move || action())));
                GuardOutcome::Prompted
            }
            OnboardingStatus::Onboarded(_) => {
                (self.action)();
                GuardOutcome::Ran
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeOnboardingApi, FakeWallet};
    use crate::onboarding::store::MemoryStore;
    use crate::types::Address;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup(required: u32) -> (Arc<OnboardingReconciler>, Arc<FakeOnboardingApi>, Address) {
        let api = Arc::new(FakeOnboardingApi::new(required));
        let wallet = Arc::new(FakeWallet::new());
        let address: Address = "0x00000000000000000000000000000000000000b2"
            .parse()
            .expect("address");
        wallet.set_account(Some(address.clone()));
        let reconciler = Arc::new(OnboardingReconciler::new(
            api.clone(),
            Arc::new(MemoryStore::new()),
            wallet,
        ));
        (reconciler, api, address)
    }

    fn counting_action(counter: &Arc<AtomicUsize>) -> impl Fn() + Send + Sync + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn unknown_status_ignores_action() {
        let (reconciler, _, _) = setup(1);
        let ran = Arc::new(AtomicUsize::new(0));
        let guarded = reconciler.guard(counting_action(&ran));

        assert_eq!(guarded.invoke(), GuardOutcome::Ignored);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(!reconciler.snapshot().modal_open);
    }

    #[tokio::test]
    async fn onboarded_runs_immediately() {
        let (reconciler, api, address) = setup(2);
        api.set_last_signed(&address, Some(2));
        reconciler.switch_account(Some(address)).await;

        let ran = Arc::new(AtomicUsize::new(0));
        let guarded = reconciler.guard(counting_action(&ran));
        assert_eq!(guarded.invoke(), GuardOutcome::Ran);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn not_onboarded_runs_after_signing() {
        let (reconciler, api, address) = setup(2);
        reconciler.switch_account(Some(address)).await;
        reconciler.close_modal();

        let ran = Arc::new(AtomicUsize::new(0));
        let guarded = reconciler.guard(counting_action(&ran));
        assert_eq!(guarded.invoke(), GuardOutcome::Prompted);
        assert!(reconciler.snapshot().modal_open);
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        let version = reconciler.sign_and_acknowledge(None).await.expect("signed");
        assert_eq!(version, 2);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(!reconciler.snapshot().modal_open);
        assert_eq!(api.submitted_signatures(), 1);

        assert_eq!(guarded.invoke(), GuardOutcome::Ran);
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn closing_modal_drops_bound_action() {
        let (reconciler, _, address) = setup(1);
        reconciler.switch_account(Some(address)).await;

        let ran = Arc::new(AtomicUsize::new(0));
        reconciler.guard(counting_action(&ran)).invoke();
        reconciler.close_modal();
        reconciler.sign_and_acknowledge(None).await.expect("signed");
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
