//! Per-account onboarding reconciliation.
//!
//! Each account switch bumps a generation counter and resets the state to
//! `Unknown`. Results of lookups started under an older generation are
//! dropped, so one account's answer can never land on another account.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{OnceCell, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::{OnboardingError, WalletError};
use crate::onboarding::api::OnboardingApi;
use crate::onboarding::guard::GuardedAction;
use crate::onboarding::store::{KeyValueStore, SignedVersionCache};
use crate::onboarding::{OnboardingSnapshot, OnboardingStatus, reconcile};
use crate::types::Address;
use crate::wallet::Wallet;

/// Action bound to the sign modal, run once signing succeeds.
pub type Callback = Box<dyn FnOnce() + Send>;

pub struct OnboardingReconciler {
    api: Arc<dyn OnboardingApi>,
    cache: SignedVersionCache,
    wallet: Arc<dyn Wallet>,
    required: OnceCell<u32>,
    state: watch::Sender<OnboardingSnapshot>,
    modal_action: Mutex<Option<Callback>>,
}

impl OnboardingReconciler {
    pub fn new(
        api: Arc<dyn OnboardingApi>,
        store: Arc<dyn KeyValueStore>,
        wallet: Arc<dyn Wallet>,
    ) -> Self {
        let (state, _) = watch::channel(OnboardingSnapshot::default());
        Self {
            api,
            cache: SignedVersionCache::new(store),
            wallet,
            required: OnceCell::new(),
            state,
            modal_action: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<OnboardingSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> OnboardingSnapshot {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> OnboardingStatus {
        self.state.borrow().status
    }

    /// Required terms version, fetched once. A failed fetch is retried on
    /// the next call.
    pub async fn required_version(&self) -> Result<u32, OnboardingError> {
        let version = self
            .required
            .get_or_try_init(|| async { self.api.sign_message_version().await })
            .await?;
        Ok(*version)
    }

    /// Latest version `address` has signed, or `None` if it never signed.
    ///
    /// A cached value at or above `required` is returned without a remote
    /// call. Otherwise the remote value is returned, and persisted when it
    /// is newer than the cache. Cache failures only cost the shortcut.
    #[instrument(skip_all, fields(%address, required))]
    pub async fn onboarded_version(
        &self,
        address: &Address,
        required: u32,
    ) -> Result<Option<u32>, OnboardingError> {
        let cached = self.cache.get(address).unwrap_or_else(|err| {
            warn!(error = %err, "onboarding cache unreadable, asking the service");
            None
        });
        if let Some(cached) = cached
            && cached >= required
        {
            debug!(cached, "signed version served from cache");
            return Ok(Some(cached));
        }

        let remote = self.api.account(address).await?.last_signed_version;
        if let Some(version) = remote {
            self.remember(address, version);
        }
        debug!(?remote, "signed version fetched");
        Ok(remote)
    }

    fn remember(&self, address: &Address, version: u32) {
        if let Err(err) = self.cache.record(address, version) {
            warn!(%address, version, error = %err, "failed to persist signed version");
        }
    }

    /// Reconcile state for a newly active account.
    ///
    /// Returns the status applied for `account`. `Unknown` means either a
    /// lookup failed or another switch superseded this one.
    #[instrument(skip_all, fields(account = ?account.as_ref().map(Address::as_str)))]
    pub async fn switch_account(&self, account: Option<Address>) -> OnboardingStatus {
        let mut generation = 0;
        self.state.send_modify(|s| {
            s.generation += 1;
            generation = s.generation;
            s.account = account.clone();
            s.status = OnboardingStatus::Unknown;
            s.modal_open = false;
        });
        self.take_modal_action();

        let Some(address) = account else {
            return OnboardingStatus::Unknown;
        };

        let required = match self.required_version().await {
            Ok(required) => required,
            Err(err) => {
                warn!(error = %err, "required version unavailable");
                return OnboardingStatus::Unknown;
            }
        };
        self.state.send_if_modified(|s| {
            let changed = s.required_version != Some(required);
            s.required_version = Some(required);
            changed
        });

        let onboarded = match self.onboarded_version(&address, required).await {
            Ok(onboarded) => onboarded,
            Err(err) => {
                warn!(error = %err, "signed version unavailable");
                return OnboardingStatus::Unknown;
            }
        };

        let decision = reconcile(required, onboarded);
        let applied = self.state.send_if_modified(|s| {
            if s.generation != generation {
                return false;
            }
            s.status = decision.status;
            s.modal_open = decision.should_prompt;
            true
        });
        if !applied {
            debug!(generation, "discarding stale onboarding result");
            return OnboardingStatus::Unknown;
        }

        info!(status = ?decision.status, prompt = decision.should_prompt, "onboarding reconciled");
        decision.status
    }

    /// Open the sign modal, optionally binding an action to run after signing.
    pub fn open_modal(&self, action: Option<Callback>) {
        *self
            .modal_action
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = action;
        self.state.send_if_modified(|s| {
            let changed = !s.modal_open;
            s.modal_open = true;
            changed
        });
    }

    /// Close the sign modal and drop any bound action.
    pub fn close_modal(&self) {
        self.take_modal_action();
        self.state.send_if_modified(|s| {
            let changed = s.modal_open;
            s.modal_open = false;
            changed
        });
    }

    fn take_modal_action(&self) -> Option<Callback> {
        self.modal_action
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Fetch a challenge, have the wallet sign it and submit the signature.
    ///
    /// On success the signed version is persisted, the state becomes
    /// `Onboarded`, the modal closes and both the modal's bound action and
    /// `callback` run. On failure the state and modal are left as they were.
    /// A challenge for a version older than the required one fails with
    /// `OutdatedVersion` even when the service accepts the signature.
    #[instrument(skip_all)]
    pub async fn sign_and_acknowledge(
        &self,
        callback: Option<Callback>,
    ) -> Result<u32, OnboardingError> {
        let (address, generation) = {
            let snapshot = self.state.borrow();
            let address = snapshot.account.clone().ok_or(OnboardingError::NoAccount)?;
            (address, snapshot.generation)
        };

        let challenge = self.api.sign_message(&address).await?;
        let signature = self
            .wallet
            .sign_message(&address, &challenge.message)
            .await
            .map_err(|err| match err {
                WalletError::UserRejected { reason } => OnboardingError::SignatureRejected { reason },
                other => OnboardingError::Wallet(other),
            })?;

        let accepted = self
            .api
            .submit_signature(&address, &challenge.request_id, &signature)
            .await?;
        if !accepted {
            warn!(%address, request_id = %challenge.request_id, "signature rejected by server");
            return Err(OnboardingError::VerificationFailed {
                address: address.to_string(),
                request_id: challenge.request_id,
            });
        }

        self.remember(&address, challenge.version);

        let required = self.required_version().await?;
        if challenge.version < required {
            warn!(%address, signed = challenge.version, required, "signed an outdated terms version");
            return Err(OnboardingError::OutdatedVersion {
                signed: challenge.version,
                required,
            });
        }

        let applied = self.state.send_if_modified(|s| {
            if s.generation != generation {
                return false;
            }
            s.status = OnboardingStatus::Onboarded(challenge.version);
            s.modal_open = false;
            true
        });
        if !applied {
            return Err(OnboardingError::AccountChanged {
                expected: address.to_string(),
            });
        }

        info!(%address, version = challenge.version, "terms signed");
        if let Some(action) = self.take_modal_action() {
            action();
        }
        if let Some(callback) = callback {
            callback();
        }
        Ok(challenge.version)
    }

    /// Wrap `action` so it only runs for an onboarded account.
    pub fn guard<A>(self: &Arc<Self>, action: A) -> GuardedAction
    where
        A: Fn() + Send + Sync + 'static,
    {
        GuardedAction::new(Arc::clone(self), Arc::new(action))
    }

    /// Reconcile on every account change until the sender is dropped.
    /// A change arriving mid-reconciliation abandons the one in flight.
    pub fn watch_accounts(
        self: Arc<Self>,
        mut accounts: watch::Receiver<Option<Address>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let account = accounts.borrow_and_update().clone();
                tokio::select! {
                    _ = self.switch_account(account) => {
                        if accounts.changed().await.is_err() {
                            break;
                        }
                    }
                    changed = accounts.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        debug!("account changed mid-reconciliation");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeOnboardingApi, FakeWallet};
    use crate::error::StoreError;
    use crate::onboarding::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store whose every operation fails.
    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Read {
                path: key.to_string(),
                reason: "disk unavailable".to_string(),
            })
        }

        fn set(&self, key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Write {
                path: key.to_string(),
                reason: "disk unavailable".to_string(),
            })
        }

        fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.set(key, "")
        }
    }

    fn address(byte: &str) -> Address {
        format!("0x{}", byte.repeat(40)).parse().expect("address")
    }

    fn reconciler(api: Arc<FakeOnboardingApi>, store: Arc<MemoryStore>) -> OnboardingReconciler {
        OnboardingReconciler::new(api, store, Arc::new(FakeWallet::new()))
    }

    #[tokio::test]
    async fn no_account_stays_unknown() {
        let api = Arc::new(FakeOnboardingApi::new(1));
        let r = reconciler(api.clone(), Arc::new(MemoryStore::new()));
        assert_eq!(r.switch_account(None).await, OnboardingStatus::Unknown);
        assert_eq!(api.version_calls(), 0);
    }

    #[tokio::test]
    async fn required_version_is_fetched_once() {
        let api = Arc::new(FakeOnboardingApi::new(2));
        let r = reconciler(api.clone(), Arc::new(MemoryStore::new()));
        assert_eq!(r.required_version().await.expect("version"), 2);
        assert_eq!(r.required_version().await.expect("version"), 2);
        assert_eq!(api.version_calls(), 1);
    }

    #[tokio::test]
    async fn failed_required_version_is_retried() {
        let api = Arc::new(FakeOnboardingApi::new(2));
        api.fail_version_requests(1);
        let r = reconciler(api.clone(), Arc::new(MemoryStore::new()));

        let a = address("a");
        assert_eq!(r.switch_account(Some(a.clone())).await, OnboardingStatus::Unknown);
        assert!(!r.snapshot().modal_open);
        assert_eq!(r.switch_account(Some(a)).await, OnboardingStatus::NotOnboarded);
        assert_eq!(api.version_calls(), 2);
    }

    #[tokio::test]
    async fn account_lookup_failure_fails_to_unknown() {
        let api = Arc::new(FakeOnboardingApi::new(1));
        let a = address("a");
        api.fail_account_requests(1);
        let r = reconciler(api, Arc::new(MemoryStore::new()));
        assert_eq!(r.switch_account(Some(a)).await, OnboardingStatus::Unknown);
        assert!(!r.snapshot().modal_open);
    }

    #[tokio::test]
    async fn rejected_signature_keeps_modal_open() {
        let api = Arc::new(FakeOnboardingApi::new(1));
        let wallet = Arc::new(FakeWallet::new());
        let a = address("a");
        wallet.set_account(Some(a.clone()));
        wallet.reject_signatures(true);
        let r = OnboardingReconciler::new(api.clone(), Arc::new(MemoryStore::new()), wallet);

        assert_eq!(r.switch_account(Some(a)).await, OnboardingStatus::NotOnboarded);
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let err = r
            .sign_and_acknowledge(Some(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })))
            .await
            .expect_err("declined");
        assert!(matches!(err, OnboardingError::SignatureRejected { .. }));
        assert_eq!(r.status(), OnboardingStatus::NotOnboarded);
        assert!(r.snapshot().modal_open);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(api.submitted_signatures(), 0);
    }

    #[tokio::test]
    async fn server_rejection_is_verification_failure() {
        let api = Arc::new(FakeOnboardingApi::new(1));
        api.reject_signatures(true);
        let a = address("a");
        let r = reconciler(api, Arc::new(MemoryStore::new()));
        r.switch_account(Some(a)).await;

        let err = r.sign_and_acknowledge(None).await.expect_err("rejected");
        assert!(matches!(err, OnboardingError::VerificationFailed { .. }));
        assert_eq!(r.status(), OnboardingStatus::NotOnboarded);
        assert!(r.snapshot().modal_open);
    }

    #[tokio::test]
    async fn unreadable_cache_falls_back_to_remote() {
        let api = Arc::new(FakeOnboardingApi::new(2));
        let a = address("a");
        api.set_last_signed(&a, Some(2));
        let r = OnboardingReconciler::new(api.clone(), Arc::new(BrokenStore), Arc::new(FakeWallet::new()));

        assert_eq!(r.switch_account(Some(a.clone())).await, OnboardingStatus::Onboarded(2));
        assert_eq!(api.account_calls_for(&a), 1);
    }

    #[tokio::test]
    async fn accepted_signature_applies_when_cache_write_fails() {
        let api = Arc::new(FakeOnboardingApi::new(4));
        let a = address("a");
        let wallet = Arc::new(FakeWallet::connected(a.clone()));
        let r = OnboardingReconciler::new(api.clone(), Arc::new(BrokenStore), wallet);
        assert_eq!(r.switch_account(Some(a)).await, OnboardingStatus::NotOnboarded);

        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let version = r
            .sign_and_acknowledge(Some(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })))
            .await
            .expect("signed");
        assert_eq!(version, 4);
        assert_eq!(r.status(), OnboardingStatus::Onboarded(4));
        assert!(!r.snapshot().modal_open);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(api.submitted_signatures(), 1);
    }

    #[tokio::test]
    async fn outdated_challenge_does_not_onboard() {
        let api = Arc::new(FakeOnboardingApi::new(3));
        let a = address("a");
        let store = Arc::new(MemoryStore::new());
        let r = reconciler(api.clone(), store.clone());
        assert_eq!(r.switch_account(Some(a.clone())).await, OnboardingStatus::NotOnboarded);

        // The service hands out a challenge for an older version.
        api.set_required(2);
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let err = r
            .sign_and_acknowledge(Some(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })))
            .await
            .expect_err("outdated");
        assert!(matches!(
            err,
            OnboardingError::OutdatedVersion {
                signed: 2,
                required: 3
            }
        ));
        assert_eq!(r.status(), OnboardingStatus::NotOnboarded);
        assert!(r.snapshot().modal_open);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(SignedVersionCache::new(store).get(&a).expect("cache"), Some(2));
    }

    #[tokio::test]
    async fn signing_without_account_fails() {
        let r = reconciler(
            Arc::new(FakeOnboardingApi::new(1)),
            Arc::new(MemoryStore::new()),
        );
        let err = r.sign_and_acknowledge(None).await.expect_err("no account");
        assert!(matches!(err, OnboardingError::NoAccount));
    }
}
