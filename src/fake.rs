//! Deterministic in-memory collaborators for tests and offline runs.
//!
//! Scripted responses are consumed in order; the last one repeats.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::{HttpError, WalletError};
use crate::onboarding::api::{AccountStatus, OnboardingApi, SignChallenge};
use crate::types::{Address, SenderKind, TxHandle, TxHash};
use crate::wallet::{ConfirmationTracker, ContractCall, ProposalStatus, ReceiptStatus, Wallet};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn next_scripted<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

/// A connected wallet that records writes and answers reads from a script.
pub struct FakeWallet {
    account: watch::Sender<Option<Address>>,
    sender: Mutex<SenderKind>,
    reads: Mutex<HashMap<&'static str, VecDeque<Result<Value, WalletError>>>>,
    write_failures: Mutex<HashMap<&'static str, WalletError>>,
    writes: Mutex<Vec<ContractCall>>,
    signed: Mutex<Vec<String>>,
    reject_signatures: AtomicBool,
    nonce: AtomicU64,
}

impl Default for FakeWallet {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeWallet {
    pub fn new() -> Self {
        let (account, _) = watch::channel(None);
        Self {
            account,
            sender: Mutex::new(SenderKind::Eoa),
            reads: Mutex::new(HashMap::new()),
            write_failures: Mutex::new(HashMap::new()),
            writes: Mutex::new(Vec::new()),
            signed: Mutex::new(Vec::new()),
            reject_signatures: AtomicBool::new(false),
            nonce: AtomicU64::new(0),
        }
    }

    pub fn connected(account: Address) -> Self {
        let wallet = Self::new();
        wallet.set_account(Some(account));
        wallet
    }

    /// Switch the connected account, notifying subscribers.
    pub fn set_account(&self, account: Option<Address>) {
        self.account.send_replace(account);
    }

    pub fn set_sender_kind(&self, kind: SenderKind) {
        *lock(&self.sender) = kind;
    }

    /// Queue a return value for reads of `function`.
    pub fn push_read(&self, function: &'static str, value: Value) {
        lock(&self.reads).entry(function).or_default().push_back(Ok(value));
    }

    pub fn push_read_error(&self, function: &'static str, err: WalletError) {
        lock(&self.reads).entry(function).or_default().push_back(Err(err));
    }

    /// Make every write of `function` fail with `err`.
    pub fn fail_writes(&self, function: &'static str, err: WalletError) {
        lock(&self.write_failures).insert(function, err);
    }

    pub fn reject_signatures(&self, reject: bool) {
        self.reject_signatures.store(reject, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<ContractCall> {
        lock(&self.writes).clone()
    }

    pub fn signed_messages(&self) -> Vec<String> {
        lock(&self.signed).clone()
    }

    fn next_hash(&self, method: &str) -> Result<TxHash, WalletError> {
        let n = self.nonce.fetch_add(1, Ordering::SeqCst) + 1;
        format!("0x{n:064x}")
            .parse()
            .map_err(|reason| WalletError::Rpc {
                method: method.to_string(),
                reason,
            })
    }
}

#[async_trait]
impl Wallet for FakeWallet {
    fn account(&self) -> Option<Address> {
        self.account.borrow().clone()
    }

    fn sender_kind(&self) -> SenderKind {
        *lock(&self.sender)
    }

    fn subscribe_account(&self) -> watch::Receiver<Option<Address>> {
        self.account.subscribe()
    }

    async fn read_contract(&self, call: &ContractCall) -> Result<Value, WalletError> {
        let mut reads = lock(&self.reads);
        reads
            .get_mut(call.function)
            .and_then(next_scripted)
            .unwrap_or_else(|| {
                Err(WalletError::Rpc {
                    method: call.function.to_string(),
                    reason: "no scripted return".to_string(),
                })
            })
    }

    async fn write_contract(&self, call: &ContractCall) -> Result<TxHandle, WalletError> {
        if let Some(err) = lock(&self.write_failures).get(call.function) {
            return Err(err.clone());
        }
        lock(&self.writes).push(call.clone());
        let hash = self.next_hash(call.function)?;
        Ok(match self.sender_kind() {
            SenderKind::Eoa => TxHandle::transaction(hash),
            SenderKind::Safe => TxHandle::safe_proposal(hash),
        })
    }

    async fn sign_message(&self, account: &Address, message: &str) -> Result<String, WalletError> {
        if self.reject_signatures.load(Ordering::SeqCst) {
            return Err(WalletError::UserRejected {
                reason: "User denied message signature".to_string(),
            });
        }
        lock(&self.signed).push(message.to_string());
        Ok(format!("0xsig:{account}:{}", message.len()))
    }
}

/// Receipt and Safe proposal lookups answered from a script.
///
/// An unscripted receipt is confirmed; an unscripted proposal is pending.
#[derive(Default)]
pub struct FakeChain {
    receipts: Mutex<HashMap<TxHash, VecDeque<Result<ReceiptStatus, WalletError>>>>,
    proposals: Mutex<HashMap<TxHash, VecDeque<ProposalStatus>>>,
    receipt_lookups: Mutex<HashMap<TxHash, usize>>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_receipt(&self, tx: &TxHash, status: ReceiptStatus) {
        lock(&self.receipts).entry(tx.clone()).or_default().push_back(Ok(status));
    }

    pub fn push_receipt_error(&self, tx: &TxHash, err: WalletError) {
        lock(&self.receipts).entry(tx.clone()).or_default().push_back(Err(err));
    }

    pub fn push_proposal(&self, safe_tx: &TxHash, status: ProposalStatus) {
        lock(&self.proposals)
            .entry(safe_tx.clone())
            .or_default()
            .push_back(status);
    }

    pub fn receipt_lookups(&self, tx: &TxHash) -> usize {
        lock(&self.receipt_lookups).get(tx).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ConfirmationTracker for FakeChain {
    async fn receipt_status(&self, tx: &TxHash) -> Result<ReceiptStatus, WalletError> {
        *lock(&self.receipt_lookups).entry(tx.clone()).or_default() += 1;
        lock(&self.receipts)
            .get_mut(tx)
            .and_then(next_scripted)
            .unwrap_or(Ok(ReceiptStatus::Confirmed))
    }

    async fn proposal_status(&self, safe_tx: &TxHash) -> Result<ProposalStatus, WalletError> {
        Ok(lock(&self.proposals)
            .get_mut(safe_tx)
            .and_then(next_scripted)
            .unwrap_or(ProposalStatus::Pending))
    }
}

/// In-memory onboarding service. Accepted signatures update the account's
/// last signed version, as the real service does.
pub struct FakeOnboardingApi {
    required: AtomicU64,
    accounts: Mutex<HashMap<Address, Option<u32>>>,
    account_delays: Mutex<HashMap<Address, Duration>>,
    version_failures: AtomicUsize,
    account_failures: AtomicUsize,
    reject_signatures: AtomicBool,
    version_calls: AtomicUsize,
    account_calls: Mutex<HashMap<Address, usize>>,
    challenge_calls: AtomicUsize,
    submitted: AtomicUsize,
}

impl FakeOnboardingApi {
    pub fn new(required: u32) -> Self {
        Self {
            required: AtomicU64::new(u64::from(required)),
            accounts: Mutex::new(HashMap::new()),
            account_delays: Mutex::new(HashMap::new()),
            version_failures: AtomicUsize::new(0),
            account_failures: AtomicUsize::new(0),
            reject_signatures: AtomicBool::new(false),
            version_calls: AtomicUsize::new(0),
            account_calls: Mutex::new(HashMap::new()),
            challenge_calls: AtomicUsize::new(0),
            submitted: AtomicUsize::new(0),
        }
    }

    fn required(&self) -> u32 {
        u32::try_from(self.required.load(Ordering::SeqCst)).unwrap_or(u32::MAX)
    }

    pub fn set_required(&self, version: u32) {
        self.required.store(u64::from(version), Ordering::SeqCst);
    }

    pub fn set_last_signed(&self, address: &Address, version: Option<u32>) {
        lock(&self.accounts).insert(address.clone(), version);
    }

    pub fn last_signed(&self, address: &Address) -> Option<u32> {
        lock(&self.accounts).get(address).copied().flatten()
    }

    /// Delay account lookups for `address`.
    pub fn delay_account(&self, address: &Address, delay: Duration) {
        lock(&self.account_delays).insert(address.clone(), delay);
    }

    /// Fail the next `count` required-version requests.
    pub fn fail_version_requests(&self, count: usize) {
        self.version_failures.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` account lookups.
    pub fn fail_account_requests(&self, count: usize) {
        self.account_failures.store(count, Ordering::SeqCst);
    }

    /// Answer signature submissions with `success: false`.
    pub fn reject_signatures(&self, reject: bool) {
        self.reject_signatures.store(reject, Ordering::SeqCst);
    }

    pub fn version_calls(&self) -> usize {
        self.version_calls.load(Ordering::SeqCst)
    }

    pub fn account_calls(&self) -> usize {
        lock(&self.account_calls).values().sum()
    }

    pub fn account_calls_for(&self, address: &Address) -> usize {
        lock(&self.account_calls).get(address).copied().unwrap_or(0)
    }

    pub fn challenge_calls(&self) -> usize {
        self.challenge_calls.load(Ordering::SeqCst)
    }

    pub fn submitted_signatures(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn unavailable() -> HttpError {
    HttpError::HttpStatus {
        status: 503,
        body: "service unavailable".to_string(),
    }
}

#[async_trait]
impl OnboardingApi for FakeOnboardingApi {
    async fn sign_message_version(&self) -> Result<u32, HttpError> {
        self.version_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.version_failures) {
            return Err(unavailable());
        }
        Ok(self.required())
    }

    async fn account(&self, address: &Address) -> Result<AccountStatus, HttpError> {
        *lock(&self.account_calls).entry(address.clone()).or_default() += 1;
        let delay = lock(&self.account_delays).get(address).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if Self::take_failure(&self.account_failures) {
            return Err(unavailable());
        }
        Ok(AccountStatus {
            last_signed_version: self.last_signed(address),
        })
    }

    async fn sign_message(&self, address: &Address) -> Result<SignChallenge, HttpError> {
        let n = self.challenge_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let version = self.required();
        Ok(SignChallenge {
            message: format!("{address} accepts the terms of service, version {version}"),
            version,
            request_id: format!("req-{n}"),
        })
    }

    async fn submit_signature(
        &self,
        address: &Address,
        _request_id: &str,
        _signature: &str,
    ) -> Result<bool, HttpError> {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        if self.reject_signatures.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let version = self.required();
        lock(&self.accounts).insert(address.clone(), Some(version));
        Ok(true)
    }
}
