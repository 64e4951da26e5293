//! Account Store - the shared in-memory ledger
//!
//! A fixed table of accounts, each guarded by its own lock, plus the
//! store-wide metadata that every worker shares:
//!
//! - readiness marker (published with Release ordering after seeding)
//! - total transaction counter (atomic increment, no lock)
//! - admission semaphore (concurrency ceiling for transfers)
//! - occupancy stats (current / peak transfers in flight)
//!
//! Stores are named. `attach_or_create` gives the first caller for a name
//! the creator role (allocate, seed, publish readiness); every later
//! caller attaches to the existing instance and polls the readiness
//! marker under a bounded wait. Only the creator's handle tears the
//! store down.
//!
//! # Lock recovery
//!
//! A worker that panics while holding an account lock poisons it. The
//! next acquirer clears the poison, logs a warning, and proceeds as the
//! new owner instead of blocking forever.

use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, info, warn};

use crate::config::LedgerConfig;
use crate::core_types::{AccountId, Amount, Timestamp};
use crate::error::LedgerError;

// ============================================================
// CONSTANTS
// ============================================================

/// Readiness marker value; anything else means "still initializing"
const READY_MARKER: u32 = 0xBEEF;

/// One attach poll step
const ATTACH_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Total attach wait budget before giving up
const ATTACH_TIMEOUT: Duration = Duration::from_secs(2);

/// Current wall-clock seconds for `last_updated` stamps
pub(crate) fn now_epoch_secs() -> Timestamp {
    Utc::now().timestamp().max(0) as Timestamp
}

// ============================================================
// ACCOUNT
// ============================================================

/// Mutable per-account state, only reachable through the account's lock
#[derive(Debug)]
pub struct AccountCell {
    balance: Amount,
    last_updated: Timestamp,
}

impl AccountCell {
    pub fn balance(&self) -> Amount {
        self.balance
    }

    pub fn last_updated(&self) -> Timestamp {
        self.last_updated
    }

    /// Checked withdrawal; the caller must hold both transfer locks
    pub fn debit(&mut self, amount: Amount, now: Timestamp) -> Result<(), LedgerError> {
        if self.balance < amount {
            return Err(LedgerError::InsufficientFunds);
        }
        self.balance -= amount;
        self.last_updated = now;
        Ok(())
    }

    pub fn credit(&mut self, amount: Amount, now: Timestamp) {
        self.balance += amount;
        self.last_updated = now;
    }

    fn reset(&mut self, balance: Amount, now: Timestamp) {
        self.balance = balance;
        self.last_updated = now;
    }
}

/// One ledger entry: a dense id plus its independently lockable cell
#[derive(Debug)]
pub struct Account {
    id: AccountId,
    cell: Mutex<AccountCell>,
}

impl Account {
    fn new(id: AccountId) -> Self {
        Self {
            id,
            cell: Mutex::new(AccountCell {
                balance: 0,
                last_updated: 0,
            }),
        }
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    /// Lock this account's cell, recovering from a dead holder.
    ///
    /// If a previous holder panicked, the mutex is poisoned. Balances are
    /// only written through checked debit/credit so the cell is never
    /// half-updated; clear the poison and continue as the new owner.
    pub fn lock_cell(&self) -> MutexGuard<'_, AccountCell> {
        self.cell.lock().unwrap_or_else(|poisoned| {
            self.cell.clear_poison();
            warn!(account_id = self.id, "Recovered account lock from dead owner");
            poisoned.into_inner()
        })
    }
}

// ============================================================
// STORE STATISTICS
// ============================================================

/// Shared counters updated with relaxed atomics on the hot path
#[derive(Debug, Default)]
pub struct StoreStats {
    /// Successful transfers since the store was seeded
    pub total_transactions: AtomicU64,
    /// Transfers currently holding an admission slot
    pub in_flight: AtomicU64,
    /// High-water mark of `in_flight`
    pub peak_in_flight: AtomicU64,
}

impl StoreStats {
    pub fn record_transaction(&self) {
        self.total_transactions.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark one transfer admitted; the returned guard marks it done
    pub fn enter_in_flight(&self) -> InFlightGuard<'_> {
        let current = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::Relaxed);
        InFlightGuard { stats: self }
    }

    /// Get snapshot of current stats
    pub fn snapshot(&self) -> StoreStatsSnapshot {
        StoreStatsSnapshot {
            total_transactions: self.total_transactions.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            peak_in_flight: self.peak_in_flight.load(Ordering::Relaxed),
        }
    }
}

/// Decrements the in-flight gauge on every exit path
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    stats: &'a StoreStats,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Immutable snapshot of stats (for reporting)
#[derive(Debug, Clone)]
pub struct StoreStatsSnapshot {
    pub total_transactions: u64,
    pub in_flight: u64,
    pub peak_in_flight: u64,
}

impl std::fmt::Display for StoreStatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Store Stats: transactions={}, in_flight={}, peak_in_flight={}",
            self.total_transactions, self.in_flight, self.peak_in_flight
        )
    }
}

// ============================================================
// ACCOUNT STORE
// ============================================================

/// The shared ledger table plus its process-wide metadata
#[derive(Debug)]
pub struct AccountStore {
    accounts: Box<[Account]>,
    ready: AtomicU32,
    admission: Semaphore,
    stats: StoreStats,
}

impl AccountStore {
    fn new_unready(config: &LedgerConfig) -> Self {
        let accounts: Vec<Account> = (0..config.account_count as AccountId)
            .map(Account::new)
            .collect();
        Self {
            accounts: accounts.into_boxed_slice(),
            ready: AtomicU32::new(0),
            admission: Semaphore::new(config.max_concurrent_transfers),
            stats: StoreStats::default(),
        }
    }

    fn seed(&self, initial_balance: Amount) {
        let now = now_epoch_secs();
        for account in self.accounts.iter() {
            account.lock_cell().reset(initial_balance, now);
        }
    }

    /// Attach to the named store, creating and seeding it on first use.
    ///
    /// Exactly one caller per name becomes the creator. Attachers poll the
    /// readiness marker and fail with `StoreUnavailable` if the creator
    /// does not finish seeding within the attach budget.
    pub fn attach_or_create(config: &LedgerConfig) -> Result<StoreHandle, LedgerError> {
        let mut registry = lock_registry();
        if let Some(existing) = registry.get(&config.store_name) {
            let store = existing.clone();
            drop(registry);
            store.wait_ready()?;
            debug!(store = %config.store_name, "Attached to existing account store");
            return Ok(StoreHandle {
                store,
                creator: false,
                name: config.store_name.clone(),
            });
        }

        let store = Arc::new(AccountStore::new_unready(config));
        registry.insert(config.store_name.clone(), store.clone());
        drop(registry);

        // Seed before publishing readiness: an attacher that observes the
        // marker must observe every account already initialized.
        store.seed(config.initial_balance);
        store.ready.store(READY_MARKER, Ordering::Release);
        info!(
            store = %config.store_name,
            accounts = config.account_count,
            initial_balance = config.initial_balance,
            "Account store created and seeded"
        );
        Ok(StoreHandle {
            store,
            creator: true,
            name: config.store_name.clone(),
        })
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire) == READY_MARKER
    }

    fn wait_ready(&self) -> Result<(), LedgerError> {
        self.wait_ready_for(ATTACH_TIMEOUT)
    }

    fn wait_ready_for(&self, timeout: Duration) -> Result<(), LedgerError> {
        let deadline = Instant::now() + timeout;
        while !self.is_ready() {
            if Instant::now() >= deadline {
                return Err(LedgerError::StoreUnavailable);
            }
            std::thread::sleep(ATTACH_POLL_INTERVAL);
        }
        Ok(())
    }

    /// Look up an account by its wire-width id
    pub fn get(&self, id: i32) -> Result<&Account, LedgerError> {
        if id < 0 || id as usize >= self.accounts.len() {
            return Err(LedgerError::InvalidAccountId);
        }
        Ok(&self.accounts[id as usize])
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Acquire one admission slot, queueing until one frees up.
    ///
    /// Fails with `Busy` only when the gate has been closed for teardown.
    pub async fn acquire_admission(&self) -> Result<SemaphorePermit<'_>, LedgerError> {
        self.admission.acquire().await.map_err(|_| LedgerError::Busy)
    }

    /// Close the admission gate; pending and future transfers get `Busy`
    pub fn close_admission(&self) {
        self.admission.close();
    }

    pub fn available_admission_slots(&self) -> usize {
        self.admission.available_permits()
    }

    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    /// Point-in-time balances, index = account id.
    ///
    /// Takes every account lock in ascending order, the same total order
    /// transfers use, so the sweep cannot deadlock against them.
    pub fn snapshot(&self) -> Vec<Amount> {
        let guards: Vec<MutexGuard<'_, AccountCell>> =
            self.accounts.iter().map(|a| a.lock_cell()).collect();
        guards.iter().map(|cell| cell.balance()).collect()
    }

    pub fn total_balance(&self) -> Amount {
        self.snapshot().iter().sum()
    }
}

// ============================================================
// NAMED STORE REGISTRY
// ============================================================

static REGISTRY: Lazy<Mutex<FxHashMap<String, Arc<AccountStore>>>> =
    Lazy::new(|| Mutex::new(FxHashMap::default()));

fn lock_registry() -> MutexGuard<'static, FxHashMap<String, Arc<AccountStore>>> {
    REGISTRY.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owned attachment to a named store.
///
/// Dropping the handle detaches. `destroy` additionally unlinks the name,
/// but only for the creator; attachers calling it just detach.
#[derive(Debug)]
pub struct StoreHandle {
    store: Arc<AccountStore>,
    creator: bool,
    name: String,
}

impl StoreHandle {
    pub fn store(&self) -> &Arc<AccountStore> {
        &self.store
    }

    pub fn is_creator(&self) -> bool {
        self.creator
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tear the store down (creator) or detach (attacher).
    ///
    /// The creator closes the admission gate first so transfers racing the
    /// teardown fail with `Busy` instead of touching an unlinked store.
    pub fn destroy(self) {
        if !self.creator {
            return;
        }
        self.store.close_admission();
        lock_registry().remove(&self.name);
        info!(store = %self.name, "Account store destroyed");
    }
}

impl Deref for StoreHandle {
    type Target = AccountStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

// ============================================================
// TESTS
// ============================================================
