//! Transfer Engine - ordered two-phase locking over the Account Store
//!
//! Implements `transfer` and `get_balance` with the guarantees the rest
//! of the system leans on:
//!
//! - validation of untrusted input before any lock or admission slot
//! - admission gating: a bounded number of transfers in flight, arrivals
//!   beyond the ceiling queue instead of being shed
//! - both account locks taken in ascending id order, released in reverse,
//!   making a lock-wait cycle structurally impossible
//! - the funds check that decides the transfer happens under both locks
//!
//! The engine performs no I/O. Audit emission is the caller's job.

use std::sync::Arc;

use crate::core_types::Amount;
use crate::error::LedgerError;
use crate::store::{AccountStore, now_epoch_secs};

pub struct TransferEngine {
    store: Arc<AccountStore>,
}

impl TransferEngine {
    pub fn new(store: Arc<AccountStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<AccountStore> {
        &self.store
    }

    /// LOGIN handshake: succeeds iff the id names an existing account.
    /// No ledger mutation.
    pub fn login(&self, account_id: i32) -> Result<(), LedgerError> {
        self.store.get(account_id).map(|_| ())
    }

    /// Read one balance under that account's lock.
    ///
    /// The locked read cannot observe the middle of a transfer (debit
    /// applied, credit not yet).
    pub fn get_balance(&self, account_id: i32) -> Result<Amount, LedgerError> {
        let account = self.store.get(account_id)?;
        let balance = account.lock_cell().balance();
        Ok(balance)
    }

    /// Move `amount` from `src_id` to `dst_id` atomically.
    ///
    /// # Errors
    /// - `InvalidAccountId` / `SameAccount` / `InvalidAmount` before any
    ///   slot or lock is taken
    /// - `InsufficientFunds` under both locks, leaving state unchanged
    /// - `Busy` if the admission gate is closed
    pub async fn transfer(&self, src_id: i32, dst_id: i32, amount: i32) -> Result<(), LedgerError> {
        let src = self.store.get(src_id)?;
        let dst = self.store.get(dst_id)?;
        if src_id == dst_id {
            return Err(LedgerError::SameAccount);
        }
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let amount = Amount::from(amount);

        let _permit = self.store.acquire_admission().await?;
        let _in_flight = self.store.stats().enter_in_flight();

        // Ascending-id lock order regardless of transfer direction; the
        // guards release in reverse order when they fall out of scope.
        let src_is_low = src.id() < dst.id();
        let (low, high) = if src_is_low { (src, dst) } else { (dst, src) };
        let mut low_cell = low.lock_cell();
        let mut high_cell = high.lock_cell();
        let (src_cell, dst_cell) = if src_is_low {
            (&mut low_cell, &mut high_cell)
        } else {
            (&mut high_cell, &mut low_cell)
        };

        // The funds check inside debit is the authoritative one: the
        // balance may have changed between validation and lock acquisition.
        let now = now_epoch_secs();
        src_cell.debit(amount, now)?;
        dst_cell.credit(amount, now);
        self.store.stats().record_transaction();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::store::StoreHandle;
    use std::sync::atomic::{AtomicU32, Ordering};

    static NAME_SEQ: AtomicU32 = AtomicU32::new(0);

    fn test_engine(account_count: usize) -> (StoreHandle, Arc<TransferEngine>) {
        let config = LedgerConfig {
            store_name: format!("engine_test_{}", NAME_SEQ.fetch_add(1, Ordering::Relaxed)),
            account_count,
            initial_balance: 10_000,
            max_concurrent_transfers: 10,
        };
        let handle = AccountStore::attach_or_create(&config).unwrap();
        let engine = Arc::new(TransferEngine::new(handle.store().clone()));
        (handle, engine)
    }

    #[tokio::test]
    async fn test_transfer_moves_funds_exactly() {
        let (handle, engine) = test_engine(100);

        engine.transfer(1, 2, 500).await.unwrap();

        assert_eq!(engine.get_balance(1).unwrap(), 9_500);
        assert_eq!(engine.get_balance(2).unwrap(), 10_500);
        assert_eq!(handle.total_balance(), 1_000_000);
        assert_eq!(handle.stats().snapshot().total_transactions, 1);
        assert_eq!(handle.available_admission_slots(), 10);
    }

    #[tokio::test]
    async fn test_transfer_stamps_last_updated() {
        let (handle, engine) = test_engine(5);

        engine.transfer(0, 1, 10).await.unwrap();

        let src = handle.get(0).unwrap().lock_cell().last_updated();
        let dst = handle.get(1).unwrap().lock_cell().last_updated();
        assert!(src > 0);
        assert_eq!(src, dst, "both sides are stamped with the same instant");
    }

    #[tokio::test]
    async fn test_transfer_validation_order() {
        let (_handle, engine) = test_engine(10);

        // Range check first, even when both checks would fail
        assert_eq!(
            engine.transfer(-1, -1, 0).await.unwrap_err(),
            LedgerError::InvalidAccountId
        );
        assert_eq!(
            engine.transfer(0, 10, 5).await.unwrap_err(),
            LedgerError::InvalidAccountId
        );
        // Same-account beats the amount check
        assert_eq!(
            engine.transfer(3, 3, 0).await.unwrap_err(),
            LedgerError::SameAccount
        );
        assert_eq!(
            engine.transfer(1, 1, 10).await.unwrap_err(),
            LedgerError::SameAccount
        );
        assert_eq!(
            engine.transfer(0, 1, 0).await.unwrap_err(),
            LedgerError::InvalidAmount
        );
        assert_eq!(
            engine.transfer(0, 1, -5).await.unwrap_err(),
            LedgerError::InvalidAmount
        );
    }

    #[tokio::test]
    async fn test_insufficient_funds_leaves_state_unchanged() {
        let (handle, engine) = test_engine(10);

        let err = engine.transfer(1, 2, 999_999).await.unwrap_err();
        assert_eq!(err, LedgerError::InsufficientFunds);

        assert_eq!(engine.get_balance(1).unwrap(), 10_000);
        assert_eq!(engine.get_balance(2).unwrap(), 10_000);
        assert_eq!(handle.stats().snapshot().total_transactions, 0);
        // The admission slot came back on the failure path too
        assert_eq!(handle.available_admission_slots(), 10);
    }

    #[tokio::test]
    async fn test_transfer_busy_when_gate_closed() {
        let (handle, engine) = test_engine(10);
        handle.close_admission();

        let err = engine.transfer(1, 2, 100).await.unwrap_err();
        assert_eq!(err, LedgerError::Busy);
        assert_eq!(engine.get_balance(1).unwrap(), 10_000);
    }

    #[tokio::test]
    async fn test_login_checks_account_exists() {
        let (_handle, engine) = test_engine(10);

        assert!(engine.login(0).is_ok());
        assert!(engine.login(9).is_ok());
        assert_eq!(engine.login(10).unwrap_err(), LedgerError::InvalidAccountId);
        assert_eq!(engine.login(-7).unwrap_err(), LedgerError::InvalidAccountId);
    }

    #[tokio::test]
    async fn test_get_balance_validates_id() {
        let (_handle, engine) = test_engine(3);

        assert_eq!(engine.get_balance(2).unwrap(), 10_000);
        assert_eq!(
            engine.get_balance(3).unwrap_err(),
            LedgerError::InvalidAccountId
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_transfers_conserve_total() {
        let (handle, engine) = test_engine(8);

        // Neighbor pairs in both directions across tasks, so the same
        // pair is hammered from each side concurrently.
        let mut tasks = Vec::new();
        for k in 0..32u32 {
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                for j in 0..50u32 {
                    let src = ((k + j) % 8) as i32;
                    let dst = ((k + j + 1) % 8) as i32;
                    let _ = engine.transfer(src, dst, 1).await;
                }
            }));
        }
        for task in tasks {
            task.await.expect("transfer task panicked");
        }

        assert_eq!(handle.total_balance(), 80_000);
        let snapshot = handle.stats().snapshot();
        assert_eq!(snapshot.in_flight, 0);
        assert!(
            snapshot.peak_in_flight <= 10,
            "admission ceiling exceeded: {}",
            snapshot.peak_in_flight
        );
        assert_eq!(handle.available_admission_slots(), 10);
    }
}
