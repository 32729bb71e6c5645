use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::ledger::ExecutionRecord;
use crate::lease::Lease;
use crate::store::{LedgerStore, LockStore, StoreError};

/// In-memory backing store implementing both `LockStore` and `LedgerStore`.
///
/// Used as the test backend and as a single-process reference
/// implementation of the store contracts. Supports a frozen,
/// manually-advanced clock so expiry-boundary behavior is deterministic,
/// and fault injection (`set_offline`, `expire_lease`) for failover tests.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    leases: HashMap<String, Lease>,
    records: HashMap<(String, String), ExecutionRecord>,
    clock: Clock,
    offline: bool,
}

enum Clock {
    /// Wall clock; normal operation.
    System,
    /// Frozen instant advanced only via `MemoryStore::advance`.
    Frozen(DateTime<Utc>),
}

impl Clock {
    fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Frozen(at) => *at,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Clock::System)
    }

    /// A store whose clock only moves when `advance` is called. `start`
    /// becomes the initial server time.
    pub fn with_frozen_clock(start: DateTime<Utc>) -> Self {
        Self::with_clock(Clock::Frozen(start))
    }

    fn with_clock(clock: Clock) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                leases: HashMap::new(),
                records: HashMap::new(),
                clock,
                offline: false,
            })),
        }
    }

    /// Advance a frozen clock. Panics if the store uses the system clock.
    pub async fn advance(&self, by: Duration) {
        let mut inner = self.inner.lock().await;
        match inner.clock {
            Clock::Frozen(at) => {
                inner.clock = Clock::Frozen(
                    at + chrono::Duration::from_std(by).expect("advance duration out of range"),
                );
            }
            Clock::System => panic!("advance() requires a frozen clock"),
        }
    }

    /// Simulate the store becoming unreachable: every operation returns
    /// `StoreError::Unavailable` until switched back.
    pub async fn set_offline(&self, offline: bool) {
        self.inner.lock().await.offline = offline;
    }

    /// Force a lease to expire immediately, as if the holder's renewals
    /// never reached the store. The record is mutated, not deleted, so
    /// fencing history is preserved.
    pub async fn expire_lease(&self, job_name: &str) {
        let mut inner = self.inner.lock().await;
        let now = inner.clock.now();
        if let Some(lease) = inner.leases.get_mut(job_name) {
            lease.expires_at = now;
        }
    }

    /// Snapshot of the current lease record, for test assertions.
    pub async fn lease_snapshot(&self, job_name: &str) -> Option<Lease> {
        self.inner.lock().await.leases.get(job_name).cloned()
    }

    /// Snapshot of an execution record, for test assertions.
    pub async fn record_snapshot(
        &self,
        job_name: &str,
        execution_key: &str,
    ) -> Option<ExecutionRecord> {
        self.inner
            .lock()
            .await
            .records
            .get(&(job_name.to_string(), execution_key.to_string()))
            .cloned()
    }
}

impl Inner {
    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    async fn now(&self) -> Result<DateTime<Utc>, StoreError> {
        let inner = self.inner.lock().await;
        inner.check_online()?;
        Ok(inner.clock.now())
    }

    async fn read_lease(&self, job_name: &str) -> Result<Option<Lease>, StoreError> {
        let inner = self.inner.lock().await;
        inner.check_online()?;
        Ok(inner.leases.get(job_name).cloned())
    }

    async fn compare_and_swap_lease(
        &self,
        job_name: &str,
        expected: Option<&Lease>,
        next: Lease,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check_online()?;
        let current = inner.leases.get(job_name);
        if current != expected {
            return Ok(false);
        }
        inner.leases.insert(job_name.to_string(), next);
        Ok(true)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn now(&self) -> Result<DateTime<Utc>, StoreError> {
        let inner = self.inner.lock().await;
        inner.check_online()?;
        Ok(inner.clock.now())
    }

    async fn read_record(
        &self,
        job_name: &str,
        execution_key: &str,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        let inner = self.inner.lock().await;
        inner.check_online()?;
        Ok(inner
            .records
            .get(&(job_name.to_string(), execution_key.to_string()))
            .cloned())
    }

    async fn insert_record(&self, record: ExecutionRecord) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check_online()?;
        let key = (record.job_name.clone(), record.execution_key.clone());
        if inner.records.contains_key(&key) {
            return Ok(false);
        }
        inner.records.insert(key, record);
        Ok(true)
    }

    async fn compare_and_swap_record(
        &self,
        job_name: &str,
        execution_key: &str,
        expected: &ExecutionRecord,
        next: ExecutionRecord,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check_online()?;
        let key = (job_name.to_string(), execution_key.to_string());
        if inner.records.get(&key) != Some(expected) {
            return Ok(false);
        }
        inner.records.insert(key, next);
        Ok(true)
    }
}
