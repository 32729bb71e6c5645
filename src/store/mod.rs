pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::ledger::ExecutionRecord;
use crate::lease::Lease;

pub use memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Minimal contract the lease protocol needs from a backing store: a
/// server-side clock, a linearizable read, and an atomic compare-and-swap.
///
/// The CAS is the sole cross-process tie-break. All expiry decisions use
/// `now()` from the store, never the client wall clock.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Server-side clock used for every expiry evaluation.
    async fn now(&self) -> Result<DateTime<Utc>, StoreError>;

    /// Linearizable read of the lease record for a job, if any.
    async fn read_lease(&self, job_name: &str) -> Result<Option<Lease>, StoreError>;

    /// Install `next` only if the stored record matches `expected`
    /// (`None` meaning no record exists). Returns false when the
    /// precondition no longer holds.
    async fn compare_and_swap_lease(
        &self,
        job_name: &str,
        expected: Option<&Lease>,
        next: Lease,
    ) -> Result<bool, StoreError>;
}

/// Contract the execution ledger needs: conditional insert plus
/// compare-and-swap update, so state transitions never go through a
/// read-then-write window.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn now(&self) -> Result<DateTime<Utc>, StoreError>;

    async fn read_record(
        &self,
        job_name: &str,
        execution_key: &str,
    ) -> Result<Option<ExecutionRecord>, StoreError>;

    /// Insert a record only if none exists for its execution key.
    /// Returns false if a record is already present.
    async fn insert_record(&self, record: ExecutionRecord) -> Result<bool, StoreError>;

    /// Replace the stored record only if it currently equals `expected`.
    async fn compare_and_swap_record(
        &self,
        job_name: &str,
        execution_key: &str,
        expected: &ExecutionRecord,
        next: ExecutionRecord,
    ) -> Result<bool, StoreError>;
}
