use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CoordConfig;
use crate::error::Result;
use crate::store::LedgerStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionState {
    Started,
    Completed,
    Failed,
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionState::Started => write!(f, "started"),
            ExecutionState::Completed => write!(f, "completed"),
            ExecutionState::Failed => write!(f, "failed"),
        }
    }
}

/// Durable record of one logical occurrence of a job.
///
/// Per execution key the record transitions `Started -> {Completed |
/// Failed}` at most once, enforced by compare-and-swap. Records are
/// retained after finalization; retry attempts use a fresh key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub job_name: String,
    pub execution_key: String,
    pub state: ExecutionState,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Fence token of the lease holder that created the record.
    /// Finalization checks it so a superseded owner cannot settle a
    /// record it no longer owns; admission never branches on it.
    pub owner_fence_token: u64,
}

impl ExecutionRecord {
    pub fn started(
        job_name: &str,
        execution_key: &str,
        owner_fence_token: u64,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_name: job_name.to_string(),
            execution_key: execution_key.to_string(),
            state: ExecutionState::Started,
            started_at,
            completed_at: None,
            owner_fence_token,
        }
    }

    pub fn finalized(mut self, state: ExecutionState, at: DateTime<Utc>) -> Self {
        self.state = state;
        self.completed_at = Some(at);
        self
    }

    pub fn is_finalized(&self) -> bool {
        self.state != ExecutionState::Started
    }
}

/// Admission decision for one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// This caller won the record and must run the business logic.
    Admitted,
    /// The key already reached a terminal state; nothing to do. Covers
    /// Failed records too, since retries always use a new key.
    AlreadyCompleted,
    /// A fresh Started record exists: another party is (or very recently
    /// was) running this key.
    AlreadyInProgress,
}

/// The idempotency safety net beneath the lease protocol.
///
/// The lease bounds concurrent ownership to a tiny window at expiry
/// boundaries but cannot make it zero without a perfect global clock.
/// The ledger closes the gap: even if two holders briefly both believe
/// they own the lease, only one wins the conditional insert for a given
/// execution key, so the business effect still happens at most once.
pub struct ExecutionLedger {
    store: Arc<dyn LedgerStore>,
    config: CoordConfig,
}

impl ExecutionLedger {
    pub fn new(store: Arc<dyn LedgerStore>, config: CoordConfig) -> Self {
        Self { store, config }
    }

    /// Try to open a Started record for `execution_key`.
    ///
    /// A Started record older than the staleness threshold is presumed
    /// abandoned (holder crashed after insert) and taken over by CAS;
    /// the loser of that takeover race sees `AlreadyInProgress`.
    pub async fn begin_execution(
        &self,
        job_name: &str,
        execution_key: &str,
        owner_fence_token: u64,
    ) -> Result<Admission> {
        let now = self.store.now().await?;

        let existing = self.store.read_record(job_name, execution_key).await?;
        let existing = match existing {
            None => {
                let record =
                    ExecutionRecord::started(job_name, execution_key, owner_fence_token, now);
                if self.store.insert_record(record).await? {
                    tracing::debug!(job = job_name, key = execution_key, fence = owner_fence_token, "Execution admitted");
                    return Ok(Admission::Admitted);
                }
                // Lost the insert race; classify whatever landed.
                match self.store.read_record(job_name, execution_key).await? {
                    Some(record) => record,
                    None => return Ok(Admission::AlreadyInProgress),
                }
            }
            Some(record) => record,
        };

        if existing.is_finalized() {
            return Ok(Admission::AlreadyCompleted);
        }

        let staleness = now.signed_duration_since(existing.started_at);
        let threshold = chrono::Duration::from_std(self.config.staleness_threshold())
            .expect("staleness threshold out of range");
        if staleness < threshold {
            return Ok(Admission::AlreadyInProgress);
        }

        // Stale Started record: its owner presumably died between insert
        // and finalize. Take it over atomically.
        let takeover =
            ExecutionRecord::started(job_name, execution_key, owner_fence_token, now);
        let won = self
            .store
            .compare_and_swap_record(job_name, execution_key, &existing, takeover)
            .await?;
        if won {
            tracing::warn!(
                job = job_name,
                key = execution_key,
                stale_fence = existing.owner_fence_token,
                fence = owner_fence_token,
                stale_for_ms = staleness.num_milliseconds(),
                "Took over stale started record"
            );
            Ok(Admission::Admitted)
        } else {
            Ok(Admission::AlreadyInProgress)
        }
    }

    /// Transition the record from Started to `outcome`, on behalf of the
    /// holder that opened it with `owner_fence_token`.
    ///
    /// Returns whether this call performed the transition. A missing or
    /// already-finalized record is a logged no-op, so double finalization
    /// never corrupts state. A fence mismatch is also a no-op: once a
    /// stale record has been taken over, the original owner has no
    /// standing to settle it.
    pub async fn finish_execution(
        &self,
        job_name: &str,
        execution_key: &str,
        outcome: ExecutionState,
        owner_fence_token: u64,
    ) -> Result<bool> {
        debug_assert!(outcome != ExecutionState::Started);

        let now = self.store.now().await?;
        let current = match self.store.read_record(job_name, execution_key).await? {
            Some(record) if !record.is_finalized() => record,
            Some(record) => {
                tracing::debug!(
                    job = job_name,
                    key = execution_key,
                    state = %record.state,
                    "Record already finalized, ignoring"
                );
                return Ok(false);
            }
            None => {
                tracing::debug!(job = job_name, key = execution_key, "No record to finalize");
                return Ok(false);
            }
        };

        if current.owner_fence_token != owner_fence_token {
            tracing::warn!(
                job = job_name,
                key = execution_key,
                record_fence = current.owner_fence_token,
                fence = owner_fence_token,
                "Record owned by another fence, ignoring finalization"
            );
            return Ok(false);
        }

        let next = current.clone().finalized(outcome, now);
        let transitioned = self
            .store
            .compare_and_swap_record(job_name, execution_key, &current, next)
            .await?;
        if transitioned {
            tracing::debug!(job = job_name, key = execution_key, outcome = %outcome, "Execution finalized");
        }
        Ok(transitioned)
    }
}
