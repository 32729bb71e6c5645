use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::CoordConfig;
use crate::coordinator::{Coordinator, Exclusive};
use crate::error::{BusinessError, Result};
use crate::ledger::{Admission, ExecutionLedger, ExecutionState};
use crate::lease::LeaseManager;
use crate::store::{LedgerStore, LockStore};

/// What one `execute` call did.
#[derive(Debug)]
pub enum RunOutcome {
    /// Business logic ran and succeeded; the ledger records Completed.
    Completed,
    /// Business logic ran and failed; the ledger records Failed. A retry
    /// is a new execution key chosen by the caller, never a re-run of
    /// this one.
    Failed(BusinessError),
    /// Nothing to do: another holder is running it, or it already ran.
    /// Both are non-error outcomes; consult the ledger directly if the
    /// distinction matters operationally.
    Skipped,
}

impl RunOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, RunOutcome::Skipped)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }
}

/// Sole entry point for callers: composes the coordinator (lease) and the
/// execution ledger (idempotency) around a business callback.
///
/// The runner makes each individual attempt safe; it never retries. The
/// caller's scheduling loop owns cadence and backoff.
pub struct JobRunner {
    coordinator: Coordinator,
    ledger: ExecutionLedger,
}

impl JobRunner {
    pub fn new(coordinator: Coordinator, ledger: ExecutionLedger) -> Self {
        Self {
            coordinator,
            ledger,
        }
    }

    /// Wire a runner from a lock store, a ledger store, and a holder id.
    pub fn connect(
        lock_store: Arc<dyn LockStore>,
        ledger_store: Arc<dyn LedgerStore>,
        holder_id: String,
        config: CoordConfig,
    ) -> Self {
        let lease_manager = Arc::new(LeaseManager::new(lock_store, config.clone()));
        let coordinator = Coordinator::new(lease_manager, holder_id, config.clone());
        let ledger = ExecutionLedger::new(ledger_store, config);
        Self::new(coordinator, ledger)
    }

    pub fn holder_id(&self) -> &str {
        self.coordinator.holder_id()
    }

    /// Execute one logical occurrence of a job effectively once across
    /// the fleet.
    ///
    /// Acquires the lease, opens the ledger record for `execution_key`,
    /// and runs `business` with a cancellation token that fires if lease
    /// ownership is lost mid-run. Duplicate triggers and lost acquisition
    /// races both come back as `Skipped`.
    pub async fn execute<F, Fut>(
        &self,
        job_name: &str,
        execution_key: &str,
        business: F,
    ) -> Result<RunOutcome>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = std::result::Result<(), BusinessError>>,
    {
        let ledger = &self.ledger;
        let cycle = self
            .coordinator
            .run_exclusive(job_name, |guard| async move {
                let admission = ledger
                    .begin_execution(job_name, execution_key, guard.fence_token())
                    .await?;

                match admission {
                    Admission::AlreadyCompleted => {
                        tracing::debug!(job = job_name, key = execution_key, "Already ran, skipping");
                        return Ok(RunOutcome::Skipped);
                    }
                    Admission::AlreadyInProgress => {
                        // Either genuine overlap at a lease boundary or a
                        // stale record worth investigating.
                        tracing::warn!(
                            job = job_name,
                            key = execution_key,
                            "Execution already in progress elsewhere, skipping"
                        );
                        return Ok(RunOutcome::Skipped);
                    }
                    Admission::Admitted => {}
                }

                match business(guard.cancellation()).await {
                    Ok(()) => {
                        ledger
                            .finish_execution(
                                job_name,
                                execution_key,
                                ExecutionState::Completed,
                                guard.fence_token(),
                            )
                            .await?;
                        tracing::info!(job = job_name, key = execution_key, fence = guard.fence_token(), "Execution completed");
                        Ok(RunOutcome::Completed)
                    }
                    Err(err) => {
                        ledger
                            .finish_execution(
                                job_name,
                                execution_key,
                                ExecutionState::Failed,
                                guard.fence_token(),
                            )
                            .await?;
                        tracing::warn!(job = job_name, key = execution_key, error = %err, "Execution failed");
                        Ok(RunOutcome::Failed(err))
                    }
                }
            })
            .await?;

        match cycle {
            Exclusive::NotLeader => Ok(RunOutcome::Skipped),
            Exclusive::Completed(outcome) => outcome,
        }
    }
}
