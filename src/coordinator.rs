use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::CoordConfig;
use crate::error::{CoordError, Result};
use crate::lease::LeaseManager;

/// Phase of the coordination cycle. Cyclic; there is no terminal state.
///
/// `Leader -> Candidate` happens either through `Releasing` on normal
/// completion or abruptly when a renewal fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Candidate,
    Acquiring,
    Leader,
    Releasing,
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinatorState::Candidate => write!(f, "candidate"),
            CoordinatorState::Acquiring => write!(f, "acquiring"),
            CoordinatorState::Leader => write!(f, "leader"),
            CoordinatorState::Releasing => write!(f, "releasing"),
        }
    }
}

/// Proof of current ownership handed to the supervised work.
///
/// Carries the fence token to attach to externally-visible side effects,
/// and the cancellation token that fires if ownership is lost mid-run.
/// Cancellation is cooperative: the work is expected to observe the token
/// and stop as soon as practicable; nothing forcibly kills it.
#[derive(Debug, Clone)]
pub struct LeaseGuard {
    fence_token: u64,
    cancel: CancellationToken,
}

impl LeaseGuard {
    pub fn fence_token(&self) -> u64 {
        self.fence_token
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// True once renewal has failed and authority to continue is revoked.
    pub fn is_revoked(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Outcome of one exclusive cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exclusive<T> {
    /// Another candidate holds the lease; skip this cycle.
    NotLeader,
    /// The work ran to completion while the lease was held.
    Completed(T),
}

/// Decides "am I the executor now?" for one candidate process.
///
/// Acquisition goes through the `LeaseManager`; while the work runs, a
/// background task renews the lease at `lease_duration *
/// renewal_fraction` cadence. The first renewal failure revokes the
/// guard's cancellation token synchronously and the cycle surfaces
/// `LeadershipLost` once the work returns. No ordering is imposed beyond
/// the store's atomicity: first successful swap wins.
pub struct Coordinator {
    lease_manager: Arc<LeaseManager>,
    holder_id: String,
    config: CoordConfig,
    // The state machine is per job, per process; one coordinator may
    // drive cycles for several jobs concurrently.
    states: Arc<RwLock<HashMap<String, CoordinatorState>>>,
}

impl Coordinator {
    pub fn new(lease_manager: Arc<LeaseManager>, holder_id: String, config: CoordConfig) -> Self {
        Self {
            lease_manager,
            holder_id,
            config,
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Phase of the current cycle for `job_name`, for observability.
    /// A job with no cycle in flight is a candidate.
    pub async fn state(&self, job_name: &str) -> CoordinatorState {
        self.states
            .read()
            .await
            .get(job_name)
            .copied()
            .unwrap_or(CoordinatorState::Candidate)
    }

    async fn transition(&self, job_name: &str, next: CoordinatorState) {
        let mut states = self.states.write().await;
        let state = states
            .entry(job_name.to_string())
            .or_insert(CoordinatorState::Candidate);
        tracing::trace!(job = job_name, holder = %self.holder_id, from = %*state, to = %next, "Coordinator transition");
        *state = next;
    }

    /// Run `work` if and only if this process can acquire the lease for
    /// `job_name`.
    ///
    /// Returns `Ok(Exclusive::NotLeader)` when another holder is active,
    /// `Ok(Exclusive::Completed(..))` when the work finished under a live
    /// lease, and `Err(LeadershipLost)` when renewal failed before the
    /// work returned — in that case the work's output is discarded and
    /// the lease is left to lapse rather than released.
    pub async fn run_exclusive<F, Fut, T>(&self, job_name: &str, work: F) -> Result<Exclusive<T>>
    where
        F: FnOnce(LeaseGuard) -> Fut,
        Fut: Future<Output = T>,
    {
        self.transition(job_name, CoordinatorState::Acquiring).await;

        let fence_token = match self
            .lease_manager
            .try_acquire(job_name, &self.holder_id, self.config.lease_duration)
            .await
        {
            Ok(fence) => fence,
            Err(CoordError::LeaseDenied { job, holder }) => {
                tracing::debug!(job = %job, holder = %holder, "Lease held elsewhere, skipping cycle");
                self.transition(job_name, CoordinatorState::Candidate).await;
                return Ok(Exclusive::NotLeader);
            }
            Err(err) => {
                self.transition(job_name, CoordinatorState::Candidate).await;
                return Err(err);
            }
        };

        self.transition(job_name, CoordinatorState::Leader).await;

        let cancel = CancellationToken::new();
        let stop = CancellationToken::new();
        let lost = Arc::new(AtomicBool::new(false));

        let renew_handle = tokio::spawn(renewal_loop(
            self.lease_manager.clone(),
            job_name.to_string(),
            self.holder_id.clone(),
            self.config.clone(),
            cancel.clone(),
            stop.clone(),
            lost.clone(),
        ));

        let guard = LeaseGuard {
            fence_token,
            cancel: cancel.clone(),
        };
        let output = work(guard).await;

        // Only a loss observed before the work resolved counts: a renewal
        // that fails after this point cannot retract finished work.
        let lost_before_finish = lost.load(Ordering::SeqCst);
        stop.cancel();
        let _ = renew_handle.await;

        if lost_before_finish {
            tracing::warn!(
                job = job_name,
                holder = %self.holder_id,
                fence = fence_token,
                "Leadership lost mid-execution, discarding cycle"
            );
            self.transition(job_name, CoordinatorState::Candidate).await;
            return Err(CoordError::LeadershipLost(job_name.to_string()));
        }

        self.transition(job_name, CoordinatorState::Releasing).await;
        self.lease_manager.release(job_name, &self.holder_id).await;
        self.transition(job_name, CoordinatorState::Candidate).await;

        Ok(Exclusive::Completed(output))
    }
}

/// Background renewal loop supervising one held lease.
///
/// Ends when `stop` fires (work finished) or on the first renewal
/// failure, which sets `lost` and then cancels the guard token — in that
/// order, so observers of the token always see the flag.
async fn renewal_loop(
    lease_manager: Arc<LeaseManager>,
    job_name: String,
    holder_id: String,
    config: CoordConfig,
    cancel: CancellationToken,
    stop: CancellationToken,
    lost: Arc<AtomicBool>,
) {
    let period = config.renewal_interval();
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                // Abandon an in-flight renewal the moment the work
                // finishes; its verdict no longer matters.
                tokio::select! {
                    _ = stop.cancelled() => break,
                    result = lease_manager.renew(&job_name, &holder_id, config.lease_duration) => {
                        if let Err(err) = result {
                            tracing::warn!(job = %job_name, holder = %holder_id, error = %err, "Renewal failed, revoking authority");
                            lost.store(true, Ordering::SeqCst);
                            cancel.cancel();
                            break;
                        }
                    }
                }
            }
        }
    }
}
