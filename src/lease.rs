use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use uuid::Uuid;

use crate::config::CoordConfig;
use crate::error::{CoordError, Result};
use crate::store::LockStore;

/// Time-bounded exclusive ownership record for a named job.
///
/// At most one valid (non-expired) lease per `job_name` exists at any
/// observation point against the store's linearizable read path. The
/// fence token strictly increases across acquisitions and never changes
/// on renewal, so downstream systems can reject writes from a deposed
/// holder. Leases are never deleted; release just expires them, which
/// keeps the fence history intact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub job_name: String,
    pub holder_id: String,
    pub expires_at: DateTime<Utc>,
    pub fence_token: u64,
}

impl Lease {
    /// A lease is invalid from the instant `now >= expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Build a holder id unique across processes and restarts:
/// `prefix-pid-<random suffix>`.
pub fn generate_holder_id(prefix: &str) -> String {
    format!(
        "{}-{}-{}",
        prefix,
        std::process::id(),
        Uuid::new_v4().simple()
    )
}

/// Acquires, renews, and releases the lease for named jobs.
///
/// Every mutation is a single compare-and-swap against the store; the
/// store's atomicity is the only tie-break between racing candidates.
/// Expiry is always evaluated against the store's clock.
pub struct LeaseManager {
    store: Arc<dyn LockStore>,
    config: CoordConfig,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn LockStore>, config: CoordConfig) -> Self {
        Self { store, config }
    }

    /// Attempt to acquire the lease for `job_name`.
    ///
    /// Succeeds only when no lease record exists or the existing one has
    /// expired; any unexpired lease means `LeaseDenied`, even one held by
    /// this same holder. On success the fence token is incremented past
    /// every previous acquisition and the new token returned.
    pub async fn try_acquire(
        &self,
        job_name: &str,
        holder_id: &str,
        lease_duration: std::time::Duration,
    ) -> Result<u64> {
        let attempt = self.acquire_inner(job_name, holder_id, lease_duration);
        match timeout(self.config.acquire_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(CoordError::Store(crate::store::StoreError::Unavailable(
                format!("acquire timed out after {:?}", self.config.acquire_timeout),
            ))),
        }
    }

    async fn acquire_inner(
        &self,
        job_name: &str,
        holder_id: &str,
        lease_duration: std::time::Duration,
    ) -> Result<u64> {
        let now = self.store.now().await?;
        let current = self.store.read_lease(job_name).await?;

        if let Some(lease) = &current {
            if !lease.is_expired_at(now) {
                return Err(CoordError::LeaseDenied {
                    job: job_name.to_string(),
                    holder: lease.holder_id.clone(),
                });
            }
        }

        let fence_token = current.as_ref().map_or(0, |l| l.fence_token) + 1;
        let next = Lease {
            job_name: job_name.to_string(),
            holder_id: holder_id.to_string(),
            expires_at: now + to_chrono(lease_duration),
            fence_token,
        };

        let won = self
            .store
            .compare_and_swap_lease(job_name, current.as_ref(), next)
            .await?;
        if !won {
            // Someone else's write landed between our read and our swap.
            let holder = self
                .store
                .read_lease(job_name)
                .await?
                .map_or_else(|| "unknown".to_string(), |l| l.holder_id);
            return Err(CoordError::LeaseDenied {
                job: job_name.to_string(),
                holder,
            });
        }

        tracing::info!(job = job_name, holder = holder_id, fence = fence_token, "Lease acquired");
        Ok(fence_token)
    }

    /// Extend the lease while still holding it.
    ///
    /// Succeeds only if `holder_id` matches the current record and the
    /// lease is unexpired at the moment of the write; the fence token is
    /// untouched. Every failure mode, including a renewal that times out
    /// or a store error mid-write, is reported as `LeaseLost` — the caller
    /// must immediately treat ownership as gone.
    pub async fn renew(
        &self,
        job_name: &str,
        holder_id: &str,
        lease_duration: std::time::Duration,
    ) -> Result<()> {
        let attempt = self.renew_inner(job_name, holder_id, lease_duration);
        match timeout(self.config.renew_timeout, attempt).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                tracing::warn!(job = job_name, holder = holder_id, error = %err, "Lease renewal failed");
                Err(CoordError::LeaseLost(job_name.to_string()))
            }
            Err(_) => {
                tracing::warn!(
                    job = job_name,
                    holder = holder_id,
                    timeout = ?self.config.renew_timeout,
                    "Lease renewal timed out, assuming ownership lost"
                );
                Err(CoordError::LeaseLost(job_name.to_string()))
            }
        }
    }

    async fn renew_inner(
        &self,
        job_name: &str,
        holder_id: &str,
        lease_duration: std::time::Duration,
    ) -> Result<()> {
        let now = self.store.now().await?;
        let current = self.store.read_lease(job_name).await?;

        let lease = match current {
            Some(lease) if lease.holder_id == holder_id && !lease.is_expired_at(now) => lease,
            _ => return Err(CoordError::LeaseLost(job_name.to_string())),
        };

        let mut next = lease.clone();
        next.expires_at = now + to_chrono(lease_duration);

        let extended = self
            .store
            .compare_and_swap_lease(job_name, Some(&lease), next)
            .await?;
        if !extended {
            return Err(CoordError::LeaseLost(job_name.to_string()));
        }

        tracing::trace!(job = job_name, holder = holder_id, fence = lease.fence_token, "Lease renewed");
        Ok(())
    }

    /// Best-effort release: expire the lease now if this holder still
    /// owns it. Failures are logged and swallowed — an unreleased lease
    /// simply lapses at `expires_at`.
    pub async fn release(&self, job_name: &str, holder_id: &str) {
        if let Err(err) = self.release_inner(job_name, holder_id).await {
            tracing::warn!(job = job_name, holder = holder_id, error = %err, "Lease release failed, will expire naturally");
        }
    }

    async fn release_inner(&self, job_name: &str, holder_id: &str) -> Result<()> {
        let now = self.store.now().await?;
        let current = self.store.read_lease(job_name).await?;

        let lease = match current {
            Some(lease) if lease.holder_id == holder_id && !lease.is_expired_at(now) => lease,
            // Nothing to release: expired, absent, or already taken over.
            _ => return Ok(()),
        };

        let mut next = lease.clone();
        next.expires_at = now;
        self.store
            .compare_and_swap_lease(job_name, Some(&lease), next)
            .await?;

        tracing::debug!(job = job_name, holder = holder_id, fence = lease.fence_token, "Lease released");
        Ok(())
    }
}

fn to_chrono(duration: std::time::Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).expect("lease duration out of range")
}
