use thiserror::Error;

use crate::store::StoreError;

/// Opaque business-logic failure. The core records it in the ledger and
/// hands it back to the caller without inspecting it.
pub type BusinessError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum CoordError {
    /// Another holder owns a valid lease. Expected outcome, not a fault:
    /// callers skip the cycle.
    #[error("lease for job '{job}' is held by '{holder}'")]
    LeaseDenied { job: String, holder: String },

    /// Lease ownership is gone (expired, taken over, or the renewal write
    /// could not be confirmed). Never retried.
    #[error("lease ownership lost for job '{0}'")]
    LeaseLost(String),

    /// Renewal failed while the supervised work was still running; the
    /// cancellation signal was delivered and the work's result discarded.
    #[error("leadership lost while executing job '{0}'")]
    LeadershipLost(String),

    /// The backing store is unreachable. The whole cycle fails; retry
    /// cadence belongs to the caller's scheduling loop.
    #[error("backing store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, CoordError>;
