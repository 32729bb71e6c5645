pub mod config;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod lease;
pub mod runner;
pub mod store;

pub use config::CoordConfig;
pub use coordinator::{Coordinator, CoordinatorState, Exclusive, LeaseGuard};
pub use error::{BusinessError, CoordError, Result};
pub use ledger::{Admission, ExecutionLedger, ExecutionRecord, ExecutionState};
pub use lease::{generate_holder_id, Lease, LeaseManager};
pub use runner::{JobRunner, RunOutcome};
pub use store::{LedgerStore, LockStore, MemoryStore, StoreError};
