//! Fjall-backed persistence for job state and audit records
//!
//! The store is the single authority on lifecycle transitions: every status
//! change goes through [`JobStore::set_status`], a conditional update that
//! refuses to leave the absorbing `aborted` state and validates the
//! transition against the legal set. Everything else a job owns (audit
//! events, file catalog rows, permission replies, the idempotency index)
//! lives in sibling partitions keyed by job id and is cascade-deleted with
//! the job at retention time.

pub mod error;
pub mod partitions;
pub mod pruning;
pub mod records;
pub mod store;

pub use error::{LedgerError, Result};
pub use pruning::PruneStats;
pub use records::{
    EventSource, FileCategory, Job, JobEvent, JobFile, JobStatus, ModelRef, PermissionAction,
    PermissionDecision, TransitionOutcome,
};
pub use store::JobStore;
