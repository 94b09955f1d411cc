//! Background job system with retry, backoff, timeouts and a failed-job registry.
//!
//! ## Components
//!
//! - `Job`: job payload, status and attempt history
//! - `JobStore`: persistence for jobs and the failed-job registry
//! - `JobExecutor`: claims jobs and runs them with registered handlers
//! - `LocalJobRunner`: the submission queue's view of all of the above

pub mod executor;
pub mod runner;
pub mod store;
pub mod types;

pub use executor::{ExecutorStats, JobExecutor, JobExecutorConfig, JobExecutorHandle};
pub use runner::{job_state, submission_job_handler, LocalJobRunner};
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{
    BackoffStrategy, DeadLetterEntry, Job, JobAttemptRecord, JobKind, JobResult, JobStatus,
    RetryPolicy, DEFAULT_JOB_TIMEOUT,
};
