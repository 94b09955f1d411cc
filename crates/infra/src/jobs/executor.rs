//! Job executor with retry, backoff and per-attempt timeouts.

use std::collections::HashMap;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use docflow_submission::Cancellation;

use super::store::JobStore;
use super::types::{Job, JobKind, JobResult, JobStatus};

/// Job handler function type.
///
/// The [`Cancellation`] is raised when the executor gives up on the attempt;
/// handlers check it before doing anything they cannot take back.
pub type JobHandler = Arc<dyn Fn(&Job, &Cancellation) -> JobResult + Send + Sync>;

/// Job executor configuration.
#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    /// How often to poll for new jobs
    pub poll_interval: Duration,
    /// Name for logging
    pub name: String,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            name: "job-executor".to_string(),
        }
    }
}

impl JobExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Handle to control a running executor.
#[derive(Debug)]
pub struct JobExecutorHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<ExecutorStats>>,
}

impl JobExecutorHandle {
    /// Request graceful shutdown and wait for the loop to exit.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    /// Get current executor statistics.
    pub fn stats(&self) -> ExecutorStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ExecutorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_dead_lettered: u64,
    pub jobs_stopped: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

/// Background job executor.
///
/// Polls a job store for pending jobs, executes them with registered handlers,
/// and handles retries, dead-lettering and timeouts.
///
/// Each attempt runs on its own thread. When the attempt outlives
/// `job.timeout` the job is marked [`JobStatus::Stopped`], the attempt's
/// [`Cancellation`] is raised and the thread is abandoned; whatever it does
/// afterwards is no longer tracked by the job.
pub struct JobExecutor<S: JobStore> {
    store: S,
    handlers: HashMap<String, JobHandler>,
}

impl<S: JobStore + 'static> JobExecutor<S> {
    /// Create a new executor with the given store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a job kind.
    ///
    /// Patterns are an exact kind, a `prefix.*` category, or `*`.
    pub fn register_handler<F>(&mut self, kind_pattern: impl Into<String>, handler: F)
    where
        F: Fn(&Job, &Cancellation) -> JobResult + Send + Sync + 'static,
    {
        self.handlers.insert(kind_pattern.into(), Arc::new(handler));
    }

    fn get_handler(&self, kind: &JobKind) -> Option<&JobHandler> {
        let type_name = kind.type_name();
        if let Some(h) = self.handlers.get(type_name) {
            return Some(h);
        }

        for (pattern, handler) in &self.handlers {
            if let Some(prefix) = pattern.strip_suffix(".*") {
                if type_name.starts_with(prefix) {
                    return Some(handler);
                }
            }
        }

        self.handlers.get("*")
    }

    /// Spawn the executor in a background thread.
    pub fn spawn(self, config: JobExecutorConfig) -> std::io::Result<JobExecutorHandle>
    where
        S: Send,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(ExecutorStats::default()));
        let stats_clone = stats.clone();

        let join = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || {
                executor_loop(self, config, shutdown_rx, stats_clone);
            })?;

        Ok(JobExecutorHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }

    /// Execute a claimed job (for testing or synchronous use).
    pub fn execute_one(&self, job: &mut Job) -> Result<(), String> {
        execute_job(self, job)
    }

    /// Claim and execute the next ready job. Returns `false` when the queue is empty.
    pub fn run_next(&self) -> Result<bool, String> {
        match self.store.claim_next().map_err(|e| e.to_string())? {
            Some(mut job) => {
                // Failures are already recorded on the job.
                let _ = execute_job(self, &mut job);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drain every ready job. Returns how many were executed.
    pub fn run_until_idle(&self) -> Result<usize, String> {
        let mut executed = 0;
        while self.run_next()? {
            executed += 1;
        }
        Ok(executed)
    }
}

fn executor_loop<S: JobStore + 'static>(
    executor: JobExecutor<S>,
    config: JobExecutorConfig,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<ExecutorStats>>,
) {
    info!(executor = %config.name, "job executor started");
    let start_time = Instant::now();

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        if let Ok(mut s) = stats.lock() {
            s.uptime_secs = start_time.elapsed().as_secs();
        }

        match executor.store.claim_next() {
            Ok(Some(mut job)) => {
                debug!(
                    executor = %config.name,
                    job_id = %job.id,
                    kind = %job.kind,
                    "claimed job"
                );

                if let Ok(mut s) = stats.lock() {
                    s.current_running += 1;
                }

                let result = execute_job(&executor, &mut job);

                if let Ok(mut s) = stats.lock() {
                    s.current_running = s.current_running.saturating_sub(1);
                    s.jobs_processed += 1;
                    match (&result, &job.status) {
                        (Ok(()), _) => s.jobs_succeeded += 1,
                        (Err(_), JobStatus::DeadLettered { .. }) => {
                            s.jobs_failed += 1;
                            s.jobs_dead_lettered += 1;
                        }
                        (Err(_), JobStatus::Stopped { .. }) => s.jobs_stopped += 1,
                        (Err(_), _) => s.jobs_failed += 1,
                    }
                }

                if let Err(e) = result {
                    debug!(
                        executor = %config.name,
                        job_id = %job.id,
                        error = %e,
                        status = ?job.status,
                        "job execution failed"
                    );
                }
            }
            Ok(None) => {
                thread::sleep(config.poll_interval);
            }
            Err(e) => {
                error!(executor = %config.name, error = %e, "failed to claim job");
                thread::sleep(config.poll_interval);
            }
        }
    }

    info!(executor = %config.name, "job executor stopped");
}

/// How an attempt ended, before it is folded into the job's status.
enum Attempt {
    Returned(JobResult),
    TimedOut,
    Panicked,
}

fn run_attempt(handler: &JobHandler, job: &Job) -> Attempt {
    let (tx, rx) = mpsc::sync_channel(1);
    let handler = handler.clone();
    let snapshot = job.clone();
    let cancellation = Cancellation::new();
    let attempt_cancellation = cancellation.clone();

    let spawned = thread::Builder::new()
        .name(format!("job-{}", job.id))
        .spawn(move || {
            let _ = tx.send(handler(&snapshot, &attempt_cancellation));
        });
    if let Err(e) = spawned {
        return Attempt::Returned(JobResult::Failure(format!("could not start job thread: {e}")));
    }

    match rx.recv_timeout(job.timeout) {
        Ok(result) => Attempt::Returned(result),
        Err(mpsc::RecvTimeoutError::Timeout) => {
            cancellation.cancel();
            Attempt::TimedOut
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Attempt::Panicked,
    }
}

fn execute_job<S: JobStore + 'static>(executor: &JobExecutor<S>, job: &mut Job) -> Result<(), String> {
    let handler = match executor.get_handler(&job.kind) {
        Some(h) => h,
        None => {
            let error = format!("no handler for job kind: {}", job.kind);
            warn!(job_id = %job.id, error = %error, "no handler for job");
            return fail(executor, job, error, Utc::now());
        }
    };

    let started = Utc::now();

    match run_attempt(handler, job) {
        Attempt::Returned(JobResult::Success) => {
            job.mark_completed(started);
            executor.store.update(job).map_err(|e| e.to_string())?;
            debug!(job_id = %job.id, "job completed successfully");
            Ok(())
        }
        Attempt::Returned(JobResult::Failure(error)) => fail(executor, job, error, started),
        Attempt::Panicked => fail(executor, job, "job handler panicked".to_string(), started),
        Attempt::TimedOut => {
            job.mark_stopped(started);
            executor.store.update(job).map_err(|e| e.to_string())?;
            warn!(job_id = %job.id, timeout_secs = job.timeout.as_secs(), "job stopped after timeout");
            Err(job.last_error().unwrap_or("job stopped").to_string())
        }
    }
}

fn fail<S: JobStore>(
    executor: &JobExecutor<S>,
    job: &mut Job,
    error: String,
    started: chrono::DateTime<Utc>,
) -> Result<(), String> {
    job.mark_failed(error.clone(), started);
    executor.store.update(job).map_err(|e| e.to_string())?;

    if matches!(job.status, JobStatus::DeadLettered { .. }) {
        warn!(job_id = %job.id, error = %error, "job moved to failed-job registry");
        executor
            .store
            .dead_letter(job.clone(), error.clone())
            .map_err(|e| e.to_string())?;
    }

    Err(error)
}
