//! `docflow-worker`: runs the submission queue against the in-process stores.
//!
//! Queues one submission per document named on the command line (default
//! `SINV-0001`), waits for the worker to resolve them, then runs the
//! reconciler and the retention sweep once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::info;

use docflow_core::UserId;
use docflow_infra::documents::{DocTypeSettings, InMemoryDocumentStore};
use docflow_infra::jobs::{
    submission_job_handler, InMemoryJobStore, JobExecutor, JobExecutorConfig, JobStore,
    LocalJobRunner,
};
use docflow_infra::notifications::{InMemoryUserDirectory, LoggingNotifier};
use docflow_infra::submissions::InMemorySubmissionStore;
use docflow_submission::{
    Document, DocumentRef, SubmissionAction, SubmissionContext, SubmissionNotifier, SubmissionQueue,
    SubmissionQueueConfig, SubmissionState, Transaction, SUBMISSION_JOB_KIND,
};

const DOCTYPE: &str = "Sales Invoice";

fn main() -> anyhow::Result<()> {
    docflow_observability::init();

    let config = SubmissionQueueConfig::from_env().context("loading submission queue configuration")?;
    info!(?config, "starting docflow worker");

    let documents = InMemoryDocumentStore::arc();
    documents.register_doctype(
        DOCTYPE,
        DocTypeSettings {
            deferred_submission: true,
        },
    );
    let submissions = InMemorySubmissionStore::arc();
    let jobs = InMemoryJobStore::arc();

    let actor = UserId::new();
    let users = Arc::new(InMemoryUserDirectory::new().with_user(actor, "worker@localhost"));

    let queue = SubmissionQueue::new(SubmissionContext {
        submissions: submissions.clone(),
        documents: documents.clone(),
        runner: Arc::new(LocalJobRunner::new(jobs.clone())),
        notifier: SubmissionNotifier::new(Arc::new(LoggingNotifier), users, config.realtime_window),
        config,
    });

    let mut executor = JobExecutor::new(jobs.clone());
    executor.register_handler(SUBMISSION_JOB_KIND, submission_job_handler(queue.execution_handler()));
    let worker = executor
        .spawn(JobExecutorConfig::default().with_name("submission-worker"))
        .context("spawning job executor")?;

    let names: Vec<String> = std::env::args().skip(1).collect();
    let names = if names.is_empty() {
        vec!["SINV-0001".to_string()]
    } else {
        names
    };

    let mut queued = Vec::with_capacity(names.len());
    for name in names {
        let document = Document::new(
            DocumentRef::new(DOCTYPE, name),
            serde_json::json!({"customer": "Walk-in"}),
        );
        documents.insert(document.clone())?;

        let mut tx = Transaction::begin();
        let ack = queue.queue_submission(&mut tx, document, SubmissionAction::Submit, actor)?;
        tx.commit();
        info!(submission_id = %ack.submission_id, "{}", ack.message);
        queued.push(ack.submission_id);
    }

    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        let pending = queued
            .iter()
            .filter_map(|id| queue.get(*id).ok().flatten())
            .any(|record| record.state() == SubmissionState::Queued);
        if !pending {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    for id in &queued {
        let outcome = queue.unlock_submission(*id)?;
        info!(
            submission_id = %id,
            ?outcome,
            message = outcome.message().unwrap_or_default(),
            "submission reconciled"
        );
    }

    let purged = queue.clear_old_records()?;
    info!(
        purged,
        executor = ?worker.stats(),
        jobs = ?jobs.stats()?,
        "shutting down"
    );
    worker.shutdown();

    Ok(())
}
