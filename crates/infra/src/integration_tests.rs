//! Integration tests for the full submission pipeline.
//!
//! Tests: queue_submission → Transaction commit → JobRunner → JobExecutor →
//! ExecutionHandler → SubmissionStore / DocumentStore / Notifier, and the
//! Reconciler paths for jobs that never report back.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use chrono::Utc;
    use proptest::prelude::*;

    use docflow_core::{JobId, SubmissionId, UserId};
    use docflow_submission::{
        Cancellation, DocStatus, Document, DocumentAction, DocumentError, DocumentRef, DocumentStore,
        ExecutionOutcome, Indicator, JobRunner, JobRunnerError, JobState, QueueError,
        QueuedSubmission, ReconcileOutcome, SubmissionAction, SubmissionContext, SubmissionJob,
        SubmissionNotifier, SubmissionQueue, SubmissionQueueConfig, SubmissionRecord,
        SubmissionState, SubmissionStore, SubmitOutcome, Transaction, SUBMISSION_JOB_KIND,
    };

    use crate::documents::{DocTypeSettings, InMemoryDocumentStore};
    use crate::jobs::{
        submission_job_handler, InMemoryJobStore, JobExecutor, JobExecutorConfig, JobStats, JobStatus,
        JobStore, LocalJobRunner,
    };
    use crate::notifications::{InMemoryNotifier, InMemoryUserDirectory};
    use crate::submissions::InMemorySubmissionStore;

    const INVOICE: &str = "Sales Invoice";
    const NOTE: &str = "Note";
    const ACTOR_EMAIL: &str = "accounts@example.com";

    /// Job runner with scripted answers.
    struct ScriptedRunner {
        state: Mutex<JobState>,
        detail: Option<String>,
        reject: bool,
        dispatched: Mutex<Vec<SubmissionJob>>,
    }

    impl ScriptedRunner {
        fn reporting(state: JobState) -> Self {
            Self {
                state: Mutex::new(state),
                detail: None,
                reject: false,
                dispatched: Mutex::new(Vec::new()),
            }
        }

        fn with_detail(mut self, detail: &str) -> Self {
            self.detail = Some(detail.to_string());
            self
        }

        fn rejecting() -> Self {
            Self {
                reject: true,
                ..Self::reporting(JobState::Unknown)
            }
        }
    }

    impl JobRunner for ScriptedRunner {
        fn dispatch(&self, job: SubmissionJob, _timeout: Duration) -> Result<JobId, JobRunnerError> {
            if self.reject {
                return Err(JobRunnerError::Unavailable("queue backend down".to_string()));
            }
            self.dispatched.lock().unwrap().push(job);
            Ok(JobId::new())
        }

        fn status(&self, _job_id: JobId) -> Result<JobState, JobRunnerError> {
            Ok(*self.state.lock().unwrap())
        }

        fn failure_detail(&self, _job_id: JobId) -> Result<Option<String>, JobRunnerError> {
            Ok(self.detail.clone())
        }
    }

    struct Harness {
        documents: Arc<InMemoryDocumentStore>,
        submissions: Arc<InMemorySubmissionStore>,
        jobs: Arc<InMemoryJobStore>,
        notifier: Arc<InMemoryNotifier>,
        queue: SubmissionQueue,
        actor: UserId,
    }

    impl Harness {
        fn new() -> Self {
            Self::build(None, InMemoryNotifier::new(), SubmissionQueueConfig::default())
        }

        fn with_runner(runner: Arc<dyn JobRunner>) -> Self {
            Self::build(Some(runner), InMemoryNotifier::new(), SubmissionQueueConfig::default())
        }

        fn build(
            runner: Option<Arc<dyn JobRunner>>,
            notifier: InMemoryNotifier,
            config: SubmissionQueueConfig,
        ) -> Self {
            let documents = InMemoryDocumentStore::arc();
            documents.register_doctype(
                INVOICE,
                DocTypeSettings {
                    deferred_submission: true,
                },
            );
            documents.register_doctype(NOTE, DocTypeSettings::default());

            let submissions = InMemorySubmissionStore::arc();
            let jobs = InMemoryJobStore::arc();
            let runner: Arc<dyn JobRunner> = match runner {
                Some(runner) => runner,
                None => Arc::new(LocalJobRunner::new(jobs.clone())),
            };

            let notifier = Arc::new(notifier);
            let actor = UserId::new();
            let users = Arc::new(InMemoryUserDirectory::new().with_user(actor, ACTOR_EMAIL));

            let queue = SubmissionQueue::new(SubmissionContext {
                submissions: submissions.clone(),
                documents: documents.clone(),
                runner,
                notifier: SubmissionNotifier::new(notifier.clone(), users, config.realtime_window),
                config,
            });

            Self {
                documents,
                submissions,
                jobs,
                notifier,
                queue,
                actor,
            }
        }

        fn executor(&self) -> JobExecutor<Arc<InMemoryJobStore>> {
            let mut executor = JobExecutor::new(self.jobs.clone());
            executor.register_handler(
                SUBMISSION_JOB_KIND,
                submission_job_handler(self.queue.execution_handler()),
            );
            executor
        }

        fn document(&self, doctype: &str, name: &str) -> Document {
            let document = Document::new(
                DocumentRef::new(doctype, name),
                serde_json::json!({"customer": "ACME", "grand_total": 1250}),
            );
            self.documents.insert(document.clone()).unwrap();
            document
        }

        fn invoice(&self, name: &str) -> Document {
            self.document(INVOICE, name)
        }

        fn submitted_invoice(&self, name: &str) -> Document {
            let draft = self.invoice(name);
            self.documents.submit(&draft, None).unwrap();
            self.documents.load(&draft.reference).unwrap()
        }

        fn queue_committed(&self, document: &Document, action: SubmissionAction) -> QueuedSubmission {
            let mut tx = Transaction::begin();
            let ack = self
                .queue
                .queue_submission(&mut tx, document.clone(), action, self.actor)
                .unwrap();
            tx.commit();
            ack
        }

        /// Insert a `Queued` record created `age` ago, bypassing the coordinator.
        fn insert_record(
            &self,
            document: &Document,
            action: SubmissionAction,
            user: UserId,
            age: chrono::Duration,
        ) -> SubmissionId {
            let record = SubmissionRecord::new(document.reference.clone(), action, user, Utc::now() - age);
            let id = record.id_typed();
            self.submissions.insert(record).unwrap();
            id
        }

        /// Like `insert_record`, with the document locked as the coordinator would.
        fn stale_submission(&self, document: &Document, action: SubmissionAction, age: chrono::Duration) -> SubmissionId {
            let id = self.insert_record(document, action, self.actor, age);
            self.documents.lock(&document.reference, id).unwrap();
            id
        }

        fn record(&self, id: SubmissionId) -> SubmissionRecord {
            self.submissions.get(id).unwrap().unwrap()
        }

        fn is_locked(&self, document: &Document) -> bool {
            self.documents.is_locked(&document.reference).unwrap()
        }

        fn docstatus(&self, document: &Document) -> DocStatus {
            self.documents.load(&document.reference).unwrap().docstatus
        }
    }

    fn counting_validator(documents: &InMemoryDocumentStore, doctype: &str) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        documents.add_validator(doctype, move |_doc, _action| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        calls
    }

    #[test]
    fn enqueue_locks_document_and_dispatches_on_commit() {
        let h = Harness::new();
        let doc = h.invoice("SINV-0001");

        let mut tx = Transaction::begin();
        let ack = h
            .queue
            .queue_submission(&mut tx, doc.clone(), SubmissionAction::Submit, h.actor)
            .unwrap();

        let record = h.record(ack.submission_id);
        assert_eq!(record.state(), SubmissionState::Queued);
        assert_eq!(record.job_id(), None);
        assert_eq!(record.ended_at(), None);
        assert!(h.is_locked(&doc));
        assert_eq!(h.jobs.stats().unwrap().pending, 0);

        tx.commit();

        let record = h.record(ack.submission_id);
        let job_id = record.job_id().expect("job id recorded after commit");
        let job = h.jobs.get(job_id).unwrap().unwrap();
        assert_eq!(job.kind.type_name(), SUBMISSION_JOB_KIND);
        assert_eq!(job.timeout, Duration::from_secs(600));
        assert_eq!(ack.link, format!("/app/submission-queue/{}", ack.submission_id));
    }

    #[test]
    fn happy_path_finishes_unlocks_and_alerts() {
        let h = Harness::new();
        let doc = h.invoice("SINV-0001");

        let ack = h.queue_committed(&doc, SubmissionAction::Submit);
        assert_eq!(h.executor().run_until_idle().unwrap(), 1);

        let record = h.record(ack.submission_id);
        assert_eq!(record.state(), SubmissionState::Finished);
        assert!(record.ended_at().unwrap() >= record.created_at());
        assert_eq!(record.failure_detail(), None);
        assert_eq!(h.docstatus(&doc), DocStatus::Submitted);
        assert!(!h.is_locked(&doc));

        let job = h.jobs.get(record.job_id().unwrap()).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);

        let alerts = h.notifier.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].user, h.actor);
        assert_eq!(alerts[0].indicator, Indicator::Green);
        assert_eq!(alerts[0].link, "/app/sales-invoice/SINV-0001");
        assert_eq!(
            alerts[0].message,
            "Submission of Sales Invoice SINV-0001 with action submit completed successfully"
        );
        assert!(h.notifier.notifications().is_empty());
    }

    #[test]
    fn execution_time_is_measured_from_creation() {
        let h = Harness::new();
        let doc = h.invoice("SINV-0001");
        let id = h.stale_submission(&doc, SubmissionAction::Submit, chrono::Duration::seconds(5));

        let outcome = h
            .queue
            .execution_handler()
            .execute(id, doc.clone(), SubmissionAction::Submit, &Cancellation::new())
            .unwrap();

        assert_eq!(outcome, ExecutionOutcome::Resolved(SubmissionState::Finished));
        let record = h.record(id);
        let took = record.ended_at().unwrap() - record.created_at();
        assert!(took >= chrono::Duration::seconds(5));
        assert!(took < chrono::Duration::seconds(6));
        assert_eq!(h.notifier.alerts().len(), 1);
    }

    #[test]
    fn validation_failure_keeps_lock_and_persists_notification() {
        let h = Harness::new();
        let doc = h.invoice("SINV-0001");
        h.documents
            .add_validator(INVOICE, |_doc, _action| Err("Customer is mandatory".to_string()));
        let id = h.stale_submission(&doc, SubmissionAction::Submit, chrono::Duration::minutes(2));

        let outcome = h
            .queue
            .execution_handler()
            .execute(id, doc.clone(), SubmissionAction::Submit, &Cancellation::new())
            .unwrap();

        assert_eq!(outcome, ExecutionOutcome::Resolved(SubmissionState::Failed));
        let record = h.record(id);
        assert!(record.failure_detail().unwrap().contains("Customer is mandatory"));
        assert!(record.ended_at().is_some());
        assert!(h.is_locked(&doc));
        assert_eq!(h.docstatus(&doc), DocStatus::Draft);

        assert!(h.notifier.alerts().is_empty());
        let notifications = h.notifier.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, "Alert");
        assert_eq!(notifications[0].recipients, vec![ACTOR_EMAIL.to_string()]);
        assert_eq!(notifications[0].document_type, "Submission Queue");
        assert_eq!(notifications[0].document_name, id.to_string());
        assert!(notifications[0].subject.ends_with("failed"));

        // The user inspects the failure and releases the document.
        let unlocked = h.queue.unlock_submission(id).unwrap();
        assert_eq!(
            unlocked,
            ReconcileOutcome::Unlocked {
                state: SubmissionState::Failed
            }
        );
        assert!(!h.is_locked(&doc));
        assert_eq!(h.record(id), record);
    }

    #[test]
    fn failed_execution_completes_the_job_and_alerts_with_record_link() {
        let h = Harness::new();
        let doc = h.invoice("SINV-0001");
        h.documents
            .add_validator(INVOICE, |_doc, _action| Err("Posting date is closed".to_string()));

        let ack = h.queue_committed(&doc, SubmissionAction::Submit);
        h.executor().run_until_idle().unwrap();

        let record = h.record(ack.submission_id);
        assert_eq!(record.state(), SubmissionState::Failed);
        let job = h.jobs.get(record.job_id().unwrap()).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);

        let alerts = h.notifier.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].indicator, Indicator::Red);
        assert_eq!(alerts[0].link, ack.link);
    }

    #[test]
    fn abandoned_job_is_failed_and_unlocked_on_demand() {
        let h = Harness::new();
        let doc = h.invoice("SINV-0001");
        let ack = h.queue_committed(&doc, SubmissionAction::Submit);
        let id = ack.submission_id;
        let job_id = h.record(id).job_id().unwrap();

        // A worker claims the job and dies before writing anything.
        let _claimed = h.jobs.claim_next().unwrap().unwrap();
        let in_flight = h.queue.unlock_submission(id).unwrap();
        assert_eq!(
            in_flight,
            ReconcileOutcome::InFlight {
                job_state: JobState::Running
            }
        );
        assert_eq!(in_flight.message(), Some("Document in queue for execution!"));
        assert!(h.is_locked(&doc));

        // Later the runner has forgotten about the job entirely.
        h.jobs.purge(job_id).unwrap();
        let outcome = h.queue.unlock_submission(id).unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Unlocked {
                state: SubmissionState::Failed
            }
        );
        assert_eq!(outcome.message(), Some("Document Unlocked"));
        let record = h.record(id);
        assert_eq!(record.state(), SubmissionState::Failed);
        assert!(record.failure_detail().unwrap().contains("unknown"));
        assert!(record.ended_at().is_some());
        assert!(!h.is_locked(&doc));
        assert_eq!(h.docstatus(&doc), DocStatus::Draft);
    }

    #[test]
    fn ineligible_doctype_runs_synchronously_without_record() {
        let h = Harness::new();
        let note = h.document(NOTE, "NOTE-0001");

        let mut tx = Transaction::begin();
        assert_eq!(
            h.queue
                .queue_submission(&mut tx, note.clone(), SubmissionAction::Submit, h.actor),
            Err(QueueError::NotEligible {
                doctype: NOTE.to_string()
            })
        );
        assert_eq!(
            h.queue
                .submit_or_queue(&mut tx, note.clone(), SubmissionAction::Submit, h.actor),
            Ok(SubmitOutcome::Executed)
        );
        tx.commit();

        assert!(h.submissions.is_empty());
        assert_eq!(h.jobs.stats().unwrap().pending, 0);
        assert_eq!(h.docstatus(&note), DocStatus::Submitted);
        assert!(!h.is_locked(&note));
    }

    #[test]
    fn submit_or_queue_defers_eligible_doctypes() {
        let h = Harness::new();
        let doc = h.invoice("SINV-0001");

        let mut tx = Transaction::begin();
        let outcome = h
            .queue
            .submit_or_queue(&mut tx, doc.clone(), SubmissionAction::Update, h.actor)
            .unwrap();
        tx.commit();

        let SubmitOutcome::Queued(ack) = outcome else {
            panic!("expected the submission to be queued");
        };
        assert_eq!(h.record(ack.submission_id).action(), SubmissionAction::Update);
        assert_eq!(h.docstatus(&doc), DocStatus::Draft);

        h.executor().run_until_idle().unwrap();
        assert_eq!(h.docstatus(&doc), DocStatus::Submitted);
    }

    #[test]
    fn rollback_discards_record_lock_and_dispatch() {
        let h = Harness::new();
        let doc = h.invoice("SINV-0001");

        {
            let mut tx = Transaction::begin();
            h.queue
                .queue_submission(&mut tx, doc.clone(), SubmissionAction::Submit, h.actor)
                .unwrap();
            assert!(h.is_locked(&doc));
            // dropped without commit
        }

        assert!(h.submissions.is_empty());
        assert!(!h.is_locked(&doc));
        assert_eq!(h.jobs.stats().unwrap(), JobStats::default());
    }

    #[test]
    fn locked_document_cannot_be_queued_twice() {
        let h = Harness::new();
        let doc = h.invoice("SINV-0001");
        h.queue_committed(&doc, SubmissionAction::Submit);

        let mut tx = Transaction::begin();
        let second = h
            .queue
            .queue_submission(&mut tx, doc.clone(), SubmissionAction::Submit, h.actor);

        assert_eq!(
            second,
            Err(QueueError::Document(DocumentError::Locked(doc.reference.clone())))
        );
        assert_eq!(h.submissions.len(), 1);
        tx.commit();
        assert_eq!(h.jobs.stats().unwrap().pending, 1);
    }

    #[test]
    fn illegal_transition_is_rejected_up_front() {
        let h = Harness::new();
        let doc = h.invoice("SINV-0001");

        let mut tx = Transaction::begin();
        let result = h
            .queue
            .queue_submission(&mut tx, doc.clone(), SubmissionAction::Cancel, h.actor);

        assert_eq!(
            result,
            Err(QueueError::Document(DocumentError::InvalidTransition {
                reference: doc.reference.clone(),
                action: DocumentAction::Cancel,
                from: DocStatus::Draft,
            }))
        );
        assert!(h.submissions.is_empty());
        assert!(!h.is_locked(&doc));
    }

    #[test]
    fn queued_cancel_cancels_a_submitted_document() {
        let h = Harness::new();
        let doc = h.submitted_invoice("SINV-0001");

        let ack = h.queue_committed(&doc, SubmissionAction::Cancel);
        h.executor().run_until_idle().unwrap();

        assert_eq!(h.record(ack.submission_id).state(), SubmissionState::Finished);
        assert_eq!(h.docstatus(&doc), DocStatus::Cancelled);
        assert!(!h.is_locked(&doc));
    }

    #[test]
    fn dispatch_failure_leaves_record_for_the_reconciler() {
        let h = Harness::with_runner(Arc::new(ScriptedRunner::rejecting()));
        let doc = h.invoice("SINV-0001");

        let ack = h.queue_committed(&doc, SubmissionAction::Submit);

        let record = h.record(ack.submission_id);
        assert_eq!(record.state(), SubmissionState::Queued);
        assert_eq!(record.job_id(), None);
        assert!(h.is_locked(&doc));

        let outcome = h.queue.unlock_submission(ack.submission_id).unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Unlocked {
                state: SubmissionState::Failed
            }
        );
        assert!(h
            .record(ack.submission_id)
            .failure_detail()
            .unwrap()
            .contains("never dispatched"));
        assert!(!h.is_locked(&doc));
    }

    #[test]
    fn abnormal_terminations_carry_runner_detail() {
        for state in [JobState::Failed, JobState::Canceled, JobState::Stopped] {
            let runner = Arc::new(ScriptedRunner::reporting(state).with_detail("Traceback: worker OOM"));
            let h = Harness::with_runner(runner);
            let doc = h.invoice("SINV-0001");
            let ack = h.queue_committed(&doc, SubmissionAction::Submit);

            let outcome = h.queue.unlock_submission(ack.submission_id).unwrap();

            assert_eq!(
                outcome,
                ReconcileOutcome::Unlocked {
                    state: SubmissionState::Failed
                },
                "{state:?}"
            );
            assert_eq!(
                h.record(ack.submission_id).failure_detail(),
                Some("Traceback: worker OOM")
            );
            assert!(!h.is_locked(&doc));
        }
    }

    #[test]
    fn queued_job_is_left_alone() {
        let runner = Arc::new(ScriptedRunner::reporting(JobState::Queued));
        let h = Harness::with_runner(runner.clone());
        let doc = h.invoice("SINV-0001");
        let ack = h.queue_committed(&doc, SubmissionAction::Submit);

        let dispatched = runner.dispatched.lock().unwrap().clone();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].submission_id, ack.submission_id);
        assert_eq!(dispatched[0].document, doc);

        let outcome = h.queue.unlock_submission(ack.submission_id).unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::InFlight {
                job_state: JobState::Queued
            }
        );
        assert_eq!(h.record(ack.submission_id).state(), SubmissionState::Queued);
        assert!(h.is_locked(&doc));
    }

    #[test]
    fn finished_job_without_effect_is_failed() {
        let h = Harness::with_runner(Arc::new(ScriptedRunner::reporting(JobState::Finished)));
        let doc = h.invoice("SINV-0001");
        let ack = h.queue_committed(&doc, SubmissionAction::Submit);

        let outcome = h.queue.unlock_submission(ack.submission_id).unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Unlocked {
                state: SubmissionState::Failed
            }
        );
        assert!(h
            .record(ack.submission_id)
            .failure_detail()
            .unwrap()
            .contains("never took effect"));
    }

    #[test]
    fn finished_job_with_lost_status_write_is_repaired() {
        let h = Harness::with_runner(Arc::new(ScriptedRunner::reporting(JobState::Finished)));
        let doc = h.invoice("SINV-0001");
        let ack = h.queue_committed(&doc, SubmissionAction::Submit);
        // The worker applied the action and died before its status write.
        h.documents.submit(&doc, Some(ack.submission_id)).unwrap();

        let outcome = h.queue.unlock_submission(ack.submission_id).unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Unlocked {
                state: SubmissionState::Finished
            }
        );
        assert!(!h.is_locked(&doc));
    }

    #[test]
    fn handler_result_wins_over_later_reconcile() {
        let runner = Arc::new(ScriptedRunner::reporting(JobState::Running));
        let h = Harness::with_runner(runner.clone());
        let doc = h.invoice("SINV-0001");
        let ack = h.queue_committed(&doc, SubmissionAction::Submit);

        let handled = h
            .queue
            .execution_handler()
            .execute(ack.submission_id, doc.clone(), SubmissionAction::Submit, &Cancellation::new())
            .unwrap();
        *runner.state.lock().unwrap() = JobState::Finished;
        let reconciled = h.queue.unlock_submission(ack.submission_id).unwrap();

        assert_eq!(handled, ExecutionOutcome::Resolved(SubmissionState::Finished));
        assert_eq!(
            reconciled,
            ReconcileOutcome::AlreadyResolved {
                state: SubmissionState::Finished
            }
        );
        assert_eq!(reconciled.message(), None);
    }

    #[test]
    fn reconcile_first_then_handler_does_not_notify_twice() {
        let h = Harness::with_runner(Arc::new(ScriptedRunner::reporting(JobState::Finished)));
        let doc = h.invoice("SINV-0001");
        let ack = h.queue_committed(&doc, SubmissionAction::Submit);
        h.documents.submit(&doc, Some(ack.submission_id)).unwrap();

        let reconciled = h.queue.unlock_submission(ack.submission_id).unwrap();
        let handled = h
            .queue
            .execution_handler()
            .execute(ack.submission_id, doc.clone(), SubmissionAction::Submit, &Cancellation::new())
            .unwrap();

        assert_eq!(
            reconciled,
            ReconcileOutcome::Unlocked {
                state: SubmissionState::Finished
            }
        );
        assert_eq!(handled, ExecutionOutcome::AlreadyResolved(SubmissionState::Finished));
        assert!(h.notifier.alerts().is_empty());
    }

    #[test]
    fn concurrent_handler_and_reconcile_settle_on_finished() {
        for _ in 0..25 {
            let h = Harness::with_runner(Arc::new(ScriptedRunner::reporting(JobState::Finished)));
            let doc = h.invoice("SINV-0001");
            let ack = h.queue_committed(&doc, SubmissionAction::Submit);
            h.documents.submit(&doc, Some(ack.submission_id)).unwrap();

            let handler = h.queue.execution_handler();
            std::thread::scope(|s| {
                s.spawn(|| {
                    handler
                        .execute(ack.submission_id, doc.clone(), SubmissionAction::Submit, &Cancellation::new())
                        .unwrap()
                });
                s.spawn(|| h.queue.unlock_submission(ack.submission_id).unwrap());
            });

            assert_eq!(h.record(ack.submission_id).state(), SubmissionState::Finished);
            assert!(!h.is_locked(&doc));
        }
    }

    #[test]
    fn notifier_failure_does_not_change_outcome() {
        let h = Harness::build(None, InMemoryNotifier::failing(), SubmissionQueueConfig::default());
        let doc = h.invoice("SINV-0001");

        let ack = h.queue_committed(&doc, SubmissionAction::Submit);
        h.executor().run_until_idle().unwrap();

        assert_eq!(h.record(ack.submission_id).state(), SubmissionState::Finished);
        assert!(!h.is_locked(&doc));
    }

    #[test]
    fn persisted_notification_needs_a_contact_address() {
        let h = Harness::new();
        let doc = h.invoice("SINV-0001");
        let id = h.insert_record(
            &doc,
            SubmissionAction::Submit,
            UserId::new(),
            chrono::Duration::minutes(5),
        );
        h.documents.lock(&doc.reference, id).unwrap();

        let outcome = h
            .queue
            .execution_handler()
            .execute(id, doc.clone(), SubmissionAction::Submit, &Cancellation::new())
            .unwrap();

        assert_eq!(outcome, ExecutionOutcome::Resolved(SubmissionState::Finished));
        assert!(h.notifier.notifications().is_empty());
        assert!(h.notifier.alerts().is_empty());
    }

    #[test]
    fn missing_record_is_a_no_op() {
        let h = Harness::new();
        let doc = h.invoice("SINV-0001");

        let outcome = h
            .queue
            .execution_handler()
            .execute(SubmissionId::new(), doc.clone(), SubmissionAction::Submit, &Cancellation::new())
            .unwrap();

        assert_eq!(outcome, ExecutionOutcome::Missing);
        assert_eq!(h.docstatus(&doc), DocStatus::Draft);
    }

    #[test]
    fn timed_out_job_is_stopped_and_reconciled() {
        let config = SubmissionQueueConfig::default().with_job_timeout(Duration::from_millis(50));
        let h = Harness::build(None, InMemoryNotifier::new(), config);
        let doc = h.invoice("SINV-0001");
        h.documents.add_validator(INVOICE, |_doc, _action| {
            std::thread::sleep(Duration::from_millis(500));
            Ok(())
        });

        let ack = h.queue_committed(&doc, SubmissionAction::Submit);
        assert!(h.executor().run_next().unwrap());

        let job_id = h.record(ack.submission_id).job_id().unwrap();
        assert!(matches!(
            h.jobs.get(job_id).unwrap().unwrap().status,
            JobStatus::Stopped { .. }
        ));

        let outcome = h.queue.unlock_submission(ack.submission_id).unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Unlocked {
                state: SubmissionState::Failed
            }
        );
        assert!(h
            .record(ack.submission_id)
            .failure_detail()
            .unwrap()
            .contains("timeout"));
        assert!(!h.is_locked(&doc));

        // The abandoned attempt wakes up after the record was failed and
        // the document released; it must not change the document.
        std::thread::sleep(Duration::from_secs(1));
        let record = h.record(ack.submission_id);
        assert_eq!(record.state(), SubmissionState::Failed);
        assert!(record.failure_detail().unwrap().contains("timeout"));
        assert_eq!(h.docstatus(&doc), DocStatus::Draft);
        assert!(!h.is_locked(&doc));
        assert!(h
            .notifier
            .alerts()
            .iter()
            .all(|alert| alert.indicator != Indicator::Green));
    }

    #[test]
    fn cancelled_attempt_leaves_the_document_untouched() {
        let h = Harness::new();
        let doc = h.invoice("SINV-0001");
        let id = h.stale_submission(&doc, SubmissionAction::Submit, chrono::Duration::seconds(1));
        let cancellation = Cancellation::new();
        cancellation.cancel();

        let outcome = h
            .queue
            .execution_handler()
            .execute(id, doc.clone(), SubmissionAction::Submit, &cancellation)
            .unwrap();

        assert_eq!(outcome, ExecutionOutcome::Abandoned);
        assert_eq!(h.record(id).state(), SubmissionState::Queued);
        assert_eq!(h.docstatus(&doc), DocStatus::Draft);
        assert!(h.is_locked(&doc));
        assert!(h.notifier.alerts().is_empty());
    }

    #[test]
    fn reconcile_during_execution_blocks_the_action() {
        // No job id is ever recorded, so the reconciler can fail the record
        // while the handler is still validating.
        let h = Harness::with_runner(Arc::new(ScriptedRunner::rejecting()));
        let doc = h.invoice("SINV-0001");
        let ack = h.queue_committed(&doc, SubmissionAction::Submit);
        let id = ack.submission_id;

        let reconciled = Arc::new(Mutex::new(None));
        let queue = h.queue.clone();
        let seen = reconciled.clone();
        h.documents.add_validator(INVOICE, move |_doc, _action| {
            let mut seen = seen.lock().unwrap();
            if seen.is_none() {
                *seen = Some(queue.unlock_submission(id).unwrap());
            }
            Ok(())
        });

        let outcome = h
            .queue
            .execution_handler()
            .execute(id, doc.clone(), SubmissionAction::Submit, &Cancellation::new())
            .unwrap();

        assert_eq!(
            *reconciled.lock().unwrap(),
            Some(ReconcileOutcome::Unlocked {
                state: SubmissionState::Failed
            })
        );
        assert_eq!(outcome, ExecutionOutcome::AlreadyResolved(SubmissionState::Failed));
        assert_eq!(h.record(id).state(), SubmissionState::Failed);
        assert_eq!(h.docstatus(&doc), DocStatus::Draft);
        assert!(!h.is_locked(&doc));
        assert!(h.notifier.alerts().is_empty());
    }

    #[test]
    fn stopped_job_whose_action_took_effect_is_finished() {
        let h = Harness::with_runner(Arc::new(ScriptedRunner::reporting(JobState::Stopped)));
        let doc = h.invoice("SINV-0001");
        let ack = h.queue_committed(&doc, SubmissionAction::Submit);
        h.documents.submit(&doc, Some(ack.submission_id)).unwrap();

        let outcome = h.queue.unlock_submission(ack.submission_id).unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Unlocked {
                state: SubmissionState::Finished
            }
        );
        assert_eq!(h.record(ack.submission_id).failure_detail(), None);
        assert!(!h.is_locked(&doc));
    }

    #[test]
    fn latest_submissions_track_most_recent_and_failed() {
        let h = Harness::new();
        let doc = h.invoice("SINV-0001");
        let failed = h.insert_record(&doc, SubmissionAction::Submit, h.actor, chrono::Duration::minutes(10));
        let latest = h.insert_record(&doc, SubmissionAction::Submit, h.actor, chrono::Duration::minutes(1));
        h.submissions
            .resolve(failed, docflow_submission::Outcome::failed("boom"), Utc::now())
            .unwrap();

        let found = h.queue.latest_submissions(&doc.reference).unwrap();

        assert_eq!(found.latest_submission, Some(latest));
        assert_eq!(found.latest_failed_submission, Some(failed));
    }

    #[test]
    fn old_records_are_purged_by_retention() {
        let config = SubmissionQueueConfig::default().with_retention_days(30);
        let h = Harness::build(None, InMemoryNotifier::new(), config);
        let doc = h.invoice("SINV-0001");
        let old = h.insert_record(&doc, SubmissionAction::Submit, h.actor, chrono::Duration::days(45));
        let recent = h.insert_record(&doc, SubmissionAction::Submit, h.actor, chrono::Duration::days(3));

        assert_eq!(h.queue.clear_old_records().unwrap(), 1);
        assert!(h.queue.get(old).unwrap().is_none());
        assert!(h.queue.get(recent).unwrap().is_some());
    }

    #[test]
    fn retention_beyond_the_calendar_purges_nothing() {
        let config = SubmissionQueueConfig::default().with_retention_days(u32::MAX);
        let h = Harness::build(None, InMemoryNotifier::new(), config);
        let doc = h.invoice("SINV-0001");
        let old = h.insert_record(&doc, SubmissionAction::Submit, h.actor, chrono::Duration::days(400));

        assert_eq!(h.queue.purge_records_older_than(u32::MAX).unwrap(), 0);
        assert_eq!(h.queue.clear_old_records().unwrap(), 0);
        assert!(h.queue.get(old).unwrap().is_some());
    }

    #[test]
    fn spawned_worker_processes_queued_submissions() {
        let h = Harness::new();
        let doc = h.invoice("SINV-0001");
        let handle = h
            .executor()
            .spawn(JobExecutorConfig::default().with_poll_interval(Duration::from_millis(5)))
            .unwrap();

        let ack = h.queue_committed(&doc, SubmissionAction::Submit);

        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline && h.record(ack.submission_id).state() == SubmissionState::Queued {
            std::thread::sleep(Duration::from_millis(5));
        }
        handle.shutdown();

        assert_eq!(h.record(ack.submission_id).state(), SubmissionState::Finished);
        assert_eq!(h.docstatus(&doc), DocStatus::Submitted);
    }

    fn abnormal_or_finished() -> impl Strategy<Value = JobState> {
        prop_oneof![
            Just(JobState::Unknown),
            Just(JobState::Failed),
            Just(JobState::Canceled),
            Just(JobState::Stopped),
            Just(JobState::Finished),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn repeated_execution_applies_action_once(cancel in any::<bool>(), repeats in 1usize..5) {
            let h = Harness::new();
            let (doc, action) = if cancel {
                (h.submitted_invoice("SINV-0001"), SubmissionAction::Cancel)
            } else {
                (h.invoice("SINV-0001"), SubmissionAction::Submit)
            };
            let calls = counting_validator(&h.documents, INVOICE);
            let ack = h.queue_committed(&doc, action);
            let handler = h.queue.execution_handler();

            let outcomes: Vec<_> = (0..repeats)
                .map(|_| handler.execute(ack.submission_id, doc.clone(), action, &Cancellation::new()).unwrap())
                .collect();

            prop_assert_eq!(calls.load(Ordering::SeqCst), 1);
            prop_assert_eq!(outcomes[0], ExecutionOutcome::Resolved(SubmissionState::Finished));
            for outcome in &outcomes[1..] {
                prop_assert_eq!(*outcome, ExecutionOutcome::AlreadyResolved(SubmissionState::Finished));
            }
            prop_assert_eq!(h.notifier.alerts().len(), 1);
        }

        #[test]
        fn reconcile_converges_after_first_call(
            job_state in abnormal_or_finished(),
            applied in any::<bool>(),
            repeats in 2usize..5,
        ) {
            let h = Harness::with_runner(Arc::new(ScriptedRunner::reporting(job_state)));
            let doc = h.invoice("SINV-0001");
            let ack = h.queue_committed(&doc, SubmissionAction::Submit);
            if applied {
                h.documents.submit(&doc, Some(ack.submission_id)).unwrap();
            }
            let expected = if applied {
                SubmissionState::Finished
            } else {
                SubmissionState::Failed
            };

            let first = h.queue.unlock_submission(ack.submission_id).unwrap();
            prop_assert_eq!(first, ReconcileOutcome::Unlocked { state: expected });
            let settled = h.record(ack.submission_id);

            for _ in 1..repeats {
                let again = h.queue.unlock_submission(ack.submission_id).unwrap();
                prop_assert_eq!(again, ReconcileOutcome::AlreadyResolved { state: expected });
                prop_assert_eq!(&h.record(ack.submission_id), &settled);
            }
            prop_assert!(!h.is_locked(&doc));
            prop_assert_eq!(settled.ended_at().is_some(), settled.state().is_terminal());
        }
    }
}
