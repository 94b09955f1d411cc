//! Notifier adapter.
//!
//! Delivery itself belongs to an external collaborator behind [`Notifier`].
//! This module decides *what* to tell the initiating user and *how*: a
//! realtime alert while they are likely still watching, otherwise a persisted
//! notification addressed to their e-mail.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use docflow_core::UserId;

use crate::action::SubmissionAction;
use crate::record::{SubmissionRecord, SubmissionState, SUBMISSION_DOCTYPE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Indicator {
    Green,
    Red,
}

/// Ephemeral alert pushed to a connected user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeAlert {
    pub user: UserId,
    pub message: String,
    pub link: String,
    pub indicator: Indicator,
}

/// Persisted notification, shown on the user's next visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationLog {
    /// Always `"Alert"` for submission outcomes.
    pub kind: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub document_type: String,
    pub document_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Notification delivery capability.
pub trait Notifier: Send + Sync {
    fn publish_realtime(&self, alert: RealtimeAlert) -> Result<(), NotifyError>;

    fn create_notification(&self, notification: NotificationLog) -> Result<(), NotifyError>;
}

/// Resolves a user to the contact address used for persisted notifications.
pub trait UserDirectory: Send + Sync {
    fn contact_email(&self, user: UserId) -> Option<String>;
}

/// Which channel a notification went out on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Realtime,
    Persisted,
}

/// Message and target for one submission outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationContent {
    pub message: String,
    pub target_doctype: String,
    pub target_name: String,
    pub indicator: Indicator,
}

impl NotificationContent {
    pub fn link(&self) -> String {
        desk_link(&self.target_doctype, &self.target_name)
    }
}

/// Desk route for a document: `/app/{doctype-slug}/{name}`.
pub fn desk_link(doctype: &str, name: &str) -> String {
    format!("/app/{}/{}", doctype.to_lowercase().replace(' ', "-"), name)
}

/// Build the message for a terminal outcome.
///
/// Failures point at the submission record (where the traceback lives),
/// successes at the document itself.
pub fn compose(
    record: &SubmissionRecord,
    state: SubmissionState,
    action: SubmissionAction,
) -> NotificationContent {
    let reference = record.reference();
    let (target_doctype, target_name, verdict, indicator) = if state == SubmissionState::Failed {
        (
            SUBMISSION_DOCTYPE.to_string(),
            record.id_typed().to_string(),
            "failed",
            Indicator::Red,
        )
    } else {
        (
            reference.doctype.clone(),
            reference.name.clone(),
            "completed successfully",
            Indicator::Green,
        )
    };

    NotificationContent {
        message: format!(
            "Submission of {} {} with action {} {}",
            reference.doctype, reference.name, action, verdict
        ),
        target_doctype,
        target_name,
        indicator,
    }
}

/// Realtime while the record is at most `window` old (whole seconds), persisted after.
pub fn choose_channel(elapsed: chrono::Duration, window: Duration) -> Channel {
    let window_secs = i64::try_from(window.as_secs()).unwrap_or(i64::MAX);
    if elapsed.num_seconds() <= window_secs {
        Channel::Realtime
    } else {
        Channel::Persisted
    }
}

/// Best-effort notification of submission outcomes.
#[derive(Clone)]
pub struct SubmissionNotifier {
    notifier: Arc<dyn Notifier>,
    users: Arc<dyn UserDirectory>,
    realtime_window: Duration,
}

impl core::fmt::Debug for SubmissionNotifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SubmissionNotifier")
            .field("realtime_window", &self.realtime_window)
            .finish_non_exhaustive()
    }
}

impl SubmissionNotifier {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        users: Arc<dyn UserDirectory>,
        realtime_window: Duration,
    ) -> Self {
        Self {
            notifier,
            users,
            realtime_window,
        }
    }

    /// Tell the initiating user about a terminal outcome.
    ///
    /// Never fails: delivery problems are logged and swallowed. Returns the
    /// channel used, or `None` when nothing was delivered.
    pub fn notify(
        &self,
        record: &SubmissionRecord,
        state: SubmissionState,
        action: SubmissionAction,
        now: DateTime<Utc>,
    ) -> Option<Channel> {
        let content = compose(record, state, action);
        let channel = choose_channel(record.elapsed(now), self.realtime_window);

        let result = match channel {
            Channel::Realtime => self.notifier.publish_realtime(RealtimeAlert {
                user: record.enqueued_by(),
                link: content.link(),
                message: content.message,
                indicator: content.indicator,
            }),
            Channel::Persisted => {
                let Some(email) = self.users.contact_email(record.enqueued_by()) else {
                    warn!(
                        submission_id = %record.id_typed(),
                        user = %record.enqueued_by(),
                        "no contact address for user; skipping notification"
                    );
                    return None;
                };
                self.notifier.create_notification(NotificationLog {
                    kind: "Alert".to_string(),
                    recipients: vec![email],
                    subject: content.message,
                    document_type: content.target_doctype,
                    document_name: content.target_name,
                })
            }
        };

        match result {
            Ok(()) => {
                debug!(submission_id = %record.id_typed(), ?channel, %state, "submission notification sent");
                Some(channel)
            }
            Err(e) => {
                warn!(submission_id = %record.id_typed(), error = %e, "submission notification failed");
                None
            }
        }
    }
}
