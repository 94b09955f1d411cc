//! Notification delivery and user directory adapters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::info;

use docflow_core::UserId;
use docflow_submission::{NotificationLog, Notifier, NotifyError, RealtimeAlert, UserDirectory};

/// Records every delivery; optionally fails them all.
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    alerts: Mutex<Vec<RealtimeAlert>>,
    notifications: Mutex<Vec<NotificationLog>>,
    failing: bool,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// A notifier whose deliveries always fail.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn alerts(&self) -> Vec<RealtimeAlert> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn notifications(&self) -> Vec<NotificationLog> {
        self.notifications.lock().map(|n| n.clone()).unwrap_or_default()
    }

    fn check(&self) -> Result<(), NotifyError> {
        if self.failing {
            Err(NotifyError::Delivery("notification channel down".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Notifier for InMemoryNotifier {
    fn publish_realtime(&self, alert: RealtimeAlert) -> Result<(), NotifyError> {
        self.check()?;
        self.alerts
            .lock()
            .map_err(|_| NotifyError::Delivery("alert log poisoned".to_string()))?
            .push(alert);
        Ok(())
    }

    fn create_notification(&self, notification: NotificationLog) -> Result<(), NotifyError> {
        self.check()?;
        self.notifications
            .lock()
            .map_err(|_| NotifyError::Delivery("notification log poisoned".to_string()))?
            .push(notification);
        Ok(())
    }
}

/// Writes notifications to the log. Used by the worker binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

impl Notifier for LoggingNotifier {
    fn publish_realtime(&self, alert: RealtimeAlert) -> Result<(), NotifyError> {
        info!(
            user = %alert.user,
            indicator = ?alert.indicator,
            link = %alert.link,
            "{}",
            alert.message
        );
        Ok(())
    }

    fn create_notification(&self, notification: NotificationLog) -> Result<(), NotifyError> {
        info!(
            recipients = ?notification.recipients,
            document_type = %notification.document_type,
            document_name = %notification.document_name,
            "{}",
            notification.subject
        );
        Ok(())
    }
}

/// User directory backed by a map.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    emails: RwLock<HashMap<UserId, String>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, user: UserId, email: impl Into<String>) -> Self {
        self.insert(user, email);
        self
    }

    pub fn insert(&self, user: UserId, email: impl Into<String>) {
        if let Ok(mut emails) = self.emails.write() {
            emails.insert(user, email.into());
        }
    }
}

impl UserDirectory for InMemoryUserDirectory {
    fn contact_email(&self, user: UserId) -> Option<String> {
        self.emails.read().ok()?.get(&user).cloned()
    }
}
