//! Requested submission actions.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use docflow_core::DomainError;

use crate::document::DocStatus;

/// Action requested at the boundary.
///
/// Parsing is case-insensitive. `Update` shares the submit execution path and is
/// resolved by [`SubmissionAction::normalize`] before anything runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionAction {
    Submit,
    Cancel,
    Update,
}

impl SubmissionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionAction::Submit => "submit",
            SubmissionAction::Cancel => "cancel",
            SubmissionAction::Update => "update",
        }
    }

    /// Resolve the input alias into the operation that actually runs.
    pub fn normalize(self) -> DocumentAction {
        match self {
            SubmissionAction::Submit | SubmissionAction::Update => DocumentAction::Submit,
            SubmissionAction::Cancel => DocumentAction::Cancel,
        }
    }
}

impl core::fmt::Display for SubmissionAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "submit" => Ok(SubmissionAction::Submit),
            "cancel" => Ok(SubmissionAction::Cancel),
            "update" => Ok(SubmissionAction::Update),
            other => Err(DomainError::validation(format!(
                "unsupported submission action '{other}' (expected submit, cancel or update)"
            ))),
        }
    }
}

/// Operation executed against the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentAction {
    Submit,
    Cancel,
}

impl DocumentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentAction::Submit => "submit",
            DocumentAction::Cancel => "cancel",
        }
    }

    /// Status the document must be in for the action to be legal.
    pub fn required_status(&self) -> DocStatus {
        match self {
            DocumentAction::Submit => DocStatus::Draft,
            DocumentAction::Cancel => DocStatus::Submitted,
        }
    }

    /// Status the document ends up in once the action took effect.
    pub fn target_status(&self) -> DocStatus {
        match self {
            DocumentAction::Submit => DocStatus::Submitted,
            DocumentAction::Cancel => DocStatus::Cancelled,
        }
    }
}

impl core::fmt::Display for DocumentAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
