//! Error Taxonomy
//!
//! Every user-visible failure from the router and the hardening modules
//! carries one of these `kind` tags. Internal glue code still uses
//! `anyhow::Result` (file IO, adapter plumbing) the way the teacher crate
//! does; this module is only the typed surface callers branch on.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PreconditionUnavailable,
    RateLimited,
    BudgetExceeded,
    ApprovalDenied,
    ApprovalTimeout,
    ModelUnavailable,
    AdapterTimeout,
    IntegrityFailed,
    EscalationBlocked,
    ConfigRefused,
    ConflictUnresolved,
    Offline,
    Fatal,
}

impl ErrorKind {
    /// Kinds that may be retried by the caller after `retry_after`.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited | ErrorKind::ModelUnavailable | ErrorKind::AdapterTimeout
        )
    }
}

#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct AgencyError {
    pub kind: ErrorKind,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl AgencyError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn precondition_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PreconditionUnavailable, message)
    }

    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::new(ErrorKind::RateLimited, "rate limit exceeded").with_retry_after(retry_after)
    }

    pub fn budget_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BudgetExceeded, message)
    }

    pub fn approval_denied(decider: impl Into<String>) -> Self {
        Self::new(ErrorKind::ApprovalDenied, format!("denied by {}", decider.into()))
    }

    pub fn approval_timeout() -> Self {
        Self::new(ErrorKind::ApprovalTimeout, "approval request expired")
    }

    pub fn model_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ModelUnavailable, message)
    }

    pub fn adapter_timeout() -> Self {
        Self::new(ErrorKind::AdapterTimeout, "adapter invocation timed out")
    }

    pub fn integrity_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IntegrityFailed, message)
    }

    pub fn escalation_blocked(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EscalationBlocked, message)
    }

    pub fn config_refused(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigRefused, message)
    }

    pub fn conflict_unresolved(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConflictUnresolved, message)
    }

    pub fn offline(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Offline, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }
}

pub type AgencyResult<T> = Result<T, AgencyError>;
