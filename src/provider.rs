//! History provider interface consumed by the executor.
//!
//! The durable backend owns persistence; the core only ever asks it for the
//! slice of history it is missing. Implementations live outside this crate
//! (and in `tests/common` for the in-memory test fixture).

use std::fmt;

use async_trait::async_trait;

use crate::{HistoryEvent, WorkflowInstance};

/// Read access to persisted workflow history.
#[async_trait]
pub trait WorkflowHistoryProvider: Send + Sync {
    /// Return events with sequence ids strictly greater than
    /// `after_sequence_id`, in order, for the instance.
    async fn history_since(
        &self,
        instance: &WorkflowInstance,
        after_sequence_id: i64,
    ) -> Result<Vec<HistoryEvent>, ProviderError>;
}

/// Provider failure with retry classification.
///
/// Retryable errors (connection loss, timeouts, busy storage) leave the
/// task unacked for redelivery; permanent errors (corrupt or missing
/// history) indicate a bug or data loss and should page someone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    /// Operation that failed (e.g. "history_since").
    pub operation: String,
    pub message: String,
    pub retryable: bool,
}

impl ProviderError {
    pub fn retryable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} ({})",
            self.operation,
            self.message,
            if self.retryable { "retryable" } else { "permanent" }
        )
    }
}

impl std::error::Error for ProviderError {}
