//! Error types for the executor core.
//!
//! Three classes of failure flow through the executor, each with its own
//! propagation rule:
//!
//! - **Transport errors** ([`ExecutorError`]) are returned from
//!   `execute_task`; the task is not acked and the backend redelivers it.
//! - **Determinism errors** ([`DeterminismError`]) mean the workflow code
//!   changed or is nondeterministic. Retrying cannot help, so the executor
//!   completes the workflow with the error and reports the task successful.
//! - **User workflow errors** are plain `Result::Err` values from the
//!   workflow function; they terminate the workflow through the normal
//!   completion path and never surface here.

use std::fmt;

use crate::provider::ProviderError;

/// A mismatch between the commands replayed workflow code issues and the
/// events recorded in history, or a resolution event with nothing to
/// resolve. Fatal for the workflow, not for the task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeterminismError {
    /// `WorkflowExecutionStarted` named a workflow the registry does not know.
    WorkflowNotRegistered { name: String },
    /// A scheduling event arrived with no matching pending command.
    MissingCommand {
        schedule_event_id: u64,
        event: &'static str,
    },
    /// The pending command under this schedule event id has the wrong type.
    CommandTypeMismatch {
        schedule_event_id: u64,
        expected: &'static str,
        found: &'static str,
    },
    /// The command matched by type but scheduled a different target.
    NameMismatch {
        schedule_event_id: u64,
        expected: String,
        found: String,
    },
    /// A completion event arrived with no registered future to resolve.
    MissingFuture {
        schedule_event_id: u64,
        event: &'static str,
    },
}

impl fmt::Display for DeterminismError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeterminismError::WorkflowNotRegistered { name } => {
                write!(f, "workflow {name} not found in registry")
            }
            DeterminismError::MissingCommand {
                schedule_event_id,
                event,
            } => write!(
                f,
                "nondeterministic: no pending command for {event} (schedule_event_id={schedule_event_id})"
            ),
            DeterminismError::CommandTypeMismatch {
                schedule_event_id,
                expected,
                found,
            } => write!(
                f,
                "nondeterministic: history has {expected} but replay issued {found} (schedule_event_id={schedule_event_id})"
            ),
            DeterminismError::NameMismatch {
                schedule_event_id,
                expected,
                found,
            } => write!(
                f,
                "nondeterministic: history scheduled '{expected}' but replay scheduled '{found}' (schedule_event_id={schedule_event_id})"
            ),
            DeterminismError::MissingFuture {
                schedule_event_id,
                event,
            } => write!(
                f,
                "no pending future for {event} (schedule_event_id={schedule_event_id})"
            ),
        }
    }
}

impl std::error::Error for DeterminismError {}

/// Failure of an `execute_task` call itself. The task is not acked; the
/// backend will redeliver it.
#[derive(Debug)]
pub enum ExecutorError {
    /// The history provider failed; retryable per its classification.
    History(ProviderError),
    /// The backend delivered a task older than the executor's state.
    StaleTask {
        task_sequence_id: i64,
        state_sequence_id: i64,
    },
    /// Even after fetching and replaying history the executor state does
    /// not line up with the task.
    ReplayDivergence {
        task_sequence_id: i64,
        state_sequence_id: i64,
    },
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorError::History(e) => write!(f, "getting workflow history: {e}"),
            ExecutorError::StaleTask {
                task_sequence_id,
                state_sequence_id,
            } => write!(
                f,
                "task has older history ({task_sequence_id}) than current state ({state_sequence_id}), cannot execute"
            ),
            ExecutorError::ReplayDivergence {
                task_sequence_id,
                state_sequence_id,
            } => write!(
                f,
                "executor state ({state_sequence_id}) does not match task ({task_sequence_id}) after replaying history"
            ),
        }
    }
}

impl std::error::Error for ExecutorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExecutorError::History(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ProviderError> for ExecutorError {
    fn from(e: ProviderError) -> Self {
        ExecutorError::History(e)
    }
}
