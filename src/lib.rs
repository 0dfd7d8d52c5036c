//! # Workloom: deterministic replay executor for durable workflows
//!
//! Workloom is the executor core of a durable workflow engine. It turns a
//! user-supplied workflow function — straight-line async code that awaits
//! activities, timers, sub-workflows, signals, and side effects — into an
//! ordered stream of durable history events, and reconstitutes the live
//! program state from a persisted history after a crash or a move to a
//! different worker.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use workloom::clock::SystemClock;
//! use workloom::registry::WorkflowRegistry;
//! use workloom::{Task, WorkflowExecutor, WorkflowInstance};
//!
//! # async fn example(provider: Arc<dyn workloom::provider::WorkflowHistoryProvider>, task: Task) -> Result<(), Box<dyn std::error::Error>> {
//! // 1. Register workflow functions (coordination logic)
//! let registry = WorkflowRegistry::builder()
//!     .register("Greet", |ctx, inputs| async move {
//!         let name = inputs.first().cloned().unwrap_or_default();
//!         let greeting = ctx.schedule_activity("MakeGreeting", vec![name]).await?;
//!         Ok(greeting)
//!     })
//!     .build();
//!
//! // 2. Create an executor for one workflow instance
//! let instance = WorkflowInstance::new("inst-1", "exec-1");
//! let mut executor = WorkflowExecutor::new(registry, provider, instance, Arc::new(SystemClock));
//!
//! // 3. Drive it with tasks delivered by the backend
//! let result = executor.execute_task(task).await?;
//! // result.executed is the new history tail; result.activity_events goes to
//! // activity workers; result.workflow_events are cross-instance messages.
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Concepts
//!
//! - **Turn**: one [`WorkflowExecutor::execute_task`] call drives the
//!   workflow from one blocked state to the next.
//! - **Commands**: user code issues intents (schedule activity, create
//!   timer, ...) that are translated into history events at the end of a
//!   turn.
//! - **Deterministic replay**: on a cold start the executor re-runs the
//!   workflow function against persisted history. Replay re-establishes
//!   futures and the command log silently — no external effects are
//!   produced, and every re-issued command must match the recorded event
//!   stream or the workflow fails with a determinism error.
//! - **Futures**: every blocking primitive hands back a one-shot future
//!   resolved by a later history event (`ActivityCompleted`, `TimerFired`,
//!   ...), correlated through a schedule event id that is stable across
//!   replays.
//!
//! ## What lives where
//!
//! The executor core deliberately excludes the durable backend, the
//! activity worker pool, and the transport. It consumes
//! [`provider::WorkflowHistoryProvider`] to fetch missing history and an
//! injected [`clock::Clock`] for timestamps, and it emits an
//! [`ExecutionResult`] per task for the backend to persist and route.

// Mutex poisoning indicates a panic on the single logical workflow thread,
// which corrupts workflow state. Lock expect()s in this crate are intentional.
#![allow(clippy::expect_used)]

use serde::{Deserialize, Serialize};

pub mod clock;
pub mod command;
pub mod context;
mod dispatcher;
pub mod error;
pub mod executor;
pub mod futures;
pub mod provider;
pub mod registry;
mod scheduler;
mod state;

pub use command::{Command, CommandKind, CommandState};
pub use context::WorkflowContext;
pub use error::{DeterminismError, ExecutorError};
pub use executor::{ExecutionResult, Task, WorkflowEvent, WorkflowExecutor};
pub use registry::{WorkflowHandler, WorkflowRegistry, WorkflowRegistryBuilder};

/// Opaque serialized payload exchanged with activities, workflows, and
/// signals. The core does not interpret payloads; typed registration uses
/// the internal JSON codec.
pub type Payload = String;

// Internal codec utilities for typed I/O (kept private; public API remains ergonomic)
pub(crate) mod typed_codec {
    use serde::{de::DeserializeOwned, Serialize};
    use serde_json::Value;

    pub fn encode<T: Serialize>(v: &T) -> Result<String, String> {
        // If the value is a JSON string, return raw content to keep payloads readable
        match serde_json::to_value(v) {
            Ok(Value::String(s)) => Ok(s),
            Ok(val) => serde_json::to_string(&val).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn decode<T: DeserializeOwned>(s: &str) -> Result<T, String> {
        match serde_json::from_str::<T>(s) {
            Ok(v) => Ok(v),
            Err(_) => {
                // Fallback: treat raw string as JSON string value
                let val = Value::String(s.to_string());
                serde_json::from_value(val).map_err(|e| e.to_string())
            }
        }
    }
}

/// Identity of one live workflow execution.
///
/// `instance_id` is stable across retries of the same logical workflow;
/// `execution_id` distinguishes re-runs under the same logical id. For
/// sub-workflows, the parent linkage routes completion events back to the
/// parent instance with the schedule event id the parent assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub instance_id: String,
    pub execution_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_schedule_event_id: Option<u64>,
}

impl WorkflowInstance {
    pub fn new(instance_id: impl Into<String>, execution_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            execution_id: execution_id.into(),
            parent_instance_id: None,
            parent_schedule_event_id: None,
        }
    }

    /// Create the identity of a child workflow linked back to its parent.
    pub fn sub_workflow(
        instance_id: impl Into<String>,
        execution_id: impl Into<String>,
        parent_instance_id: impl Into<String>,
        parent_schedule_event_id: u64,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            execution_id: execution_id.into(),
            parent_instance_id: Some(parent_instance_id.into()),
            parent_schedule_event_id: Some(parent_schedule_event_id),
        }
    }

    /// Whether this instance was started by a parent workflow.
    pub fn is_sub_workflow(&self) -> bool {
        self.parent_instance_id.is_some()
    }
}

/// Append-only history entry persisted by the backend and consumed during
/// replay.
///
/// `sequence_id` is the position in the instance's history, assigned by the
/// executor at emission time (0 until assigned). `schedule_event_id` links a
/// completion event to the command that scheduled the work; it is 0 for
/// lifecycle events. `visible_at_ms` asks the backend to delay redelivery of
/// the event until the given wall-clock time (used for timer firings).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub id: String,
    pub sequence_id: i64,
    pub timestamp_ms: u64,
    #[serde(default)]
    pub schedule_event_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_at_ms: Option<u64>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl HistoryEvent {
    /// Create a pending event stamped with the current wall clock. The
    /// sequence id is 0 until the executor assigns one at emission.
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sequence_id: 0,
            timestamp_ms: clock::wall_clock_ms(),
            schedule_event_id: 0,
            visible_at_ms: None,
            kind,
        }
    }

    pub fn with_schedule_event_id(mut self, schedule_event_id: u64) -> Self {
        self.schedule_event_id = schedule_event_id;
        self
    }

    pub fn with_timestamp_ms(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    pub fn with_visible_at_ms(mut self, visible_at_ms: u64) -> Self {
        self.visible_at_ms = Some(visible_at_ms);
        self
    }

    /// Whether this event ends the workflow execution.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::WorkflowExecutionFinished { .. })
    }
}

/// Event-specific payloads. The set is closed: every durable effect the
/// executor can produce or consume is one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    /// Workflow instance was started by name with input payloads.
    WorkflowExecutionStarted { name: String, inputs: Vec<Payload> },

    /// Workflow reached a terminal state with a result or an error.
    WorkflowExecutionFinished {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Payload>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Cancellation was requested for this instance.
    WorkflowExecutionCanceled,

    /// A worker picked up a task for this instance; advances workflow time.
    WorkflowTaskStarted,

    /// Activity was scheduled.
    ActivityScheduled { name: String, inputs: Vec<Payload> },

    /// Activity completed successfully with a result.
    ActivityCompleted { result: Payload },

    /// Activity failed.
    ActivityFailed { reason: String },

    /// Timer was created and will logically fire at `fire_at_ms`.
    TimerScheduled { fire_at_ms: u64 },

    /// Timer fired.
    TimerFired { fire_at_ms: u64 },

    /// Timer was canceled before (or racing with) its firing.
    TimerCanceled,

    /// An external signal was delivered to the instance.
    SignalReceived { name: String, arg: Payload },

    /// Recorded result of a side effect, computed once in live mode.
    SideEffectResult { result: Payload },

    /// Sub-workflow was scheduled with the assigned child instance id.
    SubWorkflowScheduled {
        name: String,
        instance_id: String,
        inputs: Vec<Payload>,
    },

    /// Cancellation of a child workflow was requested.
    SubWorkflowCancellationRequested { instance_id: String },

    /// Sub-workflow completed and returned a result to the parent.
    SubWorkflowCompleted { result: Payload },

    /// Sub-workflow failed and returned an error to the parent.
    SubWorkflowFailed { error: String },
}

impl EventKind {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::WorkflowExecutionStarted { .. } => "WorkflowExecutionStarted",
            EventKind::WorkflowExecutionFinished { .. } => "WorkflowExecutionFinished",
            EventKind::WorkflowExecutionCanceled => "WorkflowExecutionCanceled",
            EventKind::WorkflowTaskStarted => "WorkflowTaskStarted",
            EventKind::ActivityScheduled { .. } => "ActivityScheduled",
            EventKind::ActivityCompleted { .. } => "ActivityCompleted",
            EventKind::ActivityFailed { .. } => "ActivityFailed",
            EventKind::TimerScheduled { .. } => "TimerScheduled",
            EventKind::TimerFired { .. } => "TimerFired",
            EventKind::TimerCanceled => "TimerCanceled",
            EventKind::SignalReceived { .. } => "SignalReceived",
            EventKind::SideEffectResult { .. } => "SideEffectResult",
            EventKind::SubWorkflowScheduled { .. } => "SubWorkflowScheduled",
            EventKind::SubWorkflowCancellationRequested { .. } => "SubWorkflowCancellationRequested",
            EventKind::SubWorkflowCompleted { .. } => "SubWorkflowCompleted",
            EventKind::SubWorkflowFailed { .. } => "SubWorkflowFailed",
        }
    }
}
