//! User-facing workflow context for scheduling durable work.
//!
//! Workflow code receives a `WorkflowContext` and calls the `schedule_*`
//! primitives to issue commands. Each primitive allocates a schedule event
//! id, appends a pending command, registers a one-shot future, and returns
//! that future — awaiting it is the workflow's only suspension point.
//!
//! All primitives behave identically in live and replay mode except side
//! effects (short-circuited to the recorded result during replay) and the
//! trace helpers (silent during replay).

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::command::{Command, CommandKind};
use crate::futures::{ActivityFuture, SideEffectFuture, SignalFuture, SubWorkflowFuture, TimerFuture};
use crate::state::WorkflowState;
use crate::Payload;

#[derive(Clone)]
pub struct WorkflowContext {
    pub(crate) state: Arc<Mutex<WorkflowState>>,
    pub(crate) cancel: CancellationToken,
}

impl WorkflowContext {
    pub(crate) fn new(state: Arc<Mutex<WorkflowState>>, cancel: CancellationToken) -> Self {
        Self { state, cancel }
    }

    fn state(&self) -> MutexGuard<'_, WorkflowState> {
        self.state.lock().expect("workflow state mutex poisoned")
    }

    /// Schedule an activity and await its result.
    pub fn schedule_activity(&self, name: impl Into<String>, inputs: Vec<Payload>) -> ActivityFuture {
        let mut state = self.state();
        let id = state.next_schedule_event_id();
        state.add_command(Command::new(
            id,
            CommandKind::ScheduleActivity {
                name: name.into(),
                inputs,
            },
        ));
        let slot = state.register_future(id);
        ActivityFuture {
            slot,
            cancel: self.cancel.clone(),
            schedule_event_id: id,
        }
    }

    /// Schedule an activity with a typed input, decoding the typed result.
    pub async fn schedule_activity_typed<In, Out>(
        &self,
        name: impl Into<String>,
        input: &In,
    ) -> Result<Out, String>
    where
        In: serde::Serialize,
        Out: serde::de::DeserializeOwned,
    {
        let payload = crate::typed_codec::encode(input)?;
        let result = self.schedule_activity(name, vec![payload]).await?;
        crate::typed_codec::decode(&result)
    }

    /// Create a timer firing after `delay`, measured in workflow time.
    pub fn schedule_timer(&self, delay: Duration) -> TimerFuture {
        let mut state = self.state();
        let id = state.next_schedule_event_id();
        let fire_at_ms = state.now_ms().saturating_add(delay.as_millis() as u64);
        state.add_command(Command::new(id, CommandKind::ScheduleTimer { fire_at_ms }));
        let slot = state.register_future(id);
        TimerFuture {
            slot,
            cancel: self.cancel.clone(),
            schedule_event_id: id,
        }
    }

    /// Request cancellation of a previously scheduled timer. The timer's
    /// future resolves when the cancellation event is delivered back; a
    /// firing racing with the cancellation is silently ignored.
    pub fn cancel_timer(&self, timer_schedule_event_id: u64) {
        let mut state = self.state();
        let id = state.next_schedule_event_id();
        state.add_command(Command::new(
            id,
            CommandKind::CancelTimer {
                timer_schedule_event_id,
            },
        ));
    }

    /// Schedule a sub-workflow and await its result.
    pub fn schedule_sub_workflow(&self, name: impl Into<String>, inputs: Vec<Payload>) -> SubWorkflowFuture {
        let mut state = self.state();
        let id = state.next_schedule_event_id();
        // Provisional child id; replay stamps the backend-assigned id over it
        // when the scheduling event is applied.
        let instance_id = uuid::Uuid::new_v4().to_string();
        let handle = Arc::new(Mutex::new(instance_id.clone()));
        state.register_child_instance(id, handle.clone());
        state.add_command(Command::new(
            id,
            CommandKind::ScheduleSubWorkflow {
                name: name.into(),
                instance_id,
                inputs,
            },
        ));
        let slot = state.register_future(id);
        SubWorkflowFuture {
            slot,
            cancel: self.cancel.clone(),
            schedule_event_id: id,
            instance_id: handle,
        }
    }

    /// Request cancellation of a child workflow by instance id.
    pub fn cancel_sub_workflow(&self, instance_id: impl Into<String>) {
        let mut state = self.state();
        let id = state.next_schedule_event_id();
        state.add_command(Command::new(
            id,
            CommandKind::CancelSubWorkflow {
                instance_id: instance_id.into(),
            },
        ));
    }

    /// Run a nondeterministic computation exactly once and record its
    /// result. In live mode `f` runs immediately; during replay the
    /// recorded result is returned and `f` is never called.
    pub fn side_effect<F>(&self, f: F) -> SideEffectFuture
    where
        F: FnOnce() -> Payload,
    {
        let mut state = self.state();
        let id = state.next_schedule_event_id();
        let slot = state.register_future(id);
        if state.is_replaying() {
            // Recorded result arrives via the replayed SideEffectResult event.
            return SideEffectFuture {
                slot,
                cancel: self.cancel.clone(),
            };
        }
        drop(state);
        let result = f();
        let mut state = self.state();
        state.add_command(Command::new(id, CommandKind::SideEffect { result: result.clone() }));
        state.resolve_future(id, Ok(Some(result)));
        SideEffectFuture {
            slot,
            cancel: self.cancel.clone(),
        }
    }

    /// Await the next payload delivered to the named signal channel.
    /// Signals that arrived before the receive are consumed in order.
    pub fn wait_signal(&self, name: impl AsRef<str>) -> SignalFuture {
        let mut state = self.state();
        let slot = state.claim_signal(name.as_ref());
        SignalFuture {
            slot,
            cancel: self.cancel.clone(),
        }
    }

    /// Workflow-visible time in milliseconds since the Unix epoch: the
    /// timestamp of the most recent task start, stable across replay.
    pub fn now_ms(&self) -> u64 {
        self.state().now_ms()
    }

    /// Whether the executor is currently replaying persisted history.
    /// Useful for skipping side effects that must not repeat.
    pub fn is_replaying(&self) -> bool {
        self.state().is_replaying()
    }

    /// Whether cancellation has been requested for this workflow.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn instance_id(&self) -> String {
        self.state().instance.instance_id.clone()
    }

    pub fn execution_id(&self) -> String {
        self.state().instance.execution_id.clone()
    }

    // ===== Replay-guarded tracing =====
    //
    // Trace helpers emit only in live mode so logs are not duplicated on
    // every replay. They create no history events.

    pub fn trace_info(&self, message: impl Into<String>) {
        self.trace(tracing::Level::INFO, message.into());
    }

    pub fn trace_warn(&self, message: impl Into<String>) {
        self.trace(tracing::Level::WARN, message.into());
    }

    pub fn trace_error(&self, message: impl Into<String>) {
        self.trace(tracing::Level::ERROR, message.into());
    }

    pub fn trace_debug(&self, message: impl Into<String>) {
        self.trace(tracing::Level::DEBUG, message.into());
    }

    fn trace(&self, level: tracing::Level, message: String) {
        let state = self.state();
        if state.is_replaying() {
            return;
        }
        let instance_id = state.instance.instance_id.clone();
        let execution_id = state.instance.execution_id.clone();
        drop(state);
        match level {
            tracing::Level::ERROR => tracing::error!(
                target: "workloom::workflow",
                instance_id = %instance_id,
                execution_id = %execution_id,
                "{}",
                message
            ),
            tracing::Level::WARN => tracing::warn!(
                target: "workloom::workflow",
                instance_id = %instance_id,
                execution_id = %execution_id,
                "{}",
                message
            ),
            tracing::Level::DEBUG => tracing::debug!(
                target: "workloom::workflow",
                instance_id = %instance_id,
                execution_id = %execution_id,
                "{}",
                message
            ),
            _ => tracing::info!(
                target: "workloom::workflow",
                instance_id = %instance_id,
                execution_id = %execution_id,
                "{}",
                message
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WorkflowInstance;

    fn context() -> WorkflowContext {
        let mut state = WorkflowState::new(WorkflowInstance::new("inst", "exec"));
        state.set_time(1_000);
        WorkflowContext::new(Arc::new(Mutex::new(state)), CancellationToken::new())
    }

    #[test]
    fn scheduling_appends_commands_in_issue_order() {
        let ctx = context();
        let activity = ctx.schedule_activity("a", vec!["1".to_string()]);
        let timer = ctx.schedule_timer(Duration::from_secs(10));

        assert_eq!(activity.schedule_event_id(), 1);
        assert_eq!(timer.schedule_event_id(), 2);

        let state = ctx.state();
        let commands = state.commands.snapshot();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].kind.name(), "ScheduleActivity");
        match &commands[1].kind {
            CommandKind::ScheduleTimer { fire_at_ms } => assert_eq!(*fire_at_ms, 11_000),
            other => panic!("expected timer command, got {other:?}"),
        }
    }

    #[test]
    fn live_side_effect_computes_once_and_resolves() {
        let ctx = context();
        let mut calls = 0;
        let fut = ctx.side_effect(|| {
            calls += 1;
            "recorded".to_string()
        });
        assert_eq!(calls, 1);
        assert_eq!(fut.slot.get(), Some(Ok(Some("recorded".to_string()))));

        let state = ctx.state();
        let commands = state.commands.snapshot();
        assert_eq!(commands.len(), 1);
        match &commands[0].kind {
            CommandKind::SideEffect { result } => assert_eq!(result, "recorded"),
            other => panic!("expected side effect command, got {other:?}"),
        }
    }

    #[test]
    fn replay_side_effect_is_not_computed() {
        let ctx = context();
        ctx.state().set_replaying(true);
        let fut = ctx.side_effect(|| panic!("side effect must not run during replay"));
        assert_eq!(fut.slot.get(), None);
        assert!(ctx.state().commands.is_empty());
    }

    #[test]
    fn cancel_timer_issues_a_fresh_command() {
        let ctx = context();
        let timer = ctx.schedule_timer(Duration::from_secs(1));
        ctx.cancel_timer(timer.schedule_event_id());

        let state = ctx.state();
        let commands = state.commands.snapshot();
        assert_eq!(commands.len(), 2);
        match &commands[1].kind {
            CommandKind::CancelTimer {
                timer_schedule_event_id,
            } => assert_eq!(*timer_schedule_event_id, 1),
            other => panic!("expected cancel timer command, got {other:?}"),
        }
        assert_eq!(commands[1].id, 2);
    }
}
