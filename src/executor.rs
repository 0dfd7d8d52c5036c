//! Workflow executor: one turn per task.
//!
//! `execute_task` joins the pieces: it fetches and replays any history the
//! executor is missing, dispatches the newly delivered events against the
//! live workflow, then drains the command log into outgoing history events
//! and cross-instance messages. Replay silently re-establishes futures and
//! commands; only live execution emits external effects.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::clock::Clock;
use crate::command::{Command, CommandKind};
use crate::error::{DeterminismError, ExecutorError};
use crate::provider::WorkflowHistoryProvider;
use crate::registry::WorkflowRegistry;
use crate::scheduler::WorkflowScheduler;
use crate::state::WorkflowState;
use crate::{EventKind, HistoryEvent, Payload, WorkflowInstance};

/// Unit of work delivered by the backend: the events that became visible
/// for an instance plus the sequence watermark persisted before them.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub instance: WorkflowInstance,
    /// Largest sequence id the backend persisted prior to `new_events`.
    pub last_sequence_id: i64,
    pub new_events: Vec<HistoryEvent>,
}

/// A history event addressed to another workflow instance (or to this one,
/// redelivered later by the backend).
#[derive(Debug, Clone)]
pub struct WorkflowEvent {
    pub instance: WorkflowInstance,
    pub event: HistoryEvent,
}

/// Output of one executed task.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    /// The workflow reached a terminal state this turn.
    pub completed: bool,
    /// New history tail to persist, sequence ids assigned.
    pub executed: Vec<HistoryEvent>,
    /// `ActivityScheduled` events for the activity worker pool.
    pub activity_events: Vec<HistoryEvent>,
    /// Cross-instance messages: sub-workflow starts and cancellations,
    /// parent notifications, self-addressed timer events.
    pub workflow_events: Vec<WorkflowEvent>,
}

struct CommandTranslation {
    completed: bool,
    new_events: Vec<HistoryEvent>,
    activity_events: Vec<HistoryEvent>,
    workflow_events: Vec<WorkflowEvent>,
}

/// Drives a single workflow instance. The executor exclusively owns the
/// workflow state for the lifetime of the instance on this worker; the
/// backend guarantees one `execute_task` call runs to completion before
/// the next begins.
pub struct WorkflowExecutor {
    pub(crate) registry: WorkflowRegistry,
    history_provider: Arc<dyn WorkflowHistoryProvider>,
    clock: Arc<dyn Clock>,
    pub(crate) instance: WorkflowInstance,
    pub(crate) state: Arc<Mutex<WorkflowState>>,
    /// Cancellation handle of the workflow context. Driven solely by
    /// `WorkflowExecutionCanceled` history events, never by worker-side
    /// deadlines.
    pub(crate) cancel: CancellationToken,
    pub(crate) scheduler: WorkflowScheduler,
    last_sequence_id: i64,
    /// A CompleteWorkflow command has been appended this lifetime.
    result_recorded: bool,
    /// History already contains a terminal event (seen during replay).
    pub(crate) completed_in_history: bool,
}

impl WorkflowExecutor {
    pub fn new(
        registry: WorkflowRegistry,
        history_provider: Arc<dyn WorkflowHistoryProvider>,
        instance: WorkflowInstance,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = Arc::new(Mutex::new(WorkflowState::new(instance.clone())));
        Self {
            registry,
            history_provider,
            clock,
            instance,
            state,
            cancel: CancellationToken::new(),
            scheduler: WorkflowScheduler::new(),
            last_sequence_id: 0,
            result_recorded: false,
            completed_in_history: false,
        }
    }

    /// Execute one turn of the workflow.
    ///
    /// Transport failures (history fetch, stale or diverging tasks) are
    /// returned as errors — the task stays unacked and the backend
    /// redelivers it. Determinism violations instead complete the workflow
    /// with the error and report the task successful: replaying would fail
    /// the same way again.
    ///
    /// The caller owns transport deadlines (wrap the returned future in a
    /// timeout); dropping it mid-fetch is safe and leaves the task unacked.
    pub async fn execute_task(&mut self, task: Task) -> Result<ExecutionResult, ExecutorError> {
        debug!(
            target: "workloom::executor",
            task_id = %task.id,
            instance_id = %task.instance.instance_id,
            "executing workflow task"
        );

        // Committed commands from the prior turn are scratch; pending ones
        // are still awaiting their events.
        self.state().commands.clear_committed();

        let mut skip_new_events = false;

        if task.last_sequence_id > self.last_sequence_id {
            debug!(
                target: "workloom::executor",
                instance_id = %task.instance.instance_id,
                task_sequence_id = task.last_sequence_id,
                sequence_id = self.last_sequence_id,
                "task has newer history than current state, fetching and replaying"
            );

            let history = self
                .history_provider
                .history_since(&self.instance, self.last_sequence_id)
                .await?;

            if let Err(err) = self.replay_history(&history) {
                error!(
                    target: "workloom::executor",
                    instance_id = %task.instance.instance_id,
                    error = %err,
                    "error while replaying history"
                );
                // Fail the workflow with the error. Skip the new events but
                // still flush commands so the completion goes out.
                self.record_workflow_completion(None, Some(err.to_string()));
                skip_new_events = true;
            }

            if task.last_sequence_id != self.last_sequence_id {
                return Err(ExecutorError::ReplayDivergence {
                    task_sequence_id: task.last_sequence_id,
                    state_sequence_id: self.last_sequence_id,
                });
            }
        } else if task.last_sequence_id < self.last_sequence_id {
            return Err(ExecutorError::StaleTask {
                task_sequence_id: task.last_sequence_id,
                state_sequence_id: self.last_sequence_id,
            });
        }

        // Every turn starts with a synthetic task-started event that
        // advances workflow-visible time.
        let task_started = self.create_event(EventKind::WorkflowTaskStarted, 0, None);
        let mut to_execute = vec![task_started.clone()];
        to_execute.extend(task.new_events.iter().cloned());

        let mut executed = vec![task_started];
        if !skip_new_events {
            let (consumed, dispatch_error) = self.execute_new_events(to_execute);
            executed = consumed;
            if let Some(err) = dispatch_error {
                error!(
                    target: "workloom::executor",
                    instance_id = %task.instance.instance_id,
                    error = %err,
                    "error while executing new events"
                );
                self.record_workflow_completion(None, Some(err.to_string()));
            }
        }

        // Drain commands added while executing into outgoing events.
        let translation = self.process_commands(&task);
        executed.extend(translation.new_events);

        for event in &mut executed {
            event.sequence_id = self.next_sequence_id();
        }

        debug!(
            target: "workloom::executor",
            task_id = %task.id,
            instance_id = %task.instance.instance_id,
            executed = executed.len(),
            last_sequence_id = self.last_sequence_id,
            completed = translation.completed,
            "finished workflow task"
        );

        Ok(ExecutionResult {
            completed: translation.completed,
            executed,
            activity_events: translation.activity_events,
            workflow_events: translation.workflow_events,
        })
    }

    /// Tear down the workflow cleanly so no work outlives the instance on
    /// this worker: cancel the workflow context and drop its task.
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.scheduler.shutdown();
    }

    pub fn instance(&self) -> &WorkflowInstance {
        &self.instance
    }

    /// Largest sequence id this executor has seen or assigned.
    pub fn last_sequence_id(&self) -> i64 {
        self.last_sequence_id
    }

    /// Snapshot of the command log, in issue order.
    pub fn pending_commands(&self) -> Vec<Command> {
        self.state().commands.snapshot()
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, WorkflowState> {
        self.state.lock().expect("workflow state mutex poisoned")
    }

    fn replay_history(&mut self, history: &[HistoryEvent]) -> Result<(), DeterminismError> {
        self.state().set_replaying(true);
        for event in history {
            if let Err(err) = self.apply_event(event) {
                // The fetched slice is consumed even when an event fails to
                // apply, keeping sequence accounting aligned with the task
                // so the failure completion can still flush.
                if let Some(last) = history.last() {
                    self.last_sequence_id = last.sequence_id;
                }
                return Err(err);
            }
            self.last_sequence_id = event.sequence_id;
        }
        Ok(())
    }

    fn execute_new_events(
        &mut self,
        events: Vec<HistoryEvent>,
    ) -> (Vec<HistoryEvent>, Option<DeterminismError>) {
        self.state().set_replaying(false);

        for (index, event) in events.iter().enumerate() {
            if let Err(err) = self.apply_event(event) {
                return (events[..index].to_vec(), Some(err));
            }
        }

        if self.scheduler.completed() && !self.result_recorded && !self.completed_in_history {
            match self.scheduler.outcome().cloned() {
                Some(Ok(result)) => self.record_workflow_completion(Some(result), None),
                Some(Err(error)) => self.record_workflow_completion(None, Some(error)),
                None => {}
            }
        }

        (events, None)
    }

    /// Append the terminal command carrying the workflow result or error.
    fn record_workflow_completion(&mut self, result: Option<Payload>, error: Option<String>) {
        if self.result_recorded {
            return;
        }
        self.result_recorded = true;
        let mut state = self.state();
        let id = state.next_schedule_event_id();
        state.add_command(Command::new(id, CommandKind::CompleteWorkflow { result, error }));
    }

    fn process_commands(&mut self, task: &Task) -> CommandTranslation {
        let commands = self.state().commands.commit_all();

        let mut completed = false;
        let mut new_events = Vec::new();
        let mut activity_events = Vec::new();
        let mut workflow_events = Vec::new();

        for command in commands {
            match command.kind {
                CommandKind::ScheduleActivity { name, inputs } => {
                    let event =
                        self.create_event(EventKind::ActivityScheduled { name, inputs }, command.id, None);
                    new_events.push(event.clone());
                    activity_events.push(event);
                }

                CommandKind::ScheduleSubWorkflow {
                    name,
                    instance_id,
                    inputs,
                } => {
                    new_events.push(self.create_event(
                        EventKind::SubWorkflowScheduled {
                            name: name.clone(),
                            instance_id: instance_id.clone(),
                            inputs: inputs.clone(),
                        },
                        command.id,
                        None,
                    ));

                    // Start the child; its first event carries the parent's
                    // schedule event id so completions route back here.
                    let child = WorkflowInstance::sub_workflow(
                        instance_id,
                        uuid::Uuid::new_v4().to_string(),
                        self.instance.instance_id.clone(),
                        command.id,
                    );
                    let start =
                        self.create_event(EventKind::WorkflowExecutionStarted { name, inputs }, command.id, None);
                    workflow_events.push(WorkflowEvent {
                        instance: child,
                        event: start,
                    });
                }

                CommandKind::CancelSubWorkflow { instance_id } => {
                    new_events.push(self.create_event(
                        EventKind::SubWorkflowCancellationRequested {
                            instance_id: instance_id.clone(),
                        },
                        command.id,
                        None,
                    ));

                    workflow_events.push(WorkflowEvent {
                        instance: WorkflowInstance::new(instance_id, ""),
                        event: self.create_event(EventKind::WorkflowExecutionCanceled, 0, None),
                    });
                }

                CommandKind::SideEffect { result } => {
                    new_events.push(self.create_event(EventKind::SideEffectResult { result }, command.id, None));
                }

                CommandKind::ScheduleTimer { fire_at_ms } => {
                    new_events.push(self.create_event(
                        EventKind::TimerScheduled { fire_at_ms },
                        command.id,
                        None,
                    ));

                    // Self-addressed firing the backend holds back until the
                    // timer is due.
                    workflow_events.push(WorkflowEvent {
                        instance: task.instance.clone(),
                        event: self.create_event(
                            EventKind::TimerFired { fire_at_ms },
                            command.id,
                            Some(fire_at_ms),
                        ),
                    });
                }

                CommandKind::CancelTimer {
                    timer_schedule_event_id,
                } => {
                    // Keyed to the original timer so the firing and the
                    // cancellation meet on the same future.
                    workflow_events.push(WorkflowEvent {
                        instance: task.instance.clone(),
                        event: self.create_event(EventKind::TimerCanceled, timer_schedule_event_id, None),
                    });
                }

                CommandKind::CompleteWorkflow { result, error } => {
                    completed = true;

                    new_events.push(self.create_event(
                        EventKind::WorkflowExecutionFinished {
                            result: result.clone(),
                            error: error.clone(),
                        },
                        command.id,
                        None,
                    ));

                    if self.instance.is_sub_workflow() {
                        // Notify the parent, addressed with the schedule
                        // event id it assigned when starting us.
                        let parent_schedule_event_id =
                            self.instance.parent_schedule_event_id.unwrap_or_default();
                        let event = match error {
                            Some(error) => self.create_event(
                                EventKind::SubWorkflowFailed { error },
                                parent_schedule_event_id,
                                None,
                            ),
                            None => self.create_event(
                                EventKind::SubWorkflowCompleted {
                                    result: result.unwrap_or_default(),
                                },
                                parent_schedule_event_id,
                                None,
                            ),
                        };
                        workflow_events.push(WorkflowEvent {
                            instance: WorkflowInstance::new(
                                self.instance.parent_instance_id.clone().unwrap_or_default(),
                                "",
                            ),
                            event,
                        });
                    }
                }
            }
        }

        CommandTranslation {
            completed,
            new_events,
            activity_events,
            workflow_events,
        }
    }

    fn next_sequence_id(&mut self) -> i64 {
        self.last_sequence_id += 1;
        self.last_sequence_id
    }

    fn create_event(
        &self,
        kind: EventKind,
        schedule_event_id: u64,
        visible_at_ms: Option<u64>,
    ) -> HistoryEvent {
        let mut event = HistoryEvent::new(kind)
            .with_timestamp_ms(self.clock.now_ms())
            .with_schedule_event_id(schedule_event_id);
        event.visible_at_ms = visible_at_ms;
        event
    }
}
