//! Event dispatch: applying history events to workflow state.
//!
//! One handler per event type. Scheduling events ("acks") reconcile the
//! matching pending command against what the backend recorded — any
//! mismatch is a determinism violation. Completion events resolve the
//! registered future and hand control back to the scheduler, which runs
//! user code until it blocks again.

use tracing::{debug, warn};

use crate::command::CommandKind;
use crate::error::DeterminismError;
use crate::executor::WorkflowExecutor;
use crate::futures::Resolution;
use crate::{EventKind, HistoryEvent, Payload, WorkflowContext};

impl WorkflowExecutor {
    pub(crate) fn apply_event(&mut self, event: &HistoryEvent) -> Result<(), DeterminismError> {
        debug!(
            target: "workloom::executor",
            instance_id = %self.instance.instance_id,
            event_id = %event.id,
            sequence_id = event.sequence_id,
            event_type = event.kind.name(),
            "applying history event"
        );

        match &event.kind {
            EventKind::WorkflowExecutionStarted { name, inputs } => {
                self.handle_execution_started(name, inputs)
            }

            EventKind::WorkflowExecutionFinished { .. } => {
                // Terminal marker; the completion command already went out
                // in the turn that produced it.
                self.completed_in_history = true;
                Ok(())
            }

            EventKind::WorkflowExecutionCanceled => self.handle_execution_canceled(),

            EventKind::WorkflowTaskStarted => {
                self.state().set_time(event.timestamp_ms);
                Ok(())
            }

            EventKind::ActivityScheduled { name, .. } => {
                self.handle_activity_scheduled(event.schedule_event_id, name)
            }

            EventKind::ActivityCompleted { result } => self.resolve_and_resume(
                event.schedule_event_id,
                "ActivityCompleted",
                Ok(Some(result.clone())),
            ),

            EventKind::ActivityFailed { reason } => self.resolve_and_resume(
                event.schedule_event_id,
                "ActivityFailed",
                Err(reason.clone()),
            ),

            EventKind::TimerScheduled { .. } => self.handle_timer_scheduled(event.schedule_event_id),

            EventKind::TimerFired { .. } => self.handle_timer_fired(event.schedule_event_id),

            EventKind::TimerCanceled => self.handle_timer_canceled(event.schedule_event_id),

            EventKind::SignalReceived { name, arg } => {
                self.handle_signal_received(event.schedule_event_id, name, arg)
            }

            EventKind::SideEffectResult { result } => {
                self.handle_side_effect_result(event.schedule_event_id, result)
            }

            EventKind::SubWorkflowScheduled {
                name, instance_id, ..
            } => self.handle_sub_workflow_scheduled(event.schedule_event_id, name, instance_id),

            EventKind::SubWorkflowCancellationRequested { .. } => {
                self.handle_sub_workflow_cancellation(event.schedule_event_id)
            }

            EventKind::SubWorkflowCompleted { result } => self.resolve_and_resume(
                event.schedule_event_id,
                "SubWorkflowCompleted",
                Ok(Some(result.clone())),
            ),

            EventKind::SubWorkflowFailed { error } => self.resolve_and_resume(
                event.schedule_event_id,
                "SubWorkflowFailed",
                Err(error.clone()),
            ),
        }
    }

    /// Resume user code after a state mutation; returns when it blocks again.
    fn resume_workflow(&mut self) {
        self.scheduler.run_until_blocked();
    }

    fn handle_execution_started(&mut self, name: &str, inputs: &[Payload]) -> Result<(), DeterminismError> {
        if self.scheduler.started() {
            // At-least-once delivery can repeat the start event.
            warn!(
                target: "workloom::executor",
                instance_id = %self.instance.instance_id,
                "ignoring duplicate WorkflowExecutionStarted"
            );
            return Ok(());
        }

        let handler = self
            .registry
            .get(name)
            .ok_or_else(|| DeterminismError::WorkflowNotRegistered {
                name: name.to_string(),
            })?;

        let ctx = WorkflowContext::new(self.state.clone(), self.cancel.clone());
        self.scheduler.start(handler, ctx, inputs.to_vec());
        Ok(())
    }

    fn handle_execution_canceled(&mut self) -> Result<(), DeterminismError> {
        self.cancel.cancel();
        self.resume_workflow();
        Ok(())
    }

    fn handle_activity_scheduled(&mut self, schedule_event_id: u64, name: &str) -> Result<(), DeterminismError> {
        let mut state = self.state();
        let command =
            state
                .remove_command(schedule_event_id)
                .ok_or(DeterminismError::MissingCommand {
                    schedule_event_id,
                    event: "ActivityScheduled",
                })?;

        match &command.kind {
            CommandKind::ScheduleActivity { name: issued, .. } => {
                if issued != name {
                    return Err(DeterminismError::NameMismatch {
                        schedule_event_id,
                        expected: name.to_string(),
                        found: issued.clone(),
                    });
                }
                // The ack is all; the future resolves on completion.
                Ok(())
            }
            other => Err(DeterminismError::CommandTypeMismatch {
                schedule_event_id,
                expected: "ScheduleActivity",
                found: other.name(),
            }),
        }
    }

    fn handle_timer_scheduled(&mut self, schedule_event_id: u64) -> Result<(), DeterminismError> {
        let mut state = self.state();
        let command =
            state
                .remove_command(schedule_event_id)
                .ok_or(DeterminismError::MissingCommand {
                    schedule_event_id,
                    event: "TimerScheduled",
                })?;

        match command.kind {
            CommandKind::ScheduleTimer { .. } => Ok(()),
            other => Err(DeterminismError::CommandTypeMismatch {
                schedule_event_id,
                expected: "ScheduleTimer",
                found: other.name(),
            }),
        }
    }

    fn handle_timer_fired(&mut self, schedule_event_id: u64) -> Result<(), DeterminismError> {
        {
            let mut state = self.state();
            let Some(slot) = state.take_future(schedule_event_id) else {
                // Timer already canceled; the firing raced the cancellation.
                return Ok(());
            };
            state.remove_command(schedule_event_id);
            slot.resolve(Ok(None));
        }
        self.resume_workflow();
        Ok(())
    }

    fn handle_timer_canceled(&mut self, schedule_event_id: u64) -> Result<(), DeterminismError> {
        {
            let mut state = self.state();
            if let Some(slot) = state.take_future(schedule_event_id) {
                slot.resolve(Ok(None));
            }
            // Already fired is fine; both race directions are no-ops.
            state.remove_command(schedule_event_id);

            // Also retire the cancel command itself so a turn that replayed
            // this cancellation does not send it again.
            state.commands.remove_first_where(|c| {
                matches!(
                    c.kind,
                    CommandKind::CancelTimer { timer_schedule_event_id }
                        if timer_schedule_event_id == schedule_event_id
                )
            });
        }
        self.resume_workflow();
        Ok(())
    }

    fn handle_signal_received(
        &mut self,
        schedule_event_id: u64,
        name: &str,
        arg: &Payload,
    ) -> Result<(), DeterminismError> {
        {
            let mut state = self.state();
            state.deliver_signal(name, arg.clone());
            state.remove_command(schedule_event_id);
        }
        self.resume_workflow();
        Ok(())
    }

    fn handle_side_effect_result(
        &mut self,
        schedule_event_id: u64,
        result: &Payload,
    ) -> Result<(), DeterminismError> {
        {
            let mut state = self.state();
            // No command validation here: in live mode the side effect was
            // resolved at creation and its command already translated.
            state.remove_command(schedule_event_id);
            let slot = state
                .take_future(schedule_event_id)
                .ok_or(DeterminismError::MissingFuture {
                    schedule_event_id,
                    event: "SideEffectResult",
                })?;
            slot.resolve(Ok(Some(result.clone())));
        }
        self.resume_workflow();
        Ok(())
    }

    fn handle_sub_workflow_scheduled(
        &mut self,
        schedule_event_id: u64,
        name: &str,
        instance_id: &str,
    ) -> Result<(), DeterminismError> {
        let mut state = self.state();
        let command =
            state
                .remove_command(schedule_event_id)
                .ok_or(DeterminismError::MissingCommand {
                    schedule_event_id,
                    event: "SubWorkflowScheduled",
                })?;

        match &command.kind {
            CommandKind::ScheduleSubWorkflow { name: issued, .. } => {
                if issued != name {
                    return Err(DeterminismError::NameMismatch {
                        schedule_event_id,
                        expected: name.to_string(),
                        found: issued.clone(),
                    });
                }
                // Adopt the backend-assigned child id in place of the
                // provisional one generated at command creation.
                state.stamp_child_instance(schedule_event_id, instance_id);
                Ok(())
            }
            other => Err(DeterminismError::CommandTypeMismatch {
                schedule_event_id,
                expected: "ScheduleSubWorkflow",
                found: other.name(),
            }),
        }
    }

    fn handle_sub_workflow_cancellation(&mut self, schedule_event_id: u64) -> Result<(), DeterminismError> {
        {
            let mut state = self.state();
            let command =
                state
                    .remove_command(schedule_event_id)
                    .ok_or(DeterminismError::MissingCommand {
                        schedule_event_id,
                        event: "SubWorkflowCancellationRequested",
                    })?;

            if !matches!(command.kind, CommandKind::CancelSubWorkflow { .. }) {
                return Err(DeterminismError::CommandTypeMismatch {
                    schedule_event_id,
                    expected: "CancelSubWorkflow",
                    found: command.kind.name(),
                });
            }
        }
        self.resume_workflow();
        Ok(())
    }

    /// Common completion path: claim the future, retire the command,
    /// resolve, and re-enter user code.
    fn resolve_and_resume(
        &mut self,
        schedule_event_id: u64,
        event: &'static str,
        resolution: Resolution,
    ) -> Result<(), DeterminismError> {
        {
            let mut state = self.state();
            let slot = state
                .take_future(schedule_event_id)
                .ok_or(DeterminismError::MissingFuture {
                    schedule_event_id,
                    event,
                })?;
            state.remove_command(schedule_event_id);
            slot.resolve(resolution);
        }
        self.resume_workflow();
        Ok(())
    }
}
