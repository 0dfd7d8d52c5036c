//! Commands: durable intents issued by workflow code during a turn.
//!
//! A command's `id` doubles as the schedule event id of the history events
//! it gives rise to — that correlation is what lets replay reconcile
//! re-issued commands against recorded events. The log keeps insertion
//! order (the order user code issued the commands) with O(1) lookup by id.

use std::collections::HashMap;

use crate::Payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    /// Issued this turn, not yet translated into events.
    Pending,
    /// Translated into outgoing events by `process_commands`.
    Committed,
}

/// The closed set of durable intents workflow code can issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    ScheduleActivity {
        name: String,
        inputs: Vec<Payload>,
    },
    ScheduleTimer {
        fire_at_ms: u64,
    },
    CancelTimer {
        timer_schedule_event_id: u64,
    },
    ScheduleSubWorkflow {
        name: String,
        instance_id: String,
        inputs: Vec<Payload>,
    },
    CancelSubWorkflow {
        instance_id: String,
    },
    SideEffect {
        result: Payload,
    },
    CompleteWorkflow {
        result: Option<Payload>,
        error: Option<String>,
    },
}

impl CommandKind {
    /// Short name for logging and determinism diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::ScheduleActivity { .. } => "ScheduleActivity",
            CommandKind::ScheduleTimer { .. } => "ScheduleTimer",
            CommandKind::CancelTimer { .. } => "CancelTimer",
            CommandKind::ScheduleSubWorkflow { .. } => "ScheduleSubWorkflow",
            CommandKind::CancelSubWorkflow { .. } => "CancelSubWorkflow",
            CommandKind::SideEffect { .. } => "SideEffect",
            CommandKind::CompleteWorkflow { .. } => "CompleteWorkflow",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Schedule event id correlating this command with its events.
    pub id: u64,
    pub state: CommandState,
    pub kind: CommandKind,
}

impl Command {
    pub fn new(id: u64, kind: CommandKind) -> Self {
        Self {
            id,
            state: CommandState::Pending,
            kind,
        }
    }
}

/// Insertion-ordered command log keyed by schedule event id.
#[derive(Debug, Default)]
pub(crate) struct CommandLog {
    order: Vec<u64>,
    entries: HashMap<u64, Command>,
}

impl CommandLog {
    pub(crate) fn add(&mut self, command: Command) {
        debug_assert!(
            !self.entries.contains_key(&command.id),
            "duplicate command id {}",
            command.id
        );
        self.order.push(command.id);
        self.entries.insert(command.id, command);
    }

    pub(crate) fn remove(&mut self, id: u64) -> Option<Command> {
        let command = self.entries.remove(&id)?;
        self.order.retain(|entry| *entry != id);
        Some(command)
    }

    /// Remove the first pending command matching the predicate.
    pub(crate) fn remove_first_where<F>(&mut self, predicate: F) -> Option<Command>
    where
        F: Fn(&Command) -> bool,
    {
        let id = self
            .order
            .iter()
            .copied()
            .find(|id| self.entries.get(id).map(&predicate).unwrap_or(false))?;
        self.remove(id)
    }

    /// Mark every command committed and return a snapshot in issue order.
    pub(crate) fn commit_all(&mut self) -> Vec<Command> {
        let mut committed = Vec::with_capacity(self.order.len());
        for id in &self.order {
            if let Some(command) = self.entries.get_mut(id) {
                command.state = CommandState::Committed;
                committed.push(command.clone());
            }
        }
        committed
    }

    /// Drop committed commands; pending ones survive into the next turn.
    pub(crate) fn clear_committed(&mut self) {
        let entries = &mut self.entries;
        self.order.retain(|id| {
            let keep = entries
                .get(id)
                .map(|c| c.state == CommandState::Pending)
                .unwrap_or(false);
            if !keep {
                entries.remove(id);
            }
            keep
        });
    }

    pub(crate) fn snapshot(&self) -> Vec<Command> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id).cloned())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
