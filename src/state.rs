//! Per-instance workflow state shared between the executor, the event
//! dispatcher, and the workflow context.
//!
//! Everything here is mutated from a single logical thread: the dispatcher
//! applies an event, then the scheduler runs until all unblocked user steps
//! finish, then the dispatcher applies the next event. The mutex exists
//! because the workflow future and the executor both hold a handle, not
//! because two threads ever contend.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::command::{Command, CommandLog};
use crate::futures::{FutureSlot, Resolution};
use crate::{Payload, WorkflowInstance};

pub(crate) struct WorkflowState {
    pub(crate) instance: WorkflowInstance,
    pub(crate) commands: CommandLog,
    replaying: bool,
    now_ms: u64,
    next_schedule_event_id: u64,
    futures: HashMap<u64, FutureSlot>,
    /// Signals that arrived before anyone was waiting, per name.
    pending_signals: HashMap<String, VecDeque<Payload>>,
    /// Receivers waiting for a signal, per name, in registration order.
    signal_waiters: HashMap<String, VecDeque<FutureSlot>>,
    /// Child instance ids by schedule event id, stamped from history on replay.
    child_instances: HashMap<u64, Arc<Mutex<String>>>,
}

impl WorkflowState {
    pub(crate) fn new(instance: WorkflowInstance) -> Self {
        Self {
            instance,
            commands: CommandLog::default(),
            replaying: false,
            now_ms: 0,
            next_schedule_event_id: 0,
            futures: HashMap::new(),
            pending_signals: HashMap::new(),
            signal_waiters: HashMap::new(),
            child_instances: HashMap::new(),
        }
    }

    pub(crate) fn is_replaying(&self) -> bool {
        self.replaying
    }

    pub(crate) fn set_replaying(&mut self, replaying: bool) {
        self.replaying = replaying;
    }

    /// Workflow-visible time: the timestamp of the latest WorkflowTaskStarted.
    pub(crate) fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub(crate) fn set_time(&mut self, now_ms: u64) {
        self.now_ms = now_ms;
    }

    /// Allocate the next schedule event id. Ids are never reused; during
    /// replay the same allocation order re-derives the same ids.
    pub(crate) fn next_schedule_event_id(&mut self) -> u64 {
        self.next_schedule_event_id += 1;
        self.next_schedule_event_id
    }

    pub(crate) fn add_command(&mut self, command: Command) {
        self.commands.add(command);
    }

    pub(crate) fn remove_command(&mut self, schedule_event_id: u64) -> Option<Command> {
        self.commands.remove(schedule_event_id)
    }

    /// Register a fresh one-shot future under a schedule event id.
    pub(crate) fn register_future(&mut self, schedule_event_id: u64) -> FutureSlot {
        let slot = FutureSlot::new();
        self.futures.insert(schedule_event_id, slot.clone());
        slot
    }

    /// Claim the future for resolution. A future can be taken exactly once;
    /// a second completion for the same id finds nothing.
    pub(crate) fn take_future(&mut self, schedule_event_id: u64) -> Option<FutureSlot> {
        self.futures.remove(&schedule_event_id)
    }

    /// Deliver a signal payload: hand it to the oldest waiter, or queue it
    /// for a future receive.
    pub(crate) fn deliver_signal(&mut self, name: &str, arg: Payload) {
        if let Some(waiters) = self.signal_waiters.get_mut(name) {
            if let Some(slot) = waiters.pop_front() {
                slot.resolve(Ok(Some(arg)));
                return;
            }
        }
        self.pending_signals
            .entry(name.to_string())
            .or_default()
            .push_back(arg);
    }

    /// Take an already-delivered signal or register as a waiter.
    pub(crate) fn claim_signal(&mut self, name: &str) -> FutureSlot {
        if let Some(queue) = self.pending_signals.get_mut(name) {
            if let Some(arg) = queue.pop_front() {
                return FutureSlot::resolved(Ok(Some(arg)));
            }
        }
        let slot = FutureSlot::new();
        self.signal_waiters
            .entry(name.to_string())
            .or_default()
            .push_back(slot.clone());
        slot
    }

    pub(crate) fn register_child_instance(&mut self, schedule_event_id: u64, handle: Arc<Mutex<String>>) {
        self.child_instances.insert(schedule_event_id, handle);
    }

    /// Stamp the backend-assigned child instance id onto the handle shared
    /// with the scheduling command and its future.
    pub(crate) fn stamp_child_instance(&mut self, schedule_event_id: u64, instance_id: &str) {
        if let Some(handle) = self.child_instances.get(&schedule_event_id) {
            let mut id = handle.lock().expect("sub-workflow instance mutex poisoned");
            *id = instance_id.to_string();
        }
    }

    /// Resolve a registered future, consuming its registry entry.
    pub(crate) fn resolve_future(&mut self, schedule_event_id: u64, resolution: Resolution) -> bool {
        match self.take_future(schedule_event_id) {
            Some(slot) => {
                slot.resolve(resolution);
                true
            }
            None => false,
        }
    }
}
