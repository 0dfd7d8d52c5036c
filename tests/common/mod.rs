//! Shared fixtures for executor integration tests.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::Mutex;

use async_trait::async_trait;
use workloom::provider::{ProviderError, WorkflowHistoryProvider};
use workloom::{EventKind, HistoryEvent, Task, WorkflowInstance};

/// In-memory history store standing in for the durable backend.
#[derive(Default)]
pub struct MemoryHistory {
    events: Mutex<Vec<HistoryEvent>>,
}

impl MemoryHistory {
    pub fn append(&self, events: &[HistoryEvent]) {
        self.events.lock().unwrap().extend(events.iter().cloned());
    }

    pub fn last_sequence_id(&self) -> i64 {
        self.events.lock().unwrap().last().map(|e| e.sequence_id).unwrap_or(0)
    }

    /// Replace one stored event, for tampering with history in
    /// nondeterminism tests.
    pub fn replace(&self, sequence_id: i64, event: HistoryEvent) {
        let mut events = self.events.lock().unwrap();
        if let Some(slot) = events.iter_mut().find(|e| e.sequence_id == sequence_id) {
            let mut event = event;
            event.sequence_id = sequence_id;
            *slot = event;
        }
    }
}

#[async_trait]
impl WorkflowHistoryProvider for MemoryHistory {
    async fn history_since(
        &self,
        _instance: &WorkflowInstance,
        after_sequence_id: i64,
    ) -> Result<Vec<HistoryEvent>, ProviderError> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.sequence_id > after_sequence_id)
            .cloned()
            .collect())
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .try_init();
}

pub fn task(id: &str, instance: &WorkflowInstance, last_sequence_id: i64, new_events: Vec<HistoryEvent>) -> Task {
    Task {
        id: id.to_string(),
        instance: instance.clone(),
        last_sequence_id,
        new_events,
    }
}

pub fn start_event(name: &str, inputs: &[&str]) -> HistoryEvent {
    HistoryEvent::new(EventKind::WorkflowExecutionStarted {
        name: name.to_string(),
        inputs: inputs.iter().map(|s| s.to_string()).collect(),
    })
}

pub fn kinds(events: &[HistoryEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.kind.name()).collect()
}

pub fn sequence_ids(events: &[HistoryEvent]) -> Vec<i64> {
    events.iter().map(|e| e.sequence_id).collect()
}
