//! Durable futures: the suspension points of a workflow.
//!
//! Every blocking primitive returns a future backed by a one-shot slot.
//! The slot is resolved exactly once, by the event dispatcher when the
//! matching history event is applied (or immediately, for side effects in
//! live mode). The cooperative scheduler polls with a no-op waker, so these
//! futures never need to wake anyone: the executor re-polls the workflow
//! after every state mutation.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio_util::sync::CancellationToken;

use crate::Payload;

/// Value delivered into a slot: an optional payload or an error string.
/// Timer firings and cancellations carry no payload.
pub(crate) type Resolution = Result<Option<Payload>, String>;

/// One-shot resolvable slot shared between a durable future and the
/// executor's future registry.
#[derive(Debug, Clone, Default)]
pub(crate) struct FutureSlot {
    cell: Arc<Mutex<Option<Resolution>>>,
}

impl FutureSlot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn resolved(value: Resolution) -> Self {
        Self {
            cell: Arc::new(Mutex::new(Some(value))),
        }
    }

    /// Resolve the slot. Resolving twice is a programming error.
    pub(crate) fn resolve(&self, value: Resolution) {
        let mut cell = self.cell.lock().expect("future slot mutex poisoned");
        debug_assert!(cell.is_none(), "durable future resolved twice");
        *cell = Some(value);
    }

    pub(crate) fn get(&self) -> Option<Resolution> {
        self.cell.lock().expect("future slot mutex poisoned").clone()
    }
}

const CANCELED: &str = "workflow execution canceled";

fn poll_slot(slot: &FutureSlot, cancel: &CancellationToken) -> Poll<Resolution> {
    if let Some(resolution) = slot.get() {
        return Poll::Ready(resolution);
    }
    // A canceled workflow context resolves every future awaited after the
    // cancellation; already-resolved slots above keep their recorded value.
    if cancel.is_cancelled() {
        return Poll::Ready(Err(CANCELED.to_string()));
    }
    Poll::Pending
}

/// Result of a scheduled activity.
pub struct ActivityFuture {
    pub(crate) slot: FutureSlot,
    pub(crate) cancel: CancellationToken,
    pub(crate) schedule_event_id: u64,
}

impl ActivityFuture {
    /// Id correlating this activity with its completion events.
    pub fn schedule_event_id(&self) -> u64 {
        self.schedule_event_id
    }
}

impl Future for ActivityFuture {
    type Output = Result<Payload, String>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        poll_slot(&self.slot, &self.cancel).map(|res| res.map(Option::unwrap_or_default))
    }
}

/// Firing (or cancellation) of a scheduled timer.
pub struct TimerFuture {
    pub(crate) slot: FutureSlot,
    pub(crate) cancel: CancellationToken,
    pub(crate) schedule_event_id: u64,
}

impl TimerFuture {
    /// Id to pass to `WorkflowContext::cancel_timer`.
    pub fn schedule_event_id(&self) -> u64 {
        self.schedule_event_id
    }
}

impl Future for TimerFuture {
    type Output = Result<(), String>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        poll_slot(&self.slot, &self.cancel).map(|res| res.map(|_| ()))
    }
}

/// Result of a scheduled sub-workflow.
pub struct SubWorkflowFuture {
    pub(crate) slot: FutureSlot,
    pub(crate) cancel: CancellationToken,
    pub(crate) schedule_event_id: u64,
    pub(crate) instance_id: Arc<Mutex<String>>,
}

impl SubWorkflowFuture {
    pub fn schedule_event_id(&self) -> u64 {
        self.schedule_event_id
    }

    /// The child instance id. During replay this is the backend-assigned id
    /// once the scheduling event has been applied; read it after an await.
    pub fn instance_id(&self) -> String {
        self.instance_id
            .lock()
            .expect("sub-workflow instance mutex poisoned")
            .clone()
    }
}

impl Future for SubWorkflowFuture {
    type Output = Result<Payload, String>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        poll_slot(&self.slot, &self.cancel).map(|res| res.map(Option::unwrap_or_default))
    }
}

/// Next payload delivered to a named signal channel.
pub struct SignalFuture {
    pub(crate) slot: FutureSlot,
    pub(crate) cancel: CancellationToken,
}

impl Future for SignalFuture {
    type Output = Result<Payload, String>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        poll_slot(&self.slot, &self.cancel).map(|res| res.map(Option::unwrap_or_default))
    }
}

/// Recorded result of a side effect. Ready immediately in live mode;
/// resolved from history during replay.
pub struct SideEffectFuture {
    pub(crate) slot: FutureSlot,
    pub(crate) cancel: CancellationToken,
}

impl Future for SideEffectFuture {
    type Output = Result<Payload, String>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        poll_slot(&self.slot, &self.cancel).map(|res| res.map(Option::unwrap_or_default))
    }
}
