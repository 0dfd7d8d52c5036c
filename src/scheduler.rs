//! Cooperative scheduler for the workflow function.
//!
//! The workflow runs as a single pinned future polled with a no-op waker.
//! One poll advances every unblocked user step to the next suspension point
//! (a durable future returning `Pending`), so the executor alternates:
//! apply a history event, then poll here, until the workflow blocks again
//! or finishes. There is no pre-emption and no background task; dropping
//! the future is a clean teardown.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use crate::registry::WorkflowHandler;
use crate::{Payload, WorkflowContext};

type WorkflowTask = Pin<Box<dyn Future<Output = Result<Payload, String>> + Send>>;

#[derive(Default)]
pub(crate) struct WorkflowScheduler {
    task: Option<WorkflowTask>,
    outcome: Option<Result<Payload, String>>,
}

impl WorkflowScheduler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn started(&self) -> bool {
        self.task.is_some() || self.outcome.is_some()
    }

    /// Start the workflow function and run it to its first suspension point.
    pub(crate) fn start(&mut self, handler: Arc<dyn WorkflowHandler>, ctx: WorkflowContext, inputs: Vec<Payload>) {
        debug_assert!(!self.started(), "workflow already started");
        self.task = Some(Box::pin(async move { handler.invoke(ctx, inputs).await }));
        self.run_until_blocked();
    }

    /// Re-enter user code until no step can make progress. Resolved futures
    /// are picked up here; a `Pending` means the workflow is waiting on
    /// external resolution again.
    pub(crate) fn run_until_blocked(&mut self) {
        let Some(task) = self.task.as_mut() else {
            return;
        };
        if let Poll::Ready(outcome) = poll_once(task.as_mut()) {
            self.outcome = Some(outcome);
            self.task = None;
        }
    }

    pub(crate) fn completed(&self) -> bool {
        self.outcome.is_some()
    }

    pub(crate) fn outcome(&self) -> Option<&Result<Payload, String>> {
        self.outcome.as_ref()
    }

    /// Tear down the workflow task. Dropping the pinned future releases
    /// every durable future it holds; nothing runs in the background.
    pub(crate) fn shutdown(&mut self) {
        self.task = None;
    }
}

fn noop_waker() -> Waker {
    fn clone(_: *const ()) -> RawWaker {
        RawWaker::new(std::ptr::null(), &VTABLE)
    }
    fn wake(_: *const ()) {}
    fn wake_by_ref(_: *const ()) {}
    fn drop(_: *const ()) {}

    static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop);
    unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) }
}

fn poll_once<F: Future + ?Sized>(fut: Pin<&mut F>) -> Poll<F::Output> {
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    fut.poll(&mut cx)
}
