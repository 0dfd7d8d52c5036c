//! End-to-end executor turns: activities, timers, signals, side effects,
//! and cancellation, each driven the way the backend would.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::MemoryHistory;
use workloom::clock::ManualClock;
use workloom::registry::WorkflowRegistry;
use workloom::{EventKind, HistoryEvent, WorkflowExecutor, WorkflowInstance};

fn adder_registry() -> WorkflowRegistry {
    WorkflowRegistry::builder()
        .register("Adder", |ctx, inputs| async move {
            let sum = ctx.schedule_activity("add", inputs).await?;
            Ok(sum)
        })
        .build()
}

fn executor(
    registry: WorkflowRegistry,
    provider: Arc<MemoryHistory>,
    instance: &WorkflowInstance,
    clock: Arc<ManualClock>,
) -> WorkflowExecutor {
    WorkflowExecutor::new(registry, provider, instance.clone(), clock)
}

#[tokio::test]
async fn activity_round_trip_over_two_turns() {
    common::init_tracing();
    let provider = Arc::new(MemoryHistory::default());
    let clock = Arc::new(ManualClock::new(1_000));
    let instance = WorkflowInstance::new("wf-add", "exec-1");
    let mut exec = executor(adder_registry(), provider.clone(), &instance, clock.clone());

    // Turn 1: start the workflow; it schedules one activity and blocks.
    let result = exec
        .execute_task(common::task(
            "t1",
            &instance,
            0,
            vec![common::start_event("Adder", &["1", "2"])],
        ))
        .await
        .unwrap();

    assert!(!result.completed);
    assert_eq!(
        common::kinds(&result.executed),
        vec!["WorkflowTaskStarted", "WorkflowExecutionStarted", "ActivityScheduled"]
    );
    assert_eq!(common::sequence_ids(&result.executed), vec![1, 2, 3]);

    let scheduled = &result.executed[2];
    assert_eq!(scheduled.schedule_event_id, 1);
    match &scheduled.kind {
        EventKind::ActivityScheduled { name, inputs } => {
            assert_eq!(name, "add");
            assert_eq!(inputs, &vec!["1".to_string(), "2".to_string()]);
        }
        other => panic!("expected ActivityScheduled, got {other:?}"),
    }
    assert_eq!(result.activity_events.len(), 1);
    // Same event routed to the worker pool; sequence ids are only stamped
    // on the persisted copy.
    assert_eq!(result.activity_events[0].id, result.executed[2].id);
    assert_eq!(result.activity_events[0].schedule_event_id, 1);
    assert!(result.workflow_events.is_empty());
    provider.append(&result.executed);

    // Turn 2: the activity completion resolves the future; the workflow
    // finishes with the result.
    let completion =
        HistoryEvent::new(EventKind::ActivityCompleted { result: "3".to_string() }).with_schedule_event_id(1);
    let result = exec
        .execute_task(common::task("t2", &instance, 3, vec![completion]))
        .await
        .unwrap();

    assert!(result.completed);
    assert_eq!(
        common::kinds(&result.executed),
        vec!["WorkflowTaskStarted", "ActivityCompleted", "WorkflowExecutionFinished"]
    );
    assert_eq!(common::sequence_ids(&result.executed), vec![4, 5, 6]);
    match &result.executed[2].kind {
        EventKind::WorkflowExecutionFinished { result, error } => {
            assert_eq!(result.as_deref(), Some("3"));
            assert!(error.is_none());
        }
        other => panic!("expected WorkflowExecutionFinished, got {other:?}"),
    }
}

#[tokio::test]
async fn cold_start_replays_history_before_new_events() {
    let provider = Arc::new(MemoryHistory::default());
    let clock = Arc::new(ManualClock::new(1_000));
    let instance = WorkflowInstance::new("wf-cold", "exec-1");

    let mut exec = executor(adder_registry(), provider.clone(), &instance, clock.clone());
    let result = exec
        .execute_task(common::task(
            "t1",
            &instance,
            0,
            vec![common::start_event("Adder", &["1", "2"])],
        ))
        .await
        .unwrap();
    provider.append(&result.executed);

    // A different worker picks up turn 2: fresh executor, history replayed
    // from the provider before the completion applies.
    let mut stolen = executor(adder_registry(), provider.clone(), &instance, clock.clone());
    let completion =
        HistoryEvent::new(EventKind::ActivityCompleted { result: "3".to_string() }).with_schedule_event_id(1);
    let result = stolen
        .execute_task(common::task("t2", &instance, 3, vec![completion]))
        .await
        .unwrap();

    assert!(result.completed);
    assert_eq!(
        common::kinds(&result.executed),
        vec!["WorkflowTaskStarted", "ActivityCompleted", "WorkflowExecutionFinished"]
    );
    assert_eq!(common::sequence_ids(&result.executed), vec![4, 5, 6]);
    assert_eq!(stolen.last_sequence_id(), 6);
}

#[tokio::test]
async fn timer_fires_after_backend_redelivery() {
    let provider = Arc::new(MemoryHistory::default());
    let clock = Arc::new(ManualClock::new(1_000));
    let instance = WorkflowInstance::new("wf-timer", "exec-1");

    let registry = WorkflowRegistry::builder()
        .register("Sleeper", |ctx, _inputs| async move {
            ctx.schedule_timer(Duration::from_secs(10)).await?;
            Ok("woke".to_string())
        })
        .build();
    let mut exec = executor(registry, provider.clone(), &instance, clock.clone());

    let result = exec
        .execute_task(common::task("t1", &instance, 0, vec![common::start_event("Sleeper", &[])]))
        .await
        .unwrap();

    assert!(!result.completed);
    assert_eq!(
        common::kinds(&result.executed),
        vec!["WorkflowTaskStarted", "WorkflowExecutionStarted", "TimerScheduled"]
    );

    // The firing is a self-addressed message held back until the timer is due.
    assert_eq!(result.workflow_events.len(), 1);
    let fired = &result.workflow_events[0];
    assert_eq!(fired.instance.instance_id, "wf-timer");
    assert_eq!(fired.event.schedule_event_id, 1);
    assert_eq!(fired.event.visible_at_ms, Some(11_000));
    assert!(matches!(fired.event.kind, EventKind::TimerFired { fire_at_ms: 11_000 }));
    provider.append(&result.executed);

    // Turn 2 after the backend redelivers the firing.
    clock.set(11_000);
    let result = exec
        .execute_task(common::task("t2", &instance, 3, vec![fired.event.clone()]))
        .await
        .unwrap();

    assert!(result.completed);
    assert_eq!(
        common::kinds(&result.executed),
        vec!["WorkflowTaskStarted", "TimerFired", "WorkflowExecutionFinished"]
    );
}

#[tokio::test]
async fn canceled_timer_tolerates_racing_fire() {
    let provider = Arc::new(MemoryHistory::default());
    let clock = Arc::new(ManualClock::new(1_000));
    let instance = WorkflowInstance::new("wf-cancel-timer", "exec-1");

    let registry = WorkflowRegistry::builder()
        .register("TwoTimers", |ctx, _inputs| async move {
            let first = ctx.schedule_timer(Duration::from_secs(10));
            let second = ctx.schedule_timer(Duration::from_secs(20));
            ctx.cancel_timer(first.schedule_event_id());
            second.await?;
            Ok("second".to_string())
        })
        .build();
    let mut exec = executor(registry, provider.clone(), &instance, clock.clone());

    let result = exec
        .execute_task(common::task("t1", &instance, 0, vec![common::start_event("TwoTimers", &[])]))
        .await
        .unwrap();

    assert_eq!(
        common::kinds(&result.executed),
        vec![
            "WorkflowTaskStarted",
            "WorkflowExecutionStarted",
            "TimerScheduled",
            "TimerScheduled"
        ]
    );
    let message_kinds: Vec<&str> = result.workflow_events.iter().map(|w| w.event.kind.name()).collect();
    assert_eq!(message_kinds, vec!["TimerFired", "TimerFired", "TimerCanceled"]);
    assert_eq!(result.workflow_events[2].event.schedule_event_id, 1);
    provider.append(&result.executed);

    let canceled = result.workflow_events[2].event.clone();
    let first_fired = result.workflow_events[0].event.clone();
    let second_fired = result.workflow_events[1].event.clone();

    // The cancellation lands first; the stale firing that follows must be a
    // silent no-op.
    let result = exec
        .execute_task(common::task("t2", &instance, 4, vec![canceled, first_fired]))
        .await
        .unwrap();
    assert!(!result.completed);
    assert_eq!(
        common::kinds(&result.executed),
        vec!["WorkflowTaskStarted", "TimerCanceled", "TimerFired"]
    );
    provider.append(&result.executed);

    let result = exec
        .execute_task(common::task("t3", &instance, 7, vec![second_fired]))
        .await
        .unwrap();
    assert!(result.completed);
    assert_eq!(
        common::kinds(&result.executed),
        vec!["WorkflowTaskStarted", "TimerFired", "WorkflowExecutionFinished"]
    );
}

#[tokio::test]
async fn signal_resolves_waiting_receive() {
    let provider = Arc::new(MemoryHistory::default());
    let clock = Arc::new(ManualClock::new(1_000));
    let instance = WorkflowInstance::new("wf-signal", "exec-1");

    let registry = WorkflowRegistry::builder()
        .register("WaitForGo", |ctx, _inputs| async move {
            let arg = ctx.wait_signal("go").await?;
            Ok(arg)
        })
        .build();
    let mut exec = executor(registry, provider.clone(), &instance, clock.clone());

    let result = exec
        .execute_task(common::task("t1", &instance, 0, vec![common::start_event("WaitForGo", &[])]))
        .await
        .unwrap();
    assert!(!result.completed);
    assert_eq!(
        common::kinds(&result.executed),
        vec!["WorkflowTaskStarted", "WorkflowExecutionStarted"]
    );
    provider.append(&result.executed);

    let signal = HistoryEvent::new(EventKind::SignalReceived {
        name: "go".to_string(),
        arg: "42".to_string(),
    });
    let result = exec
        .execute_task(common::task("t2", &instance, 2, vec![signal]))
        .await
        .unwrap();

    assert!(result.completed);
    assert_eq!(
        common::kinds(&result.executed),
        vec!["WorkflowTaskStarted", "SignalReceived", "WorkflowExecutionFinished"]
    );
    match &result.executed[2].kind {
        EventKind::WorkflowExecutionFinished { result, .. } => assert_eq!(result.as_deref(), Some("42")),
        other => panic!("expected WorkflowExecutionFinished, got {other:?}"),
    }
}

#[tokio::test]
async fn side_effects_run_once_and_replay_from_history() {
    let provider = Arc::new(MemoryHistory::default());
    let clock = Arc::new(ManualClock::new(1_000));
    let instance = WorkflowInstance::new("wf-effect", "exec-1");

    let calls = Arc::new(AtomicUsize::new(0));
    let registry = {
        let calls = calls.clone();
        WorkflowRegistry::builder()
            .register("Effectful", move |ctx, _inputs| {
                let calls = calls.clone();
                async move {
                    let token = ctx
                        .side_effect(|| {
                            calls.fetch_add(1, Ordering::SeqCst);
                            "token-1".to_string()
                        })
                        .await?;
                    let signal = ctx.wait_signal("resume").await?;
                    Ok(format!("{token}:{signal}"))
                }
            })
            .build()
    };

    let mut exec = executor(registry.clone(), provider.clone(), &instance, clock.clone());
    let result = exec
        .execute_task(common::task("t1", &instance, 0, vec![common::start_event("Effectful", &[])]))
        .await
        .unwrap();

    assert_eq!(
        common::kinds(&result.executed),
        vec!["WorkflowTaskStarted", "WorkflowExecutionStarted", "SideEffectResult"]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    provider.append(&result.executed);

    // Cold start: the recorded result replays; the closure must not run again.
    let mut replayed = executor(registry, provider.clone(), &instance, clock.clone());
    let signal = HistoryEvent::new(EventKind::SignalReceived {
        name: "resume".to_string(),
        arg: "go".to_string(),
    });
    let result = replayed
        .execute_task(common::task("t2", &instance, 3, vec![signal]))
        .await
        .unwrap();

    assert!(result.completed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    match &result.executed.last().unwrap().kind {
        EventKind::WorkflowExecutionFinished { result, .. } => {
            assert_eq!(result.as_deref(), Some("token-1:go"));
        }
        other => panic!("expected WorkflowExecutionFinished, got {other:?}"),
    }
}

#[tokio::test]
async fn cancellation_event_unblocks_pending_futures() {
    let provider = Arc::new(MemoryHistory::default());
    let clock = Arc::new(ManualClock::new(1_000));
    let instance = WorkflowInstance::new("wf-canceled", "exec-1");

    let mut exec = executor(adder_registry(), provider.clone(), &instance, clock.clone());
    let result = exec
        .execute_task(common::task(
            "t1",
            &instance,
            0,
            vec![common::start_event("Adder", &["1", "2"])],
        ))
        .await
        .unwrap();
    provider.append(&result.executed);

    let canceled = HistoryEvent::new(EventKind::WorkflowExecutionCanceled);
    let result = exec
        .execute_task(common::task("t2", &instance, 3, vec![canceled]))
        .await
        .unwrap();

    assert!(result.completed);
    match &result.executed.last().unwrap().kind {
        EventKind::WorkflowExecutionFinished { error, .. } => {
            assert!(error.as_deref().unwrap_or_default().contains("canceled"));
        }
        other => panic!("expected WorkflowExecutionFinished, got {other:?}"),
    }
}

#[tokio::test]
async fn close_tears_down_a_blocked_workflow() {
    let provider = Arc::new(MemoryHistory::default());
    let clock = Arc::new(ManualClock::new(1_000));
    let instance = WorkflowInstance::new("wf-close", "exec-1");

    let mut exec = executor(adder_registry(), provider.clone(), &instance, clock.clone());
    exec.execute_task(common::task(
        "t1",
        &instance,
        0,
        vec![common::start_event("Adder", &["1", "2"])],
    ))
    .await
    .unwrap();

    // Blocked on the activity; close must not hang or leak.
    exec.close();
}
