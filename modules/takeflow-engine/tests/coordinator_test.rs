//! Router and registry behavior through the public Coordinator API.
//! No pipeline needed: events are routed by hand and dispatches are recorded.

use std::sync::{Arc, Mutex};

use serde_json::json;
use takeflow_common::telemetry::init_tracing;
use takeflow_engine::{
    attach, Coordinator, EffectError, EngineConfig, Event, ManualTimer, RecordingDispatcher,
    RegistrationPolicy, Routed, Timer,
};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
struct AppState {
    user_id: u32,
}

fn coordinator(policy: RegistrationPolicy) -> (Coordinator<Event, AppState>, Arc<RecordingDispatcher<Event>>) {
    init_tracing("takeflow_engine=debug").unwrap();
    let recorder = Arc::new(RecordingDispatcher::new());
    let timer: Arc<dyn Timer> = Arc::new(ManualTimer::new());
    let coord = Coordinator::new(
        recorder.clone(),
        Arc::new(|| AppState { user_id: 1 }),
        timer,
        EngineConfig::default().with_policy(policy),
    );
    (coord, recorder)
}

fn event(event_type: &str, n: u32) -> Event {
    Event::new(event_type).with_payload(json!({ "n": n }))
}

/// Give spawned tasks a chance to run on the current-thread runtime.
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

// =========================================================================
// Routing
// =========================================================================

#[tokio::test]
async fn unclaimed_event_is_handed_back() {
    let (coord, _) = coordinator(RegistrationPolicy::Reject);

    match coord.route(event("NOBODY", 1)) {
        Routed::Unhandled(e) => assert_eq!(e, event("NOBODY", 1)),
        _ => panic!("event should be unhandled"),
    }
}

#[tokio::test]
async fn persistent_handler_runs_once_per_event() {
    let (coord, _) = coordinator(RegistrationPolicy::Reject);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    coord
        .take_every("CLICK", move |_coord, e: Event| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(e);
                Ok(())
            }
        })
        .unwrap();

    for n in 0..3 {
        match coord.route(event("CLICK", n)) {
            Routed::Handler(task) => task.await.unwrap(),
            _ => panic!("CLICK should reach the persistent handler"),
        }
    }

    assert_eq!(
        *seen.lock().unwrap(),
        vec![event("CLICK", 0), event("CLICK", 1), event("CLICK", 2)]
    );
}

#[tokio::test]
async fn handler_presence_consumes_event_whatever_it_returns() {
    let (coord, _) = coordinator(RegistrationPolicy::Reject);
    coord
        .take_every("SILENT", |_coord, _e| async { Ok(()) })
        .unwrap();

    let routed = coord.route(Event::new("SILENT"));
    assert!(routed.is_handled());
}

#[tokio::test]
async fn handler_failure_surfaces_through_its_task() {
    let (coord, _) = coordinator(RegistrationPolicy::Reject);
    coord
        .take_every("BROKEN", |_coord, _e| async { anyhow::bail!("boom") })
        .unwrap();

    let Routed::Handler(task) = coord.route(Event::new("BROKEN")) else {
        panic!("BROKEN should reach the persistent handler");
    };
    let err = task.await.unwrap_err();
    assert!(matches!(err, EffectError::Handler(_)));
    assert_eq!(err.to_string(), "Handler failed: boom");
}

#[tokio::test]
async fn persistent_handler_wins_over_one_shot_waiter() {
    let (coord, _) = coordinator(RegistrationPolicy::Reject);
    let waiting = coord.take("CLICK");
    coord
        .take_every("CLICK", |_coord, _e| async { Ok(()) })
        .unwrap();

    assert!(matches!(coord.route(Event::new("CLICK")), Routed::Handler(_)));
    assert!(coord.is_waiting_for("CLICK"));
    drop(waiting);
    assert!(!coord.is_waiting_for("CLICK"));
}

#[tokio::test]
async fn handler_receives_working_coordinator() {
    let (coord, recorder) = coordinator(RegistrationPolicy::Reject);
    coord
        .take_every("LOGIN", |coord: Coordinator<Event, AppState>, _e| async move {
            let user_id = coord.select_with(|s| s.user_id);
            coord
                .dispatch(Event::new("LOGGED_IN").with_payload(json!({ "user_id": user_id })))
                .await?;
            Ok(())
        })
        .unwrap();

    let Routed::Handler(task) = coord.route(Event::new("LOGIN")) else {
        panic!("LOGIN should reach the persistent handler");
    };
    task.await.unwrap();

    assert_eq!(
        recorder.events(),
        vec![Event::new("LOGGED_IN").with_payload(json!({ "user_id": 1 }))]
    );
}

#[tokio::test]
async fn handler_take_is_registered_before_route_returns() {
    let (coord, recorder) = coordinator(RegistrationPolicy::Reject);
    coord
        .take_every("A", |coord: Coordinator<Event, AppState>, _e| async move {
            let b = coord.take("B").await?;
            coord.dispatch(Event::new("GOT").with_payload(b.payload)).await?;
            Ok(())
        })
        .unwrap();

    // No yield between the two routes.
    let first = coord.route(Event::new("A"));
    let second = coord.route(event("B", 7));

    assert!(matches!(second, Routed::Waiter));
    let Routed::Handler(task) = first else {
        panic!("A should reach the persistent handler");
    };
    task.await.unwrap();
    assert_eq!(recorder.events(), vec![Event::new("GOT").with_payload(json!({ "n": 7 }))]);
}

#[tokio::test]
async fn handler_panic_before_first_suspension_surfaces_as_join_error() {
    let (coord, _) = coordinator(RegistrationPolicy::Reject);
    coord
        .take_every("PANICS", |_coord, _e| async { panic!("handler bug") })
        .unwrap();

    let Routed::Handler(task) = coord.route(Event::new("PANICS")) else {
        panic!("PANICS should reach the persistent handler");
    };
    assert!(matches!(task.await, Err(EffectError::Join(_))));

    // The router is still usable afterwards.
    assert!(!coord.route(Event::new("OTHER")).is_handled());
}

// =========================================================================
// One-shot waiters
// =========================================================================

#[tokio::test]
async fn take_resolves_with_the_exact_event_once() {
    let (coord, _) = coordinator(RegistrationPolicy::Reject);
    let take = coord.take("LOADED");

    assert!(matches!(coord.route(event("LOADED", 1)), Routed::Waiter));
    assert_eq!(take.await.unwrap(), event("LOADED", 1));

    // Consumed: a second event of the same type finds nobody.
    assert!(!coord.route(event("LOADED", 2)).is_handled());
}

#[tokio::test]
async fn group_take_resolves_on_either_and_clears_both() {
    let (coord, _) = coordinator(RegistrationPolicy::Reject);
    let take = coord.take(["OK", "FAILED"]);
    assert!(coord.is_waiting_for("OK"));
    assert!(coord.is_waiting_for("FAILED"));

    assert!(coord.route(Event::new("FAILED")).is_handled());
    assert_eq!(take.await.unwrap(), Event::new("FAILED"));

    assert!(!coord.is_waiting_for("OK"));
    assert!(!coord.is_waiting_for("FAILED"));
    assert!(!coord.route(Event::new("OK")).is_handled());
    assert_eq!(coord.pending_waiters(), 0);
}

#[tokio::test]
async fn dropped_take_leaves_no_registration() {
    let (coord, _) = coordinator(RegistrationPolicy::Reject);
    let take = coord.take(["A", "B"]);
    assert_eq!(coord.pending_waiters(), 1);

    drop(take);

    assert_eq!(coord.pending_waiters(), 0);
    assert!(!coord.route(Event::new("A")).is_handled());
}

#[tokio::test]
async fn empty_group_fails_on_await() {
    let (coord, _) = coordinator(RegistrationPolicy::Reject);
    let err = coord.take(Vec::<String>::new()).await.unwrap_err();
    assert!(matches!(err, EffectError::EmptyGroup));
}

// =========================================================================
// Registration conflicts
// =========================================================================

#[tokio::test]
async fn reject_policy_fails_second_take_and_keeps_first() {
    let (coord, _) = coordinator(RegistrationPolicy::Reject);
    let first = coord.take("LOADED");
    let second = coord.take(["LOADED", "OTHER"]);

    let err = second.await.unwrap_err();
    assert!(matches!(err, EffectError::RegistrationConflict { .. }));
    assert!(!coord.is_waiting_for("OTHER"));

    assert!(coord.route(Event::new("LOADED")).is_handled());
    assert_eq!(first.await.unwrap(), Event::new("LOADED"));
}

#[tokio::test]
async fn replace_policy_supersedes_earlier_take() {
    let (coord, _) = coordinator(RegistrationPolicy::Replace);
    let first = coord.take(["LOADED", "OTHER"]);
    let second = coord.take("LOADED");

    assert!(matches!(
        first.await.unwrap_err(),
        EffectError::Superseded { .. }
    ));
    assert!(!coord.is_waiting_for("OTHER"));

    assert!(coord.route(Event::new("LOADED")).is_handled());
    assert_eq!(second.await.unwrap(), Event::new("LOADED"));
}

#[tokio::test]
async fn reject_policy_refuses_second_persistent_handler() {
    let (coord, _) = coordinator(RegistrationPolicy::Reject);
    coord.take_every("A", |_c, _e| async { Ok(()) }).unwrap();

    let err = coord
        .take_every("A", |_c, _e| async { Ok(()) })
        .unwrap_err();
    assert!(err.is_registration_error());
}

#[tokio::test]
async fn replace_policy_swaps_persistent_handler() {
    let (coord, _) = coordinator(RegistrationPolicy::Replace);
    let hits = Arc::new(Mutex::new(Vec::new()));

    for label in ["first", "second"] {
        let hits = hits.clone();
        coord
            .take_every("A", move |_c, _e| {
                let hits = hits.clone();
                async move {
                    hits.lock().unwrap().push(label);
                    Ok(())
                }
            })
            .unwrap();
    }

    let Routed::Handler(task) = coord.route(Event::new("A")) else {
        panic!("A should reach the persistent handler");
    };
    task.await.unwrap();
    assert_eq!(*hits.lock().unwrap(), vec!["second"]);
}

// =========================================================================
// State and teardown
// =========================================================================

#[tokio::test]
async fn select_returns_snapshot_or_selection() {
    let (coord, _) = coordinator(RegistrationPolicy::Reject);
    assert_eq!(coord.select(), AppState { user_id: 1 });
    assert_eq!(coord.select_with(|s| s.user_id + 1), 2);
}

#[tokio::test]
async fn attach_defaults_to_reject_policy() {
    let coord: Coordinator<Event, ()> = attach(RecordingDispatcher::new(), || (), None);
    assert_eq!(coord.config().registration_policy, RegistrationPolicy::Reject);
}

#[tokio::test]
async fn pending_take_fails_detached_after_teardown() {
    let (coord, _) = coordinator(RegistrationPolicy::Reject);
    let take = coord.take("NEVER");
    drop(coord);
    settle().await;

    assert!(matches!(take.await.unwrap_err(), EffectError::Detached));
}
