//! End-to-end scenarios and randomized invariant checks.
//!
//! These drive bundles, the orchestrator, and the store together with fixed
//! and random action sequences.

#[cfg(test)]
mod scenario_tests {
    use crate::action::{Action, ActionBody};
    use crate::bundle::ResourceBundle;
    use crate::clock::{ManualClock, Timestamp};
    use crate::config::ResourceConfig;
    use crate::connectivity::OnlineFlag;
    use crate::error::{ConfigurationError, FetchFailure};
    use crate::fetch::{dispatch_fn, fetch_fn, Dispatch, FetchContext};
    use crate::query::RefetchDecision;
    use crate::state::ResourceState;
    use crate::store::{Revision, Store};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    // ==========================================================================
    // Helpers
    // ==========================================================================

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn ts(ms: i64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    fn user_bundle() -> ResourceBundle<Value> {
        ResourceConfig::new()
            .name("user")
            .action_namespace("FETCH_USER")
            .fetch(fetch_fn(|_| async {
                Ok::<_, FetchFailure>(json!({"name": "henrik"}))
            }))
            .build()
            .unwrap()
    }

    fn failing_bundle(failure: FetchFailure) -> ResourceBundle<Value> {
        ResourceConfig::new()
            .name("user")
            .action_namespace("FETCH_USER")
            .fetch(fetch_fn(move |_| {
                let failure = failure.clone();
                async move { Err::<Value, _>(failure) }
            }))
            .build()
            .unwrap()
    }

    /// Collects dispatched actions in order.
    #[derive(Default)]
    struct Collected {
        actions: Mutex<Vec<Action<Value>>>,
    }

    impl Dispatch<Value> for Collected {
        fn dispatch(&self, action: Action<Value>) {
            self.actions.lock().unwrap().push(action);
        }
    }

    // ==========================================================================
    // Fixed Scenarios
    // ==========================================================================

    #[test]
    fn initial_state_online_should_refetch() {
        let bundle = user_bundle();
        let state = bundle.initial_state();
        assert_eq!(state.data, None);
        assert!(bundle.select_should_refetch(&state, ts(0), true));
    }

    #[test]
    fn staleness_boundary_around_fifteen_minutes() {
        let bundle = user_bundle();
        let t = 5_000;
        let state = bundle.reduce(
            &bundle.initial_state(),
            &bundle.fetch_success(json!({"name": "henrik"})),
            ts(t),
        );
        assert!(bundle.select_is_stale(&state, ts(t + 900_001)));
        assert!(!bundle.select_is_stale(&state, ts(t + 899_999)));
    }

    #[test]
    fn retry_window_after_failures() {
        let bundle = user_bundle();
        let recent = ResourceState::<Value> {
            error_times: vec![ts(12), ts(25)],
            ..ResourceState::initial()
        };
        assert!(bundle.select_is_waiting_to_retry(&recent, ts(26)));

        let old = ResourceState::<Value> {
            error_times: vec![ts(1), ts(2)],
            ..ResourceState::initial()
        };
        assert!(!bundle.select_is_waiting_to_retry(&old, ts(60_004)));
    }

    #[tokio::test]
    async fn successful_fetch_emits_start_then_success() {
        let bundle = user_bundle();
        let collected = Collected::default();

        bundle.fetch(&collected).await;

        let actions = collected.actions.into_inner().unwrap();
        assert_eq!(
            actions,
            vec![
                Action::empty("FETCH_USER_START"),
                Action::new(
                    "FETCH_USER_SUCCESS",
                    ActionBody::Success {
                        payload: json!({"name": "henrik"}),
                        merge: false,
                    }
                ),
            ]
        );
    }

    #[tokio::test]
    async fn transient_rejection_emits_start_then_error() {
        init_tracing();
        let failure = FetchFailure::transient("503 from upstream");
        let bundle = failing_bundle(failure.clone());
        let collected = Collected::default();

        bundle.fetch(&collected).await;

        let actions = collected.actions.into_inner().unwrap();
        assert_eq!(
            actions,
            vec![
                Action::empty("FETCH_USER_START"),
                Action::new("FETCH_USER_ERROR", ActionBody::Error { error: failure }),
            ]
        );

        let state = actions.iter().fold(bundle.initial_state(), |state, action| {
            bundle.reduce(&state, action, ts(10))
        });
        assert!(!state.failed_permanently);
        assert_eq!(state.error_times, vec![ts(10)]);
    }

    async fn load_over_flaky_link(_ctx: FetchContext) -> Result<Value, FetchFailure> {
        let parsed: Result<Value, anyhow::Error> = Err(anyhow::anyhow!("connection reset"));
        Ok(parsed?)
    }

    #[tokio::test]
    async fn anyhow_errors_become_transient_failures() {
        let bundle: ResourceBundle<Value> = ResourceConfig::new()
            .name("user")
            .action_namespace("FETCH_USER")
            .fetch(fetch_fn(load_over_flaky_link))
            .build()
            .unwrap();
        let collected = Collected::default();

        bundle.fetch(&collected).await;

        let actions = collected.actions.into_inner().unwrap();
        let failure = actions[1].error().unwrap();
        assert!(!failure.is_permanent());
        assert!(failure.message().contains("connection reset"));
    }

    #[tokio::test]
    async fn permanent_failure_blocks_refetch_until_success() {
        let clock = Arc::new(ManualClock::new(ts(0)));
        let store = Store::builder()
            .with_clock_arc(clock.clone())
            .with_resource(failing_bundle(FetchFailure::permanent("404")))
            .build()
            .unwrap();
        let user = store.resource::<Value>("user").unwrap();

        user.fetch().await;
        assert!(user.failed_permanently());

        clock.advance(Duration::from_secs(3_600));
        assert_eq!(user.refetch_decision(), RefetchDecision::FailedPermanently);
        assert!(user.fetch_if_needed().is_none());

        store.dispatch(user.bundle().fetch_success(json!({"name": "henrik"})));
        assert!(!user.failed_permanently());
        assert_eq!(user.refetch_decision(), RefetchDecision::Fresh);
    }

    #[tokio::test]
    async fn offline_then_online_driver_loop() {
        init_tracing();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let bundle: ResourceBundle<Value> = ResourceConfig::new()
            .name("user")
            .action_namespace("FETCH_USER")
            .fetch(fetch_fn(move |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(FetchFailure::transient("flaky"))
                    } else {
                        Ok(json!({"attempt": n}))
                    }
                }
            }))
            .retry_after(Duration::from_millis(1_000))
            .build()
            .unwrap();

        let clock = Arc::new(ManualClock::new(ts(0)));
        let online = OnlineFlag::new(false);
        let store = Store::builder()
            .with_clock_arc(clock.clone())
            .with_connectivity(online.clone())
            .with_resource(bundle)
            .build()
            .unwrap();
        let user = store.resource::<Value>("user").unwrap();

        // Offline: the driver does nothing.
        assert!(user.fetch_if_needed().is_none());

        online.set_online(true);
        user.fetch_if_needed().unwrap().await;
        assert_eq!(user.last_error(), Some(ts(0)));

        clock.advance(Duration::from_millis(999));
        assert!(user.fetch_if_needed().is_none());

        clock.advance(Duration::from_millis(1));
        user.fetch_if_needed().unwrap().await;
        assert_eq!(user.data(), Some(json!({"attempt": 1})));
        assert_eq!(user.last_error(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn late_resolution_of_older_fetch_still_applies() {
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let release_rx = Arc::new(Mutex::new(Some(release_rx)));
        let bundle: ResourceBundle<Value> = ResourceConfig::new()
            .name("user")
            .action_namespace("FETCH_USER")
            .fetch(fetch_fn(move |_| {
                let gate = release_rx.lock().unwrap().take();
                async move {
                    match gate {
                        Some(gate) => {
                            let _ = gate.await;
                            Ok(json!("old"))
                        }
                        None => Ok(json!("new")),
                    }
                }
            }))
            .build()
            .unwrap();
        let store = Store::builder().with_resource(bundle).build().unwrap();
        let user = store.resource::<Value>("user").unwrap();

        let slow = tokio::spawn(user.fetch());
        while !user.is_loading() {
            tokio::task::yield_now().await;
        }
        user.fetch().await;
        assert_eq!(user.data(), Some(json!("new")));

        release_tx.send(()).unwrap();
        slow.await.unwrap();
        assert_eq!(user.data(), Some(json!("old")));
    }

    #[test]
    fn configuration_names_first_missing_field() {
        let err = ResourceConfig::<Value>::new()
            .action_namespace("FETCH_USER")
            .build()
            .unwrap_err();
        assert_eq!(err.field(), Some("name"));
        assert!(err.to_string().contains("name"));
        assert!(matches!(err, ConfigurationError::MissingField { .. }));
    }

    #[test]
    fn dispatch_fn_can_feed_a_store() {
        let store = Store::builder().with_resource(user_bundle()).build().unwrap();
        let user = store.resource::<Value>("user").unwrap();
        let forward = dispatch_fn(|action: Action<Value>| {
            store.dispatch(action);
        });

        forward.dispatch(user.bundle().start());
        assert!(user.is_loading());
        assert_eq!(user.revision(), Revision(1));
    }

    fn posts_bundle() -> ResourceBundle<Value> {
        ResourceConfig::new()
            .name("posts")
            .action_namespace("FETCH_POSTS")
            .fetch(fetch_fn(|ctx: FetchContext| async move {
                let user = ctx
                    .data_of::<Value>("user")
                    .ok_or_else(|| FetchFailure::transient("user not loaded"))?;
                Ok::<_, FetchFailure>(json!({
                    "author": user["name"],
                    "fetched_at": ctx.now().as_millis(),
                }))
            }))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn dependent_resource_reads_other_state_through_context() {
        let clock = Arc::new(ManualClock::new(ts(5_000)));
        let store = Store::builder()
            .with_clock_arc(clock.clone())
            .with_resource(user_bundle())
            .with_resource(posts_bundle())
            .build()
            .unwrap();
        let user = store.resource::<Value>("user").unwrap();
        let posts = store.resource::<Value>("posts").unwrap();

        // Before the user is loaded the dependent fetch fails transiently.
        posts.fetch().await;
        assert_eq!(posts.data(), None);
        assert_eq!(posts.last_error(), Some(ts(5_000)));
        assert!(!posts.failed_permanently());

        user.fetch().await;
        clock.advance(Duration::from_millis(250));
        posts.fetch().await;

        assert_eq!(
            posts.data(),
            Some(json!({"author": "henrik", "fetched_at": 5_250}))
        );
        assert_eq!(posts.last_error(), None);
        // The user resource saw none of the posts traffic.
        assert_eq!(user.revision(), Revision(2));
    }

    #[tokio::test]
    async fn capability_can_dispatch_into_its_store() {
        let invalidating: ResourceBundle<Value> = ResourceConfig::new()
            .name("session")
            .action_namespace("FETCH_SESSION")
            .fetch(fetch_fn(|ctx: FetchContext| async move {
                // A new session invalidates whatever user was loaded before.
                let stale = ctx.dispatch(Action::<Value>::empty("FETCH_USER_MAKE_STALE"));
                Ok::<_, FetchFailure>(json!({"invalidated_user": stale}))
            }))
            .build()
            .unwrap();
        let store = Store::builder()
            .with_resource(user_bundle())
            .with_resource(invalidating)
            .build()
            .unwrap();
        let user = store.resource::<Value>("user").unwrap();
        let session = store.resource::<Value>("session").unwrap();

        user.fetch().await;
        session.fetch().await;

        assert!(user.is_marked_stale());
        assert_eq!(session.data(), Some(json!({"invalidated_user": true})));
    }

    // ==========================================================================
    // Randomized Invariants
    // ==========================================================================

    fn random_action(rng: &mut fastrand::Rng, bundle: &ResourceBundle<Value>) -> Action<Value> {
        match rng.u8(0..6) {
            0 => bundle.start(),
            1 => bundle.fetch_success(json!({ "v": rng.u32(..) })),
            2 => bundle.fetch_success_merge(json!({ "w": rng.u32(..) })),
            3 => bundle.fetch_error(if rng.bool() {
                FetchFailure::permanent("gone")
            } else {
                FetchFailure::transient("down")
            }),
            4 => bundle.mark_as_stale(),
            _ => Action::empty(format!("OTHER_{}", rng.u8(..))),
        }
    }

    #[test]
    fn random_sequences_hold_transition_invariants() {
        let bundle = user_bundle();
        let mut rng = fastrand::Rng::with_seed(0x5eed);

        for _ in 0..200 {
            let mut state = bundle.initial_state();
            let mut now = 0i64;

            for _ in 0..50 {
                now += rng.i64(0..120_000);
                let action = random_action(&mut rng, &bundle);
                let next = bundle.reduce(&state, &action, ts(now));

                match bundle.action_types().kind_of(&action.action_type) {
                    Some(crate::action::ActionKind::Success) => {
                        assert!(next.error_times.is_empty());
                        assert!(!next.failed_permanently);
                        assert!(!next.stale);
                        assert!(!next.is_loading);
                        assert_eq!(next.last_success, Some(ts(now)));
                    }
                    Some(crate::action::ActionKind::Error) => {
                        assert_eq!(next.error_times.len(), state.error_times.len() + 1);
                        let prior = state.error_times.len();
                        assert_eq!(&next.error_times[..prior], &state.error_times[..]);
                        assert_eq!(next.data, state.data);
                        assert!(!next.is_loading);
                    }
                    Some(crate::action::ActionKind::MakeStale) => {
                        assert!(next.error_times.is_empty());
                        assert!(next.stale);
                        assert_eq!(next.data, state.data);
                    }
                    Some(crate::action::ActionKind::Start) => {
                        assert!(next.is_loading);
                        assert_eq!(next.data, state.data);
                    }
                    None => assert_eq!(next, state),
                }

                if next.is_loading {
                    for online in [true, false] {
                        assert!(!bundle.select_should_refetch(&next, ts(now), online));
                    }
                }

                state = next;
            }
        }
    }

    #[test]
    fn random_elapsed_retry_window_is_monotonic() {
        let bundle = user_bundle();
        let retry = bundle.policy().retry_after.as_millis() as i64;
        let mut rng = fastrand::Rng::with_seed(42);

        for _ in 0..1_000 {
            let failed_at = rng.i64(0..1_000_000);
            let state = ResourceState::<Value> {
                error_times: vec![ts(failed_at)],
                ..ResourceState::initial()
            };
            let elapsed = rng.i64(0..2 * retry);
            let waiting = bundle.select_is_waiting_to_retry(&state, ts(failed_at + elapsed));
            assert_eq!(waiting, elapsed < retry, "elapsed {elapsed}ms");
        }
    }

    #[test]
    fn replaying_a_sequence_is_deterministic() {
        let bundle = user_bundle();
        let mut rng = fastrand::Rng::with_seed(7);
        let timed: Vec<(Timestamp, Action<Value>)> = (0..100)
            .map(|i| (ts(i * 1_000), random_action(&mut rng, &bundle)))
            .collect();

        let run = || {
            timed
                .iter()
                .fold(bundle.initial_state(), |state, (now, action)| {
                    bundle.reduce(&state, action, *now)
                })
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let bundle = user_bundle();
        let mut rng = fastrand::Rng::with_seed(99);
        let mut state = bundle.initial_state();
        for i in 0..20 {
            state = bundle.reduce(&state, &random_action(&mut rng, &bundle), ts(i));
        }

        let encoded = serde_json::to_string(&state).unwrap();
        let decoded: ResourceState<Value> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, state);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_fetches_keep_store_consistent() {
        init_tracing();
        let store = Store::builder().with_resource(user_bundle()).build().unwrap();
        let user = store.resource::<Value>("user").unwrap();

        let tasks: Vec<_> = (0..32).map(|_| tokio::spawn(user.fetch())).collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert!(!user.is_loading());
        assert_eq!(user.data(), Some(json!({"name": "henrik"})));
        assert_eq!(user.revision(), Revision(64));
    }
}
