//! Engine Scenario Tests
//!
//! End-to-end runs of a real `Engine` with scripted probes and actions.
//! Timing scenarios use tokio's paused clock, so a 30 second probe costs
//! nothing and backoff gaps can be measured exactly.

use futures::FutureExt;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use vigil::anomaly::AnomalyDetector;
use vigil::checks::{FnProbe, HealthCheck, ProbeOutcome};
use vigil::collector::{counters, GaugeSource, MetricsCollector};
use vigil::config::{AnomalyConfig, EngineSettings, PreventiveConfig};
use vigil::engine::{Engine, EngineOptions};
use vigil::recovery::{ActionError, FnAction};
use vigil::types::{CheckResult, CheckState, MetricSample, RecoveryOutcome};

// ============================================================================
// Helpers
// ============================================================================

fn engine() -> Arc<Engine> {
    Engine::new(EngineOptions::default())
}

/// Probe that fails while `failing` is set
fn switch_probe(failing: Arc<AtomicBool>, calls: Arc<AtomicUsize>) -> Arc<FnProbe> {
    Arc::new(FnProbe::new(move || {
        calls.fetch_add(1, Ordering::SeqCst);
        let failing = failing.load(Ordering::SeqCst);
        async move {
            if failing {
                ProbeOutcome::unhealthy("connection refused")
            } else {
                ProbeOutcome::healthy("pong")
            }
        }
        .boxed()
    }))
}

/// Probe that replays `script` (true = healthy), then stays healthy
fn scripted_probe(script: &[bool]) -> Arc<FnProbe> {
    let script = Arc::new(Mutex::new(script.iter().copied().collect::<VecDeque<bool>>()));
    Arc::new(FnProbe::new(move || {
        let healthy = script.lock().unwrap().pop_front().unwrap_or(true);
        async move {
            if healthy {
                ProbeOutcome::healthy("ok")
            } else {
                ProbeOutcome::unhealthy("down")
            }
        }
        .boxed()
    }))
}

fn counting_action(runs: Arc<AtomicUsize>, succeed: bool) -> Arc<FnAction> {
    Arc::new(FnAction::new(move |_| {
        runs.fetch_add(1, Ordering::SeqCst);
        async move {
            if succeed {
                Ok(())
            } else {
                Err(ActionError::Failed("restart refused".to_string()))
            }
        }
        .boxed()
    }))
}

// ============================================================================
// Scenario A: db-ping, threshold 3
// ============================================================================

#[tokio::test(start_paused = true)]
async fn scenario_a_threshold_opens_one_alert_and_one_recovery() {
    let engine = engine();
    let failing = Arc::new(AtomicBool::new(true));
    let calls = Arc::new(AtomicUsize::new(0));
    let restarts = Arc::new(AtomicUsize::new(0));

    engine.register_action("restart-db", counting_action(restarts.clone(), true));
    engine
        .register_check(
            HealthCheck::new("db-ping", switch_probe(failing.clone(), calls.clone()))
                .with_interval(Duration::from_secs(1))
                .with_timeout(Duration::from_millis(500))
                .with_threshold(3)
                .with_recovery("restart-db"),
        )
        .unwrap();
    engine.start();

    // Two failures: degrading, nothing fired yet
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(engine.tracker().state("db-ping"), Some(CheckState::Degrading));
    assert!(engine.active_alerts().is_empty());
    assert_eq!(restarts.load(Ordering::SeqCst), 0);

    // Third failure crosses the threshold
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let alerts = engine.active_alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].component, "db-ping");
    assert_eq!(restarts.load(Ordering::SeqCst), 1);
    assert_eq!(engine.tracker().state("db-ping"), Some(CheckState::Recovering));

    // Still failing: the same alert stays open
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(engine.counters()[counters::ALERTS_OPENED], 1);
    assert_eq!(engine.active_alerts().len(), 1);

    // First success resolves it
    failing.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(engine.active_alerts().is_empty());
    assert_eq!(engine.counters()[counters::ALERTS_RESOLVED], 1);
    assert_eq!(engine.tracker().state("db-ping"), Some(CheckState::Healthy));

    assert!(engine.stop().await);
}

#[tokio::test(start_paused = true)]
async fn scenario_a_fewer_failures_fire_nothing() {
    let engine = engine();
    let restarts = Arc::new(AtomicUsize::new(0));

    engine.register_action("restart-db", counting_action(restarts.clone(), true));
    engine
        .register_check(
            HealthCheck::new("db-ping", scripted_probe(&[false, false, true, false, false, true]))
                .with_interval(Duration::from_secs(1))
                .with_threshold(3)
                .with_recovery("restart-db"),
        )
        .unwrap();
    engine.start();

    tokio::time::sleep(Duration::from_millis(8_500)).await;

    assert_eq!(engine.counters()[counters::ALERTS_OPENED], 0);
    assert_eq!(restarts.load(Ordering::SeqCst), 0);
    assert!(engine.recovery_attempts(10).is_empty());
    let state = engine.tracker().get("db-ping").unwrap();
    assert_eq!(state.state, CheckState::Healthy);
    assert_eq!(state.total_failures, 4);

    assert!(engine.stop().await);
}

// ============================================================================
// Scenario B: a blocked probe does not starve other checks
// ============================================================================

#[tokio::test(start_paused = true)]
async fn scenario_b_blocked_probe_does_not_starve_fast_check() {
    let engine = engine();
    let fast_calls = Arc::new(AtomicUsize::new(0));

    let blocked = Arc::new(FnProbe::new(|| {
        async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            ProbeOutcome::healthy("too late")
        }
        .boxed()
    }));
    engine
        .register_check(
            HealthCheck::new("blocked", blocked)
                .with_interval(Duration::from_secs(5))
                .with_timeout(Duration::from_secs(2))
                .with_threshold(1)
                .with_alerting(false),
        )
        .unwrap();
    engine
        .register_check(
            HealthCheck::new(
                "fast",
                switch_probe(Arc::new(AtomicBool::new(false)), fast_calls.clone()),
            )
            .with_interval(Duration::from_secs(1)),
        )
        .unwrap();
    engine.start();

    tokio::time::sleep(Duration::from_millis(10_500)).await;

    assert!(fast_calls.load(Ordering::SeqCst) >= 9);
    assert_eq!(engine.tracker().state("fast"), Some(CheckState::Healthy));

    let blocked = engine.tracker().get("blocked").unwrap();
    assert_eq!(blocked.state, CheckState::Failing);
    assert_eq!(blocked.last_result.unwrap().detail, "timeout");
    assert!(engine.snapshot().health_score < 100.0);

    assert!(engine.stop().await);
}

// ============================================================================
// Scenario C: failing recoveries back off, never overlap
// ============================================================================

#[tokio::test(start_paused = true)]
async fn scenario_c_failing_recoveries_back_off() {
    let engine = engine();
    let starts = Arc::new(Mutex::new(Vec::<Instant>::new()));
    let running = Arc::new(AtomicUsize::new(0));
    let max_running = Arc::new(AtomicUsize::new(0));

    let action = {
        let starts = starts.clone();
        let running = running.clone();
        let max_running = max_running.clone();
        Arc::new(FnAction::new(move |_| {
            let starts = starts.clone();
            let running = running.clone();
            let max_running = max_running.clone();
            async move {
                starts.lock().unwrap().push(Instant::now());
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_running.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                running.fetch_sub(1, Ordering::SeqCst);
                Err(ActionError::Failed("still broken".to_string()))
            }
            .boxed()
        }))
    };

    engine.register_action("restart", action);
    engine
        .register_check(
            HealthCheck::new("flaky", scripted_probe(&[false; 64]))
                .with_interval(Duration::from_secs(1))
                .with_threshold(1)
                .with_recovery("restart"),
        )
        .unwrap();
    engine.start();

    tokio::time::sleep(Duration::from_millis(8_500)).await;

    let starts = starts.lock().unwrap().clone();
    assert_eq!(starts.len(), 4, "attempts at ~1s, ~2s, ~4s, ~8s");
    let gaps: Vec<Duration> = starts.windows(2).map(|w| w[1] - w[0]).collect();
    for (gap, expected) in gaps.iter().zip([1u64, 2, 4]) {
        let expected = Duration::from_secs(expected);
        assert!(
            *gap >= expected && *gap < expected + Duration::from_millis(50),
            "gap {:?}, expected {:?}",
            gap,
            expected
        );
    }
    assert!(gaps.windows(2).all(|w| w[1] > w[0]));
    assert_eq!(max_running.load(Ordering::SeqCst), 1);
    assert_eq!(engine.executor().consecutive_failures("flaky"), 4);
    assert_eq!(engine.counters()[counters::RECOVERY_FAILURES], 4);
    assert_eq!(engine.recovery_attempts(10).len(), 4);
    assert!(engine.recovery_attempts(10).iter().all(|a| !a.success));

    assert!(engine.stop().await);
}

#[tokio::test(start_paused = true)]
async fn new_episode_recovers_without_inherited_backoff() {
    let engine = engine();
    let runs = Arc::new(AtomicUsize::new(0));
    engine.register_action("restart-db", counting_action(runs.clone(), false));
    engine
        .register_check(
            HealthCheck::new("db", scripted_probe(&[]))
                .with_interval(Duration::from_secs(30))
                .with_threshold(1)
                .with_recovery("restart-db"),
        )
        .unwrap();

    for _ in 0..3 {
        if let Some(handle) = engine
            .handle_result(CheckResult::failed("db", Duration::ZERO, "refused"))
            .recovery
        {
            handle.await.unwrap();
        }
        tokio::time::advance(Duration::from_millis(1_000)).await;
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1, "later attempts are inside the cooldown");

    let reaction = engine.handle_result(CheckResult::healthy("db", Duration::ZERO, "pong"));
    assert_eq!(reaction.resolved_alert.as_deref(), Some("db#1"));
    assert_eq!(engine.executor().consecutive_failures("db"), 0);

    let reaction = engine.handle_result(CheckResult::failed("db", Duration::ZERO, "refused"));
    assert_eq!(reaction.opened_alert.as_deref(), Some("db#2"));
    let outcome = reaction.recovery.expect("new episode runs recovery").await.unwrap();
    assert!(matches!(outcome, RecoveryOutcome::Failed { .. }), "{:?}", outcome);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(engine.recovery_attempts(10).len(), 2);
}

// ============================================================================
// Scenario D: anomaly growth factor
// ============================================================================

fn detector(window: usize) -> AnomalyDetector {
    let config = AnomalyConfig {
        window_size: window,
        growth_factor: 1.2,
        min_prior_average: 0.0,
        limits: BTreeMap::from([("latency.p99_ms".to_string(), 40.0)]),
    };
    AnomalyDetector::new(&config, Duration::from_secs(15))
}

#[test]
fn scenario_d_growth_past_factor_predicts() {
    let d = detector(5);
    for v in [10.0, 10.0, 10.0, 10.0, 10.0, 13.0, 13.0, 13.0, 13.0, 13.0] {
        d.observe(&MetricSample::new("latency.p99_ms", v));
    }

    let predictions = d.predict();
    assert_eq!(predictions.len(), 1);
    let p = &predictions[0];
    assert_eq!(p.metric, "latency.p99_ms");
    assert!((p.growth_ratio - 1.3).abs() < 1e-9);
    assert!(p.probability >= 0.5 && p.probability < 1.0);
    assert!(p.estimated_impact_secs.is_some());
}

#[test]
fn scenario_d_growth_below_factor_is_quiet() {
    let d = detector(5);
    for v in [10.0, 10.0, 10.0, 10.0, 10.0, 11.9, 11.9, 11.9, 11.9, 11.9] {
        d.observe(&MetricSample::new("latency.p99_ms", v));
    }
    assert!(d.predict().is_empty());
}

#[tokio::test]
async fn scenario_d_prediction_triggers_preventive_action() {
    let collector = Arc::new(MetricsCollector::new());
    collector.register_gauge("queue.depth", BTreeMap::new(), GaugeSource::Manual);
    let engine = Engine::new(EngineOptions {
        anomaly: AnomalyConfig {
            window_size: 3,
            growth_factor: 1.2,
            min_prior_average: 0.0,
            limits: BTreeMap::new(),
        },
        collector: collector.clone(),
        ..EngineOptions::default()
    });

    let drains = Arc::new(AtomicUsize::new(0));
    engine.register_action("drain-queue", counting_action(drains.clone(), true));
    engine.bind_preventive(PreventiveConfig {
        metric: "queue.depth".to_string(),
        action: "drain-queue".to_string(),
        min_probability: 0.5,
    });

    for v in [10.0, 10.0, 10.0, 13.0, 13.0] {
        collector.set_gauge("queue.depth", v).unwrap();
        assert!(engine.sample_once().await.is_empty());
    }
    collector.set_gauge("queue.depth", 13.0).unwrap();
    let predictions = engine.sample_once().await;
    assert_eq!(predictions.len(), 1);

    tokio::time::timeout(Duration::from_secs(5), async {
        while drains.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert_eq!(drains.load(Ordering::SeqCst), 1);
    assert_eq!(engine.snapshot().resource_gauges["queue.depth"], 13.0);
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test(start_paused = true)]
async fn concurrent_failures_share_one_recovery() {
    let engine = engine();
    let runs = Arc::new(AtomicUsize::new(0));
    let action = {
        let runs = runs.clone();
        Arc::new(FnAction::new(move |_| {
            runs.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(())
            }
            .boxed()
        }))
    };
    engine.register_action("restart", action);
    engine
        .register_check(
            HealthCheck::new("api", scripted_probe(&[]))
                .with_threshold(1)
                .with_recovery("restart"),
        )
        .unwrap();

    let handles: Vec<_> = (0..10)
        .filter_map(|_| {
            engine
                .handle_result(CheckResult::failed("api", Duration::ZERO, "503"))
                .recovery
        })
        .collect();
    assert_eq!(handles.len(), 10);

    for handle in handles {
        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, RecoveryOutcome::Succeeded { .. }), "{:?}", outcome);
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(engine.active_alerts().len(), 1);
}

#[tokio::test]
async fn success_resolves_exactly_once() {
    let engine = engine();
    engine
        .register_check(HealthCheck::new("cache", scripted_probe(&[])).with_threshold(2))
        .unwrap();

    engine.handle_result(CheckResult::failed("cache", Duration::ZERO, "x"));
    let crossed = engine.handle_result(CheckResult::failed("cache", Duration::ZERO, "x"));
    assert_eq!(crossed.opened_alert.as_deref(), Some("cache#1"));

    let first = engine.handle_result(CheckResult::healthy("cache", Duration::ZERO, "ok"));
    let second = engine.handle_result(CheckResult::healthy("cache", Duration::ZERO, "ok"));
    assert_eq!(first.resolved_alert.as_deref(), Some("cache#1"));
    assert!(second.resolved_alert.is_none());
    assert_eq!(engine.counters()[counters::ALERTS_RESOLVED], 1);
    assert_eq!(engine.tracker().get("cache").unwrap().consecutive_failures, 0);
}

#[tokio::test]
async fn score_drops_as_checks_fail() {
    let engine = engine();
    let names = ["a", "b", "c", "d"];
    for name in names {
        engine
            .register_check(HealthCheck::new(name, scripted_probe(&[])).with_threshold(1).with_alerting(false))
            .unwrap();
        engine.handle_result(CheckResult::healthy(name, Duration::ZERO, "ok"));
    }

    let mut last = engine.snapshot().health_score;
    assert_eq!(last, 100.0);
    for name in names {
        engine.handle_result(CheckResult::failed(name, Duration::ZERO, "down"));
        let score = engine.snapshot().health_score;
        assert!(score < last);
        last = score;
    }
    assert_eq!(last, 0.0);
}

#[tokio::test(start_paused = true)]
async fn check_added_while_running_is_probed() {
    let engine = engine();
    engine.start();
    assert!(engine.is_running());

    let calls = Arc::new(AtomicUsize::new(0));
    engine
        .register_check(
            HealthCheck::new("late", switch_probe(Arc::new(AtomicBool::new(false)), calls.clone()))
                .with_interval(Duration::from_secs(1)),
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    assert!(engine.stop().await);
    assert!(!engine.is_running());
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn stop_waits_for_in_flight_recovery() {
    let settings = EngineSettings {
        shutdown_grace_secs: 60,
        ..EngineSettings::default()
    };
    let engine = Engine::new(EngineOptions {
        settings,
        ..EngineOptions::default()
    });
    let finished = Arc::new(AtomicBool::new(false));
    let action = {
        let finished = finished.clone();
        Arc::new(FnAction::new(move |_| {
            let finished = finished.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                finished.store(true, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        }))
    };
    engine.register_action("slow-restart", action);
    engine
        .register_check(
            HealthCheck::new("svc", scripted_probe(&[]))
                .with_threshold(1)
                .with_recovery("slow-restart"),
        )
        .unwrap();
    engine.start();

    engine.handle_result(CheckResult::failed("svc", Duration::ZERO, "down"));
    tokio::task::yield_now().await;

    assert!(engine.stop().await);
    assert!(finished.load(Ordering::SeqCst));
}
