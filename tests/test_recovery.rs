mod common;
use common::*;
use neovolt_bridge::prelude::*;
use neovolt_bridge::recovery::{RecoveryAction, RecoveryState, RecoverySupervisor};

use std::time::{Duration, Instant};

fn supervisor() -> RecoverySupervisor {
    RecoverySupervisor::new(5, Duration::from_secs(600), Duration::from_secs(300))
}

#[test]
fn reconnects_at_threshold() {
    common_setup();

    let mut subject = supervisor();
    let now = Instant::now();

    for _ in 0..4 {
        assert_eq!(subject.record_failure(now), RecoveryAction::None);
    }
    assert_eq!(subject.state(), RecoveryState::Healthy);

    assert_eq!(subject.record_failure(now), RecoveryAction::Reconnect);
    assert_eq!(subject.state(), RecoveryState::Watching);
}

#[test]
fn success_resets_counter() {
    common_setup();

    let mut subject = supervisor();
    let now = Instant::now();

    for _ in 0..4 {
        subject.record_failure(now);
    }
    subject.record_success();
    assert_eq!(subject.consecutive_failures(), 0);

    for _ in 0..4 {
        assert_eq!(subject.record_failure(now), RecoveryAction::None);
    }
    assert_eq!(subject.state(), RecoveryState::Healthy);
}

#[test]
fn escalates_to_reset() {
    common_setup();

    let mut subject = supervisor();
    let now = Instant::now();

    let actions: Vec<RecoveryAction> = (0..10).map(|_| subject.record_failure(now)).collect();
    assert_eq!(actions[4], RecoveryAction::Reconnect);
    assert_eq!(actions[9], RecoveryAction::Reset);
    assert_eq!(subject.state(), RecoveryState::Recovering);
    assert_eq!(subject.resets(), 1);
    assert_eq!(subject.consecutive_failures(), 0);
}

#[test]
fn stale_data_forces_reset_while_watching() {
    common_setup();

    let mut subject = supervisor();
    let now = Instant::now();

    // healthy devices are left alone even if quiet
    assert_eq!(subject.check_staleness(true, now), RecoveryAction::None);

    for _ in 0..5 {
        subject.record_failure(now);
    }
    assert_eq!(subject.check_staleness(false, now), RecoveryAction::None);
    assert_eq!(subject.check_staleness(true, now), RecoveryAction::Reset);
}

#[test]
fn repeated_resets_respect_cooldown() {
    common_setup();

    let mut subject = supervisor();
    let now = Instant::now();

    for _ in 0..10 {
        subject.record_failure(now);
    }
    assert_eq!(subject.state(), RecoveryState::Recovering);

    for _ in 0..5 {
        assert_eq!(subject.record_failure(now + Duration::from_secs(60)), RecoveryAction::None);
    }
    assert_eq!(subject.check_staleness(true, now + Duration::from_secs(60)), RecoveryAction::None);

    assert_eq!(
        subject.check_staleness(true, now + Duration::from_secs(301)),
        RecoveryAction::Reset
    );
    assert_eq!(subject.resets(), 2);

    subject.record_success();
    assert_eq!(subject.state(), RecoveryState::Healthy);
}

#[tokio::test]
async fn failing_polls_reconnect_then_recover() {
    common_setup();

    let (inverter, mock) = Factory::inverter(&Factory::device());
    let mut events = inverter.subscribe();
    mock.fail_reads(5);

    inverter.start();

    let observe = async {
        let mut degraded = false;
        let mut watching = false;
        loop {
            match events.recv().await? {
                ChannelData::ConnectionChanged(ConnectionState::Degraded) => degraded = true,
                ChannelData::RecoveryChanged(RecoveryState::Watching) => watching = true,
                ChannelData::RecoveryChanged(RecoveryState::Healthy) if watching => break,
                _ => {}
            }
        }
        Ok::<bool, anyhow::Error>(degraded)
    };

    let degraded = tokio::time::timeout(Duration::from_secs(5), observe)
        .await
        .unwrap()
        .unwrap();
    assert!(degraded);

    assert_eq!(inverter.stats().reconnects, 1);
    assert_eq!(inverter.stats().polls_failed, 5);
    // first connect, one per dropped link, and the forced reconnect
    assert!(mock.connects() > 5);
    assert_eq!(inverter.recovery_state(), RecoveryState::Healthy);

    let health = inverter.connection_health();
    assert_eq!(health.state, ConnectionState::Connected);
    assert_eq!(health.consecutive_failures, 0);

    inverter.stop().await;
}
