mod common;
use common::*;
use neovolt_bridge::connection::LinkSettings;
use neovolt_bridge::prelude::*;

use std::time::{Duration, Instant};

fn settings() -> LinkSettings {
    LinkSettings::from_config(&Factory::device())
}

fn manager(mock: &MockDevice, settings: LinkSettings) -> ConnectionManager {
    ConnectionManager::new("battery", Box::new(mock.connector()), settings, Channels::new())
}

#[tokio::test]
async fn reads_registers() {
    common_setup();

    let mock = MockDevice::default();
    mock.set_words(0x0100, &[10, 20, 30]);
    let subject = manager(&mock, settings());

    assert_eq!(subject.read_registers(0x0100, 3).await.unwrap(), vec![10, 20, 30]);
    assert_eq!(subject.state(), ConnectionState::Connected);
    assert_eq!(mock.connects(), 1);

    // link is reused
    subject.read_registers(0x0100, 1).await.unwrap();
    assert_eq!(mock.connects(), 1);
}

#[tokio::test]
async fn consecutive_failures_degrade_and_success_clears() {
    common_setup();

    let mock = MockDevice::default();
    let subject = manager(&mock, settings());
    mock.fail_reads(5);

    for _ in 0..5 {
        assert!(subject.read_registers(0x0100, 1).await.is_err());
    }
    let health = subject.health();
    assert_eq!(health.consecutive_failures, 5);
    assert_eq!(health.state, ConnectionState::Degraded);
    assert_eq!(health.last_success, None);

    subject.read_registers(0x0100, 1).await.unwrap();
    let health = subject.health();
    assert_eq!(health.consecutive_failures, 0);
    assert_eq!(health.state, ConnectionState::Connected);
    assert!(health.last_success.is_some());
    // every failure dropped the link
    assert_eq!(mock.connects(), 6);
}

#[tokio::test]
async fn reads_are_retried() {
    common_setup();

    let mock = MockDevice::default();
    let subject = manager(
        &mock,
        LinkSettings {
            read_retries: 2,
            ..settings()
        },
    );
    mock.fail_reads(2);

    assert!(subject.read_registers(0x0100, 1).await.is_ok());
    assert_eq!(mock.reads(), 3);
    assert_eq!(subject.health().consecutive_failures, 0);
}

#[test]
fn transactions_can_run_on_spawned_tasks() {
    common_setup();

    fn assert_send<T: Send>(_: &T) {}

    let mock = MockDevice::default();
    let subject = manager(&mock, settings());

    let read = subject.read_registers(0x0100, 1);
    assert_send(&read);
    let write = subject.write_registers(0x0100, &[1]);
    assert_send(&write);
    let reset = subject.reset();
    assert_send(&reset);
}

#[tokio::test]
async fn writes_go_ahead_of_a_read_retry() {
    common_setup();

    let mock = MockDevice::default();
    let subject = manager(
        &mock,
        LinkSettings {
            read_retries: 1,
            ..settings()
        },
    );
    mock.fail_reads(1);

    let read = async {
        let words = subject.read_registers(0x0100, 1).await?;
        Ok::<_, TransportError>((words, Instant::now()))
    };
    let write = async {
        // let the read fail first and start waiting on its retry
        tokio::time::sleep(Duration::from_millis(100)).await;
        subject.write_registers(0x0100, &[7]).await?;
        Ok::<_, TransportError>(Instant::now())
    };

    let ((words, read_done), write_done) = futures::try_join!(read, write).unwrap();
    assert!(write_done < read_done);
    assert_eq!(words, vec![7]);
    assert_eq!(mock.writes(), vec![(0x0100, vec![7])]);
}

#[tokio::test]
async fn writes_are_not_retried() {
    common_setup();

    let mock = MockDevice::default();
    let subject = manager(
        &mock,
        LinkSettings {
            read_retries: 2,
            ..settings()
        },
    );
    mock.fail_writes(true);

    assert!(subject.write_registers(0x0880, &[1, 2, 3]).await.is_err());
    assert!(mock.writes().is_empty());
    assert_eq!(subject.health().consecutive_failures, 1);

    mock.fail_writes(false);
    subject.write_registers(0x0880, &[1, 2, 3]).await.unwrap();
    assert_eq!(mock.writes(), vec![(0x0880, vec![1, 2, 3])]);
}

#[tokio::test]
async fn transactions_are_paced() {
    common_setup();

    let mock = MockDevice::default();
    let subject = manager(
        &mock,
        LinkSettings {
            command_interval: Duration::from_millis(100),
            ..settings()
        },
    );

    let started = Instant::now();
    let sf = async {
        subject.read_registers(0x0100, 1).await?;
        Ok::<(), anyhow::Error>(())
    };
    let tf = async {
        subject.read_registers(0x0200, 1).await?;
        Ok::<(), anyhow::Error>(())
    };
    futures::try_join!(tf, sf).unwrap();

    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(mock.reads(), 2);
}

#[tokio::test]
async fn connect_failures_back_off() {
    common_setup();

    let mock = MockDevice::default();
    let subject = manager(
        &mock,
        LinkSettings {
            backoff_initial: Duration::from_secs(60),
            backoff_max: Duration::from_secs(120),
            ..settings()
        },
    );
    mock.refuse_connects(true);

    assert!(matches!(subject.connect().await, Err(TransportError::Io(_))));
    assert!(matches!(subject.connect().await, Err(TransportError::Backoff(_))));
    assert_eq!(subject.state(), ConnectionState::Degraded);

    // a reset clears the backoff
    mock.refuse_connects(false);
    subject.reset().await.unwrap();
    assert_eq!(mock.connects(), 1);
    assert_eq!(subject.health().consecutive_failures, 0);
    assert_eq!(subject.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn reconnect_opens_a_new_link() {
    common_setup();

    let mock = MockDevice::default();
    let subject = manager(&mock, settings());

    subject.connect().await.unwrap();
    subject.reconnect().await.unwrap();
    assert_eq!(mock.connects(), 2);
}

#[tokio::test]
async fn shutdown_refuses_further_work() {
    common_setup();

    let mock = MockDevice::default();
    let subject = manager(&mock, settings());
    subject.connect().await.unwrap();

    subject.shutdown().await;
    assert_eq!(subject.state(), ConnectionState::Disconnected);
    assert!(matches!(
        subject.read_registers(0x0100, 1).await,
        Err(TransportError::ShuttingDown)
    ));
    assert_eq!(mock.reads(), 0);
}

#[tokio::test]
async fn publishes_state_changes() {
    common_setup();

    let mock = MockDevice::default();
    let channels = Channels::new();
    let mut events = channels.from_device.subscribe();
    let subject = ConnectionManager::new("battery", Box::new(mock.connector()), settings(), channels);

    subject.connect().await.unwrap();

    let mut states = Vec::new();
    while let Ok(ChannelData::ConnectionChanged(state)) = events.try_recv() {
        states.push(state);
    }
    assert_eq!(states, vec![ConnectionState::Connecting, ConnectionState::Connected]);
}
