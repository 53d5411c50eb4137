use crate::prelude::*;
use crate::modbus::{Connector, TcpConnector, Transport};
use crate::register::GroupLayout;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

const RETRY_DELAY_INITIAL: Duration = Duration::from_millis(500);
const RETRY_DELAY_MAX: Duration = Duration::from_secs(5);

// modbus exceptions worth repeating: acknowledge, server busy
const TRANSIENT_EXCEPTIONS: [u8; 2] = [0x05, 0x06];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Degraded,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConnectionHealth {
    pub state: ConnectionState,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub connects: u64,
}

#[derive(Clone, Debug)]
pub struct LinkSettings {
    pub timeout: Duration,
    pub command_interval: Duration,
    pub write_settle: Duration,
    pub read_retries: u32,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl LinkSettings {
    pub fn from_config(device: &Device) -> Self {
        Self {
            timeout: device.read_timeout(),
            command_interval: device.command_interval(),
            write_settle: device.write_settle(),
            read_retries: device.read_retries(),
            backoff_initial: device.reconnect_backoff_initial(),
            backoff_max: device.reconnect_backoff_max(),
        }
    }
}

struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    not_before: Option<Instant>,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
            not_before: None,
        }
    }

    fn remaining(&self, now: Instant) -> Option<Duration> {
        self.not_before
            .filter(|t| *t > now)
            .map(|t| t - now)
    }

    fn failed(&mut self, now: Instant) -> Duration {
        let wait = self.current;
        self.not_before = Some(now + wait);
        self.current = (self.current * 2).min(self.max);
        wait
    }

    fn reset(&mut self) {
        self.current = self.initial;
        self.not_before = None;
    }
}

struct Link {
    transport: Option<Box<dyn Transport>>,
    backoff: Backoff,
    last_transaction: Option<Instant>,
    settle_until: Option<Instant>,
}

impl Link {
    /// Earliest moment the next transaction may start: the minimum gap after
    /// the last one, or the settle time after a write, whichever is later.
    fn ready_at(&self, command_interval: Duration) -> Option<Instant> {
        let ready = self.last_transaction.map(|t| t + command_interval);
        match (ready, self.settle_until) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

async fn pace(ready: Option<Instant>) {
    if let Some(ready) = ready {
        tokio::time::sleep_until(ready).await;
    }
}

enum Op<'a> {
    Read { address: u16, count: u16 },
    Write { address: u16, values: &'a [u16] },
}

impl Op<'_> {
    async fn run(&self, transport: &mut dyn Transport) -> Result<Vec<u16>, TransportError> {
        match *self {
            Op::Read { address, count } => transport.read_holding_registers(address, count).await,
            Op::Write { address, values: [value] } => {
                transport.write_single_register(address, *value).await?;
                Ok(Vec::new())
            }
            Op::Write { address, values } => {
                transport.write_multiple_registers(address, values).await?;
                Ok(Vec::new())
            }
        }
    }

    fn is_write(&self) -> bool {
        matches!(self, Op::Write { .. })
    }
}

/// Owns the one Modbus link of a device.
///
/// Every transaction runs under `link`, so polls and writes queue behind each
/// other instead of interleaving on the wire. Health is kept outside that lock
/// so it can be read while a transaction is in flight.
pub struct ConnectionManager {
    name: String,
    connector: Box<dyn Connector>,
    settings: LinkSettings,
    link: tokio::sync::Mutex<Link>,
    health: Mutex<ConnectionHealth>,
    closing: AtomicBool,
    channels: Channels,
}

impl ConnectionManager {
    pub fn new(name: &str, connector: Box<dyn Connector>, settings: LinkSettings, channels: Channels) -> Self {
        let backoff = Backoff::new(settings.backoff_initial, settings.backoff_max);

        Self {
            name: name.to_owned(),
            connector,
            settings,
            link: tokio::sync::Mutex::new(Link {
                transport: None,
                backoff,
                last_transaction: None,
                settle_until: None,
            }),
            health: Mutex::new(ConnectionHealth {
                state: ConnectionState::Disconnected,
                consecutive_failures: 0,
                last_success: None,
                connects: 0,
            }),
            closing: AtomicBool::new(false),
            channels,
        }
    }

    pub fn tcp(device: &Device, channels: Channels) -> Self {
        let connector = TcpConnector::new(device.host(), device.port(), device.unit_id(), device.read_timeout());
        Self::new(device.name(), Box::new(connector), LinkSettings::from_config(device), channels)
    }

    pub fn health(&self) -> ConnectionHealth {
        self.health.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.health().state
    }

    /// Opens the link unless it is already up. Honours the reconnect backoff.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let mut link = self.link.lock().await;
        let result = self.ensure_connected(&mut link).await;
        if let Err(e) = &result {
            self.record_failure(e);
        }
        result
    }

    pub async fn read_group(&self, group: &GroupLayout) -> Result<Vec<u16>, TransportError> {
        self.read_registers(group.address, group.count).await
    }

    /// Reads holding registers, retrying transient failures with a doubling delay.
    ///
    /// The link is released while waiting to retry, so queued writes go first.
    pub async fn read_registers(&self, address: u16, count: u16) -> Result<Vec<u16>, TransportError> {
        let op = Op::Read { address, count };
        let mut attempt = 0;
        let mut delay = RETRY_DELAY_INITIAL;

        loop {
            let result = {
                let mut link = self.link.lock().await;
                self.exchange(&mut link, &op).await
            };

            match result {
                Ok(words) => {
                    self.record_success();
                    return Ok(words);
                }
                Err(e) if attempt < self.settings.read_retries && Self::worth_retrying(&e) => {
                    attempt += 1;
                    debug!(
                        "{}: read {:#06x} failed ({}), retry {}/{} in {:?}",
                        self.name, address, e, attempt, self.settings.read_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(RETRY_DELAY_MAX);
                }
                Err(e) => {
                    self.record_failure(&e);
                    return Err(e);
                }
            }
        }
    }

    /// Writes `words` starting at `address`. Never retried: a half-applied
    /// write sequence must be reconciled by reading the device back.
    pub async fn write_registers(&self, address: u16, words: &[u16]) -> Result<(), TransportError> {
        let mut link = self.link.lock().await;

        match self.exchange(&mut link, &Op::Write { address, values: words }).await {
            Ok(_) => {
                debug!("{}: wrote {} registers at {:#06x}", self.name, words.len(), address);
                self.record_success();
                Ok(())
            }
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    /// Drops the current link and opens a new one, respecting backoff.
    pub async fn reconnect(&self) -> Result<(), TransportError> {
        let mut link = self.link.lock().await;
        info!("{}: reconnecting", self.name);
        Self::drop_transport(&mut link).await;

        let result = self.ensure_connected(&mut link).await;
        if let Err(e) = &result {
            warn!("{}: reconnect failed: {}", self.name, e);
        }
        result
    }

    /// Close + reconnect cycle that also clears the failure counter and backoff.
    pub async fn reset(&self) -> Result<(), TransportError> {
        let mut link = self.link.lock().await;
        warn!("{}: resetting connection", self.name);
        Self::drop_transport(&mut link).await;
        link.backoff.reset();
        {
            let mut health = self.health.lock().unwrap_or_else(PoisonError::into_inner);
            health.consecutive_failures = 0;
        }
        self.set_state(ConnectionState::Disconnected);

        let result = self.ensure_connected(&mut link).await;
        if let Err(e) = &result {
            warn!("{}: reset could not reconnect: {}", self.name, e);
        }
        result
    }

    /// Closes the link once any transaction in flight has finished.
    pub async fn close(&self) {
        let mut link = self.link.lock().await;
        Self::drop_transport(&mut link).await;
        self.set_state(ConnectionState::Disconnected);
        info!("{}: connection closed", self.name);
    }

    /// Closes the link for good; later calls fail without touching the network.
    pub async fn shutdown(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.close().await;
    }

    async fn ensure_connected(&self, link: &mut Link) -> Result<(), TransportError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(TransportError::ShuttingDown);
        }
        if link.transport.is_some() {
            return Ok(());
        }
        if let Some(wait) = link.backoff.remaining(Instant::now()) {
            return Err(TransportError::Backoff(wait));
        }

        self.set_state(ConnectionState::Connecting);
        let attempt = match tokio::time::timeout(self.settings.timeout, self.connector.connect()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.settings.timeout)),
        };

        match attempt {
            Ok(transport) => {
                link.transport = Some(transport);
                link.backoff.reset();
                let recovered = {
                    let mut health = self.health.lock().unwrap_or_else(PoisonError::into_inner);
                    health.connects += 1;
                    health.consecutive_failures == 0
                };
                // only a successful exchange clears a degraded link
                self.set_state(if recovered {
                    ConnectionState::Connected
                } else {
                    ConnectionState::Degraded
                });
                Ok(())
            }
            Err(e) => {
                let wait = link.backoff.failed(Instant::now());
                warn!(
                    "{}: connect to {} failed: {}, next attempt in {:?}",
                    self.name,
                    self.connector.peer(),
                    e,
                    wait
                );
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn exchange(&self, link: &mut Link, op: &Op<'_>) -> Result<Vec<u16>, TransportError> {
        self.ensure_connected(link).await?;
        pace(link.ready_at(self.settings.command_interval)).await;

        let timeout = self.settings.timeout;
        let transport = link.transport.as_mut().ok_or(TransportError::NotConnected)?;
        let result = match tokio::time::timeout(timeout, op.run(transport.as_mut())).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        };

        let now = Instant::now();
        link.last_transaction = Some(now);
        if op.is_write() && result.is_ok() {
            link.settle_until = Some(now + self.settings.write_settle);
        }

        if let Err(e) = &result {
            if e.breaks_link() {
                debug!("{}: dropping link after {}", self.name, e);
                link.transport = None;
            }
        }

        result
    }

    async fn drop_transport(link: &mut Link) {
        if let Some(mut transport) = link.transport.take() {
            transport.close().await;
        }
    }

    fn worth_retrying(e: &TransportError) -> bool {
        match e {
            TransportError::Backoff(_) | TransportError::ShuttingDown => false,
            TransportError::Exception { code, .. } => TRANSIENT_EXCEPTIONS.contains(code),
            _ => true,
        }
    }

    fn record_success(&self) {
        {
            let mut health = self.health.lock().unwrap_or_else(PoisonError::into_inner);
            health.consecutive_failures = 0;
            health.last_success = Some(Utc::now());
        }
        self.set_state(ConnectionState::Connected);
    }

    fn record_failure(&self, e: &TransportError) {
        if matches!(e, TransportError::ShuttingDown) {
            return;
        }
        let failures = {
            let mut health = self.health.lock().unwrap_or_else(PoisonError::into_inner);
            health.consecutive_failures += 1;
            health.consecutive_failures
        };
        warn!("{}: transport error: {} ({} consecutive)", self.name, e, failures);
        self.set_state(ConnectionState::Degraded);
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = {
            let mut health = self.health.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut health.state, state)
        };

        if previous != state {
            debug!("{}: connection {:?} -> {:?}", self.name, previous, state);
            self.channels.publish(ChannelData::ConnectionChanged(state));
        }
    }
}
