use crate::prelude::*;
use crate::codec;
use crate::derived::{self, DailyPvEnergy, HouseLoad};
use crate::modbus::Connector;
use crate::recovery::{RecoveryAction, RecoveryState, RecoverySupervisor};
use crate::scheduler::{PollReport, PollSettings, PollingScheduler};
use crate::stats::DeviceStats;

use chrono::{Local, Utc};
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

const STALENESS_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const STOP_TIMEOUT: Duration = Duration::from_secs(15);
const REPORT_QUEUE: usize = 64;

/// One battery inverter: its link, pollers, cache, recovery and dispatch.
///
/// Cloning gives another handle onto the same device.
#[derive(Clone)]
pub struct Inverter {
    name: String,
    role: Role,
    poll_settings: PollSettings,
    channels: Channels,
    connection: Arc<ConnectionManager>,
    cache: DataCache,
    dispatch: Arc<DispatchController>,
    recovery: Arc<Mutex<RecoverySupervisor>>,
    stats: Arc<Mutex<DeviceStats>>,
    pv_energy: Arc<Mutex<DailyPvEnergy>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Inverter {
    pub fn new(device: &Device) -> Self {
        let channels = Channels::new();
        let connection = ConnectionManager::tcp(device, channels.clone());
        Self::build(device, connection, channels)
    }

    /// Same as [`Inverter::new`] but talks through `connector` instead of TCP.
    pub fn with_connector(device: &Device, connector: Box<dyn Connector>) -> Self {
        let channels = Channels::new();
        let connection = ConnectionManager::new(
            device.name(),
            connector,
            crate::connection::LinkSettings::from_config(device),
            channels.clone(),
        );
        Self::build(device, connection, channels)
    }

    fn build(device: &Device, connection: ConnectionManager, channels: Channels) -> Self {
        let connection = Arc::new(connection);
        let cache = DataCache::from_config(device);
        let dispatch = DispatchController::new(device, connection.clone(), cache.clone(), channels.clone());

        Self {
            name: device.name().to_owned(),
            role: device.role(),
            poll_settings: PollSettings::from_config(device),
            channels,
            connection,
            cache,
            dispatch: Arc::new(dispatch),
            recovery: Arc::new(Mutex::new(RecoverySupervisor::from_config(device))),
            stats: Arc::new(Mutex::new(DeviceStats::default())),
            pv_energy: Arc::new(Mutex::new(DailyPvEnergy::default())),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Starts polling. Returns straight away; the link is opened by the
    /// first poll and reopened by recovery as needed.
    pub fn start(&self) {
        info!("Starting inverter {} ({})", self.name, self.role);

        let (results_tx, results_rx) = mpsc::channel(REPORT_QUEUE);
        let shutdown = self.channels.to_device.subscribe();

        let mut handles = PollingScheduler::new(
            &self.name,
            self.connection.clone(),
            self.channels.clone(),
            self.poll_settings,
            results_tx,
        )
        .spawn();
        handles.push(tokio::spawn(self.clone().ingest(results_rx, shutdown)));

        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).extend(handles);
    }

    /// Stops pollers and any dispatch refresh, then closes the link.
    ///
    /// Whatever dispatch the device is running stays in force until its hold
    /// time runs out; call [`Inverter::stop_dispatch`] first to end it.
    pub async fn stop(&self) {
        info!("Stopping inverter {}...", self.name);

        let _ = self.channels.to_device.send(ChannelData::Shutdown);
        self.dispatch.halt().await;

        let handles = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for mut handle in handles {
            match tokio::time::timeout(STOP_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("{}: task failed: {}", self.name, e),
                Err(_) => {
                    warn!("{}: task did not stop within {:?}, aborting", self.name, STOP_TIMEOUT);
                    handle.abort();
                }
            }
        }

        self.connection.shutdown().await;
        self.stats().print_summary(&self.name);
    }

    pub fn get_signal(&self, name: &str) -> Option<SignalReading> {
        self.cache.get(name)
    }

    pub fn signals(&self) -> Vec<SignalReading> {
        self.cache.snapshot()
    }

    pub fn pv_power_total(&self) -> Option<f64> {
        derived::pv_power_total(&self.cache)
    }

    pub fn house_load(&self) -> Option<HouseLoad> {
        derived::house_load(&self.cache)
    }

    pub fn excess_grid_export(&self) -> f64 {
        derived::excess_grid_export(&self.cache)
    }

    /// PV energy produced since the first reading today.
    pub fn pv_energy_today(&self) -> Option<f64> {
        self.pv_energy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .today(Local::now().date_naive())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection_health(&self) -> ConnectionHealth {
        self.connection.health()
    }

    pub fn recovery_state(&self) -> RecoveryState {
        self.recovery.lock().unwrap_or_else(PoisonError::into_inner).state()
    }

    pub fn cache(&self) -> &DataCache {
        &self.cache
    }

    /// Events published by this device.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelData> {
        self.channels.from_device.subscribe()
    }

    pub fn stats(&self) -> DeviceStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub async fn set_dispatch(&self, command: DispatchCommand) -> Result<DispatchSession, Error> {
        self.dispatch.set_mode(command).await
    }

    pub async fn stop_dispatch(&self) -> Result<DispatchSession, Error> {
        self.dispatch.stop().await
    }

    pub fn dispatch_session(&self) -> DispatchSession {
        self.dispatch.session()
    }

    pub async fn write_setting(&self, name: &str, value: Value) -> Result<(), Error> {
        self.dispatch.write_setting(name, value).await
    }

    pub async fn set_pv_switch(&self, value: Value) -> Result<Value, Error> {
        self.dispatch.set_pv_switch(value).await
    }

    /// Single read of the battery SOC, used to check a device is reachable.
    pub async fn probe(&self) -> Result<Value, Error> {
        let descriptor = &register::BATTERY_SOC;
        let words = self
            .connection
            .read_registers(descriptor.address, descriptor.words() as u16)
            .await?;
        Ok(codec::decode(descriptor, &words)?)
    }

    /// One-line summary for the periodic status log.
    pub fn status_line(&self) -> String {
        let soc = self
            .cache
            .get(register::BATTERY_SOC.name)
            .map(|r| format!("{}{}{}", r.value, r.unit, if r.is_stale { " (stale)" } else { "" }))
            .unwrap_or_else(|| "-".to_string());
        let stats = self.stats();

        format!(
            "{}: link {:?}, recovery {:?}, polls {}/{} failed, {} signals, soc {}, dispatch {}",
            self.name,
            self.connection_state(),
            self.recovery_state(),
            stats.polls_failed,
            stats.polls_ok + stats.polls_failed,
            self.cache.len(),
            soc,
            self.dispatch_session().command
        )
    }

    /// Everything known about the device, for logging or export.
    pub fn status_json(&self) -> serde_json::Value {
        json!({
            "name": self.name,
            "role": self.role,
            "connection": self.connection_health(),
            "recovery": self.recovery_state(),
            "dispatch": self.dispatch_session(),
            "pv_power_total": self.pv_power_total(),
            "house_load": self.house_load(),
            "excess_grid_export": self.excess_grid_export(),
            "pv_energy_today": self.pv_energy_today(),
            "signals": self.signals(),
        })
    }

    async fn ingest(self, mut results: mpsc::Receiver<PollReport>, mut shutdown: broadcast::Receiver<ChannelData>) {
        let mut staleness = tokio::time::interval(STALENESS_CHECK_INTERVAL);

        loop {
            tokio::select! {
                report = results.recv() => match report {
                    Some(report) => self.handle_report(report).await,
                    None => break,
                },
                _ = staleness.tick() => self.check_staleness().await,
                message = shutdown.recv() => match message {
                    Ok(ChannelData::Shutdown) | Err(broadcast::error::RecvError::Closed) => break,
                    _ => {}
                },
            }
        }

        debug!("{}: ingest stopped", self.name);
    }

    async fn handle_report(&self, report: PollReport) {
        let action = match report.outcome {
            Ok(values) => {
                let mut stored = 0;
                let mut dropped = 0;
                for (descriptor, value) in values {
                    if self.cache.put(descriptor, value, report.at) {
                        stored += 1;
                    } else {
                        dropped += 1;
                    }
                }

                {
                    let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
                    stats.polls_ok += 1;
                    stats.values_stored += stored;
                    stats.out_of_order += dropped;
                    stats.decode_errors += report.decode_errors as u64;
                }
                self.update_pv_energy();

                self.supervise(|s| s.record_success())
            }
            Err(TransportError::ShuttingDown) => return,
            Err(e) => {
                debug!("{}: poll of {:?} failed: {}", self.name, report.group, e);
                {
                    let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
                    stats.polls_failed += 1;
                    stats.last_error = Some(e.to_string());
                }

                self.supervise(|s| s.record_failure(Instant::now()))
            }
        };

        self.recover(action).await;
    }

    fn update_pv_energy(&self) {
        let total = derived::pv_energy_total(&self.cache);
        self.pv_energy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .update(total, Local::now().date_naive());
    }

    async fn check_staleness(&self) {
        let all_stale = {
            let window = self.recovery.lock().unwrap_or_else(PoisonError::into_inner).staleness_window();
            self.cache.all_stale_at(window, Utc::now())
        };
        let action = self.supervise(|s| s.check_staleness(all_stale, Instant::now()));
        self.recover(action).await;
    }

    /// Feeds the supervisor and publishes any state change it made.
    fn supervise(&self, f: impl FnOnce(&mut RecoverySupervisor) -> RecoveryAction) -> RecoveryAction {
        let (before, after, action) = {
            let mut supervisor = self.recovery.lock().unwrap_or_else(PoisonError::into_inner);
            let before = supervisor.state();
            let action = f(&mut supervisor);
            (before, supervisor.state(), action)
        };

        if before != after {
            info!("{}: recovery {:?} -> {:?}", self.name, before, after);
            self.channels.publish(ChannelData::RecoveryChanged(after));
        }
        action
    }

    async fn recover(&self, action: RecoveryAction) {
        let result = match action {
            RecoveryAction::None => return,
            RecoveryAction::Reconnect => {
                self.stats.lock().unwrap_or_else(PoisonError::into_inner).reconnects += 1;
                self.connection.reconnect().await
            }
            RecoveryAction::Reset => {
                self.stats.lock().unwrap_or_else(PoisonError::into_inner).resets += 1;
                self.connection.reset().await
            }
        };

        if let Err(e) = result {
            debug!("{}: {:?} did not restore the link: {}", self.name, action, e);
        }
    }
}
