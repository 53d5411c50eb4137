pub mod block;
pub mod command;
pub mod dynamic_export;
pub mod role_gate;
pub mod validation;

pub use command::{DispatchCommand, DispatchSession};
pub use dynamic_export::{ExportRegulator, SessionLoop, SessionTask, TickContext};
pub use validation::{setting_limits, validate_command, PowerLimits, SocBand};

use crate::prelude::*;
use crate::codec;
use block::DispatchBlock;

use chrono::Utc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Puts dispatch commands onto one device and keeps continuous ones alive.
///
/// `set_mode` calls are serialized on `running`; a new command first stops
/// the loop of the previous one, so no refresh of a superseded mode reaches
/// the device after the new block has been written.
pub struct DispatchController {
    device: String,
    role: Role,
    limits: PowerLimits,
    gain: f64,
    ctx: TickContext,
    channels: Channels,
    running: tokio::sync::Mutex<Option<SessionLoop>>,
    session: RwLock<DispatchSession>,
}

impl DispatchController {
    pub fn new(device: &Device, connection: Arc<ConnectionManager>, cache: DataCache, channels: Channels) -> Self {
        Self {
            device: device.name().to_owned(),
            role: device.role(),
            limits: PowerLimits::from_config(device),
            gain: device.dynamic_export_gain(),
            ctx: TickContext {
                device: device.name().to_owned(),
                connection,
                cache,
                export_interval: device.dynamic_export_interval(),
                pv_switch: Arc::new(AtomicU16::new(block::PV_SWITCH_AUTO)),
            },
            channels,
            running: tokio::sync::Mutex::new(None),
            session: RwLock::new(DispatchSession::normal(Utc::now())),
        }
    }

    /// The dispatch in force. Timed modes read as normal once they have run out.
    pub fn session(&self) -> DispatchSession {
        let session = self.session.read().unwrap_or_else(PoisonError::into_inner).clone();
        if session.is_expired_at(Utc::now()) {
            if let Some(ends_at) = session.ends_at {
                return DispatchSession::normal(ends_at);
            }
        }
        session
    }

    /// Validates `command` and writes it to the device, replacing whatever
    /// dispatch was active. Nothing is written when validation fails.
    ///
    /// If the write fails the previous session stays in force, including its
    /// refresh loop.
    pub async fn set_mode(&self, command: DispatchCommand) -> Result<DispatchSession, Error> {
        role_gate::ensure_host(self.role, &self.device)?;
        validate_command(&command, &self.limits, &SocBand::from_cache(&self.ctx.cache))?;

        let mut running = self.running.lock().await;
        let previous = match running.take() {
            Some(session_loop) => session_loop.stop().await,
            None => None,
        };
        // a new dispatch starts with the PV switch back on auto
        let previous_switch = self.ctx.pv_switch.swap(block::PV_SWITCH_AUTO, Ordering::SeqCst);

        match self.apply(&command).await {
            Ok(task) => {
                let session = DispatchSession::new(command, Utc::now());
                info!("{}: dispatch {}", self.device, session.command);

                *self.session.write().unwrap_or_else(PoisonError::into_inner) = session.clone();
                *running = task.map(|task| SessionLoop::spawn(task, self.ctx.clone()));
                self.channels.publish(ChannelData::DispatchChanged(session.clone()));
                Ok(session)
            }
            Err(e) => {
                warn!("{}: dispatch {} failed: {}", self.device, command, e);
                self.ctx.pv_switch.store(previous_switch, Ordering::SeqCst);
                *running = previous.map(|task| SessionLoop::spawn(task, self.ctx.clone()));
                Err(e)
            }
        }
    }

    /// Returns the device to normal operation.
    pub async fn stop(&self) -> Result<DispatchSession, Error> {
        self.set_mode(DispatchCommand::Normal).await
    }

    /// Stops any refresh loop without writing. The device falls back on its
    /// own once the last hold time runs out.
    pub async fn halt(&self) {
        if let Some(session_loop) = self.running.lock().await.take() {
            session_loop.stop().await;
        }
    }

    /// Opens, closes or hands back to auto the PV input of whatever dispatch
    /// block is active. The block is read from the device and written back
    /// with only the switch changed; refreshes of the running session keep it.
    pub async fn set_pv_switch(&self, value: Value) -> Result<Value, Error> {
        role_gate::ensure_host(self.role, &self.device)?;

        let descriptor = &register::DISPATCH_PV_SWITCH;
        let switch = codec::encode(descriptor, &value).map_err(ValidationError::from)?[0];
        let current = codec::decode(descriptor, &[switch])?;

        let _running = self.running.lock().await;
        let mut words = self.ctx.connection.read_registers(block::ADDRESS, block::LEN as u16).await?;
        match words.get_mut(block::PV_SWITCH_WORD) {
            Some(word) => *word = switch,
            None => {
                return Err(TransportError::Protocol(format!("dispatch block read returned {} words", words.len())).into())
            }
        }

        let previous = self.ctx.pv_switch.swap(switch, Ordering::SeqCst);
        if let Err(e) = self.ctx.connection.write_registers(block::ADDRESS, &words).await {
            self.ctx.pv_switch.store(previous, Ordering::SeqCst);
            return Err(e.into());
        }

        info!("{}: pv switch set to {}", self.device, current);
        self.ctx.cache.put(descriptor, current.clone(), Utc::now());
        Ok(current)
    }

    /// Writes a single settings register after checking it against its limits.
    /// The register is read back into the cache afterwards.
    pub async fn write_setting(&self, name: &str, value: Value) -> Result<(), Error> {
        role_gate::ensure_host(self.role, &self.device)?;

        let descriptor = register::find(name).ok_or_else(|| ValidationError::UnknownSignal(name.to_owned()))?;
        if !descriptor.writable_setting() {
            return Err(ValidationError::ReadOnly(descriptor.name).into());
        }

        if let (Some((min, max)), Some(v)) = (setting_limits(descriptor, &self.limits), value.as_f64()) {
            if !(min..=max).contains(&v) {
                return Err(ValidationError::Setting {
                    signal: descriptor.name,
                    value: v,
                    min,
                    max,
                }
                .into());
            }
        }

        let words = codec::encode(descriptor, &value).map_err(ValidationError::from)?;
        self.ctx.connection.write_registers(descriptor.address, &words).await?;
        info!("{}: {} set to {}", self.device, descriptor.name, value);

        match self
            .ctx
            .connection
            .read_registers(descriptor.address, descriptor.words() as u16)
            .await
        {
            Ok(words) => match codec::decode(descriptor, &words) {
                Ok(readback) => {
                    self.ctx.cache.put(descriptor, readback, Utc::now());
                }
                Err(e) => warn!("{}: read back of {} failed: {}", self.device, descriptor.name, e),
            },
            Err(e) => warn!("{}: read back of {} failed: {}", self.device, descriptor.name, e),
        }

        Ok(())
    }

    /// Writes the block for `command`. Continuous modes hand back the task
    /// that keeps them asserted.
    async fn apply(&self, command: &DispatchCommand) -> Result<Option<SessionTask>, Error> {
        let block = match *command {
            DispatchCommand::Normal => {
                self.write_block(&block::RESET).await?;
                return Ok(None);
            }
            DispatchCommand::ForceCharge {
                power_kw,
                duration_min,
                target_soc,
            } => DispatchBlock::power(-power_kw, target_soc, minutes(duration_min)),
            DispatchCommand::ForceDischarge {
                power_kw,
                duration_min,
                cutoff_soc,
            } => DispatchBlock::power(power_kw, cutoff_soc, minutes(duration_min)),
            DispatchCommand::DynamicExport {
                export_target_kw,
                cutoff_soc,
            } => {
                let regulator = ExportRegulator::new(
                    export_target_kw,
                    cutoff_soc,
                    self.gain,
                    self.limits.max_discharge_kw.unwrap_or(0.0),
                );
                return self.start_task(SessionTask::DynamicExport(regulator)).await;
            }
            DispatchCommand::NoBatteryCharge => return self.start_task(SessionTask::NoBatteryCharge).await,
        };

        self.write_block(&block.encode()?).await?;
        Ok(None)
    }

    async fn start_task(&self, mut task: SessionTask) -> Result<Option<SessionTask>, Error> {
        task.tick(&self.ctx, true).await?;
        Ok(Some(task))
    }

    async fn write_block(&self, words: &[u16]) -> Result<(), Error> {
        self.ctx.connection.write_registers(block::ADDRESS, words).await?;
        Ok(())
    }
}

fn minutes(duration_min: u32) -> std::time::Duration {
    std::time::Duration::from_secs(duration_min as u64 * 60)
}
