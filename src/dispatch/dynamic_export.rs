use crate::prelude::*;
use crate::dispatch::block::{self, DispatchBlock, CONTINUOUS_HOLD};
use crate::dispatch::validation::MIN_POWER_KW;

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Changes smaller than this are not written unless the refresh is due.
pub const DEBOUNCE_KW: f64 = 0.1;
/// Longest gap between two writes of an unchanged command.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(30);
/// No-battery-charge only needs re-asserting before the device hold runs out.
const HOLD_REFRESH: Duration = Duration::from_secs(CONTINUOUS_HOLD.as_secs() / 2);

/// Closed-loop battery discharge controller holding grid export at a target.
#[derive(Clone, Debug)]
pub struct ExportRegulator {
    pub target_kw: f64,
    pub cutoff_soc: f64,
    pub gain: f64,
    pub max_discharge_kw: f64,
    commanded_kw: f64,
    last_write: Option<Instant>,
    last_sample: Option<DateTime<Utc>>,
}

impl ExportRegulator {
    pub fn new(target_kw: f64, cutoff_soc: f64, gain: f64, max_discharge_kw: f64) -> Self {
        Self {
            target_kw,
            cutoff_soc,
            gain,
            max_discharge_kw,
            commanded_kw: 0.0,
            last_write: None,
            last_sample: None,
        }
    }

    /// Power last written to the device.
    pub fn commanded_kw(&self) -> f64 {
        self.commanded_kw
    }

    /// Next discharge power given the grid meter (`grid_w`, negative while
    /// exporting).
    ///
    /// Export above target only lowers the discharge, down to idle; this mode
    /// never charges the battery. Results under [`MIN_POWER_KW`] become idle.
    pub fn next_power_kw(&self, grid_w: f64) -> f64 {
        let export_kw = -grid_w / 1000.0;
        let error_kw = self.target_kw - export_kw;
        let power = (self.commanded_kw + self.gain * error_kw).clamp(0.0, self.max_discharge_kw);

        if power < MIN_POWER_KW {
            0.0
        } else {
            power
        }
    }

    /// Records the timestamp of a grid reading. Returns false if that reading
    /// was already acted on.
    pub fn take_sample(&mut self, at: DateTime<Utc>) -> bool {
        if self.last_sample.map_or(false, |last| at <= last) {
            return false;
        }
        self.last_sample = Some(at);
        true
    }

    pub fn should_write(&self, power_kw: f64, now: Instant) -> bool {
        match self.last_write {
            None => true,
            Some(at) => {
                (power_kw - self.commanded_kw).abs() >= DEBOUNCE_KW
                    || now.saturating_duration_since(at) >= REFRESH_INTERVAL
            }
        }
    }

    pub fn block(&self, power_kw: f64) -> DispatchBlock {
        DispatchBlock::power(power_kw, self.cutoff_soc, CONTINUOUS_HOLD)
    }

    pub fn commit(&mut self, power_kw: f64, now: Instant) {
        self.commanded_kw = power_kw;
        self.last_write = Some(now);
    }
}

/// State of a continuous session between ticks.
#[derive(Clone, Debug)]
pub enum SessionTask {
    DynamicExport(ExportRegulator),
    NoBatteryCharge,
}

/// What a session tick needs from its device.
#[derive(Clone)]
pub struct TickContext {
    pub device: String,
    pub connection: Arc<ConnectionManager>,
    pub cache: DataCache,
    pub export_interval: Duration,
    /// PV switch written with every block of the session.
    pub pv_switch: Arc<AtomicU16>,
}

impl TickContext {
    pub fn pv_switch(&self) -> u16 {
        self.pv_switch.load(Ordering::SeqCst)
    }
}

impl SessionTask {
    fn period(&self, ctx: &TickContext) -> Duration {
        match self {
            Self::DynamicExport(_) => ctx.export_interval,
            Self::NoBatteryCharge => HOLD_REFRESH,
        }
    }

    /// One control step. The first step of a session always writes, so it
    /// replaces whatever dispatch the device was running.
    pub async fn tick(&mut self, ctx: &TickContext, first: bool) -> Result<(), Error> {
        match self {
            Self::NoBatteryCharge => {
                let words = DispatchBlock::no_battery_charge(CONTINUOUS_HOLD)
                    .with_pv_switch(ctx.pv_switch())
                    .encode()?;
                ctx.connection.write_registers(block::ADDRESS, &words).await?;
                Ok(())
            }
            Self::DynamicExport(regulator) => {
                let grid = ctx
                    .cache
                    .get(register::GRID_POWER_TOTAL.name)
                    .filter(|r| !r.is_stale)
                    .and_then(|r| r.value.as_f64().map(|w| (w, r.updated_at)));

                let power_kw = match grid {
                    Some((grid_w, at)) if regulator.take_sample(at) => regulator.next_power_kw(grid_w),
                    // nothing new to correct on, only refresh the hold
                    Some(_) => regulator.commanded_kw(),
                    None if first => 0.0,
                    None => {
                        warn!("{}: no fresh grid power, holding {} kW", ctx.device, regulator.commanded_kw());
                        return Ok(());
                    }
                };

                let now = Instant::now();
                if !first && !regulator.should_write(power_kw, now) {
                    trace!("{}: export power {} kW unchanged", ctx.device, power_kw);
                    return Ok(());
                }

                let words = regulator.block(power_kw).with_pv_switch(ctx.pv_switch()).encode()?;
                ctx.connection.write_registers(block::ADDRESS, &words).await?;
                debug!(
                    "{}: export target {} kW, battery {} -> {} kW",
                    ctx.device,
                    regulator.target_kw,
                    regulator.commanded_kw(),
                    power_kw
                );
                regulator.commit(power_kw, now);
                Ok(())
            }
        }
    }
}

/// Handle on a running session loop.
pub struct SessionLoop {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<SessionTask>,
}

impl SessionLoop {
    pub fn spawn(task: SessionTask, ctx: TickContext) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(task, ctx, cancel.clone()));
        Self { cancel, handle }
    }

    /// Cancels the loop and waits until it can no longer write. Gives back the
    /// session state unless the task died.
    pub async fn stop(self) -> Option<SessionTask> {
        self.cancel.cancel();
        match self.handle.await {
            Ok(task) => Some(task),
            Err(e) => {
                error!("session loop failed: {}", e);
                None
            }
        }
    }
}

async fn run(mut task: SessionTask, ctx: TickContext, cancel: CancellationToken) -> SessionTask {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(task.period(&ctx)) => {}
        }

        // a write in progress completes even if cancellation arrives meanwhile
        if let Err(e) = task.tick(&ctx, false).await {
            warn!("{}: dispatch refresh failed: {}", ctx.device, e);
        }
    }

    debug!("{}: session loop stopped", ctx.device);
    task
}
