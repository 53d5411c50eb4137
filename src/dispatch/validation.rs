use crate::data_cache::DataCache;
use crate::dispatch::DispatchCommand;
use crate::error::ValidationError;
use crate::register;

use std::ops::RangeInclusive;

/// Smallest power a forced dispatch may request.
pub const MIN_POWER_KW: f64 = 0.5;
pub const DURATION_MINUTES: RangeInclusive<u32> = 1..=480;
pub const CHARGE_SOC: RangeInclusive<f64> = 10.0..=100.0;
pub const DISCHARGE_SOC: RangeInclusive<f64> = 4.0..=100.0;

/// Configured power ceilings of a device.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PowerLimits {
    pub max_charge_kw: Option<f64>,
    pub max_discharge_kw: Option<f64>,
}

impl PowerLimits {
    pub fn from_config(device: &crate::config::Device) -> Self {
        Self {
            max_charge_kw: device.max_charge_power_kw(),
            max_discharge_kw: device.max_discharge_power_kw(),
        }
    }
}

/// Accepted engineering range of a writable setting.
///
/// PV capacity is bounded by the configured charge power rather than the
/// register's own ceiling when that is known.
pub fn setting_limits(descriptor: &register::RegisterDescriptor, limits: &PowerLimits) -> Option<(f64, f64)> {
    match (descriptor.name, limits.max_charge_kw) {
        (name, Some(kw)) if name == register::PV_CAPACITY.name => Some((0.0, kw * 1000.0)),
        _ => descriptor.limits,
    }
}

/// SOC band the device itself enforces, as last read from its settings.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SocBand {
    /// Discharging stops at this SOC.
    pub floor: Option<f64>,
    /// Charging stops at this SOC.
    pub ceiling: Option<f64>,
}

impl SocBand {
    pub fn from_cache(cache: &DataCache) -> Self {
        Self {
            floor: cache.last_known_f64(register::DISCHARGING_CUTOFF_SOC.name),
            ceiling: cache.last_known_f64(register::CHARGING_CUTOFF_SOC.name),
        }
    }
}

/// Checks a dispatch command before anything is written for it.
///
/// # Arguments
/// * `command` - The requested dispatch
/// * `limits` - Configured charge/discharge ceilings of the device
/// * `band` - Device-reported SOC cutoffs, where known
///
/// # Returns
/// * `Ok(())` if the command may be sent to the device
/// * `Err(ValidationError)` naming the first parameter that is out of range
pub fn validate_command(command: &DispatchCommand, limits: &PowerLimits, band: &SocBand) -> Result<(), ValidationError> {
    match command {
        DispatchCommand::Normal | DispatchCommand::NoBatteryCharge => Ok(()),
        DispatchCommand::ForceCharge {
            power_kw,
            duration_min,
            target_soc,
        } => {
            validate_power(*power_kw, limits.max_charge_kw, "max_charge_power_kw")?;
            validate_duration(*duration_min)?;
            let max = band.ceiling.map_or(*CHARGE_SOC.end(), |c| c.min(*CHARGE_SOC.end()));
            validate_soc("charge target", *target_soc, *CHARGE_SOC.start(), max)
        }
        DispatchCommand::ForceDischarge {
            power_kw,
            duration_min,
            cutoff_soc,
        } => {
            validate_power(*power_kw, limits.max_discharge_kw, "max_discharge_power_kw")?;
            validate_duration(*duration_min)?;
            validate_discharge_cutoff(*cutoff_soc, band)
        }
        DispatchCommand::DynamicExport {
            export_target_kw,
            cutoff_soc,
        } => {
            if !(export_target_kw.is_finite() && *export_target_kw >= 0.0) {
                return Err(ValidationError::ExportTarget(*export_target_kw));
            }
            if limits.max_discharge_kw.is_none() {
                return Err(ValidationError::MissingLimit("max_discharge_power_kw"));
            }
            validate_discharge_cutoff(*cutoff_soc, band)
        }
    }
}

fn validate_power(value: f64, max: Option<f64>, key: &'static str) -> Result<(), ValidationError> {
    let max = max.ok_or(ValidationError::MissingLimit(key))?;
    // NaN fails the range check
    if !(MIN_POWER_KW..=max).contains(&value) {
        return Err(ValidationError::Power {
            value,
            min: MIN_POWER_KW,
            max,
        });
    }
    Ok(())
}

fn validate_duration(value: u32) -> Result<(), ValidationError> {
    if !DURATION_MINUTES.contains(&value) {
        return Err(ValidationError::Duration {
            value,
            min: *DURATION_MINUTES.start(),
            max: *DURATION_MINUTES.end(),
        });
    }
    Ok(())
}

fn validate_discharge_cutoff(value: f64, band: &SocBand) -> Result<(), ValidationError> {
    let min = band.floor.map_or(*DISCHARGE_SOC.start(), |f| f.max(*DISCHARGE_SOC.start()));
    validate_soc("discharge cutoff", value, min, *DISCHARGE_SOC.end())
}

fn validate_soc(what: &'static str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    if !(min..=max).contains(&value) {
        return Err(ValidationError::Soc { what, value, min, max });
    }
    Ok(())
}
