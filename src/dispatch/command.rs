use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// A requested battery behaviour with its own parameters.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DispatchCommand {
    Normal,
    ForceCharge {
        power_kw: f64,
        duration_min: u32,
        target_soc: f64,
    },
    ForceDischarge {
        power_kw: f64,
        duration_min: u32,
        cutoff_soc: f64,
    },
    /// Regulates battery power to hold grid export at a target.
    DynamicExport { export_target_kw: f64, cutoff_soc: f64 },
    NoBatteryCharge,
}

impl DispatchCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::ForceCharge { .. } => "force_charge",
            Self::ForceDischarge { .. } => "force_discharge",
            Self::DynamicExport { .. } => "dynamic_export",
            Self::NoBatteryCharge => "no_battery_charge",
        }
    }

    /// Length of a timed mode, None for modes that run until replaced.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::ForceCharge { duration_min, .. } | Self::ForceDischarge { duration_min, .. } => {
                Some(Duration::from_secs(*duration_min as u64 * 60))
            }
            _ => None,
        }
    }

    /// Modes the controller has to keep asserting while they are active.
    pub fn is_continuous(&self) -> bool {
        matches!(self, Self::DynamicExport { .. } | Self::NoBatteryCharge)
    }
}

impl std::fmt::Display for DispatchCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal | Self::NoBatteryCharge => write!(f, "{}", self.name()),
            Self::ForceCharge {
                power_kw,
                duration_min,
                target_soc,
            } => write!(f, "force_charge {}kW for {}min to {}%", power_kw, duration_min, target_soc),
            Self::ForceDischarge {
                power_kw,
                duration_min,
                cutoff_soc,
            } => write!(f, "force_discharge {}kW for {}min down to {}%", power_kw, duration_min, cutoff_soc),
            Self::DynamicExport {
                export_target_kw,
                cutoff_soc,
            } => write!(f, "dynamic_export {}kW down to {}%", export_target_kw, cutoff_soc),
        }
    }
}

/// The dispatch currently in force on a device.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DispatchSession {
    pub command: DispatchCommand,
    pub started_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
}

impl DispatchSession {
    pub fn new(command: DispatchCommand, started_at: DateTime<Utc>) -> Self {
        let ends_at = command
            .duration()
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| started_at + d);

        Self {
            command,
            started_at,
            ends_at,
        }
    }

    pub fn normal(started_at: DateTime<Utc>) -> Self {
        Self::new(DispatchCommand::Normal, started_at)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.ends_at.map(|end| now >= end).unwrap_or(false)
    }
}
