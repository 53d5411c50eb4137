//! Values computed from several cached signals.

use crate::prelude::*;
use crate::data_cache::DataCache;
use crate::register::{
    BATTERY_POWER, GRID_POWER_TOTAL, PV_AC_POWER_TOTAL, PV_DC_POWER_TOTAL, PV_INVERTER_ENERGY, TOTAL_PV_ENERGY,
};

use chrono::NaiveDate;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct HouseLoad {
    /// Negative when this inverter's sources cover more than the house uses,
    /// which is normal with several inverters on one meter.
    pub watts: f64,
    /// Set when one of the three inputs was missing and taken as zero.
    pub estimated: bool,
}

impl HouseLoad {
    /// Power this inverter pushes out beyond the house load.
    pub fn excess_grid_export(&self) -> f64 {
        (-self.watts).max(0.0)
    }
}

/// PV production over both the DC strings and any AC-coupled inverter.
/// None until at least one of them is known.
pub fn pv_power_total(cache: &DataCache) -> Option<f64> {
    let dc = cache.fresh_f64(PV_DC_POWER_TOTAL.name);
    let ac = cache.fresh_f64(PV_AC_POWER_TOTAL.name);

    match (dc, ac) {
        (None, None) => None,
        (dc, ac) => Some(dc.unwrap_or(0.0) + ac.unwrap_or(0.0)),
    }
}

/// House consumption as PV + battery discharge + grid import.
///
/// Needs at least two of the three inputs to be fresh.
pub fn house_load(cache: &DataCache) -> Option<HouseLoad> {
    let inputs = [
        pv_power_total(cache),
        cache.fresh_f64(BATTERY_POWER.name),
        cache.fresh_f64(GRID_POWER_TOTAL.name),
    ];

    let known = inputs.iter().flatten().count();
    if known < 2 {
        return None;
    }

    let watts = inputs.iter().flatten().sum::<f64>();
    if watts < 0.0 {
        debug!("house load {}W is negative, exporting beyond own load", watts);
    }

    Some(HouseLoad {
        watts,
        estimated: known < inputs.len(),
    })
}

/// Zero unless the house load is negative.
pub fn excess_grid_export(cache: &DataCache) -> f64 {
    house_load(cache).map_or(0.0, |load| load.excess_grid_export())
}

/// Lifetime PV energy of the DC strings plus the AC-coupled inverter meter.
pub fn pv_energy_total(cache: &DataCache) -> Option<f64> {
    let dc = cache.last_known_f64(TOTAL_PV_ENERGY.name);
    let ac = cache.last_known_f64(PV_INVERTER_ENERGY.name);

    match (dc, ac) {
        (None, None) => None,
        (dc, ac) => Some(dc.unwrap_or(0.0) + ac.unwrap_or(0.0)).filter(|total| *total > 0.0),
    }
}

/// PV energy produced today, from a baseline of the lifetime counters taken
/// at the first reading of each day.
///
/// While the counters are unavailable, or read lower than the baseline, the
/// last good figure of the day is kept.
#[derive(Clone, Debug, Default)]
pub struct DailyPvEnergy {
    day: Option<NaiveDate>,
    baseline_kwh: f64,
    today_kwh: f64,
}

impl DailyPvEnergy {
    pub fn update(&mut self, total_kwh: Option<f64>, day: NaiveDate) -> Option<f64> {
        let total_kwh = match total_kwh {
            Some(total) => total,
            None => return self.today(day),
        };

        if self.day != Some(day) {
            info!("pv energy baseline for {} set at {} kWh", day, total_kwh);
            self.day = Some(day);
            self.baseline_kwh = total_kwh;
            self.today_kwh = 0.0;
            return Some(0.0);
        }

        let produced = total_kwh - self.baseline_kwh;
        if produced < 0.0 {
            warn!(
                "pv energy counter went backwards ({} kWh, baseline {} kWh)",
                total_kwh, self.baseline_kwh
            );
            if self.today_kwh <= 0.0 {
                self.baseline_kwh = total_kwh;
            }
            return Some(self.today_kwh);
        }

        self.today_kwh = (produced * 100.0).round() / 100.0;
        Some(self.today_kwh)
    }

    /// Today's figure, None before the first reading of `day`.
    pub fn today(&self, day: NaiveDate) -> Option<f64> {
        (self.day == Some(day)).then_some(self.today_kwh)
    }
}
