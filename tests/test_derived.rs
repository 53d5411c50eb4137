mod common;
use common::*;
use neovolt_bridge::derived::{excess_grid_export, house_load, pv_energy_total, pv_power_total, DailyPvEnergy, HouseLoad};
use neovolt_bridge::prelude::*;
use neovolt_bridge::register::{
    BATTERY_POWER, GRID_POWER_TOTAL, PV_AC_POWER_TOTAL, PV_DC_POWER_TOTAL, PV_INVERTER_ENERGY, TOTAL_PV_ENERGY,
};

use chrono::{NaiveDate, Utc};
use std::time::Duration;

fn cache() -> DataCache {
    DataCache::new(Duration::from_secs(600), Duration::from_secs(43200))
}

#[test]
fn pv_total_adds_both_sources() {
    common_setup();

    let cache = cache();
    assert_eq!(pv_power_total(&cache), None);

    cache.put(&PV_DC_POWER_TOTAL, Value::Integer(3000), Utc::now());
    assert_eq!(pv_power_total(&cache), Some(3000.0));

    cache.put(&PV_AC_POWER_TOTAL, Value::Integer(1500), Utc::now());
    assert_eq!(pv_power_total(&cache), Some(4500.0));
}

#[test]
fn house_load_from_all_inputs() {
    common_setup();

    let cache = cache();
    let now = Utc::now();
    cache.put(&PV_DC_POWER_TOTAL, Value::Integer(3000), now);
    cache.put(&BATTERY_POWER, Value::Integer(-1000), now);
    cache.put(&GRID_POWER_TOTAL, Value::Integer(-500), now);

    assert_eq!(
        house_load(&cache),
        Some(HouseLoad {
            watts: 1500.0,
            estimated: false
        })
    );
}

#[test]
fn house_load_needs_two_inputs() {
    common_setup();

    let cache = cache();
    cache.put(&GRID_POWER_TOTAL, Value::Integer(800), Utc::now());
    assert_eq!(house_load(&cache), None);

    cache.put(&BATTERY_POWER, Value::Integer(200), Utc::now());
    assert_eq!(
        house_load(&cache),
        Some(HouseLoad {
            watts: 1000.0,
            estimated: true
        })
    );
}

#[test]
fn negative_house_load_is_excess_export() {
    common_setup();

    // a second inverter on the same meter covers part of the house
    let cache = cache();
    let now = Utc::now();
    cache.put(&PV_DC_POWER_TOTAL, Value::Integer(1000), now);
    cache.put(&BATTERY_POWER, Value::Integer(0), now);
    cache.put(&GRID_POWER_TOTAL, Value::Integer(-2500), now);

    let load = house_load(&cache).unwrap();
    assert_eq!(load.watts, -1500.0);
    assert_eq!(excess_grid_export(&cache), 1500.0);

    cache.put(&GRID_POWER_TOTAL, Value::Integer(500), Utc::now());
    assert_eq!(excess_grid_export(&cache), 0.0);
}

#[test]
fn pv_energy_total_adds_both_counters() {
    common_setup();

    let cache = cache();
    assert_eq!(pv_energy_total(&cache), None);

    cache.put(&TOTAL_PV_ENERGY, Value::Float(1200.5), Utc::now());
    cache.put(&PV_INVERTER_ENERGY, Value::Float(300.25), Utc::now());
    assert_eq!(pv_energy_total(&cache), Some(1500.75));
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
}

#[test]
fn daily_pv_energy_counts_from_first_reading() {
    common_setup();

    let mut subject = DailyPvEnergy::default();
    assert_eq!(subject.today(day(1)), None);

    assert_eq!(subject.update(Some(1000.0), day(1)), Some(0.0));
    assert_eq!(subject.update(Some(1003.456), day(1)), Some(3.46));
    assert_eq!(subject.update(Some(1012.0), day(1)), Some(12.0));

    // new day, new baseline
    assert_eq!(subject.update(Some(1015.0), day(2)), Some(0.0));
    assert_eq!(subject.update(Some(1016.5), day(2)), Some(1.5));
}

#[test]
fn daily_pv_energy_kept_through_outages_and_glitches() {
    common_setup();

    let mut subject = DailyPvEnergy::default();
    subject.update(Some(1000.0), day(1));
    subject.update(Some(1008.0), day(1));

    // counters unavailable
    assert_eq!(subject.update(None, day(1)), Some(8.0));
    // one counter dropped out of the sum
    assert_eq!(subject.update(Some(200.0), day(1)), Some(8.0));
    // back to normal, same baseline
    assert_eq!(subject.update(Some(1010.0), day(1)), Some(10.0));

    // nothing carried into a day without readings
    assert_eq!(subject.update(None, day(2)), None);
}

#[test]
fn daily_pv_energy_rebases_when_nothing_to_keep() {
    common_setup();

    let mut subject = DailyPvEnergy::default();
    subject.update(Some(1000.0), day(1));

    assert_eq!(subject.update(Some(400.0), day(1)), Some(0.0));
    assert_eq!(subject.update(Some(402.0), day(1)), Some(2.0));
}
