mod common;
use common::*;
use neovolt_bridge::prelude::*;
use neovolt_bridge::register::{BATTERY_SOC, GRID_POWER_TOTAL};

use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;

fn cache() -> DataCache {
    DataCache::new(Duration::from_secs(600), Duration::from_secs(43200))
}

#[test]
fn fresh_value() {
    common_setup();

    let cache = cache();
    let now = Utc::now();
    assert!(cache.put(&BATTERY_SOC, Value::Float(55.5), now));

    let reading = cache.get_at("battery_soc", now).unwrap();
    assert_eq!(reading.value, Value::Float(55.5));
    assert_eq!(reading.unit, "%");
    assert!(!reading.is_stale);
}

#[test]
fn stale_after_ten_minutes_but_still_served() {
    common_setup();

    let cache = cache();
    let then = Utc::now();
    cache.put(&BATTERY_SOC, Value::Float(40.0), then);

    let reading = cache.get_at("battery_soc", then + ChronoDuration::minutes(11)).unwrap();
    assert!(reading.is_stale);
    assert_eq!(reading.value, Value::Float(40.0));
}

#[test]
fn unavailable_after_twelve_hours() {
    common_setup();

    let cache = cache();
    let then = Utc::now();
    cache.put(&BATTERY_SOC, Value::Float(40.0), then);

    assert_eq!(cache.get_at("battery_soc", then + ChronoDuration::hours(13)), None);
}

#[test]
fn unknown_signal() {
    common_setup();

    assert_eq!(cache().get("no_such_signal"), None);
}

#[test]
fn older_update_is_ignored() {
    common_setup();

    let cache = cache();
    let now = Utc::now();
    assert!(cache.put(&GRID_POWER_TOTAL, Value::Integer(100), now));
    assert!(!cache.put(&GRID_POWER_TOTAL, Value::Integer(200), now - ChronoDuration::seconds(5)));

    assert_eq!(cache.get("grid_power_total").unwrap().value, Value::Integer(100));
}

#[test]
fn fresh_and_last_known() {
    common_setup();

    let cache = cache();
    cache.put(&GRID_POWER_TOTAL, Value::Integer(-800), Utc::now() - ChronoDuration::minutes(20));

    assert_eq!(cache.fresh_f64("grid_power_total"), None);
    assert_eq!(cache.last_known_f64("grid_power_total"), Some(-800.0));
}

#[test]
fn all_stale() {
    common_setup();

    let cache = cache();
    let now = Utc::now();
    let window = Duration::from_secs(600);
    assert!(!cache.all_stale_at(window, now));

    cache.put(&BATTERY_SOC, Value::Float(1.0), now);
    assert!(!cache.all_stale_at(window, now + ChronoDuration::minutes(5)));
    assert!(cache.all_stale_at(window, now + ChronoDuration::minutes(11)));
}

#[test]
fn snapshot_is_sorted() {
    common_setup();

    let cache = cache();
    let now = Utc::now();
    cache.put(&GRID_POWER_TOTAL, Value::Integer(1), now);
    cache.put(&BATTERY_SOC, Value::Float(2.0), now);

    let names: Vec<&str> = cache.snapshot().iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["battery_soc", "grid_power_total"]);
    assert_eq!(cache.len(), 2);
}
