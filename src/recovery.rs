use crate::prelude::*;

use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryState {
    Healthy,
    Watching,
    Recovering,
}

/// What the owner of the connection should do after feeding the supervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryAction {
    None,
    /// Drop and reopen the link, backoff still applies.
    Reconnect,
    /// Close, clear failure counters and backoff, reconnect.
    Reset,
}

/// Tracks poll health of one device and decides when the link is wedged.
///
/// Healthy turns into Watching once `threshold` reads in a row have failed.
/// Watching escalates to Recovering after twice that many, or when no signal
/// has been updated for `staleness_window`. Recovering repeats its reset no
/// more often than `cooldown`. Any successful read returns to Healthy.
#[derive(Clone, Debug)]
pub struct RecoverySupervisor {
    state: RecoveryState,
    failures: u32,
    threshold: u32,
    staleness_window: Duration,
    cooldown: Duration,
    last_reset: Option<Instant>,
    resets: u64,
}

impl RecoverySupervisor {
    pub fn new(threshold: u32, staleness_window: Duration, cooldown: Duration) -> Self {
        Self {
            state: RecoveryState::Healthy,
            failures: 0,
            threshold: threshold.max(1),
            staleness_window,
            cooldown,
            last_reset: None,
            resets: 0,
        }
    }

    pub fn from_config(device: &Device) -> Self {
        Self::new(
            device.failure_threshold(),
            device.staleness_threshold(),
            device.recovery_cooldown(),
        )
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    pub fn resets(&self) -> u64 {
        self.resets
    }

    pub fn staleness_window(&self) -> Duration {
        self.staleness_window
    }

    pub fn record_success(&mut self) -> RecoveryAction {
        self.failures = 0;
        if self.state != RecoveryState::Healthy {
            info!("link recovered after {:?}", self.state);
            self.state = RecoveryState::Healthy;
        }
        RecoveryAction::None
    }

    pub fn record_failure(&mut self, now: Instant) -> RecoveryAction {
        self.failures += 1;

        match self.state {
            RecoveryState::Healthy if self.failures >= self.threshold => {
                warn!("{} consecutive read failures, watching link", self.failures);
                self.state = RecoveryState::Watching;
                RecoveryAction::Reconnect
            }
            RecoveryState::Watching if self.failures >= self.threshold * 2 => self.begin_reset(now),
            RecoveryState::Recovering if self.failures >= self.threshold && self.cooled_down(now) => {
                self.begin_reset(now)
            }
            _ => RecoveryAction::None,
        }
    }

    /// `all_stale` is whether the cache has seen no update for the staleness window.
    pub fn check_staleness(&mut self, all_stale: bool, now: Instant) -> RecoveryAction {
        if !all_stale {
            return RecoveryAction::None;
        }

        match self.state {
            RecoveryState::Watching => {
                warn!("no fresh data for {:?}", self.staleness_window);
                self.begin_reset(now)
            }
            RecoveryState::Recovering if self.cooled_down(now) => self.begin_reset(now),
            _ => RecoveryAction::None,
        }
    }

    fn cooled_down(&self, now: Instant) -> bool {
        self.last_reset
            .map(|t| now.saturating_duration_since(t) >= self.cooldown)
            .unwrap_or(true)
    }

    fn begin_reset(&mut self, now: Instant) -> RecoveryAction {
        self.state = RecoveryState::Recovering;
        self.failures = 0;
        self.last_reset = Some(now);
        self.resets += 1;
        warn!("forcing connection reset (#{})", self.resets);
        RecoveryAction::Reset
    }
}
