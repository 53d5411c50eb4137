use crate::prelude::*;
use crate::codec;
use crate::register::{Cadence, GroupLayout, GROUPS};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Interval multiplier applied after a read in which nothing changed.
pub const GROWTH_FACTOR: f64 = 1.1;

// slow groups start from this multiple of the configured minimum
const SLOW_MIN_FACTOR: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IntervalBounds {
    pub min: Duration,
    pub max: Duration,
}

impl IntervalBounds {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max: max.max(min) }
    }

    pub fn clamp(&self, interval: Duration) -> Duration {
        interval.clamp(self.min, self.max)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollSettings {
    pub fast: IntervalBounds,
    pub slow: IntervalBounds,
}

impl PollSettings {
    pub fn from_config(device: &Device) -> Self {
        let (min, max) = (device.min_poll_interval(), device.max_poll_interval());
        Self {
            fast: IntervalBounds::new(min, max),
            slow: IntervalBounds::new((min * SLOW_MIN_FACTOR).min(max), max),
        }
    }

    pub fn bounds(&self, cadence: Cadence) -> IntervalBounds {
        match cadence {
            Cadence::Fast => self.fast,
            Cadence::Slow => self.slow,
        }
    }
}

/// Poll interval that stretches while a group is idle and snaps back on change.
#[derive(Clone, Debug)]
pub struct AdaptiveInterval {
    current: Duration,
    bounds: IntervalBounds,
    last_changed: Option<Instant>,
}

impl AdaptiveInterval {
    pub fn new(bounds: IntervalBounds) -> Self {
        Self {
            current: bounds.min,
            bounds,
            last_changed: None,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn bounds(&self) -> IntervalBounds {
        self.bounds
    }

    pub fn last_changed(&self) -> Option<Instant> {
        self.last_changed
    }

    pub fn observe(&mut self, changed: bool, now: Instant) -> Duration {
        self.current = if changed {
            self.last_changed = Some(now);
            self.bounds.min
        } else {
            self.bounds.clamp(self.current.mul_f64(GROWTH_FACTOR))
        };
        self.current
    }
}

pub type Decoded = (&'static RegisterDescriptor, Value);

/// Registers read together in one transaction, with their cadence state.
#[derive(Clone, Debug)]
pub struct PollGroup {
    pub layout: &'static GroupLayout,
    interval: AdaptiveInterval,
    previous: HashMap<&'static str, Value>,
}

impl PollGroup {
    pub fn new(layout: &'static GroupLayout, bounds: IntervalBounds) -> Self {
        Self {
            layout,
            interval: AdaptiveInterval::new(bounds),
            previous: HashMap::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval.current()
    }

    /// Decodes every register of the group out of one block read. Registers
    /// that fail to decode are logged and left out.
    pub fn decode(&self, words: &[u16]) -> (Vec<Decoded>, usize) {
        let mut values = Vec::new();
        let mut errors = 0;

        for descriptor in register::in_group(self.layout.id) {
            let result = match self.layout.words_of(descriptor, words) {
                Some(raw) => codec::decode(descriptor, raw),
                None => Err(DecodeError::WordCount {
                    signal: descriptor.name,
                    expected: descriptor.words(),
                    got: 0,
                }),
            };
            match result {
                Ok(value) => values.push((descriptor, value)),
                Err(e) => {
                    warn!("{}: {}", self.layout.name, e);
                    errors += 1;
                }
            }
        }

        (values, errors)
    }

    /// Compares a successful read with the previous one and adapts the
    /// interval. Returns whether anything changed.
    pub fn observe(&mut self, values: &[Decoded], now: Instant) -> bool {
        let mut changed = false;
        for (descriptor, value) in values {
            let differs = match self.previous.get(descriptor.name) {
                Some(previous) => value.differs_from(previous, descriptor),
                None => true,
            };
            if differs {
                changed = true;
                self.previous.insert(descriptor.name, value.clone());
            }
        }

        self.interval.observe(changed, now);
        changed
    }
}

/// Result of one poll, sent to the device's ingest task.
#[derive(Debug)]
pub struct PollReport {
    pub group: GroupId,
    pub at: DateTime<Utc>,
    pub outcome: Result<Vec<Decoded>, TransportError>,
    pub decode_errors: usize,
}

/// Runs one polling task per group of the register map.
pub struct PollingScheduler {
    name: String,
    connection: Arc<ConnectionManager>,
    channels: Channels,
    settings: PollSettings,
    results: mpsc::Sender<PollReport>,
}

impl PollingScheduler {
    pub fn new(
        name: &str,
        connection: Arc<ConnectionManager>,
        channels: Channels,
        settings: PollSettings,
        results: mpsc::Sender<PollReport>,
    ) -> Self {
        Self {
            name: name.to_owned(),
            connection,
            channels,
            settings,
            results,
        }
    }

    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        GROUPS
            .iter()
            .map(|layout| {
                let group = PollGroup::new(layout, self.settings.bounds(layout.cadence));
                let task = GroupTask {
                    name: self.name.clone(),
                    connection: self.connection.clone(),
                    channels: self.channels.clone(),
                    results: self.results.clone(),
                    shutdown: self.channels.to_device.subscribe(),
                };
                tokio::spawn(task.run(group))
            })
            .collect()
    }
}

struct GroupTask {
    name: String,
    connection: Arc<ConnectionManager>,
    channels: Channels,
    results: mpsc::Sender<PollReport>,
    shutdown: broadcast::Receiver<ChannelData>,
}

impl GroupTask {
    async fn run(mut self, mut group: PollGroup) {
        debug!("{}: polling {} every {:?}", self.name, group.layout.name, group.interval());

        loop {
            // not raced against shutdown, a read in flight is allowed to finish
            let outcome = self.connection.read_group(group.layout).await;
            let at = Utc::now();

            let report = match outcome {
                Ok(words) => {
                    let (values, decode_errors) = group.decode(&words);
                    let changed = group.observe(&values, Instant::now());
                    trace!(
                        "{}: {} changed={} next in {:?}",
                        self.name,
                        group.layout.name,
                        changed,
                        group.interval()
                    );
                    self.channels.publish(ChannelData::Polled {
                        group: group.layout.id,
                        changed,
                        next_poll: group.interval(),
                    });
                    PollReport {
                        group: group.layout.id,
                        at,
                        outcome: Ok(values),
                        decode_errors,
                    }
                }
                Err(e) => {
                    self.channels.publish(ChannelData::PollFailed {
                        group: group.layout.id,
                        error: e.to_string(),
                    });
                    PollReport {
                        group: group.layout.id,
                        at,
                        outcome: Err(e),
                        decode_errors: 0,
                    }
                }
            };

            if self.results.send(report).await.is_err() {
                debug!("{}: ingest gone, {} poller exiting", self.name, group.layout.name);
                break;
            }

            if wait_or_shutdown(group.interval(), &mut self.shutdown).await {
                break;
            }
        }

        debug!("{}: {} poller stopped", self.name, group.layout.name);
    }
}

/// Sleeps for `duration`; returns true instead if shutdown arrived first.
pub(crate) async fn wait_or_shutdown(duration: Duration, shutdown: &mut broadcast::Receiver<ChannelData>) -> bool {
    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            message = shutdown.recv() => match message {
                Ok(ChannelData::Shutdown) | Err(broadcast::error::RecvError::Closed) => return true,
                _ => {}
            },
        }
    }
}
