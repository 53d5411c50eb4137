use crate::prelude::*;
use crate::recovery::RecoveryState;
use std::time::Duration;

#[derive(Clone, Debug)]
pub enum ChannelData {
    Shutdown,
    ConnectionChanged(ConnectionState),
    Polled {
        group: GroupId,
        changed: bool,
        next_poll: Duration,
    },
    PollFailed {
        group: GroupId,
        error: String,
    },
    RecoveryChanged(RecoveryState),
    DispatchChanged(DispatchSession),
}

/// Broadcast channels of one device.
#[derive(Debug, Clone)]
pub struct Channels {
    pub to_device: broadcast::Sender<ChannelData>,
    pub from_device: broadcast::Sender<ChannelData>,
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

impl Channels {
    pub fn new() -> Self {
        Self {
            to_device: Self::channel(),
            from_device: Self::channel(),
        }
    }

    /// Publishes an event; having no subscribers is fine.
    pub fn publish(&self, data: ChannelData) {
        let _ = self.from_device.send(data);
    }

    fn channel<T: Clone>() -> broadcast::Sender<T> {
        broadcast::channel(2048).0
    }
}
