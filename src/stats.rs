use crate::prelude::*;

/// Counters kept by a device's ingest task.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub polls_ok: u64,
    pub polls_failed: u64,
    pub decode_errors: u64,
    pub values_stored: u64,
    pub out_of_order: u64,
    // recovery
    pub reconnects: u64,
    pub resets: u64,
    pub last_error: Option<String>,
}

impl DeviceStats {
    pub fn print_summary(&self, device: &str) {
        info!("Device {} statistics:", device);
        info!("  Polls:");
        info!("    Successful: {}", self.polls_ok);
        info!("    Failed: {}", self.polls_failed);
        info!("    Decode errors: {}", self.decode_errors);
        info!("  Cache:");
        info!("    Values stored: {}", self.values_stored);
        info!("    Out of order updates dropped: {}", self.out_of_order);
        info!("  Recovery:");
        info!("    Reconnects: {}", self.reconnects);
        info!("    Resets: {}", self.resets);
        if let Some(error) = &self.last_error {
            info!("    Last error: {}", error);
        }
    }
}
