pub use anyhow::{anyhow, bail, Result};
pub use log::{debug, error, info, trace, warn};
pub use std::io::Write;
pub use tokio::sync::{broadcast, mpsc};

pub use crate::channels::{ChannelData, Channels};
pub use crate::codec::Value;
pub use crate::config::{self, Config, Device, Role};
pub use crate::connection::{ConnectionHealth, ConnectionManager, ConnectionState};
pub use crate::data_cache::{DataCache, SignalReading};
pub use crate::dispatch::{DispatchCommand, DispatchController, DispatchSession};
pub use crate::error::{DecodeError, EncodeError, Error, RoleError, TransportError, ValidationError};
pub use crate::inverter::Inverter;
pub use crate::register::{self, GroupId, RegisterDescriptor};
