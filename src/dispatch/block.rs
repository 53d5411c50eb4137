//! Layout of the eleven-register dispatch block at 0x0880.
//!
//! | word | meaning                                           |
//! |------|---------------------------------------------------|
//! | 0    | start flag                                        |
//! | 1-2  | active power, 32000 + W, discharge positive       |
//! | 3-4  | reactive power                                    |
//! | 5    | mode                                              |
//! | 6    | SOC target, 0-255 for 0-100 %                     |
//! | 7-8  | duration in seconds                               |
//! | 9    | energy routing                                    |
//! | 10   | PV switch                                         |

use crate::codec;
use crate::error::EncodeError;
use crate::register::{self, DISPATCH_POWER, DISPATCH_SOC, DISPATCH_TIME};

use std::time::Duration;

pub const ADDRESS: u16 = register::DISPATCH_START.address;
pub const LEN: usize = 11;

pub const MODE_POWER_WITH_SOC: u16 = 2;
pub const MODE_NO_BATTERY_CHARGE: u16 = 19;

const ENERGY_ROUTING_DEFAULT: u16 = 255;
pub const PV_SWITCH_AUTO: u16 = 0;
/// Position of the PV switch within the block.
pub const PV_SWITCH_WORD: usize = 10;

/// Device-side timeout written for continuous modes; the controller re-asserts
/// them well before it runs out.
pub const CONTINUOUS_HOLD: Duration = Duration::from_secs(600);

/// Returns the device to normal operation.
pub const RESET: [u16; LEN] = [0, 0, 32_000, 0, 0, 0, 0, 0, 0, ENERGY_ROUTING_DEFAULT, PV_SWITCH_AUTO];

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DispatchBlock {
    /// Signed active power, positive discharges the battery.
    pub power_w: f64,
    pub mode: u16,
    pub soc_pct: f64,
    pub hold: Duration,
    pub pv_switch: u16,
}

impl DispatchBlock {
    /// Charge (negative) or discharge (positive) at `power_kw` until the
    /// battery reaches `soc_pct`.
    pub fn power(power_kw: f64, soc_pct: f64, hold: Duration) -> Self {
        Self {
            power_w: (power_kw * 1000.0).round(),
            mode: MODE_POWER_WITH_SOC,
            soc_pct,
            hold,
            pv_switch: PV_SWITCH_AUTO,
        }
    }

    pub fn no_battery_charge(hold: Duration) -> Self {
        Self {
            power_w: 0.0,
            mode: MODE_NO_BATTERY_CHARGE,
            soc_pct: 0.0,
            hold,
            pv_switch: PV_SWITCH_AUTO,
        }
    }

    pub fn with_pv_switch(self, pv_switch: u16) -> Self {
        Self { pv_switch, ..self }
    }

    pub fn encode(&self) -> Result<Vec<u16>, EncodeError> {
        let mut words = Vec::with_capacity(LEN);

        words.push(1);
        if self.mode == MODE_NO_BATTERY_CHARGE {
            // this mode takes a raw zero, not the offset zero
            words.extend_from_slice(&[0, 0]);
        } else {
            words.extend(codec::encode_number(&DISPATCH_POWER, self.power_w)?);
        }
        words.extend_from_slice(&[0, 0]);
        words.push(self.mode);
        words.extend(codec::encode_number(&DISPATCH_SOC, self.soc_pct)?);
        words.extend(codec::encode_number(&DISPATCH_TIME, self.hold.as_secs() as f64)?);
        words.push(ENERGY_ROUTING_DEFAULT);
        words.push(self.pv_switch);

        Ok(words)
    }
}
