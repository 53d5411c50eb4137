//! Fixed register map of the inverter.
//!
//! Every signal the bridge knows about is declared once in [`REGISTERS`]; the
//! contiguous blocks they are read in are declared in [`GROUPS`].

use serde::Serialize;

pub const TIME_PERIOD_CONTROL_OPTIONS: &[&str] = &[
    "Disable",
    "Enable Charge Time Period Control",
    "Enable Discharge Time Period Control",
    "Enable Time Period Control",
];

pub const PV_SWITCH_OPTIONS: &[&str] = &["Auto", "PV Open", "PV Close"];

/// Raw offset of the signed dispatch power words.
pub const DISPATCH_POWER_OFFSET: i64 = -32_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataType {
    U16,
    /// One byte carried in the low half of a register.
    Byte,
    I16,
    U32,
    I32,
    Bitfield,
    Enum(&'static [&'static str]),
}

impl DataType {
    pub const fn words(&self) -> usize {
        match self {
            Self::U32 | Self::I32 => 2,
            _ => 1,
        }
    }

    pub const fn signed(&self) -> bool {
        matches!(self, Self::I16 | Self::I32)
    }
}

/// Order of the two words of a 32-bit value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WordOrder {
    HighFirst,
    LowFirst,
}

/// Rational scale factor: `engineering = (raw + offset) * num / den`.
///
/// Kept as a ratio so that values like 255 raw at 100/255 land on exactly 100.0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scale {
    pub num: u32,
    pub den: u32,
}

impl Scale {
    pub const UNIT: Scale = Scale::new(1, 1);
    pub const TENTH: Scale = Scale::new(1, 10);
    pub const HUNDREDTH: Scale = Scale::new(1, 100);
    pub const THOUSANDTH: Scale = Scale::new(1, 1000);
    /// One byte spanning 0-100 %.
    pub const PERCENT_OF_BYTE: Scale = Scale::new(100, 255);

    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    pub const fn is_unit(&self) -> bool {
        self.num == self.den
    }

    /// Smallest engineering step one raw count represents.
    pub fn resolution(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupId {
    Grid,
    PvMeter,
    Battery,
    Inverter,
    Settings,
    Dispatch,
    PvInverterEnergy,
}

/// Cadence class of a group, which selects its interval bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cadence {
    Fast,
    Slow,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RegisterDescriptor {
    pub name: &'static str,
    pub address: u16,
    pub data_type: DataType,
    pub word_order: WordOrder,
    pub scale: Scale,
    pub offset: i64,
    pub unit: &'static str,
    pub access: Access,
    pub group: GroupId,
    /// Engineering range accepted by [`crate::inverter::Inverter::write_setting`].
    pub limits: Option<(f64, f64)>,
}

impl RegisterDescriptor {
    const fn read_only(
        name: &'static str,
        address: u16,
        data_type: DataType,
        scale: Scale,
        unit: &'static str,
        group: GroupId,
    ) -> Self {
        Self {
            name,
            address,
            data_type,
            word_order: WordOrder::HighFirst,
            scale,
            offset: 0,
            unit,
            access: Access::ReadOnly,
            group,
            limits: None,
        }
    }

    const fn writable(self, min: f64, max: f64) -> Self {
        Self {
            access: Access::ReadWrite,
            limits: Some((min, max)),
            ..self
        }
    }

    const fn with_offset(self, offset: i64) -> Self {
        Self { offset, ..self }
    }

    pub const fn words(&self) -> usize {
        self.data_type.words()
    }

    pub fn writable_setting(&self) -> bool {
        self.access == Access::ReadWrite
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GroupLayout {
    pub id: GroupId,
    pub name: &'static str,
    pub address: u16,
    pub count: u16,
    pub cadence: Cadence,
}

/// Indexed by `GroupId as usize`.
pub static GROUPS: &[GroupLayout] = &[
    GroupLayout { id: GroupId::Grid, name: "grid", address: 0x0010, count: 39, cadence: Cadence::Fast },
    GroupLayout { id: GroupId::PvMeter, name: "pv_meter", address: 0x0090, count: 19, cadence: Cadence::Fast },
    GroupLayout { id: GroupId::Battery, name: "battery", address: 0x0100, count: 39, cadence: Cadence::Fast },
    GroupLayout { id: GroupId::Inverter, name: "inverter", address: 0x0500, count: 93, cadence: Cadence::Fast },
    GroupLayout { id: GroupId::Settings, name: "settings", address: 0x0800, count: 86, cadence: Cadence::Slow },
    GroupLayout { id: GroupId::Dispatch, name: "dispatch", address: 0x0880, count: 11, cadence: Cadence::Fast },
    GroupLayout { id: GroupId::PvInverterEnergy, name: "pv_inverter_energy", address: 0x08D0, count: 2, cadence: Cadence::Slow },
];

impl GroupId {
    pub fn layout(self) -> &'static GroupLayout {
        &GROUPS[self as usize]
    }
}

use DataType::*;
use GroupId::*;

// Signals the bridge itself reads or writes.
pub const GRID_POWER_TOTAL: RegisterDescriptor = RegisterDescriptor::read_only("grid_power_total", 0x0021, I32, Scale::UNIT, "W", Grid);
pub const PV_AC_POWER_TOTAL: RegisterDescriptor = RegisterDescriptor::read_only("pv_ac_power_total", 0x00A1, I32, Scale::UNIT, "W", PvMeter);
pub const BATTERY_SOC: RegisterDescriptor = RegisterDescriptor::read_only("battery_soc", 0x0102, U16, Scale::TENTH, "%", Battery);
pub const BATTERY_POWER: RegisterDescriptor = RegisterDescriptor::read_only("battery_power", 0x0126, I16, Scale::UNIT, "W", Battery);
pub const TOTAL_PV_ENERGY: RegisterDescriptor = RegisterDescriptor::read_only("total_pv_energy", 0x050A, U32, Scale::TENTH, "kWh", Inverter);
pub const PV_INVERTER_ENERGY: RegisterDescriptor = RegisterDescriptor::read_only("pv_inverter_energy", 0x08D0, U32, Scale::HUNDREDTH, "kWh", PvInverterEnergy);
pub const PV_DC_POWER_TOTAL: RegisterDescriptor = RegisterDescriptor::read_only("pv_dc_power_total", 0x052D, U16, Scale::UNIT, "W", Inverter);
pub const PV_CAPACITY: RegisterDescriptor = RegisterDescriptor::read_only("pv_capacity", 0x0801, U32, Scale::UNIT, "W", Settings).writable(0.0, 100_000.0);
pub const DISCHARGING_CUTOFF_SOC: RegisterDescriptor = RegisterDescriptor::read_only("discharging_cutoff_soc", 0x0850, U16, Scale::UNIT, "%", Settings).writable(4.0, 100.0);
pub const CHARGING_CUTOFF_SOC: RegisterDescriptor = RegisterDescriptor::read_only("charging_cutoff_soc", 0x0855, U16, Scale::UNIT, "%", Settings).writable(10.0, 100.0);
pub const DISPATCH_START: RegisterDescriptor = RegisterDescriptor::read_only("dispatch_start", 0x0880, U16, Scale::UNIT, "", Dispatch);
pub const DISPATCH_POWER: RegisterDescriptor = RegisterDescriptor::read_only("dispatch_power", 0x0881, U32, Scale::UNIT, "W", Dispatch).with_offset(DISPATCH_POWER_OFFSET);
pub const DISPATCH_MODE: RegisterDescriptor = RegisterDescriptor::read_only("dispatch_mode", 0x0885, U16, Scale::UNIT, "", Dispatch);
pub const DISPATCH_SOC: RegisterDescriptor = RegisterDescriptor::read_only("dispatch_soc", 0x0886, Byte, Scale::PERCENT_OF_BYTE, "%", Dispatch);
pub const DISPATCH_PV_SWITCH: RegisterDescriptor = RegisterDescriptor::read_only("dispatch_pv_switch", 0x088A, Enum(PV_SWITCH_OPTIONS), Scale::UNIT, "", Dispatch);
pub const DISPATCH_TIME: RegisterDescriptor = RegisterDescriptor::read_only("dispatch_time", 0x0887, U32, Scale::UNIT, "s", Dispatch);

#[rustfmt::skip]
pub static REGISTERS: &[RegisterDescriptor] = &[
    // grid meter
    RegisterDescriptor::read_only("grid_energy_feed", 0x0010, U32, Scale::HUNDREDTH, "kWh", Grid),
    RegisterDescriptor::read_only("grid_energy_consume", 0x0012, U32, Scale::HUNDREDTH, "kWh", Grid),
    RegisterDescriptor::read_only("grid_voltage_a", 0x0014, U16, Scale::UNIT, "V", Grid),
    RegisterDescriptor::read_only("grid_voltage_b", 0x0015, U16, Scale::UNIT, "V", Grid),
    RegisterDescriptor::read_only("grid_voltage_c", 0x0016, U16, Scale::UNIT, "V", Grid),
    RegisterDescriptor::read_only("grid_current_a", 0x0017, I16, Scale::TENTH, "A", Grid),
    RegisterDescriptor::read_only("grid_current_b", 0x0018, I16, Scale::TENTH, "A", Grid),
    RegisterDescriptor::read_only("grid_current_c", 0x0019, I16, Scale::TENTH, "A", Grid),
    RegisterDescriptor::read_only("grid_frequency", 0x001A, U16, Scale::HUNDREDTH, "Hz", Grid),
    RegisterDescriptor::read_only("grid_power_a", 0x001B, I32, Scale::UNIT, "W", Grid),
    RegisterDescriptor::read_only("grid_power_b", 0x001D, I32, Scale::UNIT, "W", Grid),
    RegisterDescriptor::read_only("grid_power_c", 0x001F, I32, Scale::UNIT, "W", Grid),
    GRID_POWER_TOTAL,
    RegisterDescriptor::read_only("grid_power_factor", 0x0036, I16, Scale::HUNDREDTH, "", Grid),

    // AC-coupled PV meter
    RegisterDescriptor::read_only("pv_energy_feed", 0x0090, U32, Scale::HUNDREDTH, "kWh", PvMeter),
    RegisterDescriptor::read_only("pv_voltage_a", 0x0094, U16, Scale::UNIT, "V", PvMeter),
    PV_AC_POWER_TOTAL,

    // battery
    RegisterDescriptor::read_only("battery_voltage", 0x0100, U16, Scale::TENTH, "V", Battery),
    RegisterDescriptor::read_only("battery_current", 0x0101, I16, Scale::TENTH, "A", Battery),
    BATTERY_SOC,
    RegisterDescriptor::read_only("battery_min_cell_voltage", 0x0107, U16, Scale::THOUSANDTH, "V", Battery),
    RegisterDescriptor::read_only("battery_max_cell_voltage", 0x010A, U16, Scale::THOUSANDTH, "V", Battery),
    RegisterDescriptor::read_only("battery_min_cell_temp", 0x010D, I16, Scale::TENTH, "°C", Battery),
    RegisterDescriptor::read_only("battery_max_cell_temp", 0x0110, I16, Scale::TENTH, "°C", Battery),
    RegisterDescriptor::read_only("battery_capacity", 0x0119, U16, Scale::TENTH, "kWh", Battery),
    RegisterDescriptor::read_only("battery_soh", 0x011B, U16, Scale::TENTH, "%", Battery),
    RegisterDescriptor::read_only("battery_charge_energy", 0x0120, U32, Scale::TENTH, "kWh", Battery),
    RegisterDescriptor::read_only("battery_discharge_energy", 0x0122, U32, Scale::TENTH, "kWh", Battery),
    BATTERY_POWER,

    // inverter
    RegisterDescriptor::read_only("inverter_energy_output", 0x0502, U32, Scale::TENTH, "kWh", Inverter),
    RegisterDescriptor::read_only("inverter_energy_input", 0x0504, U32, Scale::TENTH, "kWh", Inverter),
    TOTAL_PV_ENERGY,
    RegisterDescriptor::read_only("inverter_module_temp", 0x0510, I16, Scale::TENTH, "°C", Inverter),
    RegisterDescriptor::read_only("pv_boost_temp", 0x0511, I16, Scale::TENTH, "°C", Inverter),
    RegisterDescriptor::read_only("battery_buck_boost_temp", 0x0512, I16, Scale::TENTH, "°C", Inverter),
    RegisterDescriptor::read_only("bus_voltage", 0x0520, U16, Scale::TENTH, "V", Inverter),
    RegisterDescriptor::read_only("pv1_voltage", 0x0524, U16, Scale::TENTH, "V", Inverter),
    RegisterDescriptor::read_only("pv2_voltage", 0x0525, U16, Scale::TENTH, "V", Inverter),
    RegisterDescriptor::read_only("pv3_voltage", 0x0526, U16, Scale::TENTH, "V", Inverter),
    RegisterDescriptor::read_only("pv1_current", 0x0527, U16, Scale::HUNDREDTH, "A", Inverter),
    RegisterDescriptor::read_only("pv2_current", 0x0528, U16, Scale::HUNDREDTH, "A", Inverter),
    RegisterDescriptor::read_only("pv3_current", 0x0529, U16, Scale::HUNDREDTH, "A", Inverter),
    RegisterDescriptor::read_only("pv1_power", 0x052A, U16, Scale::UNIT, "W", Inverter),
    RegisterDescriptor::read_only("pv2_power", 0x052B, U16, Scale::UNIT, "W", Inverter),
    RegisterDescriptor::read_only("pv3_power", 0x052C, U16, Scale::UNIT, "W", Inverter),
    PV_DC_POWER_TOTAL,
    RegisterDescriptor::read_only("inverter_power_active", 0x0545, I32, Scale::UNIT, "W", Inverter),
    RegisterDescriptor::read_only("backup_power", 0x055B, I32, Scale::UNIT, "W", Inverter),

    // settings
    RegisterDescriptor::read_only("max_feed_to_grid", 0x0800, U16, Scale::UNIT, "%", Settings).writable(0.0, 100.0),
    PV_CAPACITY,
    RegisterDescriptor::read_only("time_period_control", 0x084F, Enum(TIME_PERIOD_CONTROL_OPTIONS), Scale::UNIT, "", Settings).writable(0.0, 3.0),
    DISCHARGING_CUTOFF_SOC,
    CHARGING_CUTOFF_SOC,

    // dispatch block, written as a whole by the dispatch controller
    DISPATCH_START,
    DISPATCH_POWER,
    DISPATCH_MODE,
    DISPATCH_SOC,
    DISPATCH_TIME,
    RegisterDescriptor::read_only("dispatch_energy_routing", 0x0889, U16, Scale::UNIT, "", Dispatch),
    DISPATCH_PV_SWITCH,

    PV_INVERTER_ENERGY,
];

pub fn find(name: &str) -> Option<&'static RegisterDescriptor> {
    REGISTERS.iter().find(|r| r.name == name)
}

pub fn in_group(id: GroupId) -> impl Iterator<Item = &'static RegisterDescriptor> {
    REGISTERS.iter().filter(move |r| r.group == id)
}

impl GroupLayout {
    /// Slice of a block read holding the words of `descriptor`.
    pub fn words_of<'a>(&self, descriptor: &RegisterDescriptor, block: &'a [u16]) -> Option<&'a [u16]> {
        let start = descriptor.address.checked_sub(self.address)? as usize;
        block.get(start..start + descriptor.words())
    }
}
