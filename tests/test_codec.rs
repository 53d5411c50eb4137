mod common;
use common::*;
use neovolt_bridge::codec::{decode, encode, encode_number};
use neovolt_bridge::prelude::*;
use neovolt_bridge::register::DataType;
use neovolt_bridge::register::{
    BATTERY_POWER, BATTERY_SOC, DISPATCH_POWER, DISPATCH_SOC, DISPATCH_TIME, GRID_POWER_TOTAL,
};

#[test]
fn battery_soc_is_tenths() {
    common_setup();

    assert_eq!(decode(&BATTERY_SOC, &[1000]).unwrap(), Value::Float(100.0));
    assert_eq!(decode(&BATTERY_SOC, &[537]).unwrap(), Value::Float(53.7));
    assert_eq!(encode_number(&BATTERY_SOC, 53.7).unwrap(), vec![537]);
}

#[test]
fn dispatch_soc_full_scale() {
    common_setup();

    assert_eq!(decode(&DISPATCH_SOC, &[255]).unwrap(), Value::Float(100.0));
    assert_eq!(decode(&DISPATCH_SOC, &[0]).unwrap(), Value::Float(0.0));
    assert_eq!(encode_number(&DISPATCH_SOC, 100.0).unwrap(), vec![255]);
    assert_eq!(encode_number(&DISPATCH_SOC, 90.0).unwrap(), vec![230]);
}

#[test]
fn signed_32bit_high_word_first() {
    common_setup();

    // -1500 W import/export sign survives both words
    assert_eq!(decode(&GRID_POWER_TOTAL, &[0xffff, 0xfa24]).unwrap(), Value::Integer(-1500));
    assert_eq!(encode_number(&GRID_POWER_TOTAL, -1500.0).unwrap(), vec![0xffff, 0xfa24]);
    assert_eq!(decode(&GRID_POWER_TOTAL, &[0x0001, 0x0000]).unwrap(), Value::Integer(65536));
}

#[test]
fn signed_16bit() {
    common_setup();

    assert_eq!(decode(&BATTERY_POWER, &[0xfc18]).unwrap(), Value::Integer(-1000));
}

#[test]
fn dispatch_power_offset() {
    common_setup();

    // 32000 + W, discharge positive
    assert_eq!(encode_number(&DISPATCH_POWER, 0.0).unwrap(), vec![0, 32000]);
    assert_eq!(encode_number(&DISPATCH_POWER, -3000.0).unwrap(), vec![0, 29000]);
    assert_eq!(encode_number(&DISPATCH_POWER, 5000.0).unwrap(), vec![0, 37000]);
    assert_eq!(decode(&DISPATCH_POWER, &[0, 29000]).unwrap(), Value::Integer(-3000));
}

#[test]
fn unsigned_32bit_duration() {
    common_setup();

    assert_eq!(encode_number(&DISPATCH_TIME, 86400.0).unwrap(), vec![0x0001, 0x5180]);
    assert_eq!(decode(&DISPATCH_TIME, &[0x0001, 0x5180]).unwrap(), Value::Integer(86400));
}

#[test]
fn wrong_word_count() {
    common_setup();

    assert_eq!(
        decode(&GRID_POWER_TOTAL, &[1]),
        Err(DecodeError::WordCount {
            signal: "grid_power_total",
            expected: 2,
            got: 1
        })
    );
}

#[test]
fn out_of_range_is_rejected() {
    common_setup();

    assert!(matches!(
        encode_number(&DISPATCH_SOC, 101.0),
        Err(EncodeError::OutOfRange { max, .. }) if max == 100.0
    ));
    // a byte register holds nothing above 255
    assert_eq!(
        decode(&DISPATCH_SOC, &[300]),
        Err(DecodeError::RawOutOfRange {
            signal: "dispatch_soc",
            raw: 300,
            max: 255
        })
    );
    assert!(matches!(encode_number(&BATTERY_SOC, -1.0), Err(EncodeError::OutOfRange { .. })));
    assert!(matches!(
        encode_number(&BATTERY_SOC, f64::NAN),
        Err(EncodeError::NotFinite { .. })
    ));
}

#[test]
fn enum_registers() {
    common_setup();

    let descriptor = register::find("time_period_control").unwrap();
    let value = decode(descriptor, &[1]).unwrap();
    assert_eq!(value.label(), Some(register::TIME_PERIOD_CONTROL_OPTIONS[1]));
    assert_eq!(encode(descriptor, &value).unwrap(), vec![1]);

    assert!(matches!(
        decode(descriptor, &[99]),
        Err(DecodeError::UnknownOption { raw: 99, .. })
    ));
}

#[test]
fn change_detection_ignores_sub_resolution_noise() {
    common_setup();

    let a = Value::Float(53.7);
    let b = Value::Float(53.70000001);
    let c = Value::Float(53.8);

    assert!(!a.differs_from(&b, &BATTERY_SOC));
    assert!(a.differs_from(&c, &BATTERY_SOC));
    assert!(Value::Integer(1).differs_from(&Value::Integer(2), &GRID_POWER_TOTAL));
}

fn engineering(descriptor: &RegisterDescriptor, raw: i64) -> f64 {
    (raw + descriptor.offset) as f64 * descriptor.scale.num as f64 / descriptor.scale.den as f64
}

#[test]
fn every_register_round_trips() {
    common_setup();

    for descriptor in register::REGISTERS {
        let samples: Vec<Value> = match descriptor.data_type {
            DataType::Enum(options) => (0..options.len())
                .map(|raw| decode(descriptor, &[raw as u16]).unwrap())
                .collect(),
            DataType::Bitfield => vec![Value::Bits(0), Value::Bits(0b1010_0101), Value::Bits(u16::MAX)],
            data_type => {
                let (min, max): (i64, i64) = match data_type {
                    DataType::U16 => (0, u16::MAX as i64),
                    DataType::Byte => (0, u8::MAX as i64),
                    DataType::I16 => (i16::MIN as i64, i16::MAX as i64),
                    DataType::U32 => (0, u32::MAX as i64),
                    DataType::I32 => (i32::MIN as i64, i32::MAX as i64),
                    DataType::Bitfield | DataType::Enum(_) => unreachable!(),
                };
                [min, (min + max) / 2, max]
                    .iter()
                    .map(|raw| {
                        let value = engineering(descriptor, *raw);
                        if descriptor.scale.is_unit() {
                            Value::Integer(value as i64)
                        } else {
                            Value::Float(value)
                        }
                    })
                    .collect()
            }
        };

        for value in samples {
            let words = encode(descriptor, &value)
                .unwrap_or_else(|e| panic!("{}: encode {:?}: {}", descriptor.name, value, e));
            let back = decode(descriptor, &words).unwrap();
            assert!(
                !back.differs_from(&value, descriptor),
                "{}: {:?} came back as {:?}",
                descriptor.name,
                value,
                back
            );
        }
    }
}
