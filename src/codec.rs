//! Pure conversions between raw register words and engineering values.

use crate::error::{DecodeError, EncodeError};
use crate::register::{DataType, RegisterDescriptor, WordOrder};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Unscaled numeric register.
    Integer(i64),
    /// Scaled numeric register.
    Float(f64),
    /// One of the descriptor's named options.
    Option { raw: u16, label: &'static str },
    Bits(u16),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Option { raw, .. } => Some(*raw as f64),
            Self::Bits(v) => Some(*v as f64),
        }
    }

    pub fn label(&self) -> Option<&'static str> {
        match self {
            Self::Option { label, .. } => Some(label),
            _ => None,
        }
    }

    /// Whether `other` counts as a change of this value for `descriptor`.
    ///
    /// Scaled values compare within half a raw count, everything else exactly.
    pub fn differs_from(&self, other: &Value, descriptor: &RegisterDescriptor) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => (a - b).abs() > descriptor.scale.resolution() / 2.0,
            (a, b) => a != b,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Option { label, .. } => write!(f, "{}", label),
            Self::Bits(v) => write!(f, "{:#018b}", v),
        }
    }
}

pub fn decode(descriptor: &RegisterDescriptor, words: &[u16]) -> Result<Value, DecodeError> {
    if words.len() != descriptor.words() {
        return Err(DecodeError::WordCount {
            signal: descriptor.name,
            expected: descriptor.words(),
            got: words.len(),
        });
    }

    let raw = match descriptor.data_type {
        DataType::U16 => words[0] as i64,
        DataType::Byte if words[0] > u8::MAX as u16 => {
            return Err(DecodeError::RawOutOfRange {
                signal: descriptor.name,
                raw: words[0],
                max: u8::MAX as u16,
            })
        }
        DataType::Byte => words[0] as i64,
        DataType::I16 => words[0] as i16 as i64,
        DataType::U32 => join(words, descriptor.word_order) as i64,
        DataType::I32 => join(words, descriptor.word_order) as i32 as i64,
        DataType::Bitfield => return Ok(Value::Bits(words[0])),
        DataType::Enum(options) => {
            let raw = words[0];
            return match options.get(raw as usize) {
                Some(label) => Ok(Value::Option { raw, label }),
                None => Err(DecodeError::UnknownOption {
                    signal: descriptor.name,
                    raw,
                }),
            };
        }
    };

    let shifted = raw + descriptor.offset;
    let scale = descriptor.scale;
    if scale.is_unit() {
        Ok(Value::Integer(shifted))
    } else {
        // multiply before dividing so exact ratios (255 * 100 / 255) stay exact
        Ok(Value::Float(shifted as f64 * scale.num as f64 / scale.den as f64))
    }
}

pub fn encode(descriptor: &RegisterDescriptor, value: &Value) -> Result<Vec<u16>, EncodeError> {
    match descriptor.data_type {
        DataType::Enum(options) => {
            let raw = match value {
                Value::Option { label, .. } => options
                    .iter()
                    .position(|o| o == label)
                    .ok_or_else(|| EncodeError::UnknownOption {
                        signal: descriptor.name,
                        label: label.to_string(),
                    })?,
                Value::Integer(i) if *i >= 0 && (*i as usize) < options.len() => *i as usize,
                Value::Integer(i) => {
                    return Err(EncodeError::OutOfRange {
                        signal: descriptor.name,
                        value: *i as f64,
                        min: 0.0,
                        max: options.len().saturating_sub(1) as f64,
                    })
                }
                _ => {
                    return Err(EncodeError::WrongKind {
                        signal: descriptor.name,
                        expected: "option",
                    })
                }
            };
            Ok(vec![raw as u16])
        }
        DataType::Bitfield => match value {
            Value::Bits(bits) => Ok(vec![*bits]),
            Value::Integer(i) if (0..=u16::MAX as i64).contains(i) => Ok(vec![*i as u16]),
            _ => Err(EncodeError::WrongKind {
                signal: descriptor.name,
                expected: "bitfield",
            }),
        },
        _ => {
            let number = value.as_f64().ok_or(EncodeError::WrongKind {
                signal: descriptor.name,
                expected: "numeric",
            })?;
            encode_number(descriptor, number)
        }
    }
}

/// Encodes a numeric engineering value, applying scale and offset.
pub fn encode_number(descriptor: &RegisterDescriptor, value: f64) -> Result<Vec<u16>, EncodeError> {
    if !value.is_finite() {
        return Err(EncodeError::NotFinite {
            signal: descriptor.name,
            value,
        });
    }

    let (min_raw, max_raw) = raw_bounds(descriptor.data_type);
    let scale = descriptor.scale;
    let raw = (value * scale.den as f64 / scale.num as f64).round() - descriptor.offset as f64;

    if raw < min_raw as f64 || raw > max_raw as f64 {
        let to_engineering = |raw: i64| (raw + descriptor.offset) as f64 * scale.num as f64 / scale.den as f64;
        return Err(EncodeError::OutOfRange {
            signal: descriptor.name,
            value,
            min: to_engineering(min_raw),
            max: to_engineering(max_raw),
        });
    }

    let raw = raw as i64;
    Ok(match descriptor.data_type {
        DataType::U16 | DataType::Byte => vec![raw as u16],
        DataType::I16 => vec![raw as i16 as u16],
        DataType::U32 => split(raw as u32, descriptor.word_order).to_vec(),
        DataType::I32 => split(raw as i32 as u32, descriptor.word_order).to_vec(),
        DataType::Bitfield | DataType::Enum(_) => vec![raw as u16],
    })
}

fn raw_bounds(data_type: DataType) -> (i64, i64) {
    match data_type {
        DataType::I16 => (i16::MIN as i64, i16::MAX as i64),
        DataType::Byte => (0, u8::MAX as i64),
        DataType::U32 => (0, u32::MAX as i64),
        DataType::I32 => (i32::MIN as i64, i32::MAX as i64),
        DataType::U16 | DataType::Bitfield | DataType::Enum(_) => (0, u16::MAX as i64),
    }
}

fn join(words: &[u16], order: WordOrder) -> u32 {
    let (high, low) = match order {
        WordOrder::HighFirst => (words[0], words[1]),
        WordOrder::LowFirst => (words[1], words[0]),
    };
    (high as u32) << 16 | low as u32
}

fn split(value: u32, order: WordOrder) -> [u16; 2] {
    let high = (value >> 16) as u16;
    let low = value as u16;
    match order {
        WordOrder::HighFirst => [high, low],
        WordOrder::LowFirst => [low, high],
    }
}
