//! Typed config variables assigned to tiles by `set` statements.

use crate::error::{Result, SensorGraphError};
use std::fmt;
use std::str::FromStr;

/// Declared type of a config variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigType {
    UInt8,
    UInt16,
    UInt32,
    Int8,
    Int16,
    Int32,
    UInt8Array,
    UInt16Array,
    UInt32Array,
    Int8Array,
    Int16Array,
    Int32Array,
    String,
    Binary,
}

impl ConfigType {
    /// The scalar element type of an array type (scalars map to themselves)
    pub fn element(self) -> ConfigType {
        match self {
            ConfigType::UInt8Array => ConfigType::UInt8,
            ConfigType::UInt16Array => ConfigType::UInt16,
            ConfigType::UInt32Array => ConfigType::UInt32,
            ConfigType::Int8Array => ConfigType::Int8,
            ConfigType::Int16Array => ConfigType::Int16,
            ConfigType::Int32Array => ConfigType::Int32,
            other => other,
        }
    }

    pub fn is_array(self) -> bool {
        self.element() != self
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, ConfigType::String | ConfigType::Binary)
    }

    /// Inclusive value range of an integer element type
    fn range(self) -> Option<(i64, i64)> {
        match self.element() {
            ConfigType::UInt8 => Some((0, u8::MAX as i64)),
            ConfigType::UInt16 => Some((0, u16::MAX as i64)),
            ConfigType::UInt32 => Some((0, u32::MAX as i64)),
            ConfigType::Int8 => Some((i8::MIN as i64, i8::MAX as i64)),
            ConfigType::Int16 => Some((i16::MIN as i64, i16::MAX as i64)),
            ConfigType::Int32 => Some((i32::MIN as i64, i32::MAX as i64)),
            _ => None,
        }
    }

    fn width(self) -> usize {
        match self.element() {
            ConfigType::UInt8 | ConfigType::Int8 => 1,
            ConfigType::UInt16 | ConfigType::Int16 => 2,
            _ => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConfigType::UInt8 => "uint8_t",
            ConfigType::UInt16 => "uint16_t",
            ConfigType::UInt32 => "uint32_t",
            ConfigType::Int8 => "int8_t",
            ConfigType::Int16 => "int16_t",
            ConfigType::Int32 => "int32_t",
            ConfigType::UInt8Array => "uint8_t[]",
            ConfigType::UInt16Array => "uint16_t[]",
            ConfigType::UInt32Array => "uint32_t[]",
            ConfigType::Int8Array => "int8_t[]",
            ConfigType::Int16Array => "int16_t[]",
            ConfigType::Int32Array => "int32_t[]",
            ConfigType::String => "string",
            ConfigType::Binary => "binary",
        }
    }
}

impl fmt::Display for ConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigType {
    type Err = SensorGraphError;

    fn from_str(s: &str) -> Result<Self> {
        let ty = match s {
            "uint8_t" => ConfigType::UInt8,
            "uint16_t" => ConfigType::UInt16,
            "uint32_t" => ConfigType::UInt32,
            "int8_t" => ConfigType::Int8,
            "int16_t" => ConfigType::Int16,
            "int32_t" => ConfigType::Int32,
            "uint8_t[]" => ConfigType::UInt8Array,
            "uint16_t[]" => ConfigType::UInt16Array,
            "uint32_t[]" => ConfigType::UInt32Array,
            "int8_t[]" => ConfigType::Int8Array,
            "int16_t[]" => ConfigType::Int16Array,
            "int32_t[]" => ConfigType::Int32Array,
            "string" => ConfigType::String,
            "binary" => ConfigType::Binary,
            other => {
                return Err(SensorGraphError::Argument(format!(
                    "unknown config type '{}'",
                    other
                )))
            }
        };
        Ok(ty)
    }
}

/// A typed config variable value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    /// Scalar integer of the given type
    Integer(ConfigType, i64),
    /// Integer array of the given array type
    Array(ConfigType, Vec<i64>),
    String(String),
    Binary(Vec<u8>),
}

impl ConfigValue {
    /// Build an integer value, checking it fits the declared type
    ///
    /// An array type wraps the value in a single element array.
    pub fn integer(config_type: ConfigType, value: i64) -> Result<Self> {
        let (min, max) = config_type.range().ok_or_else(|| {
            SensorGraphError::Data(format!(
                "cannot assign integer {} to a {} config variable",
                value, config_type
            ))
        })?;
        if value < min || value > max {
            return Err(SensorGraphError::Data(format!(
                "value {} does not fit in {}",
                value, config_type
            )));
        }

        if config_type.is_array() {
            Ok(ConfigValue::Array(config_type, vec![value]))
        } else {
            Ok(ConfigValue::Integer(config_type, value))
        }
    }

    pub fn config_type(&self) -> ConfigType {
        match self {
            ConfigValue::Integer(ty, _) | ConfigValue::Array(ty, _) => *ty,
            ConfigValue::String(_) => ConfigType::String,
            ConfigValue::Binary(_) => ConfigType::Binary,
        }
    }

    /// Scalar integer value, if this is one
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ConfigValue::Integer(_, value) => Some(*value),
            _ => None,
        }
    }

    /// Little-endian byte encoding as sent to a tile
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            ConfigValue::Integer(ty, value) => pack_integer(*ty, *value),
            ConfigValue::Array(ty, values) => values
                .iter()
                .flat_map(|value| pack_integer(*ty, *value))
                .collect(),
            ConfigValue::String(text) => text.as_bytes().to_vec(),
            ConfigValue::Binary(bytes) => bytes.clone(),
        }
    }
}

fn pack_integer(ty: ConfigType, value: i64) -> Vec<u8> {
    let bytes = value.to_le_bytes();
    bytes[..ty.width()].to_vec()
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Integer(_, value) => write!(f, "{}", value),
            ConfigValue::Array(_, values) => {
                let items: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", items.join(", "))
            }
            ConfigValue::String(text) => write!(f, "{:?}", text),
            ConfigValue::Binary(bytes) => {
                write!(f, "hex:")?;
                for byte in bytes {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_range_checks() {
        assert!(ConfigValue::integer(ConfigType::UInt8, 255).is_ok());
        assert!(ConfigValue::integer(ConfigType::UInt8, 256).is_err());
        assert!(ConfigValue::integer(ConfigType::Int16, -32768).is_ok());
        assert!(ConfigValue::integer(ConfigType::UInt32, -1).is_err());
        assert!(ConfigValue::integer(ConfigType::String, 1).is_err());
    }

    #[test]
    fn test_to_bytes_little_endian() {
        let value = ConfigValue::integer(ConfigType::UInt16, 0x1234).unwrap();
        assert_eq!(value.to_bytes(), vec![0x34, 0x12]);

        let value = ConfigValue::integer(ConfigType::Int32, -2).unwrap();
        assert_eq!(value.to_bytes(), vec![0xFE, 0xFF, 0xFF, 0xFF]);

        let value = ConfigValue::integer(ConfigType::UInt8Array, 7).unwrap();
        assert_eq!(value.to_bytes(), vec![7]);
        assert_eq!(value.config_type(), ConfigType::UInt8Array);
    }

    #[test]
    fn test_type_names_parse() {
        for name in ["uint8_t", "int32_t", "uint16_t[]", "string", "binary"] {
            let ty: ConfigType = name.parse().unwrap();
            assert_eq!(ty.to_string(), name);
        }
        assert!("float".parse::<ConfigType>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(ConfigValue::Binary(vec![0xab, 0x01]).to_string(), "hex:ab01");
        assert_eq!(ConfigValue::String("abc".into()).to_string(), "\"abc\"");
    }
}
