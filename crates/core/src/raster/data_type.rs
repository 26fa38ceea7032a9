//! Sample data types carried by raster blocks

use serde::{Deserialize, Serialize};
use std::fmt;

/// Data type of the samples stored in a raster band or block.
///
/// Complex types store two components per sample (real, imaginary).
/// `Argb32` types hold one packed 0xAARRGGBB colour per pixel and are
/// produced by rendering stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataType {
    #[default]
    Unknown,
    Byte,
    Int8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    UInt64,
    Int64,
    Float32,
    Float64,
    CInt16,
    CInt32,
    CFloat32,
    CFloat64,
    Argb32,
    Argb32Premultiplied,
}

impl DataType {
    /// Every known data type, `Unknown` excluded
    pub const ALL: [DataType; 16] = [
        DataType::Byte,
        DataType::Int8,
        DataType::UInt16,
        DataType::Int16,
        DataType::UInt32,
        DataType::Int32,
        DataType::UInt64,
        DataType::Int64,
        DataType::Float32,
        DataType::Float64,
        DataType::CInt16,
        DataType::CInt32,
        DataType::CFloat32,
        DataType::CFloat64,
        DataType::Argb32,
        DataType::Argb32Premultiplied,
    ];

    /// Size of one sample in bytes
    pub fn type_size(self) -> usize {
        match self {
            DataType::Unknown => 0,
            DataType::Byte | DataType::Int8 => 1,
            DataType::UInt16 | DataType::Int16 => 2,
            DataType::UInt32 | DataType::Int32 | DataType::Float32 => 4,
            DataType::UInt64 | DataType::Int64 | DataType::Float64 => 8,
            DataType::CInt16 => 4,
            DataType::CInt32 | DataType::CFloat32 => 8,
            DataType::CFloat64 => 16,
            DataType::Argb32 | DataType::Argb32Premultiplied => 4,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DataType::Byte
                | DataType::Int8
                | DataType::UInt16
                | DataType::Int16
                | DataType::UInt32
                | DataType::Int32
                | DataType::UInt64
                | DataType::Int64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    pub fn is_complex(self) -> bool {
        matches!(
            self,
            DataType::CInt16 | DataType::CInt32 | DataType::CFloat32 | DataType::CFloat64
        )
    }

    /// Whether samples carry numeric values (as opposed to packed colours)
    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float() || self.is_complex()
    }

    pub fn is_color(self) -> bool {
        matches!(self, DataType::Argb32 | DataType::Argb32Premultiplied)
    }

    /// Representable value range for integer types, `None` otherwise
    pub fn value_range(self) -> Option<(f64, f64)> {
        let range = match self {
            DataType::Byte => (u8::MIN as f64, u8::MAX as f64),
            DataType::Int8 => (i8::MIN as f64, i8::MAX as f64),
            DataType::UInt16 => (u16::MIN as f64, u16::MAX as f64),
            DataType::Int16 => (i16::MIN as f64, i16::MAX as f64),
            DataType::UInt32 => (u32::MIN as f64, u32::MAX as f64),
            DataType::Int32 => (i32::MIN as f64, i32::MAX as f64),
            DataType::UInt64 => (u64::MIN as f64, u64::MAX as f64),
            DataType::Int64 => (i64::MIN as f64, i64::MAX as f64),
            _ => return None,
        };
        Some(range)
    }

    /// Stable name used in persisted configuration
    pub fn name(self) -> &'static str {
        match self {
            DataType::Unknown => "Unknown",
            DataType::Byte => "Byte",
            DataType::Int8 => "Int8",
            DataType::UInt16 => "UInt16",
            DataType::Int16 => "Int16",
            DataType::UInt32 => "UInt32",
            DataType::Int32 => "Int32",
            DataType::UInt64 => "UInt64",
            DataType::Int64 => "Int64",
            DataType::Float32 => "Float32",
            DataType::Float64 => "Float64",
            DataType::CInt16 => "CInt16",
            DataType::CInt32 => "CInt32",
            DataType::CFloat32 => "CFloat32",
            DataType::CFloat64 => "CFloat64",
            DataType::Argb32 => "ARGB32",
            DataType::Argb32Premultiplied => "ARGB32_Premultiplied",
        }
    }

    /// Inverse of [`DataType::name`]; unknown names map to `Unknown`
    pub fn from_name(name: &str) -> Self {
        DataType::ALL
            .into_iter()
            .find(|dt| dt.name().eq_ignore_ascii_case(name))
            .unwrap_or(DataType::Unknown)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_sizes() {
        assert_eq!(DataType::Byte.type_size(), 1);
        assert_eq!(DataType::Int16.type_size(), 2);
        assert_eq!(DataType::Float32.type_size(), 4);
        assert_eq!(DataType::Float64.type_size(), 8);
        assert_eq!(DataType::CFloat64.type_size(), 16);
        assert_eq!(DataType::Argb32.type_size(), 4);
        assert_eq!(DataType::Unknown.type_size(), 0);
    }

    #[test]
    fn test_name_lookup() {
        for dt in DataType::ALL {
            assert_eq!(DataType::from_name(dt.name()), dt);
        }
        assert_eq!(DataType::from_name("float32"), DataType::Float32);
        assert_eq!(DataType::from_name("nope"), DataType::Unknown);
    }

    #[test]
    fn test_classification() {
        assert!(DataType::UInt16.is_integer());
        assert!(!DataType::UInt16.is_float());
        assert!(DataType::CInt16.is_complex());
        assert!(DataType::CInt16.is_numeric());
        assert!(!DataType::Argb32.is_numeric());
        assert_eq!(DataType::Byte.value_range(), Some((0.0, 255.0)));
        assert_eq!(DataType::Float32.value_range(), None);
    }
}
