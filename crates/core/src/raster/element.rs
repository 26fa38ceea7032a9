//! Raster element trait for typed sample values

use crate::raster::DataType;
use num_traits::{NumCast, Zero};
use std::fmt::Debug;

/// Trait for primitive types that can be stored in a raster block.
///
/// Each implementation is tied to one [`DataType`] and knows how to move
/// itself in and out of a block's native-endian byte buffer.
pub trait RasterElement:
    Copy + Clone + Debug + PartialOrd + PartialEq + NumCast + Zero + Send + Sync + 'static
{
    /// Block data type matching this primitive
    const DATA_TYPE: DataType;

    /// Read one sample from exactly `size_of::<Self>()` native-endian bytes
    fn read_ne(bytes: &[u8]) -> Self;

    /// Write this sample into exactly `size_of::<Self>()` bytes
    fn write_ne(self, out: &mut [u8]);

    /// Convert from f64, saturating at the type bounds (NaN becomes zero for integers)
    fn from_f64(value: f64) -> Self;

    /// Convert self to f64
    fn to_f64(self) -> Option<f64> {
        NumCast::from(self)
    }
}

macro_rules! impl_raster_element_int {
    ($t:ty, $dt:expr) => {
        impl RasterElement for $t {
            const DATA_TYPE: DataType = $dt;

            fn read_ne(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(bytes);
                <$t>::from_ne_bytes(buf)
            }

            fn write_ne(self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_ne_bytes());
            }

            fn from_f64(value: f64) -> Self {
                // float -> int `as` casts saturate and map NaN to 0
                value.round() as $t
            }
        }
    };
}

macro_rules! impl_raster_element_float {
    ($t:ty, $dt:expr) => {
        impl RasterElement for $t {
            const DATA_TYPE: DataType = $dt;

            fn read_ne(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(bytes);
                <$t>::from_ne_bytes(buf)
            }

            fn write_ne(self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_ne_bytes());
            }

            fn from_f64(value: f64) -> Self {
                value as $t
            }
        }
    };
}

impl_raster_element_int!(i8, DataType::Int8);
impl_raster_element_int!(i16, DataType::Int16);
impl_raster_element_int!(i32, DataType::Int32);
impl_raster_element_int!(i64, DataType::Int64);
impl_raster_element_int!(u8, DataType::Byte);
impl_raster_element_int!(u16, DataType::UInt16);
impl_raster_element_int!(u32, DataType::UInt32);
impl_raster_element_int!(u64, DataType::UInt64);
impl_raster_element_float!(f32, DataType::Float32);
impl_raster_element_float!(f64, DataType::Float64);

/// Read the sample at `bytes` (one full sample of `data_type`) as f64.
///
/// Complex samples yield their real component, colour samples the packed
/// ARGB integer.
pub fn read_sample(data_type: DataType, bytes: &[u8]) -> f64 {
    fn as_f64<T: RasterElement>(bytes: &[u8]) -> f64 {
        T::read_ne(&bytes[..std::mem::size_of::<T>()])
            .to_f64()
            .unwrap_or(f64::NAN)
    }

    match data_type {
        DataType::Unknown => f64::NAN,
        DataType::Byte => as_f64::<u8>(bytes),
        DataType::Int8 => as_f64::<i8>(bytes),
        DataType::UInt16 => as_f64::<u16>(bytes),
        DataType::Int16 | DataType::CInt16 => as_f64::<i16>(bytes),
        DataType::UInt32 | DataType::Argb32 | DataType::Argb32Premultiplied => {
            as_f64::<u32>(bytes)
        }
        DataType::Int32 | DataType::CInt32 => as_f64::<i32>(bytes),
        DataType::UInt64 => as_f64::<u64>(bytes),
        DataType::Int64 => as_f64::<i64>(bytes),
        DataType::Float32 | DataType::CFloat32 => as_f64::<f32>(bytes),
        DataType::Float64 | DataType::CFloat64 => as_f64::<f64>(bytes),
    }
}

/// Write `value` into one sample slot of `data_type`.
///
/// Complex samples receive `value` as real part and a zero imaginary part.
pub fn write_sample(data_type: DataType, out: &mut [u8], value: f64) {
    fn put<T: RasterElement>(out: &mut [u8], value: f64) {
        T::from_f64(value).write_ne(&mut out[..std::mem::size_of::<T>()]);
    }

    match data_type {
        DataType::Unknown => {}
        DataType::Byte => put::<u8>(out, value),
        DataType::Int8 => put::<i8>(out, value),
        DataType::UInt16 => put::<u16>(out, value),
        DataType::Int16 => put::<i16>(out, value),
        DataType::UInt32 | DataType::Argb32 | DataType::Argb32Premultiplied => {
            put::<u32>(out, value)
        }
        DataType::Int32 => put::<i32>(out, value),
        DataType::UInt64 => put::<u64>(out, value),
        DataType::Int64 => put::<i64>(out, value),
        DataType::Float32 => put::<f32>(out, value),
        DataType::Float64 => put::<f64>(out, value),
        DataType::CInt16 => {
            put::<i16>(out, value);
            put::<i16>(&mut out[2..], 0.0);
        }
        DataType::CInt32 => {
            put::<i32>(out, value);
            put::<i32>(&mut out[4..], 0.0);
        }
        DataType::CFloat32 => {
            put::<f32>(out, value);
            put::<f32>(&mut out[4..], 0.0);
        }
        DataType::CFloat64 => {
            put::<f64>(out, value);
            put::<f64>(&mut out[8..], 0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_io() {
        for dt in DataType::ALL {
            let mut buf = vec![0u8; dt.type_size()];
            write_sample(dt, &mut buf, 42.0);
            assert_eq!(read_sample(dt, &buf), 42.0, "{dt}");
        }
    }

    #[test]
    fn test_integer_saturation() {
        assert_eq!(u8::from_f64(300.0), 255);
        assert_eq!(u8::from_f64(-5.0), 0);
        assert_eq!(i16::from_f64(f64::NAN), 0);
        assert_eq!(i32::from_f64(2.6), 3);
    }
}
