//! Typed pixel blocks exchanged between pipeline stages

use crate::error::{Error, Result};
use crate::raster::element::{read_sample, write_sample};
use crate::raster::{DataType, RasterElement};
use ndarray::Array2;

/// A block of pixel values for one band.
///
/// The samples live in one contiguous native-endian byte buffer of exactly
/// `width * height * data_type.type_size()` bytes. The buffer is allocated
/// once and never resized; a stage that needs a different shape builds a
/// new block.
///
/// A pixel is no-data when its bit is set in the optional no-data mask, when
/// it equals the block's no-data value, or (for float types) when it is NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterBlock {
    data_type: DataType,
    width: usize,
    height: usize,
    data: Vec<u8>,
    no_data_value: Option<f64>,
    /// One bit per pixel, row-major, 1 = no-data
    no_data_mask: Option<Vec<u8>>,
}

impl RasterBlock {
    /// Allocate a zero-filled block
    pub fn new(data_type: DataType, width: usize, height: usize) -> Self {
        Self {
            data_type,
            width,
            height,
            data: vec![0u8; width * height * data_type.type_size()],
            no_data_value: None,
            no_data_mask: None,
        }
    }

    /// Allocate a block whose every pixel is no-data
    pub fn new_no_data(data_type: DataType, width: usize, height: usize) -> Self {
        let mut block = Self::new(data_type, width, height);
        block.set_all_no_data();
        block
    }

    /// Build a block from typed samples in row-major order
    pub fn from_values<T: RasterElement>(width: usize, height: usize, values: &[T]) -> Result<Self> {
        if values.len() != width * height {
            return Err(Error::InvalidDimensions { width, height });
        }
        let mut block = Self::new(T::DATA_TYPE, width, height);
        let size = T::DATA_TYPE.type_size();
        for (chunk, &v) in block.data.chunks_exact_mut(size).zip(values) {
            v.write_ne(chunk);
        }
        Ok(block)
    }

    /// Build a block of `data_type` from a (rows, cols) grid where NaN marks no-data
    pub fn from_array(data_type: DataType, array: &Array2<f64>, no_data_value: Option<f64>) -> Self {
        let (height, width) = array.dim();
        let mut block = Self::new(data_type, width, height).with_no_data_value(no_data_value);
        for (index, &v) in array.iter().enumerate() {
            if v.is_nan() {
                block.set_is_no_data_at(index);
            } else {
                block.set_value_at(index, v);
            }
        }
        block
    }

    /// Builder-style setter for the no-data value
    pub fn with_no_data_value(mut self, no_data_value: Option<f64>) -> Self {
        self.no_data_value = no_data_value;
        self
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of pixels
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A block of unknown type carries no samples
    pub fn is_valid(&self) -> bool {
        self.data_type != DataType::Unknown && !self.is_empty()
    }

    /// Raw sample buffer
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn no_data_value(&self) -> Option<f64> {
        self.no_data_value
    }

    /// Whether any no-data representation (value or mask) is present
    pub fn has_no_data(&self) -> bool {
        self.no_data_value.is_some() || self.no_data_mask.is_some()
    }

    fn sample_range(&self, index: usize) -> std::ops::Range<usize> {
        let size = self.data_type.type_size();
        index * size..(index + 1) * size
    }

    fn check_bounds(&self, row: usize, col: usize) -> Result<usize> {
        if row >= self.height || col >= self.width {
            return Err(Error::IndexOutOfBounds {
                row,
                col,
                rows: self.height,
                cols: self.width,
            });
        }
        Ok(row * self.width + col)
    }

    /// Value at a pixel index as f64
    ///
    /// # Panics
    /// Panics if `index >= self.len()`.
    pub fn value_at(&self, index: usize) -> f64 {
        read_sample(self.data_type, &self.data[self.sample_range(index)])
    }

    /// Value at (row, col) as f64
    pub fn value(&self, row: usize, col: usize) -> Result<f64> {
        let index = self.check_bounds(row, col)?;
        Ok(self.value_at(index))
    }

    /// Set the value at a pixel index, converting to the block's data type
    ///
    /// # Panics
    /// Panics if `index >= self.len()`.
    pub fn set_value_at(&mut self, index: usize, value: f64) {
        let range = self.sample_range(index);
        write_sample(self.data_type, &mut self.data[range], value);
        if let Some(mask) = self.no_data_mask.as_mut() {
            mask[index / 8] &= !(1 << (index % 8));
        }
    }

    /// Set the value at (row, col)
    pub fn set_value(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        let index = self.check_bounds(row, col)?;
        self.set_value_at(index, value);
        Ok(())
    }

    /// Packed 0xAARRGGBB colour of a colour block pixel
    pub fn color(&self, row: usize, col: usize) -> Result<u32> {
        let index = self.check_bounds(row, col)?;
        if !self.data_type.is_color() {
            return Err(Error::UnsupportedDataType(self.data_type.to_string()));
        }
        Ok(u32::read_ne(&self.data[self.sample_range(index)]))
    }

    /// Set a colour block pixel
    pub fn set_color_at(&mut self, index: usize, argb: u32) {
        let range = self.sample_range(index);
        argb.write_ne(&mut self.data[range]);
    }

    /// Whether the pixel at `index` is no-data
    pub fn is_no_data_at(&self, index: usize) -> bool {
        if let Some(mask) = &self.no_data_mask
            && mask[index / 8] & (1 << (index % 8)) != 0
        {
            return true;
        }
        if !self.data_type.is_numeric() {
            return false;
        }
        let v = self.value_at(index);
        if v.is_nan() {
            return true;
        }
        match self.no_data_value {
            Some(nd) if self.data_type == DataType::Float32 || self.data_type == DataType::CFloat32 => {
                v as f32 == nd as f32
            }
            Some(nd) => v == nd,
            None => false,
        }
    }

    /// Whether the pixel at (row, col) is no-data
    pub fn is_no_data(&self, row: usize, col: usize) -> Result<bool> {
        let index = self.check_bounds(row, col)?;
        Ok(self.is_no_data_at(index))
    }

    /// Mark the pixel at `index` as no-data.
    ///
    /// Writes the no-data value when the block has one its type can store,
    /// otherwise sets the pixel's mask bit.
    pub fn set_is_no_data_at(&mut self, index: usize) {
        if let Some(nd) = self.storable_no_data_value() {
            let range = self.sample_range(index);
            write_sample(self.data_type, &mut self.data[range], nd);
            return;
        }
        let bytes = self.len().div_ceil(8);
        let mask = self.no_data_mask.get_or_insert_with(|| vec![0u8; bytes]);
        mask[index / 8] |= 1 << (index % 8);
    }

    /// The no-data value, if a sample of this type stores it exactly.
    ///
    /// Values the type cannot hold (-9999 in a Byte block, fractions in an
    /// integer block) are marked through the mask instead.
    fn storable_no_data_value(&self) -> Option<f64> {
        let nd = self.no_data_value?;
        if !self.data_type.is_numeric() {
            return None;
        }
        let mut scratch = [0u8; 16];
        let slot = &mut scratch[..self.data_type.type_size()];
        write_sample(self.data_type, slot, nd);
        let stored = read_sample(self.data_type, slot);
        let exact = match self.data_type {
            DataType::Float32 | DataType::CFloat32 => stored as f32 == nd as f32,
            _ => stored == nd,
        };
        (exact || (stored.is_nan() && nd.is_nan())).then_some(nd)
    }

    /// Mark the pixel at (row, col) as no-data
    pub fn set_is_no_data(&mut self, row: usize, col: usize) -> Result<()> {
        let index = self.check_bounds(row, col)?;
        self.set_is_no_data_at(index);
        Ok(())
    }

    /// Mark every pixel as no-data
    pub fn set_all_no_data(&mut self) {
        match self.storable_no_data_value() {
            Some(nd) => {
                for index in 0..self.len() {
                    let range = self.sample_range(index);
                    write_sample(self.data_type, &mut self.data[range], nd);
                }
            }
            None => {
                self.no_data_mask = Some(vec![0xFF; self.len().div_ceil(8)]);
            }
        }
    }

    /// Number of no-data pixels
    pub fn no_data_count(&self) -> usize {
        (0..self.len()).filter(|&i| self.is_no_data_at(i)).count()
    }

    /// Typed copy of the samples if `T` matches the block's data type
    pub fn values<T: RasterElement>(&self) -> Option<Vec<T>> {
        if T::DATA_TYPE != self.data_type {
            return None;
        }
        let size = self.data_type.type_size();
        Some(self.data.chunks_exact(size).map(T::read_ne).collect())
    }

    /// Copy into a (rows, cols) grid of f64 with NaN for no-data pixels
    pub fn to_array(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.height, self.width), |(row, col)| {
            let index = row * self.width + col;
            if self.is_no_data_at(index) {
                f64::NAN
            } else {
                self.value_at(index)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_size_matches_type() {
        for dt in DataType::ALL {
            let block = RasterBlock::new(dt, 7, 5);
            assert_eq!(block.bytes().len(), 7 * 5 * dt.type_size());
        }
    }

    #[test]
    fn test_value_access() {
        let mut block = RasterBlock::new(DataType::Int16, 4, 3);
        block.set_value(2, 3, -12.0).unwrap();
        assert_eq!(block.value(2, 3).unwrap(), -12.0);
        assert!(block.value(3, 0).is_err());
    }

    #[test]
    fn test_no_data_mask() {
        let mut block = RasterBlock::new(DataType::Byte, 3, 3);
        assert!(!block.has_no_data());
        block.set_is_no_data(1, 1).unwrap();
        assert!(block.is_no_data(1, 1).unwrap());
        assert!(!block.is_no_data(0, 0).unwrap());
        assert_eq!(block.no_data_count(), 1);

        block.set_value(1, 1, 5.0).unwrap();
        assert!(!block.is_no_data(1, 1).unwrap());
    }

    #[test]
    fn test_no_data_value() {
        let mut block = RasterBlock::new(DataType::Float32, 2, 2).with_no_data_value(Some(-9999.0));
        block.set_is_no_data(0, 1).unwrap();
        assert_eq!(block.value(0, 1).unwrap(), -9999.0);
        assert!(block.is_no_data(0, 1).unwrap());
        assert_eq!(block.no_data_count(), 1);
    }

    #[test]
    fn test_unstorable_no_data_value_uses_mask() {
        let mut block = RasterBlock::new(DataType::Byte, 2, 2).with_no_data_value(Some(-9999.0));
        block.set_value(0, 0, 5.0).unwrap();
        block.set_is_no_data(0, 0).unwrap();
        assert!(block.is_no_data(0, 0).unwrap());
        assert!(!block.is_no_data(0, 1).unwrap());
        assert_eq!(block.no_data_count(), 1);

        let mut all = RasterBlock::new(DataType::Int16, 3, 2).with_no_data_value(Some(0.5));
        all.set_all_no_data();
        assert_eq!(all.no_data_count(), 6);

        let mut storable = RasterBlock::new(DataType::Byte, 2, 1).with_no_data_value(Some(255.0));
        storable.set_all_no_data();
        assert_eq!(storable.value(0, 1).unwrap(), 255.0);
        assert_eq!(storable.no_data_count(), 2);
    }

    #[test]
    fn test_all_no_data() {
        let block = RasterBlock::new_no_data(DataType::UInt16, 10, 10);
        assert_eq!(block.no_data_count(), 100);
    }

    #[test]
    fn test_array_conversion() {
        let mut array = Array2::from_elem((2, 3), 1.5);
        array[(1, 2)] = f64::NAN;
        let block = RasterBlock::from_array(DataType::Float64, &array, None);
        assert_eq!(block.width(), 3);
        assert_eq!(block.height(), 2);
        assert!(block.is_no_data(1, 2).unwrap());

        let back = block.to_array();
        assert_eq!(back[(0, 0)], 1.5);
        assert!(back[(1, 2)].is_nan());
    }

    #[test]
    fn test_typed_values() {
        let block = RasterBlock::from_values(2, 1, &[3u16, 4u16]).unwrap();
        assert_eq!(block.data_type(), DataType::UInt16);
        assert_eq!(block.values::<u16>(), Some(vec![3, 4]));
        assert_eq!(block.values::<f32>(), None);
        assert!(RasterBlock::from_values(3, 1, &[1u8]).is_err());
    }
}
