//! Tiling of a sampling grid into block-sized reads

/// A rectangular window of a sampling grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    /// Row offset in the full grid
    pub row_offset: usize,
    /// Column offset in the full grid
    pub col_offset: usize,
    /// Number of rows in this tile
    pub rows: usize,
    /// Number of columns in this tile
    pub cols: usize,
}

impl Tile {
    pub fn new(row_offset: usize, col_offset: usize, rows: usize, cols: usize) -> Self {
        Self {
            row_offset,
            col_offset,
            rows,
            cols,
        }
    }

    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Row-major iterator over tiles covering a grid; edge tiles are clipped
#[derive(Debug, Clone)]
pub struct TileIterator {
    total_rows: usize,
    total_cols: usize,
    tile_rows: usize,
    tile_cols: usize,
    current_row: usize,
    current_col: usize,
}

impl TileIterator {
    /// Tile sizes of zero are treated as one
    pub fn new(total_rows: usize, total_cols: usize, tile_rows: usize, tile_cols: usize) -> Self {
        Self {
            total_rows,
            total_cols,
            tile_rows: tile_rows.max(1),
            tile_cols: tile_cols.max(1),
            current_row: 0,
            current_col: 0,
        }
    }

    /// Number of tiles the iterator yields in total
    pub fn tile_count(&self) -> usize {
        if self.total_cols == 0 {
            return 0;
        }
        self.total_rows.div_ceil(self.tile_rows) * self.total_cols.div_ceil(self.tile_cols)
    }
}

impl Iterator for TileIterator {
    type Item = Tile;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_row >= self.total_rows || self.total_cols == 0 {
            return None;
        }

        let rows = self.tile_rows.min(self.total_rows - self.current_row);
        let cols = self.tile_cols.min(self.total_cols - self.current_col);
        let tile = Tile::new(self.current_row, self.current_col, rows, cols);

        self.current_col += self.tile_cols;
        if self.current_col >= self.total_cols {
            self.current_col = 0;
            self.current_row += self.tile_rows;
        }

        Some(tile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiles_cover_grid() {
        let it = TileIterator::new(1100, 700, 500, 500);
        assert_eq!(it.tile_count(), 6);

        let tiles: Vec<_> = it.collect();
        assert_eq!(tiles.len(), 6);
        assert_eq!(tiles.iter().map(Tile::len).sum::<usize>(), 1100 * 700);
        assert_eq!(tiles[1], Tile::new(0, 500, 500, 200));
        assert_eq!(tiles[5], Tile::new(1000, 500, 100, 200));
    }

    #[test]
    fn test_empty_grid() {
        assert_eq!(TileIterator::new(0, 10, 5, 5).count(), 0);
        assert_eq!(TileIterator::new(10, 0, 5, 5).count(), 0);
    }
}
