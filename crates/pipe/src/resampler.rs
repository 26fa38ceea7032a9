//! Grid resampling kernels used by the resample stage
//!
//! A resampler maps a source grid onto a destination grid of a different
//! size covering the same area. Pixel centres are aligned, so destination
//! pixel `(r, c)` samples the source at
//! `((c + 0.5) * src_cols / dst_cols - 0.5, (r + 0.5) * src_rows / dst_rows - 0.5)`.
//! NaN marks no-data in both grids; a destination pixel is no-data when the
//! nearest source pixel is, otherwise kernel weights are renormalised over
//! the valid neighbours.

use std::fmt;

use ndarray::{Array2, ArrayView2};

use crate::maybe_rayon::*;

/// Strategy that fills `dst` from `src`
pub trait Resampler: Send + Sync + fmt::Debug {
    fn resample(&self, src: ArrayView2<'_, f64>, dst: &mut Array2<f64>);

    /// Persistence identifier, e.g. `"bilinear"`
    fn kind(&self) -> &'static str;

    fn clone_box(&self) -> Box<dyn Resampler>;
}

impl Clone for Box<dyn Resampler> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Build a resampler from its [`Resampler::kind`] name
pub fn resampler_from_kind(kind: &str) -> Option<Box<dyn Resampler>> {
    match kind.to_ascii_lowercase().as_str() {
        "nearest" => Some(Box::new(NearestResampler)),
        "bilinear" => Some(Box::new(BilinearResampler)),
        "cubic" => Some(Box::new(CubicResampler)),
        _ => None,
    }
}

/// Fill `dst` row by row, evaluating `sample(src, sx, sy)` per pixel
fn resample_with<F>(src: ArrayView2<'_, f64>, dst: &mut Array2<f64>, sample: F)
where
    F: Fn(&ArrayView2<'_, f64>, f64, f64) -> f64 + Sync,
{
    let (src_rows, src_cols) = src.dim();
    let (dst_rows, dst_cols) = dst.dim();
    if dst_rows == 0 || dst_cols == 0 {
        return;
    }
    if src_rows == 0 || src_cols == 0 {
        dst.fill(f64::NAN);
        return;
    }

    let x_scale = src_cols as f64 / dst_cols as f64;
    let y_scale = src_rows as f64 / dst_rows as f64;

    let values: Vec<f64> = (0..dst_rows)
        .into_par_iter()
        .flat_map(|row| {
            let sy = (row as f64 + 0.5) * y_scale - 0.5;
            (0..dst_cols)
                .map(|col| {
                    let sx = (col as f64 + 0.5) * x_scale - 0.5;
                    sample(&src, sx, sy)
                })
                .collect::<Vec<_>>()
        })
        .collect();

    for (d, v) in dst.iter_mut().zip(values) {
        *d = v;
    }
}

fn clamp_index(i: isize, len: usize) -> usize {
    i.clamp(0, len as isize - 1) as usize
}

fn nearest(src: &ArrayView2<'_, f64>, sx: f64, sy: f64) -> f64 {
    let (rows, cols) = src.dim();
    let r = clamp_index(sy.round() as isize, rows);
    let c = clamp_index(sx.round() as isize, cols);
    src[(r, c)]
}

/// Weighted sum over an `n x n` window starting at `(x0, y0)`
fn convolve(
    src: &ArrayView2<'_, f64>,
    sx: f64,
    sy: f64,
    x0: isize,
    y0: isize,
    n: isize,
    kernel: impl Fn(f64) -> f64,
) -> f64 {
    if nearest(src, sx, sy).is_nan() {
        return f64::NAN;
    }

    let (rows, cols) = src.dim();
    let mut sum = 0.0;
    let mut weight_sum = 0.0;
    for j in 0..n {
        let y = y0 + j;
        let wy = kernel(sy - y as f64);
        if wy == 0.0 {
            continue;
        }
        let r = clamp_index(y, rows);
        for i in 0..n {
            let x = x0 + i;
            let w = wy * kernel(sx - x as f64);
            if w == 0.0 {
                continue;
            }
            let v = src[(r, clamp_index(x, cols))];
            if v.is_nan() {
                continue;
            }
            sum += w * v;
            weight_sum += w;
        }
    }

    if weight_sum.abs() < f64::EPSILON {
        f64::NAN
    } else {
        sum / weight_sum
    }
}

/// Nearest neighbour
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestResampler;

impl Resampler for NearestResampler {
    fn resample(&self, src: ArrayView2<'_, f64>, dst: &mut Array2<f64>) {
        resample_with(src, dst, nearest);
    }

    fn kind(&self) -> &'static str {
        "nearest"
    }

    fn clone_box(&self) -> Box<dyn Resampler> {
        Box::new(*self)
    }
}

/// Bilinear interpolation over the 2x2 neighbourhood
#[derive(Debug, Clone, Copy, Default)]
pub struct BilinearResampler;

fn triangle(t: f64) -> f64 {
    (1.0 - t.abs()).max(0.0)
}

impl Resampler for BilinearResampler {
    fn resample(&self, src: ArrayView2<'_, f64>, dst: &mut Array2<f64>) {
        resample_with(src, dst, |src, sx, sy| {
            convolve(src, sx, sy, sx.floor() as isize, sy.floor() as isize, 2, triangle)
        });
    }

    fn kind(&self) -> &'static str {
        "bilinear"
    }

    fn clone_box(&self) -> Box<dyn Resampler> {
        Box::new(*self)
    }
}

/// Keys cubic convolution (a = -0.5) over the 4x4 neighbourhood
#[derive(Debug, Clone, Copy, Default)]
pub struct CubicResampler;

const KEYS_A: f64 = -0.5;

fn keys(t: f64) -> f64 {
    let t = t.abs();
    if t <= 1.0 {
        (KEYS_A + 2.0) * t * t * t - (KEYS_A + 3.0) * t * t + 1.0
    } else if t < 2.0 {
        KEYS_A * t * t * t - 5.0 * KEYS_A * t * t + 8.0 * KEYS_A * t - 4.0 * KEYS_A
    } else {
        0.0
    }
}

impl Resampler for CubicResampler {
    fn resample(&self, src: ArrayView2<'_, f64>, dst: &mut Array2<f64>) {
        resample_with(src, dst, |src, sx, sy| {
            convolve(src, sx, sy, sx.floor() as isize - 1, sy.floor() as isize - 1, 4, keys)
        });
    }

    fn kind(&self) -> &'static str {
        "cubic"
    }

    fn clone_box(&self) -> Box<dyn Resampler> {
        Box::new(*self)
    }
}
