//! Axis-aligned geographic rectangles

use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis-aligned rectangle in map units.
///
/// The default rectangle is empty; pipeline queries treat an empty
/// rectangle as "the full extent of the stage".
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rectangle {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl Rectangle {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// A rectangle with no area (or inverted bounds) is empty
    pub fn is_empty(&self) -> bool {
        !(self.xmax > self.xmin && self.ymax > self.ymin)
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.xmin + self.xmax) / 2.0,
            (self.ymin + self.ymax) / 2.0,
        )
    }

    /// Point-in-rectangle test, inclusive of the min edges only
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.xmin && x < self.xmax && y > self.ymin && y <= self.ymax
    }

    /// Intersection of two rectangles; empty if they do not overlap
    pub fn intersect(&self, other: &Rectangle) -> Rectangle {
        let r = Rectangle::new(
            self.xmin.max(other.xmin),
            self.ymin.max(other.ymin),
            self.xmax.min(other.xmax),
            self.ymax.min(other.ymax),
        );
        if r.is_empty() { Rectangle::default() } else { r }
    }
}

impl fmt::Display for Rectangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{} : {},{}",
            self.xmin, self.ymin, self.xmax, self.ymax
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_empty() {
        assert!(Rectangle::default().is_empty());
        assert!(!Rectangle::new(0.0, 0.0, 1.0, 1.0).is_empty());
    }

    #[test]
    fn test_intersect() {
        let a = Rectangle::new(0.0, 0.0, 10.0, 10.0);
        let b = Rectangle::new(5.0, -5.0, 15.0, 5.0);
        assert_eq!(a.intersect(&b), Rectangle::new(5.0, 0.0, 10.0, 5.0));

        let c = Rectangle::new(20.0, 20.0, 30.0, 30.0);
        assert!(a.intersect(&c).is_empty());
    }
}
