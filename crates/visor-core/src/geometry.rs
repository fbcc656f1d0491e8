//! Geometry primitives in target-image coordinates.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// A point in target-image coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned box. Width and height are never negative; constructors clamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width: width.max(0),
            height: height.max(0),
        }
    }

    /// Build from a `[x, y, width, height]` configuration list.
    pub fn from_list(values: [i32; 4]) -> Self {
        Self::new(values[0], values[1], values[2], values[3])
    }

    /// Fallible variant of [`Rect::from_list`] for configuration input.
    pub fn from_slice(values: &[i32]) -> Result<Self> {
        if values.len() != 4 {
            bail!("roi must have 4 components, got {}", values.len());
        }
        Ok(Self::new(values[0], values[1], values[2], values[3]))
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2, self.y + self.height / 2)
    }

    pub fn area(&self) -> f64 {
        self.width as f64 * self.height as f64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &Rect) -> f64 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) as f64 * (y2 - y1) as f64;
        let union = self.area() + other.area() - intersection;
        intersection / union
    }
}
