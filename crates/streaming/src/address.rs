//! Tile addressing over a fixed root extent.
//!
//! A level `l` splits the root bounds into a `2^l × 2^l` grid. Cell `(x, y)`
//! is counted from the root's minimum corner: `x` grows toward `root.max[0]`
//! and `y` grows toward `root.max[1]`. Callers that speak the XYZ/TMS
//! "y grows downward" convention must flip `y` themselves.

use std::fmt;
use std::str::FromStr;

use foundation::Aabb2;
use serde::{Deserialize, Serialize};

/// Deepest level whose grid indices still fit in `u32`.
pub const MAX_LEVEL: u8 = 31;

/// Immutable `(level, x, y)` key of a tile.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileAddress {
    pub level: u8,
    pub x: u32,
    pub y: u32,
}

impl TileAddress {
    pub fn new(level: u8, x: u32, y: u32) -> Self {
        Self { level, x, y }
    }

    /// Number of cells along one axis at `level`.
    pub fn grid_size(level: u8) -> u32 {
        1u32 << level.min(MAX_LEVEL)
    }

    /// Stable `"level-x-y"` map key.
    pub fn key(&self) -> String {
        self.to_string()
    }

    /// Bounds of this cell within `root`. Pure: no state, no validation.
    pub fn bounds(&self, root: &Aabb2) -> Aabb2 {
        root.grid_cell(Self::grid_size(self.level), self.x, self.y)
    }
}

impl fmt::Display for TileAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.level, self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseAddressError {
    input: String,
}

impl fmt::Display for ParseAddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid tile address {:?}, expected \"level-x-y\"", self.input)
    }
}

impl std::error::Error for ParseAddressError {}

impl FromStr for TileAddress {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseAddressError {
            input: s.to_string(),
        };
        let mut parts = s.split('-');
        let level: u8 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;
        let x: u32 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;
        let y: u32 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;
        if parts.next().is_some() || level > MAX_LEVEL {
            return Err(err());
        }
        Ok(Self { level, x, y })
    }
}

/// Inclusive rectangle of cells at one level.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TileRange {
    pub level: u8,
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl TileRange {
    /// Cells at `level` whose interior overlaps `viewport`.
    ///
    /// Returns `None` when the viewport has no interior overlap with `root`,
    /// including one that only shares an edge with it. A viewport with zero
    /// width or height selects the cell it sits in.
    pub fn covering(viewport: &Aabb2, level: u8, root: &Aabb2) -> Option<TileRange> {
        if !root.has_area() || !viewport.is_finite() {
            return None;
        }
        let clipped = viewport.intersection(root)?;
        if (viewport.width() > 0.0 && clipped.width() <= 0.0)
            || (viewport.height() > 0.0 && clipped.height() <= 0.0)
        {
            return None;
        }
        let level = level.min(MAX_LEVEL);
        let n = TileAddress::grid_size(level);
        let last = n - 1;

        let cell_w = root.width() / n as f64;
        let cell_h = root.height() / n as f64;

        let span = |lo: f64, hi: f64, origin: f64, cell: f64| -> (u32, u32) {
            let first = ((lo - origin) / cell).floor();
            // Upper edge is exclusive so a viewport ending exactly on a cell
            // boundary does not pull in the next column/row.
            let end = ((hi - origin) / cell).ceil() - 1.0;
            let first = clamp_index(first, last);
            let end = clamp_index(end, last).max(first);
            (first, end)
        };

        let (min_x, max_x) = span(clipped.min[0], clipped.max[0], root.min[0], cell_w);
        let (min_y, max_y) = span(clipped.min[1], clipped.max[1], root.min[1], cell_h);

        Some(TileRange {
            level,
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }

    /// Grows the range by `margin` cells on each side, clamped to the grid.
    pub fn expanded(&self, margin: u32) -> TileRange {
        let last = TileAddress::grid_size(self.level) - 1;
        TileRange {
            level: self.level,
            min_x: self.min_x.saturating_sub(margin),
            min_y: self.min_y.saturating_sub(margin),
            max_x: self.max_x.saturating_add(margin).min(last),
            max_y: self.max_y.saturating_add(margin).min(last),
        }
    }

    pub fn contains(&self, address: &TileAddress) -> bool {
        address.level == self.level
            && (self.min_x..=self.max_x).contains(&address.x)
            && (self.min_y..=self.max_y).contains(&address.y)
    }

    pub fn len(&self) -> usize {
        let w = (self.max_x - self.min_x) as usize + 1;
        let h = (self.max_y - self.min_y) as usize + 1;
        w * h
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major (y, then x) iteration.
    pub fn iter(&self) -> impl Iterator<Item = TileAddress> + '_ {
        (self.min_y..=self.max_y).flat_map(move |y| {
            (self.min_x..=self.max_x).map(move |x| TileAddress::new(self.level, x, y))
        })
    }
}

fn clamp_index(v: f64, last: u32) -> u32 {
    if v <= 0.0 {
        0
    } else if v >= last as f64 {
        last
    } else {
        v as u32
    }
}
