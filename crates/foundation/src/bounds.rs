use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in map units.
///
/// `min` is the lower-left corner and `max` the upper-right one; a box with
/// `max <= min` on either axis has zero area.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb2 {
    pub min: [f64; 2],
    pub max: [f64; 2],
}

impl Aabb2 {
    pub fn new(min: [f64; 2], max: [f64; 2]) -> Self {
        Aabb2 { min, max }
    }

    pub fn from_extent(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Aabb2 {
            min: [min_x, min_y],
            max: [max_x, max_y],
        }
    }

    pub fn width(&self) -> f64 {
        self.max[0] - self.min[0]
    }

    pub fn height(&self) -> f64 {
        self.max[1] - self.min[1]
    }

    pub fn is_finite(&self) -> bool {
        self.min.iter().chain(self.max.iter()).all(|v| v.is_finite())
    }

    /// True when the box has positive area.
    pub fn has_area(&self) -> bool {
        self.width() > 0.0 && self.height() > 0.0
    }

    /// Closed-interval overlap test: boxes that only share an edge intersect.
    pub fn intersects(&self, other: &Aabb2) -> bool {
        self.min[0] <= other.max[0]
            && other.min[0] <= self.max[0]
            && self.min[1] <= other.max[1]
            && other.min[1] <= self.max[1]
    }

    pub fn intersection(&self, other: &Aabb2) -> Option<Aabb2> {
        if !self.intersects(other) {
            return None;
        }
        Some(Aabb2 {
            min: [self.min[0].max(other.min[0]), self.min[1].max(other.min[1])],
            max: [self.max[0].min(other.max[0]), self.max[1].min(other.max[1])],
        })
    }

    pub fn translated(&self, dx: f64, dy: f64) -> Aabb2 {
        Aabb2 {
            min: [self.min[0] + dx, self.min[1] + dy],
            max: [self.max[0] + dx, self.max[1] + dy],
        }
    }

    /// Cell `(col, row)` of an `n × n` grid laid over this box.
    ///
    /// Columns grow along +x from `min[0]`, rows along +y from `min[1]`.
    /// Cell edges are computed from the grid index directly so neighbouring
    /// cells share bit-identical edges.
    pub fn grid_cell(&self, n: u32, col: u32, row: u32) -> Aabb2 {
        let n = n.max(1) as f64;
        let w = self.width();
        let h = self.height();
        Aabb2 {
            min: [
                self.min[0] + w * (col as f64) / n,
                self.min[1] + h * (row as f64) / n,
            ],
            max: [
                self.min[0] + w * ((col + 1) as f64) / n,
                self.min[1] + h * ((row + 1) as f64) / n,
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Aabb2;

    #[test]
    fn grid_cells_tile_the_box() {
        let root = Aabb2::from_extent(-180.0, -90.0, 180.0, 90.0);
        let a = root.grid_cell(4, 1, 2);
        let b = root.grid_cell(4, 2, 2);
        assert_eq!(a.max[0], b.min[0]);
        assert_eq!(a, Aabb2::from_extent(-90.0, 0.0, 0.0, 45.0));
        assert_eq!(root.grid_cell(1, 0, 0), root);
    }

    #[test]
    fn edge_contact_counts_as_intersection() {
        let a = Aabb2::from_extent(0.0, 0.0, 1.0, 1.0);
        let b = Aabb2::from_extent(1.0, 0.0, 2.0, 1.0);
        let c = Aabb2::from_extent(1.5, 1.5, 2.0, 2.0);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        let i = a.intersection(&b).unwrap();
        assert!(!i.has_area());
    }

    #[test]
    fn translation_keeps_size() {
        let a = Aabb2::from_extent(0.0, 0.0, 2.0, 1.0).translated(3.0, -1.0);
        assert_eq!(a, Aabb2::from_extent(3.0, -1.0, 5.0, 0.0));
        assert_eq!(a.width(), 2.0);
    }
}
