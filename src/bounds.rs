/// Axis-aligned bounding box in 3D space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl BoundingBox {
    pub fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self { min, max }
    }

    /// An inverted box that grows to fit whatever is merged into it.
    pub fn empty() -> Self {
        Self {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
        }
    }

    /// Smallest box containing a set of points. Returns an inverted box for
    /// an empty slice.
    pub fn from_points(points: &[[f64; 3]]) -> Self {
        let mut b = Self::empty();
        for p in points {
            b.add_point(p);
        }
        b
    }

    pub fn add_point(&mut self, p: &[f64; 3]) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(p[i]);
            self.max[i] = self.max[i].max(p[i]);
        }
    }

    pub fn length(&self, axis: usize) -> f64 {
        self.max[axis] - self.min[axis]
    }

    /// A box is valid when min <= max on every axis and no bound is NaN.
    /// Zero-width axes are valid (point and line cells produce them).
    pub fn is_valid(&self) -> bool {
        (0..3).all(|i| self.min[i] <= self.max[i])
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        (0..3).all(|i| self.min[i] <= other.max[i] && self.max[i] >= other.min[i])
    }

    pub fn contains_point(&self, p: &[f64; 3]) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }

    /// Squared distance from a point to the box; zero inside.
    pub fn distance2_to_point(&self, p: &[f64; 3]) -> f64 {
        let mut d2 = 0.0;
        for i in 0..3 {
            let d = if p[i] < self.min[i] {
                self.min[i] - p[i]
            } else if p[i] > self.max[i] {
                p[i] - self.max[i]
            } else {
                0.0
            };
            d2 += d * d;
        }
        d2
    }

    /// The eight corner points, x varying fastest.
    pub fn corners(&self) -> [[f64; 3]; 8] {
        let mut c = [[0.0; 3]; 8];
        for (n, corner) in c.iter_mut().enumerate() {
            for i in 0..3 {
                corner[i] = if (n >> i) & 1 == 0 {
                    self.min[i]
                } else {
                    self.max[i]
                };
            }
        }
        c
    }

    /// Clip the parametric range of the segment `p1 + t*(p2-p1)`, `t` in
    /// `[0, 1]`, against the box. Returns the `(t_entry, t_exit)` range or
    /// `None` when the segment misses the box entirely.
    pub fn clip_segment(&self, p1: &[f64; 3], p2: &[f64; 3]) -> Option<(f64, f64)> {
        let mut t_min: f64 = 0.0;
        let mut t_max: f64 = 1.0;
        for i in 0..3 {
            let d = p2[i] - p1[i];
            if d.abs() < f64::EPSILON {
                if p1[i] < self.min[i] || p1[i] > self.max[i] {
                    return None;
                }
            } else {
                let inv = 1.0 / d;
                let mut t0 = (self.min[i] - p1[i]) * inv;
                let mut t1 = (self.max[i] - p1[i]) * inv;
                if t0 > t1 {
                    std::mem::swap(&mut t0, &mut t1);
                }
                t_min = t_min.max(t0);
                t_max = t_max.min(t1);
                if t_min > t_max {
                    return None;
                }
            }
        }
        Some((t_min, t_max))
    }
}
