use nalgebra as na;

/// An ordered set of 2D or 3D points, one row per point.
///
/// Coordinates are immutable after construction; the registration pipeline
/// always produces a new `PointSet` instead of editing one in place.
#[derive(Debug, Clone, PartialEq)]
pub struct PointSet {
    coords: na::DMatrix<f64>,
}

impl PointSet {
    pub fn from_matrix(coords: na::DMatrix<f64>) -> PointSet {
        PointSet { coords }
    }

    /// Builds a point set from `len / dim` rows stored row-major in `flat`.
    pub fn from_flat(flat: &[f64], dim: usize) -> PointSet {
        let n = if dim == 0 { 0 } else { flat.len() / dim };
        PointSet {
            coords: na::DMatrix::from_row_slice(n, dim, flat),
        }
    }

    pub fn from_xyz(points: &[[f64; 3]]) -> PointSet {
        let flat: Vec<f64> = points.iter().flatten().copied().collect();
        PointSet::from_flat(&flat, 3)
    }

    pub fn from_xy(points: &[[f64; 2]]) -> PointSet {
        let flat: Vec<f64> = points.iter().flatten().copied().collect();
        PointSet::from_flat(&flat, 2)
    }

    pub fn coords(&self) -> &na::DMatrix<f64> {
        &self.coords
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.coords.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.nrows() == 0
    }

    /// Coordinate dimensionality (2 or 3 for anything loaded from disk).
    pub fn dim(&self) -> usize {
        self.coords.ncols()
    }

    pub fn point(&self, index: usize) -> na::DVector<f64> {
        self.coords.row(index).transpose()
    }

    pub fn centroid(&self) -> na::DVector<f64> {
        let mut c = na::DVector::zeros(self.dim());
        for i in 0..self.len() {
            c += self.point(i);
        }
        c / self.len() as f64
    }

    /// Axis-aligned bounds as (min, max) corner vectors.
    pub fn bounds(&self) -> (na::DVector<f64>, na::DVector<f64>) {
        let d = self.dim();
        let mut min = na::DVector::from_element(d, f64::INFINITY);
        let mut max = na::DVector::from_element(d, f64::NEG_INFINITY);
        for i in 0..self.len() {
            for j in 0..d {
                let v = self.coords[(i, j)];
                if v < min[j] {
                    min[j] = v;
                }
                if v > max[j] {
                    max[j] = v;
                }
            }
        }
        (min, max)
    }
}
