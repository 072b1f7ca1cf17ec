use crate::{
    error::{CpdError, Result},
    point_cloud::PointSet,
};
use std::collections::BTreeMap;

pub type Voxel = [i64; 3];

/// Collapses every occupied grid cell of edge `voxel_size` to the centroid of
/// the points inside it. Cells are emitted in sorted grid order, so the output
/// sequence is the same for identical inputs.
pub fn voxel_downsample(point_cloud: &PointSet, voxel_size: f64) -> Result<PointSet> {
    if !(voxel_size > 0.0) {
        return Err(CpdError::InvalidParameter(format!(
            "voxel_size must be positive, got {voxel_size}"
        )));
    }

    let dim = point_cloud.dim();
    let mut grid: BTreeMap<Voxel, (Vec<f64>, usize)> = BTreeMap::new();
    for i in 0..point_cloud.len() {
        let point = point_cloud.point(i);
        let voxel = point_to_voxel(point.as_slice(), voxel_size);
        let cell = grid.entry(voxel).or_insert_with(|| (vec![0.0; dim], 0));
        for (acc, v) in cell.0.iter_mut().zip(point.iter()) {
            *acc += v;
        }
        cell.1 += 1;
    }

    let mut flat = Vec::with_capacity(grid.len() * dim);
    for (sum, count) in grid.values() {
        flat.extend(sum.iter().map(|s| s / *count as f64));
    }
    Ok(PointSet::from_flat(&flat, dim))
}

pub fn point_to_voxel(point: &[f64], voxel_size: f64) -> Voxel {
    let mut voxel = [0i64; 3];
    for (v, c) in voxel.iter_mut().zip(point.iter()) {
        *v = (c / voxel_size).floor() as i64;
    }
    voxel
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scatter_cloud(n: usize) -> PointSet {
        // deterministic pseudo-scatter in a 10x10x10 box
        let points: Vec<[f64; 3]> = (0..n)
            .map(|i| {
                [
                    (i as f64 * 0.731) % 10.0,
                    (i as f64 * 0.419) % 10.0,
                    (i as f64 * 0.257) % 10.0,
                ]
            })
            .collect();
        PointSet::from_xyz(&points)
    }

    #[test]
    fn collapses_cell_to_centroid() {
        let cloud = PointSet::from_xyz(&[[0.1, 0.1, 0.1], [0.9, 0.9, 0.9]]);
        let down = voxel_downsample(&cloud, 1.0).unwrap();
        assert_eq!(down.len(), 1);
        approx::assert_relative_eq!(down.point(0)[0], 0.5);

        let down = voxel_downsample(&cloud, 0.5).unwrap();
        assert_eq!(down.len(), 2);
    }

    #[test]
    fn cardinality_bounded_by_input() {
        let cloud = scatter_cloud(500);
        for voxel_size in [0.1, 1.0, 5.0, 50.0] {
            let down = voxel_downsample(&cloud, voxel_size).unwrap();
            assert!(down.len() >= 1);
            assert!(down.len() <= cloud.len());
        }
    }

    #[test]
    fn rejects_non_positive_voxel_size() {
        let cloud = scatter_cloud(10);
        for bad in [0.0, -1.0, f64::NAN] {
            let err = voxel_downsample(&cloud, bad).unwrap_err();
            assert!(matches!(err, CpdError::InvalidParameter(_)));
        }
    }

    #[test]
    fn deterministic_output_order() {
        let cloud = scatter_cloud(200);
        let a = voxel_downsample(&cloud, 0.7).unwrap();
        let b = voxel_downsample(&cloud, 0.7).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn redownsampling_drifts_at_most_a_cell_diagonal() {
        let cloud = scatter_cloud(400);
        let voxel_size = 1.0;
        let once = voxel_downsample(&cloud, voxel_size).unwrap();
        let twice = voxel_downsample(&once, voxel_size).unwrap();
        assert!(twice.len() <= once.len());

        let max_drift = voxel_size * (once.dim() as f64).sqrt() + 1e-12;
        for i in 0..twice.len() {
            let p = twice.point(i);
            let nearest = (0..once.len())
                .map(|j| (&p - once.point(j)).norm())
                .fold(f64::INFINITY, f64::min);
            assert!(nearest <= max_drift, "drift {nearest} exceeds {max_drift}");
        }
    }

    #[test]
    fn extent_stays_within_input() {
        let cloud = scatter_cloud(300);
        let (in_min, in_max) = cloud.bounds();
        let down = voxel_downsample(&cloud, 2.5).unwrap();
        let (out_min, out_max) = down.bounds();
        for j in 0..cloud.dim() {
            assert!(out_min[j] >= in_min[j] - 1e-12);
            assert!(out_max[j] <= in_max[j] + 1e-12);
        }
    }

    #[test]
    fn keeps_2d_clouds_2d() {
        let cloud = PointSet::from_xy(&[[0.2, 0.2], [0.3, 0.1], [5.0, 5.0]]);
        let down = voxel_downsample(&cloud, 1.0).unwrap();
        assert_eq!(down.dim(), 2);
        assert_eq!(down.len(), 2);
    }
}
