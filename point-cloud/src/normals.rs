use crate::spatial::SpatialIndex;
use nalgebra::{Matrix3, Point3, SymmetricEigen, Vector3};
use rayon::prelude::*;

/// Per-point normals and surface curvature.
///
/// Points with fewer than three neighbors get a zero normal and infinite
/// curvature so that curvature filters drop them.
#[derive(Debug, Clone, Default)]
pub struct NormalEstimate {
    pub normals: Vec<Vector3<f32>>,
    pub curvatures: Vec<f32>,
}

impl NormalEstimate {
    pub fn is_valid(&self, i: usize) -> bool {
        self.curvatures[i].is_finite()
    }
}

/// Smallest-eigenvalue direction and curvature `l0 / (l0 + l1 + l2)` of a
/// covariance matrix.
pub(crate) fn plane_from_covariance(cov: &Matrix3<f32>) -> (Vector3<f32>, f32) {
    let eigen = SymmetricEigen::new(*cov);

    // Find index of smallest eigenvalue explicitly
    let mut min_idx = 0;
    for i in 1..3 {
        if eigen.eigenvalues[i] < eigen.eigenvalues[min_idx] {
            min_idx = i;
        }
    }
    let sum = eigen.eigenvalues.iter().map(|v| v.max(0.0)).sum::<f32>();
    let curvature = if sum > 0.0 {
        eigen.eigenvalues[min_idx].max(0.0) / sum
    } else {
        0.0
    };
    (eigen.eigenvectors.column(min_idx).into_owned(), curvature)
}

/// Estimate normals from all neighbors within `radius` using PCA of the
/// neighborhood covariance. Each normal is flipped to face `viewpoint`.
pub fn estimate_normals(
    points: &[Point3<f32>],
    index: &SpatialIndex,
    radius: f32,
    viewpoint: &Point3<f32>,
) -> NormalEstimate {
    let (normals, curvatures): (Vec<Vector3<f32>>, Vec<f32>) = points
        .par_iter()
        .map(|p| {
            let neighbors: Vec<Point3<f32>> = index.within_radius(p, radius).map(|nb| nb.1).collect();
            if neighbors.len() < 3 {
                return (Vector3::zeros(), f32::INFINITY);
            }

            let inv = 1.0 / neighbors.len() as f32;
            let centroid = neighbors.iter().fold(Vector3::zeros(), |acc, q| acc + q.coords) * inv;
            let mut cov = Matrix3::zeros();
            for q in &neighbors {
                let d = q.coords - centroid;
                cov += d * d.transpose();
            }
            cov *= inv;

            let (mut normal, curvature) = plane_from_covariance(&cov);
            if normal.dot(&(viewpoint - p)) < 0.0 {
                normal = -normal;
            }
            (normal, curvature)
        })
        .unzip();

    NormalEstimate {
        normals,
        curvatures,
    }
}
