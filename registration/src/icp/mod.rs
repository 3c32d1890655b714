//! Point-to-point ICP.
//!
//! Correspondences come from an R*-tree over the target; each iteration
//! solves the closed-form rigid alignment of the matched pairs (Kabsch, via
//! SVD) and composes it onto the running transform.

use nalgebra::{Matrix3, Matrix4, Point3, Rotation3, Translation3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sv_core::{Deadline, PointCloud};
use sv_point_cloud::SpatialIndex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcpConfig {
    pub max_iterations: usize,
    pub max_correspondence_distance: f32,
    /// Converged once an iteration moves the transform by less than this
    /// (squared translation plus rotation deviation).
    pub transformation_epsilon: f32,
    /// Converged once the mean squared error changes by less than this.
    pub fitness_epsilon: f32,
}

impl Default for IcpConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_correspondence_distance: 0.05,
            transformation_epsilon: 1e-8,
            fitness_epsilon: 1e-9,
        }
    }
}

/// ICP (Iterative Closest Point) registration result
#[derive(Debug, Clone)]
pub struct ICPResult {
    /// 4×4 homogeneous transform taking source into target
    pub transformation: Matrix4<f32>,
    /// Mean squared distance from every transformed source point to its
    /// nearest target point; lower is better
    pub fitness: f32,
    /// Fraction of source points with a correspondence within range
    pub inlier_ratio: f32,
    /// Root mean square error of the in-range correspondences
    pub inlier_rmse: f32,
    pub num_iterations: usize,
    pub converged: bool,
    /// Stopped on the deadline
    pub exhausted: bool,
}

/// Translation moving the source centroid onto the target centroid.
pub fn centroid_initialization(source: &PointCloud, target: &PointCloud) -> Matrix4<f32> {
    match (source.centroid(), target.centroid()) {
        (Some(s), Some(t)) => Translation3::from(t - s).to_homogeneous(),
        _ => Matrix4::identity(),
    }
}

/// Point-to-point ICP registration of `source` onto `target`.
///
/// Starts from `init_transformation` and runs until convergence,
/// `config.max_iterations` or the deadline, whichever comes first. Returns
/// `None` only when either cloud is empty.
pub fn registration_icp_point_to_point(
    source: &PointCloud,
    target: &PointCloud,
    config: &IcpConfig,
    init_transformation: &Matrix4<f32>,
    deadline: &Deadline,
) -> Option<ICPResult> {
    if source.is_empty() || target.is_empty() {
        return None;
    }

    let target_index = SpatialIndex::build(target.points());
    let max_dist_sq = config.max_correspondence_distance * config.max_correspondence_distance;

    let mut transformation = *init_transformation;
    let mut previous_mse = f32::INFINITY;
    let mut converged = false;
    let mut exhausted = false;
    let mut num_iterations = 0;

    for _ in 0..config.max_iterations {
        if deadline.expired() {
            exhausted = true;
            break;
        }
        num_iterations += 1;

        // Find correspondences
        let pairs: Vec<(Point3<f32>, Point3<f32>, f32)> = source
            .points()
            .par_iter()
            .filter_map(|p| {
                let moved = transformation.transform_point(p);
                let (idx, dist_sq) = target_index.nearest(&moved)?;
                (dist_sq <= max_dist_sq).then(|| (moved, target.points()[idx], dist_sq))
            })
            .collect();

        if pairs.len() < 3 {
            debug!(correspondences = pairs.len(), "icp ran out of correspondences");
            break;
        }

        let mse = pairs.iter().map(|(_, _, d)| d).sum::<f32>() / pairs.len() as f32;
        let Some(step) = kabsch(&pairs) else {
            break;
        };
        transformation = step * transformation;

        let translation_sq = step.fixed_view::<3, 1>(0, 3).norm_squared();
        let rotation_dev = (step.fixed_view::<3, 3>(0, 0) - Matrix3::identity()).norm_squared();
        if translation_sq + rotation_dev < config.transformation_epsilon
            || (previous_mse - mse).abs() < config.fitness_epsilon
        {
            converged = true;
            break;
        }
        previous_mse = mse;
    }

    let (inlier_ratio, inlier_rmse, fitness) =
        evaluate_registration(source, &target_index, &transformation, config.max_correspondence_distance);

    debug!(
        iterations = num_iterations,
        converged, fitness, inlier_ratio, "icp finished"
    );
    Some(ICPResult {
        transformation,
        fitness,
        inlier_ratio,
        inlier_rmse,
        num_iterations,
        converged,
        exhausted,
    })
}

/// Rigid transform best mapping the first point of every pair onto the second.
fn kabsch(pairs: &[(Point3<f32>, Point3<f32>, f32)]) -> Option<Matrix4<f32>> {
    let inv = 1.0 / pairs.len() as f32;
    let (sum_s, sum_t) = pairs.iter().fold(
        (Vector3::zeros(), Vector3::zeros()),
        |(s, t), (a, b, _)| (s + a.coords, t + b.coords),
    );
    let cs = sum_s * inv;
    let ct = sum_t * inv;

    let mut h = Matrix3::zeros();
    for (a, b, _) in pairs {
        h += (a.coords - cs) * (b.coords - ct).transpose();
    }

    let svd = h.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r = v_t.transpose() * u.transpose();
    if r.determinant() < 0.0 {
        let mut v = v_t.transpose();
        v.column_mut(2).neg_mut();
        r = v * u.transpose();
    }
    if !r.iter().all(|x| x.is_finite()) {
        return None;
    }

    let t = ct - r * cs;
    let mut step = Rotation3::from_matrix_unchecked(r).to_homogeneous();
    step.fixed_view_mut::<3, 1>(0, 3).copy_from(&t);
    Some(step)
}

/// Evaluate a registration.
///
/// Returns `(inlier_ratio, inlier_rmse, fitness)` where the inlier terms only
/// count correspondences within `max_correspondence_distance` and `fitness`
/// is the mean squared nearest distance over all source points.
pub fn evaluate_registration(
    source: &PointCloud,
    target_index: &SpatialIndex,
    transformation: &Matrix4<f32>,
    max_correspondence_distance: f32,
) -> (f32, f32, f32) {
    let max_dist_sq = max_correspondence_distance * max_correspondence_distance;
    let distances: Vec<f32> = source
        .points()
        .par_iter()
        .filter_map(|p| target_index.nearest(&transformation.transform_point(p)).map(|(_, d)| d))
        .collect();

    if distances.is_empty() {
        return (0.0, 0.0, f32::INFINITY);
    }

    let inliers: Vec<f32> = distances.iter().copied().filter(|&d| d <= max_dist_sq).collect();
    let inlier_ratio = inliers.len() as f32 / source.len() as f32;
    let inlier_rmse = if inliers.is_empty() {
        0.0
    } else {
        (inliers.iter().sum::<f32>() / inliers.len() as f32).sqrt()
    };
    let fitness = distances.iter().sum::<f32>() / distances.len() as f32;
    (inlier_ratio, inlier_rmse, fitness)
}
