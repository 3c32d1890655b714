use crate::normals::plane_from_covariance;
use nalgebra::{Matrix3, Point3, Vector3};
use serde::{Deserialize, Serialize};
use sv_core::{Deadline, Error, IndexSet, PointCloud, Ransac, Result, RobustConfig, RobustModel};
use tracing::{debug, info, warn};

/// Restricts plane normals to within `eps_angle_deg` of `axis` (either
/// direction).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisConstraint {
    pub axis: Vector3<f32>,
    pub eps_angle_deg: f32,
}

impl AxisConstraint {
    pub fn vertical(eps_angle_deg: f32) -> Self {
        Self {
            axis: Vector3::z(),
            eps_angle_deg,
        }
    }

    fn accepts(&self, normal: &Vector3<f32>) -> bool {
        let axis = self.axis.normalize();
        normal.dot(&axis).abs() >= self.eps_angle_deg.to_radians().cos()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaneConfig {
    pub distance_threshold: f32,
    pub max_iterations: usize,
    pub confidence: f64,
    /// Refit the plane to its inliers by least squares and re-select inliers.
    pub optimize_coefficients: bool,
    pub min_inliers: usize,
    pub axis: Option<AxisConstraint>,
    pub seed: Option<u64>,
}

impl Default for PlaneConfig {
    fn default() -> Self {
        Self {
            distance_threshold: 0.01,
            max_iterations: 1000,
            confidence: 0.99,
            optimize_coefficients: true,
            min_inliers: 3,
            axis: None,
            seed: None,
        }
    }
}

impl PlaneConfig {
    /// Horizontal support surface search: normal within 5 degrees of +z,
    /// 2 cm inlier band, 500 iterations.
    pub fn support_surface() -> Self {
        Self {
            distance_threshold: 0.02,
            max_iterations: 500,
            axis: Some(AxisConstraint::vertical(5.0)),
            ..Self::default()
        }
    }
}

/// Plane `ax + by + cz + d = 0` with unit normal and its inliers.
#[derive(Debug, Clone)]
pub struct PlaneModel {
    pub coefficients: Option<[f32; 4]>,
    pub inliers: IndexSet,
    /// The search stopped on the deadline.
    pub exhausted: bool,
}

impl PlaneModel {
    pub fn is_found(&self) -> bool {
        self.coefficients.is_some() && !self.inliers.is_empty()
    }
}

struct PlaneEstimator {
    axis: Option<AxisConstraint>,
}

impl RobustModel<Point3<f32>> for PlaneEstimator {
    type Model = [f32; 4];

    fn min_sample_size(&self) -> usize {
        3
    }

    fn estimate(&self, data: &[&Point3<f32>]) -> Option<Self::Model> {
        let p1 = data[0];
        let v1 = data[1] - p1;
        let v2 = data[2] - p1;
        let cross = v1.cross(&v2);
        let norm = cross.norm();
        if norm < 1e-12 || !norm.is_finite() {
            return None;
        }
        let normal = cross / norm;
        if let Some(axis) = &self.axis {
            if !axis.accepts(&normal) {
                return None;
            }
        }

        let d = -normal.dot(&p1.coords);
        Some([normal.x, normal.y, normal.z, d])
    }

    fn compute_error(&self, model: &Self::Model, data: &Point3<f32>) -> f64 {
        point_plane_distance(model, data) as f64
    }
}

fn point_plane_distance(model: &[f32; 4], p: &Point3<f32>) -> f32 {
    let [a, b, c, d] = *model;
    (a * p.x + b * p.y + c * p.z + d).abs()
}

fn fit_plane(points: &[Point3<f32>], indices: &[usize]) -> Option<[f32; 4]> {
    if indices.len() < 3 {
        return None;
    }
    let inv = 1.0 / indices.len() as f32;
    let centroid = indices
        .iter()
        .fold(Vector3::zeros(), |acc, &i| acc + points[i].coords)
        * inv;
    let mut cov = Matrix3::zeros();
    for &i in indices {
        let d = points[i].coords - centroid;
        cov += d * d.transpose();
    }
    let (normal, _) = plane_from_covariance(&(cov * inv));
    if !normal.iter().all(|v| v.is_finite()) {
        return None;
    }
    Some([normal.x, normal.y, normal.z, -normal.dot(&centroid)])
}

/// Fit the dominant plane of `cloud` by RANSAC.
///
/// The returned index set is empty when no hypothesis reaches
/// `config.min_inliers`. The search is bounded by `config.max_iterations` and
/// by `deadline`; hitting the deadline is reported in the result.
pub fn estimate_plane(cloud: &PointCloud, config: &PlaneConfig, deadline: &Deadline) -> PlaneModel {
    let points = cloud.points();
    let not_found = |exhausted| PlaneModel {
        coefficients: None,
        inliers: IndexSet::empty_for(cloud),
        exhausted,
    };

    let ransac = Ransac::new(RobustConfig {
        threshold: config.distance_threshold as f64,
        max_iterations: config.max_iterations,
        confidence: config.confidence,
        seed: config.seed,
    });
    let estimator = PlaneEstimator { axis: config.axis };
    let res = ransac.run(&estimator, points, deadline);

    let Some(mut model) = res.model else {
        debug!(points = cloud.len(), "no plane found");
        return not_found(res.exhausted);
    };
    let mut inliers = res.inlier_indices();

    if config.optimize_coefficients {
        if let Some(refined) = fit_plane(points, &inliers) {
            let normal = Vector3::new(refined[0], refined[1], refined[2]);
            if config.axis.map_or(true, |a| a.accepts(&normal)) {
                let reselected: Vec<usize> = points
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| point_plane_distance(&refined, p) < config.distance_threshold)
                    .map(|(i, _)| i)
                    .collect();
                if reselected.len() >= inliers.len() {
                    model = refined;
                    inliers = reselected;
                }
            }
        }
    }

    if inliers.len() < config.min_inliers.max(3) {
        debug!(inliers = inliers.len(), "no plane found");
        return not_found(res.exhausted);
    }

    match cloud.index_set(inliers) {
        Ok(inliers) => PlaneModel {
            coefficients: Some(model),
            inliers,
            exhausted: res.exhausted,
        },
        Err(_) => not_found(res.exhausted),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StripperConfig {
    pub plane: PlaneConfig,
    /// A plane is removed only when it has more inliers than this.
    pub size_threshold: usize,
}

impl Default for StripperConfig {
    fn default() -> Self {
        Self {
            plane: PlaneConfig::default(),
            size_threshold: 500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StripOutcome {
    pub cloud: PointCloud,
    pub planes_removed: usize,
    /// Stopped on the deadline rather than on a terminal condition.
    pub exhausted: bool,
}

/// Repeatedly fit and remove planes larger than `config.size_threshold`.
///
/// Terminates when no plane exceeds the threshold, when fewer than three
/// points remain, or when the deadline expires. Each removal shrinks the
/// cloud, and the loop is additionally capped at `|input|` iterations.
pub fn strip_planes(cloud: &PointCloud, config: &StripperConfig, deadline: &Deadline) -> Result<StripOutcome> {
    let mut current = cloud.clone();
    let mut planes_removed = 0;
    let mut exhausted = false;

    for _ in 0..cloud.len() {
        if current.len() < 3 {
            break;
        }
        if deadline.expired() {
            exhausted = true;
            break;
        }

        let plane = estimate_plane(&current, &config.plane, deadline);
        exhausted |= plane.exhausted;
        if plane.inliers.len() <= config.size_threshold {
            break;
        }

        debug!(
            plane_inliers = plane.inliers.len(),
            cloud = current.len(),
            "removing plane"
        );
        current = current.extract(&plane.inliers, true)?;
        planes_removed += 1;
        if exhausted {
            break;
        }
    }

    if exhausted {
        warn!(planes_removed, remaining = current.len(), "plane stripping stopped on deadline");
    } else {
        info!(planes_removed, remaining = current.len(), "extracted planes");
    }
    Ok(StripOutcome {
        cloud: current,
        planes_removed,
        exhausted,
    })
}

/// Drop every point below the lowest inlier of the horizontal support plane.
///
/// `cloud` must already be expressed in a frame whose +z axis points up.
/// Fails with [`Error::NoModel`] when no support plane is found.
pub fn crop_below_support(cloud: &PointCloud, config: &PlaneConfig, deadline: &Deadline) -> Result<PointCloud> {
    let plane = estimate_plane(cloud, config, deadline);
    if !plane.is_found() {
        return Err(Error::NoModel("support plane".to_string()));
    }

    let points = cloud.points();
    let lowest = plane
        .inliers
        .as_slice()
        .iter()
        .map(|&i| points[i].z)
        .fold(f32::INFINITY, f32::min);

    let kept: Vec<usize> = points
        .iter()
        .enumerate()
        .filter(|(_, p)| p.z >= lowest)
        .map(|(i, _)| i)
        .collect();
    debug!(input = cloud.len(), output = kept.len(), lowest, "cropped below support");
    let kept = cloud.index_set(kept)?;
    cloud.extract(&kept, false)
}
