//! Clustered viewpoint feature histogram.
//!
//! The object surface is split into smooth regions; for every region a
//! viewpoint feature histogram is computed over the whole object about the
//! region's centroid and mean normal. Layout of one histogram:
//!
//! | range     | content                                      |
//! |-----------|----------------------------------------------|
//! | 0..45     | angle between the reference `v` axis and normal |
//! | 45..90    | cosine of the normal/pair-direction angle    |
//! | 90..135   | azimuth of the normal in the Darboux frame   |
//! | 135..180  | distance to the centroid, normalized         |
//! | 180..308  | normal against the viewpoint direction       |
//!
//! Each of the five components sums to 100. Region histograms are reduced to
//! one descriptor by their point-count weighted mean.

use crate::vector::SHAPE_LEN;
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::f32::consts::PI;
use sv_core::{Error, PointCloud, Result};
use sv_point_cloud::{estimate_normals, NormalEstimate, SpatialIndex};
use tracing::debug;

const ANGLE_BINS: usize = 45;
const VIEWPOINT_BINS: usize = 128;

pub type ShapeDescriptor = [f32; SHAPE_LEN];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapeConfig {
    pub normal_radius: f32,
    pub eps_angle_deg: f32,
    pub curvature_threshold: f32,
    pub region_tolerance: f32,
    pub min_region_points: usize,
    pub min_points: usize,
    pub viewpoint: [f32; 3],
}

impl Default for ShapeConfig {
    fn default() -> Self {
        Self {
            normal_radius: 0.03,
            eps_angle_deg: 5.0,
            curvature_threshold: 1.0,
            region_tolerance: 0.015,
            min_region_points: 50,
            min_points: 10,
            viewpoint: [0.0; 3],
        }
    }
}

struct Surface<'a> {
    points: &'a [Point3<f32>],
    normals: &'a NormalEstimate,
    valid: Vec<usize>,
}

/// Compute the 308-value shape descriptor of one object cloud.
///
/// Fails with a recoverable [`Error::EmptyInput`] when the cloud has fewer
/// than `config.min_points` points or no point with a usable normal.
pub fn estimate_shape_descriptor(cloud: &PointCloud, config: &ShapeConfig) -> Result<ShapeDescriptor> {
    if cloud.len() < config.min_points.max(3) {
        return Err(Error::EmptyInput {
            points: cloud.len(),
            required: config.min_points.max(3),
        });
    }

    let points = cloud.points();
    let index = SpatialIndex::build(points);
    let viewpoint = Point3::from(config.viewpoint);
    let normals = estimate_normals(points, &index, config.normal_radius, &viewpoint);

    let valid: Vec<usize> = (0..points.len()).filter(|&i| normals.is_valid(i)).collect();
    if valid.len() < 3 {
        return Err(Error::EmptyInput {
            points: valid.len(),
            required: 3,
        });
    }
    let surface = Surface {
        points,
        normals: &normals,
        valid,
    };

    let mut regions = smooth_regions(&surface, &index, config);
    if regions.is_empty() {
        regions.push(surface.valid.clone());
    }

    let histograms: Vec<(ShapeDescriptor, usize)> = regions
        .par_iter()
        .map(|region| (region_histogram(&surface, region, &viewpoint), region.len()))
        .collect();

    let total: usize = histograms.iter().map(|(_, n)| n).sum();
    let mut descriptor = [0.0f32; SHAPE_LEN];
    for (hist, n) in &histograms {
        let w = *n as f32 / total as f32;
        for (d, h) in descriptor.iter_mut().zip(hist.iter()) {
            *d += h * w;
        }
    }

    debug!(
        points = cloud.len(),
        regions = histograms.len(),
        "shape descriptor"
    );
    Ok(descriptor)
}

/// Region growing over low-curvature points whose normals agree with the
/// normal of the point being expanded.
fn smooth_regions(surface: &Surface, index: &SpatialIndex, config: &ShapeConfig) -> Vec<Vec<usize>> {
    let n = surface.points.len();
    let cos_eps = config.eps_angle_deg.to_radians().cos();
    let normals = &surface.normals.normals;

    let mut eligible = vec![false; n];
    for &i in &surface.valid {
        eligible[i] = surface.normals.curvatures[i] <= config.curvature_threshold;
    }

    let mut visited = vec![false; n];
    let mut regions = Vec::new();
    for &seed in &surface.valid {
        if !eligible[seed] || visited[seed] {
            continue;
        }
        visited[seed] = true;
        let mut region = vec![seed];
        let mut queue = VecDeque::from([seed]);
        while let Some(current) = queue.pop_front() {
            for nb in index.within_radius(&surface.points[current], config.region_tolerance) {
                let j = nb.0;
                if visited[j] || !eligible[j] {
                    continue;
                }
                if normals[current].dot(&normals[j]) >= cos_eps {
                    visited[j] = true;
                    region.push(j);
                    queue.push_back(j);
                }
            }
        }
        if region.len() >= config.min_region_points {
            regions.push(region);
        }
    }
    regions
}

fn region_histogram(surface: &Surface, region: &[usize], viewpoint: &Point3<f32>) -> ShapeDescriptor {
    let points = surface.points;
    let normals = &surface.normals.normals;

    let inv = 1.0 / region.len() as f32;
    let centroid = Point3::from(region.iter().fold(Vector3::zeros(), |acc, &i| acc + points[i].coords) * inv);
    let mut mean_normal = region.iter().fold(Vector3::zeros(), |acc, &i| acc + normals[i]);
    if mean_normal.norm_squared() > 1e-12 {
        mean_normal.normalize_mut();
    } else {
        mean_normal = normals[region[0]];
    }

    let max_dist = surface
        .valid
        .iter()
        .map(|&i| (points[i] - centroid).norm())
        .fold(0.0f32, f32::max);

    let mut hist = [0.0f32; SHAPE_LEN];
    let count = surface.valid.len() as f32;
    let incr = 100.0 / count;

    let view_dir = {
        let d = viewpoint - centroid;
        if d.norm_squared() > 1e-12 {
            d.normalize()
        } else {
            mean_normal
        }
    };

    for &i in &surface.valid {
        let (alpha, phi, theta) = compute_pair_features(&centroid, &mean_normal, &points[i], &normals[i]);
        let dist = if max_dist > 1e-9 {
            (points[i] - centroid).norm() / max_dist
        } else {
            0.0
        };

        hist[bin(alpha, -1.0, 1.0, ANGLE_BINS)] += incr;
        hist[ANGLE_BINS + bin(phi, -1.0, 1.0, ANGLE_BINS)] += incr;
        hist[2 * ANGLE_BINS + bin(theta, -PI, PI, ANGLE_BINS)] += incr;
        hist[3 * ANGLE_BINS + bin(dist, 0.0, 1.0, ANGLE_BINS)] += incr;

        let cos_view = normals[i].dot(&view_dir);
        hist[4 * ANGLE_BINS + bin(cos_view, -1.0, 1.0, VIEWPOINT_BINS)] += incr;
    }
    hist
}

fn bin(value: f32, lo: f32, hi: f32, bins: usize) -> usize {
    let t = ((value - lo) / (hi - lo) * bins as f32).floor();
    if t.is_finite() {
        (t.max(0.0) as usize).min(bins - 1)
    } else {
        0
    }
}

/// Darboux-frame pair features between a reference point/normal and a
/// second point/normal.
fn compute_pair_features(
    p1: &Point3<f32>, n1: &Vector3<f32>,
    p2: &Point3<f32>, n2: &Vector3<f32>
) -> (f32, f32, f32) {
    let delta = p2 - p1;
    let dist = delta.norm();

    if dist < 1e-6 {
        return (0.0, 0.0, 0.0);
    }

    let u = n1;
    let v = delta.cross(u);
    let v_norm = v.norm();

    if v_norm < 1e-6 {
        return (0.0, u.dot(&delta) / dist, 0.0);
    }
    let v = v / v_norm;
    let w = u.cross(&v);

    let alpha = v.dot(n2);
    let phi = u.dot(&delta) / dist;
    let theta = w.dot(n2).atan2(u.dot(n2));

    (alpha, phi, theta)
}
