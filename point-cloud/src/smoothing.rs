//! Moving-least-squares surface smoothing.
//!
//! For every point a Gaussian-weighted local plane is fitted over its radius
//! neighborhood; for polynomial order two and above a bivariate height field
//! over that plane is fitted as well. The point is projected onto the fitted
//! surface and the surface normal at the projection is attached.

use crate::normals::plane_from_covariance;
use crate::spatial::SpatialIndex;
use nalgebra::{DMatrix, DVector, Matrix3, Point3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sv_core::{PointCloud, Result};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    pub enabled: bool,
    pub search_radius: f32,
    pub polynomial_order: usize,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            search_radius: 0.03,
            polynomial_order: 1,
        }
    }
}

/// Smooth `cloud` by moving least squares.
///
/// The output has the same count and order as the input, colors are carried
/// by index and MLS normals are attached. Points with fewer than three
/// neighbors pass through unchanged.
pub fn smooth(cloud: &PointCloud, search_radius: f32, polynomial_order: usize) -> Result<PointCloud> {
    if cloud.is_empty() || search_radius <= 0.0 {
        return Ok(cloud.clone());
    }

    let index = SpatialIndex::build(cloud.points());
    let sqr_gauss = search_radius * search_radius;

    let (points, normals): (Vec<Point3<f32>>, Vec<Vector3<f32>>) = cloud
        .points()
        .par_iter()
        .map(|p| {
            let neighbors: Vec<Point3<f32>> =
                index.within_radius(p, search_radius).map(|nb| nb.1).collect();
            project_point(p, &neighbors, sqr_gauss, polynomial_order)
        })
        .unzip();

    debug!(points = points.len(), search_radius, polynomial_order, "mls smoothing");
    cloud.with_points_replaced(points, Some(normals))
}

fn project_point(
    p: &Point3<f32>,
    neighbors: &[Point3<f32>],
    sqr_gauss: f32,
    order: usize,
) -> (Point3<f32>, Vector3<f32>) {
    if neighbors.len() < 3 {
        return (*p, Vector3::z());
    }

    let weights: Vec<f32> = neighbors
        .iter()
        .map(|q| (-(q - p).norm_squared() / sqr_gauss).exp())
        .collect();
    let total: f32 = weights.iter().sum();
    if total <= f32::EPSILON {
        return (*p, Vector3::z());
    }

    let centroid = neighbors
        .iter()
        .zip(&weights)
        .fold(Vector3::zeros(), |acc, (q, w)| acc + q.coords * *w)
        / total;
    let mut cov = Matrix3::zeros();
    for (q, w) in neighbors.iter().zip(&weights) {
        let d = q.coords - centroid;
        cov += d * d.transpose() * *w;
    }
    cov /= total;

    let (normal, _) = plane_from_covariance(&cov);
    let distance = normal.dot(&(p.coords - centroid));
    let origin = p.coords - normal * distance;

    let n_coeffs = (order + 1) * (order + 2) / 2;
    if order < 2 || neighbors.len() < n_coeffs {
        return (Point3::from(origin), normal);
    }

    match fit_height_field(&origin, &normal, neighbors, &weights, order) {
        Some((height, gradient)) => {
            let (u, v) = tangent_basis(&normal);
            let mut surface_normal = normal - u * gradient.0 - v * gradient.1;
            if surface_normal.norm_squared() > 1e-12 {
                surface_normal.normalize_mut();
            } else {
                surface_normal = normal;
            }
            (Point3::from(origin + normal * height), surface_normal)
        }
        None => (Point3::from(origin), normal),
    }
}

fn tangent_basis(normal: &Vector3<f32>) -> (Vector3<f32>, Vector3<f32>) {
    let helper = if normal.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    let u = normal.cross(&helper).normalize();
    let v = normal.cross(&u);
    (u, v)
}

/// Weighted least-squares fit of `h(x, y) = sum a_ij x^i y^j`, `i + j <= order`,
/// in the local frame at `origin`. Returns the height at the origin and the
/// gradient `(dh/dx, dh/dy)` there.
fn fit_height_field(
    origin: &Vector3<f32>,
    normal: &Vector3<f32>,
    neighbors: &[Point3<f32>],
    weights: &[f32],
    order: usize,
) -> Option<(f32, (f32, f32))> {
    let (u, v) = tangent_basis(normal);
    let exponents: Vec<(i32, i32)> = (0..=order as i32)
        .flat_map(|i| (0..=(order as i32 - i)).map(move |j| (i, j)))
        .collect();

    let rows = neighbors.len();
    let cols = exponents.len();
    let mut a = DMatrix::<f64>::zeros(rows, cols);
    let mut b = DVector::<f64>::zeros(rows);
    for (r, (q, w)) in neighbors.iter().zip(weights).enumerate() {
        let d = q.coords - origin;
        let x = d.dot(&u) as f64;
        let y = d.dot(&v) as f64;
        let sw = (*w as f64).sqrt();
        for (c, &(i, j)) in exponents.iter().enumerate() {
            a[(r, c)] = sw * x.powi(i) * y.powi(j);
        }
        b[r] = sw * d.dot(normal) as f64;
    }

    let ata = a.transpose() * &a;
    let atb = a.transpose() * b;
    let coeffs = ata.lu().solve(&atb)?;
    if coeffs.iter().any(|c| !c.is_finite()) {
        return None;
    }

    let coeff = |e: (i32, i32)| {
        exponents
            .iter()
            .position(|&x| x == e)
            .map(|k| coeffs[k] as f32)
            .unwrap_or(0.0)
    };
    Some((coeff((0, 0)), (coeff((1, 0)), coeff((0, 1)))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noisy_plane(seed: u64) -> PointCloud {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut points = Vec::new();
        for i in 0..20 {
            for j in 0..20 {
                points.push(Point3::new(
                    i as f32 * 0.005,
                    j as f32 * 0.005,
                    1.0 + rng.gen_range(-0.002..0.002),
                ));
            }
        }
        let colors = (0..points.len()).map(|i| [(i % 256) as u8, 0, 0]).collect();
        PointCloud::new(points).with_colors(colors).unwrap().with_frame("kinect")
    }

    fn spread(cloud: &PointCloud) -> f32 {
        let mean = cloud.points().iter().map(|p| p.z).sum::<f32>() / cloud.len() as f32;
        cloud.points().iter().map(|p| (p.z - mean).abs()).sum::<f32>() / cloud.len() as f32
    }

    #[test]
    fn test_smooth_preserves_count_and_colors() {
        let cloud = noisy_plane(1);
        let smoothed = smooth(&cloud, 0.02, 1).unwrap();
        assert_eq!(smoothed.len(), cloud.len());
        assert_eq!(smoothed.colors(), cloud.colors());
        assert_eq!(smoothed.frame(), "kinect");
        assert!(smoothed.normals().is_some());
        assert!(spread(&smoothed) < spread(&cloud));
    }

    #[test]
    fn test_smooth_second_order() {
        let cloud = noisy_plane(2);
        let smoothed = smooth(&cloud, 0.02, 2).unwrap();
        assert_eq!(smoothed.len(), cloud.len());
        for n in smoothed.normals().unwrap() {
            assert!(n.z.abs() > 0.9);
        }
        assert!(spread(&smoothed) < spread(&cloud));
    }

    #[test]
    fn test_isolated_points_pass_through() {
        let cloud = PointCloud::new(vec![Point3::new(0.0, 0.0, 1.0), Point3::new(1.0, 0.0, 1.0)]);
        let smoothed = smooth(&cloud, 0.03, 1).unwrap();
        assert_eq!(smoothed.points(), cloud.points());
    }
}
