use crate::spatial::SpatialIndex;
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use sv_core::{IndexSet, PointCloud, Result, Rgb};
use tracing::debug;

/// Half-widths of the crop box around the sensor axis and its depth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropLimits {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Default for CropLimits {
    fn default() -> Self {
        Self {
            x: 0.4,
            y: 0.4,
            z: 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierConfig {
    pub mean_k: usize,
    pub std_mul: f32,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            mean_k: 25,
            std_mul: 1.0,
        }
    }
}

/// Keep points with `|x| <= limits.x`, `|y| <= limits.y` and
/// `0 <= z <= limits.z`. Colors and normals follow their points.
pub fn range_crop(cloud: &PointCloud, limits: &CropLimits) -> PointCloud {
    let kept: Vec<usize> = cloud
        .points()
        .iter()
        .enumerate()
        .filter(|(_, p)| {
            p.x.abs() <= limits.x && p.y.abs() <= limits.y && p.z >= 0.0 && p.z <= limits.z
        })
        .map(|(i, _)| i)
        .collect();
    debug!(input = cloud.len(), output = kept.len(), "range crop");
    cloud.select(&kept)
}

fn voxel_key(p: &Point3<f32>, origin: &Point3<f32>, leaf: f32) -> (i64, i64, i64) {
    (
        ((p.x - origin.x) / leaf).floor() as i64,
        ((p.y - origin.y) / leaf).floor() as i64,
        ((p.z - origin.z) / leaf).floor() as i64,
    )
}

fn cmp_point(a: &Point3<f32>, b: &Point3<f32>) -> Ordering {
    a.x.total_cmp(&b.x)
        .then_with(|| a.y.total_cmp(&b.y))
        .then_with(|| a.z.total_cmp(&b.z))
}

/// Downsample with a voxel grid of edge `leaf` anchored at the minimum
/// corner of the cloud's bounding box.
///
/// Each occupied voxel becomes the centroid of its points, with colors
/// averaged per channel and normals averaged then renormalized. Output is
/// ordered by voxel key and members are accumulated in a canonical order, so
/// the result does not depend on input order. `leaf <= 0` returns a copy.
pub fn voxel_downsample(cloud: &PointCloud, leaf: f32) -> PointCloud {
    if leaf <= 0.0 || !leaf.is_finite() || cloud.is_empty() {
        return cloud.clone();
    }

    let points = cloud.points();
    let colors = cloud.colors();
    let normals = cloud.normals();
    let n = points.len();
    let origin = match cloud.bounding_box() {
        Some((lo, _)) => lo,
        None => return cloud.clone(),
    };

    // 1. Compute keys
    let mut order: Vec<((i64, i64, i64), usize)> = points
        .iter()
        .enumerate()
        .map(|(i, p)| (voxel_key(p, &origin, leaf), i))
        .collect();

    // 2. Sort by voxel key, then by content for a canonical member order
    let canonical = |a: &((i64, i64, i64), usize), b: &((i64, i64, i64), usize)| {
        a.0.cmp(&b.0)
            .then_with(|| cmp_point(&points[a.1], &points[b.1]))
            .then_with(|| match colors {
                Some(c) => c[a.1].cmp(&c[b.1]),
                None => Ordering::Equal,
            })
            .then_with(|| match normals {
                Some(nr) => cmp_point(&Point3::from(nr[a.1]), &Point3::from(nr[b.1])),
                None => Ordering::Equal,
            })
    };
    if n > 10000 {
        order.par_sort_unstable_by(canonical);
    } else {
        order.sort_unstable_by(canonical);
    }

    // 3. Aggregate
    let mut new_points = Vec::new();
    let mut new_colors: Option<Vec<Rgb>> = colors.map(|_| Vec::new());
    let mut new_normals: Option<Vec<Vector3<f32>>> = normals.map(|_| Vec::new());

    let mut start = 0;
    while start < order.len() {
        let key = order[start].0;
        let mut end = start;
        let mut sum_p = Vector3::<f64>::zeros();
        let mut sum_c = [0u64; 3];
        let mut sum_n = Vector3::<f64>::zeros();
        while end < order.len() && order[end].0 == key {
            let idx = order[end].1;
            sum_p += points[idx].coords.cast::<f64>();
            if let Some(c) = colors {
                for ch in 0..3 {
                    sum_c[ch] += c[idx][ch] as u64;
                }
            }
            if let Some(nr) = normals {
                sum_n += nr[idx].cast::<f64>();
            }
            end += 1;
        }

        let count = (end - start) as f64;
        new_points.push(Point3::from((sum_p / count).cast::<f32>()));
        if let Some(nc) = &mut new_colors {
            let avg = |s: u64| (s as f64 / count).round().clamp(0.0, 255.0) as u8;
            nc.push([avg(sum_c[0]), avg(sum_c[1]), avg(sum_c[2])]);
        }
        if let Some(nn) = &mut new_normals {
            let mut v = (sum_n / count).cast::<f32>();
            if v.norm_squared() > 1e-12 {
                v.normalize_mut();
            }
            nn.push(v);
        }
        start = end;
    }

    debug!(input = n, output = new_points.len(), leaf, "voxel downsample");
    // Lengths agree by construction.
    PointCloud::from_parts(new_points, new_colors, new_normals, cloud.frame())
        .unwrap_or_else(|_| cloud.clone())
}

/// Remove statistical outliers.
///
/// Computes each point's mean distance to its `k` nearest neighbors; points
/// whose mean exceeds `global_mean + std_mul * global_stddev` are removed.
/// Returns the filtered cloud and the kept indices into the input.
pub fn remove_statistical_outliers(
    cloud: &PointCloud,
    k: usize,
    std_mul: f32,
) -> Result<(PointCloud, IndexSet)> {
    if cloud.len() < 2 || k == 0 {
        let all = cloud.index_set((0..cloud.len()).collect())?;
        return Ok((cloud.clone(), all));
    }

    let index = SpatialIndex::build(cloud.points());

    let distances: Vec<f32> = cloud
        .points()
        .par_iter()
        .map(|p| {
            // The query point comes back first at distance zero.
            let neighbors = index.k_nearest(p, k + 1);
            let (sum, count) = neighbors
                .iter()
                .skip(1)
                .fold((0.0f32, 0usize), |(s, c), nb| (s + (nb.1 - p).norm(), c + 1));
            if count > 0 {
                sum / count as f32
            } else {
                0.0
            }
        })
        .collect();

    let n = distances.len() as f64;
    let mean = distances.iter().map(|&d| d as f64).sum::<f64>() / n;
    let variance = distances
        .iter()
        .map(|&d| {
            let diff = d as f64 - mean;
            diff * diff
        })
        .sum::<f64>()
        / (n - 1.0);
    let threshold = mean + std_mul as f64 * variance.sqrt();

    let kept: Vec<usize> = distances
        .iter()
        .enumerate()
        .filter(|(_, &d)| d as f64 <= threshold)
        .map(|(i, _)| i)
        .collect();

    debug!(
        input = cloud.len(),
        output = kept.len(),
        threshold,
        "statistical outlier removal"
    );
    let kept = cloud.index_set(kept)?;
    let filtered = cloud.extract(&kept, false)?;
    Ok((filtered, kept))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    fn grid(n: usize, spacing: f32) -> Vec<Point3<f32>> {
        let mut points = Vec::new();
        for i in 0..n {
            for j in 0..n {
                points.push(Point3::new(i as f32 * spacing, j as f32 * spacing, 0.5));
            }
        }
        points
    }

    #[test]
    fn test_range_crop_bounds_and_idempotence() {
        let cloud = PointCloud::new(vec![
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(0.5, 0.0, 1.0),
            Point3::new(0.0, -0.41, 1.0),
            Point3::new(0.1, 0.1, -0.01),
            Point3::new(0.1, 0.1, 1.5),
            Point3::new(-0.4, 0.4, 0.0),
        ])
        .with_frame("kinect");
        let limits = CropLimits::default();
        let once = range_crop(&cloud, &limits);
        assert_eq!(once.len(), 3);
        assert_eq!(once.frame(), "kinect");

        let twice = range_crop(&once, &limits);
        assert_eq!(twice.points(), once.points());
    }

    #[test]
    fn test_range_crop_keeps_colors() {
        let cloud = PointCloud::new(vec![Point3::new(0.0, 0.0, 1.0), Point3::new(9.0, 0.0, 1.0)])
            .with_colors(vec![[10, 20, 30], [1, 2, 3]])
            .unwrap();
        let out = range_crop(&cloud, &CropLimits::default());
        assert_eq!(out.colors().unwrap(), &[[10, 20, 30]]);
    }

    #[test]
    fn test_voxel_downsample_counts() {
        let cloud = PointCloud::new(grid(10, 0.01));
        let down = voxel_downsample(&cloud, 0.2);
        assert_eq!(down.len(), 1);

        let down = voxel_downsample(&cloud, 0.05);
        assert_eq!(down.len(), 4);

        let copy = voxel_downsample(&cloud, 0.0);
        assert_eq!(copy.len(), cloud.len());
    }

    #[test]
    fn test_voxel_downsample_monotone_in_leaf() {
        let mut rng = StdRng::seed_from_u64(3);
        let points: Vec<Point3<f32>> = (0..2000)
            .map(|_| Point3::new(rng.gen_range(-0.3..0.3), rng.gen_range(-0.3..0.3), rng.gen_range(0.5..1.0)))
            .collect();
        let cloud = PointCloud::new(points);
        let mut previous = cloud.len();
        for leaf in [0.005, 0.01, 0.02, 0.05, 0.1] {
            let count = voxel_downsample(&cloud, leaf).len();
            assert!(count <= previous, "leaf {leaf}: {count} > {previous}");
            previous = count;
        }
        assert_eq!(voxel_downsample(&cloud, 0.61).len(), 1);
    }

    #[test]
    fn test_voxel_downsample_order_independent() {
        let points = grid(12, 0.007);
        let colors: Vec<Rgb> = (0..points.len()).map(|i| [(i % 256) as u8, 7, 200]).collect();
        let mut paired: Vec<(Point3<f32>, Rgb)> = points.into_iter().zip(colors).collect();
        let a = {
            let (p, c): (Vec<_>, Vec<_>) = paired.iter().cloned().unzip();
            voxel_downsample(&PointCloud::new(p).with_colors(c).unwrap(), 0.02)
        };
        paired.shuffle(&mut StdRng::seed_from_u64(11));
        let b = {
            let (p, c): (Vec<_>, Vec<_>) = paired.into_iter().unzip();
            voxel_downsample(&PointCloud::new(p).with_colors(c).unwrap(), 0.02)
        };
        assert_eq!(a.points(), b.points());
        assert_eq!(a.colors(), b.colors());
    }

    #[test]
    fn test_statistical_outlier_removal() {
        let mut points = grid(6, 0.01);
        points.push(Point3::new(10.0, 10.0, 10.0));
        let outlier = points.len() - 1;
        let cloud = PointCloud::new(points);

        let (filtered, kept) = remove_statistical_outliers(&cloud, 5, 1.0).unwrap();
        assert_eq!(filtered.len(), 36);
        assert!(!kept.as_slice().contains(&outlier));
        assert_eq!(kept.cloud_id(), cloud.id());
    }
}
