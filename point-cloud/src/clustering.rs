use crate::spatial::SpatialIndex;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use sv_core::{CloudId, IndexSet, PointCloud, Result};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub tolerance: f32,
    pub min_size: usize,
    pub max_size: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.04,
            min_size: 50,
            max_size: 25000,
        }
    }
}

/// Sub-cloud believed to be one object, with its provenance.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub cloud: PointCloud,
    pub indices: IndexSet,
}

impl Cluster {
    pub fn parent(&self) -> CloudId {
        self.indices.cloud_id()
    }

    pub fn len(&self) -> usize {
        self.cloud.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cloud.is_empty()
    }
}

/// Euclidean cluster extraction.
///
/// Two points share a cluster iff they are connected by a chain of points
/// each within `tolerance` of the next. Clusters with fewer than `min_size`
/// or more than `max_size` points are discarded. The order of the returned
/// clusters carries no meaning; use [`largest_cluster`] or
/// [`nearest_cluster`] to pick one.
pub fn extract_clusters(cloud: &PointCloud, config: &ClusterConfig) -> Result<Vec<Cluster>> {
    let n = cloud.len();
    let points = cloud.points();
    let index = SpatialIndex::build(points);
    let mut visited = vec![false; n];
    let mut clusters = Vec::new();

    for seed in 0..n {
        if visited[seed] {
            continue;
        }
        visited[seed] = true;

        let mut members = vec![seed];
        let mut queue = VecDeque::from([seed]);
        while let Some(current) = queue.pop_front() {
            for nb in index.within_radius(&points[current], config.tolerance) {
                if !visited[nb.0] {
                    visited[nb.0] = true;
                    members.push(nb.0);
                    queue.push_back(nb.0);
                }
            }
        }

        if members.len() < config.min_size || members.len() > config.max_size {
            continue;
        }
        let indices = cloud.index_set(members)?;
        let sub = cloud.extract(&indices, false)?;
        clusters.push(Cluster {
            cloud: sub,
            indices,
        });
    }

    debug!(
        points = n,
        clusters = clusters.len(),
        tolerance = config.tolerance,
        "euclidean cluster extraction"
    );
    Ok(clusters)
}

/// Cluster with the most points. Ties go to the first in slice order.
pub fn largest_cluster(clusters: &[Cluster]) -> Option<&Cluster> {
    clusters
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| a.len().cmp(&b.len()).then(ib.cmp(ia)))
        .map(|(_, c)| c)
}

/// Cluster whose centroid is closest to `anchor`.
pub fn nearest_cluster<'a>(clusters: &'a [Cluster], anchor: &Point3<f32>) -> Option<&'a Cluster> {
    clusters
        .iter()
        .filter_map(|c| c.cloud.centroid().map(|m| (c, (m - anchor).norm_squared())))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(c, _)| c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn blob(center: Point3<f32>, n: usize) -> Vec<Point3<f32>> {
        (0..n)
            .map(|i| {
                Point3::new(
                    center.x + (i % 5) as f32 * 0.01,
                    center.y + ((i / 5) % 5) as f32 * 0.01,
                    center.z + (i / 25) as f32 * 0.01,
                )
            })
            .collect()
    }

    #[test]
    fn test_two_separated_groups() {
        let mut points = blob(Point3::new(0.0, 0.0, 1.0), 60);
        points.extend(blob(Point3::new(0.5, 0.0, 1.0), 75));
        let cloud = PointCloud::new(points);

        let config = ClusterConfig {
            tolerance: 0.02,
            min_size: 10,
            max_size: 1000,
        };
        let clusters = extract_clusters(&cloud, &config).unwrap();
        assert_eq!(clusters.len(), 2);

        let sets: BTreeSet<Vec<usize>> = clusters
            .iter()
            .map(|c| c.indices.as_slice().to_vec())
            .collect();
        let expected: BTreeSet<Vec<usize>> =
            [(0..60).collect::<Vec<_>>(), (60..135).collect::<Vec<_>>()].into_iter().collect();
        assert_eq!(sets, expected);

        for c in &clusters {
            assert_eq!(c.parent(), cloud.id());
        }
        assert_eq!(largest_cluster(&clusters).unwrap().len(), 75);
        let near = nearest_cluster(&clusters, &Point3::new(0.0, 0.0, 1.0)).unwrap();
        assert_eq!(near.len(), 60);
    }

    #[test]
    fn test_size_limits_discard_clusters() {
        let mut points = blob(Point3::new(0.0, 0.0, 1.0), 60);
        points.push(Point3::new(3.0, 3.0, 3.0));
        let cloud = PointCloud::new(points);

        let clusters = extract_clusters(
            &cloud,
            &ClusterConfig {
                tolerance: 0.02,
                min_size: 2,
                max_size: 50,
            },
        )
        .unwrap();
        assert!(clusters.is_empty());
        assert!(largest_cluster(&clusters).is_none());
    }
}
