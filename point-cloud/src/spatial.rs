use nalgebra::Point3;
use rstar::{PointDistance, RTree, RTreeObject, AABB};

/// A cloud position tagged with its index in the source cloud.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexedPoint(pub usize, pub Point3<f32>);

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f32; 3]>;
    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.1.x, self.1.y, self.1.z])
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f32; 3]) -> f32 {
        let dx = self.1.x - point[0];
        let dy = self.1.y - point[1];
        let dz = self.1.z - point[2];
        dx * dx + dy * dy + dz * dz
    }
}

/// Bulk-loaded R*-tree over a slice of points.
pub struct SpatialIndex {
    tree: RTree<IndexedPoint>,
}

impl SpatialIndex {
    pub fn build(points: &[Point3<f32>]) -> Self {
        let wrappers: Vec<IndexedPoint> = points
            .iter()
            .enumerate()
            .map(|(i, p)| IndexedPoint(i, *p))
            .collect();
        Self {
            tree: RTree::bulk_load(wrappers),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// All points within `radius` of `query`, the query point itself included
    /// when it is part of the index.
    pub fn within_radius<'a>(
        &'a self,
        query: &Point3<f32>,
        radius: f32,
    ) -> impl Iterator<Item = &'a IndexedPoint> + 'a {
        // locate_within_distance takes a squared distance
        self.tree
            .locate_within_distance([query.x, query.y, query.z], radius * radius)
    }

    /// The `k` nearest points ordered by increasing distance.
    pub fn k_nearest(&self, query: &Point3<f32>, k: usize) -> Vec<&IndexedPoint> {
        self.tree
            .nearest_neighbor_iter(&[query.x, query.y, query.z])
            .take(k)
            .collect()
    }

    /// Nearest point and its squared distance.
    pub fn nearest(&self, query: &Point3<f32>) -> Option<(usize, f32)> {
        let q = [query.x, query.y, query.z];
        self.tree
            .nearest_neighbor(&q)
            .map(|p| (p.0, p.distance_2(&q)))
    }
}
