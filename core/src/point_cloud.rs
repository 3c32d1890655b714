use nalgebra::{Isometry3, Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// 8-bit color triple in red, green, blue order.
pub type Rgb = [u8; 3];

/// Process-unique identity of a produced cloud.
///
/// Every stage output gets a fresh id; clones share the id of their source
/// because they hold identical points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CloudId(u64);

impl CloudId {
    pub fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        CloudId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

/// Ordered, finite sequence of 3-D points with optional per-point colors and
/// normals, the coordinate frame they are expressed in and whether the index
/// order maps onto a sensor grid.
#[derive(Debug, Clone)]
pub struct PointCloud {
    points: Vec<Point3<f32>>,
    colors: Option<Vec<Rgb>>,
    normals: Option<Vec<Vector3<f32>>>,
    frame: String,
    organized: bool,
    id: CloudId,
}

impl Default for PointCloud {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl PointCloud {
    /// New unorganized cloud with an empty frame id.
    pub fn new(points: Vec<Point3<f32>>) -> Self {
        Self {
            points,
            colors: None,
            normals: None,
            frame: String::new(),
            organized: false,
            id: CloudId::fresh(),
        }
    }

    pub fn with_colors(mut self, colors: Vec<Rgb>) -> crate::Result<Self> {
        if colors.len() == self.points.len() {
            self.colors = Some(colors);
            Ok(self)
        } else {
            Err(crate::Error::InvalidInput(format!(
                "Color count {} does not match point count {}",
                colors.len(),
                self.points.len()
            )))
        }
    }

    pub fn with_normals(mut self, normals: Vec<Vector3<f32>>) -> crate::Result<Self> {
        if normals.len() == self.points.len() {
            self.normals = Some(normals);
            Ok(self)
        } else {
            Err(crate::Error::InvalidInput(format!(
                "Normal count {} does not match point count {}",
                normals.len(),
                self.points.len()
            )))
        }
    }

    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.frame = frame.into();
        self
    }

    /// Marks the cloud as organized. Only sensor drivers should set this.
    pub fn with_organized(mut self, organized: bool) -> Self {
        self.organized = organized;
        self
    }

    pub fn points(&self) -> &[Point3<f32>] {
        &self.points
    }

    pub fn colors(&self) -> Option<&[Rgb]> {
        self.colors.as_deref()
    }

    pub fn normals(&self) -> Option<&[Vector3<f32>]> {
        self.normals.as_deref()
    }

    pub fn frame(&self) -> &str {
        &self.frame
    }

    pub fn is_organized(&self) -> bool {
        self.organized
    }

    pub fn id(&self) -> CloudId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn has_colors(&self) -> bool {
        self.colors.is_some()
    }

    /// Gathers the given positions into a new unorganized cloud in the same
    /// frame. Colors and normals follow their points.
    ///
    /// Positions must be in bounds; they are expected to come from an
    /// algorithm run on this very cloud.
    pub fn select(&self, indices: &[usize]) -> PointCloud {
        PointCloud {
            points: indices.iter().map(|&i| self.points[i]).collect(),
            colors: self
                .colors
                .as_ref()
                .map(|c| indices.iter().map(|&i| c[i]).collect()),
            normals: self
                .normals
                .as_ref()
                .map(|n| indices.iter().map(|&i| n[i]).collect()),
            frame: self.frame.clone(),
            organized: false,
            id: CloudId::fresh(),
        }
    }

    /// Builds an [`IndexSet`] bound to this cloud. Indices are sorted and
    /// deduplicated; any out-of-range index is rejected.
    pub fn index_set(&self, mut indices: Vec<usize>) -> crate::Result<IndexSet> {
        indices.sort_unstable();
        indices.dedup();
        if let Some(&last) = indices.last() {
            if last >= self.len() {
                return Err(crate::Error::InvalidInput(format!(
                    "Index {} out of range for cloud of {} points",
                    last,
                    self.len()
                )));
            }
        }
        Ok(IndexSet {
            cloud: self.id,
            cloud_len: self.len(),
            indices,
        })
    }

    /// Extracts the points named by `indices` or, with `negative`, every point
    /// not named by it. The index set must have been computed on this cloud.
    pub fn extract(&self, indices: &IndexSet, negative: bool) -> crate::Result<PointCloud> {
        indices.validate_against(self)?;
        if !negative {
            return Ok(self.select(&indices.indices));
        }

        let mut keep = vec![true; self.len()];
        for &i in &indices.indices {
            keep[i] = false;
        }
        let complement: Vec<usize> = keep
            .iter()
            .enumerate()
            .filter(|(_, &k)| k)
            .map(|(i, _)| i)
            .collect();
        Ok(self.select(&complement))
    }

    /// Arithmetic mean of all points, `None` for an empty cloud.
    pub fn centroid(&self) -> Option<Point3<f32>> {
        if self.points.is_empty() {
            return None;
        }
        let sum = self
            .points
            .iter()
            .fold(Vector3::<f64>::zeros(), |acc, p| acc + p.coords.cast::<f64>());
        Some(Point3::from((sum / self.points.len() as f64).cast::<f32>()))
    }

    /// Axis-aligned bounds as `(min, max)`.
    pub fn bounding_box(&self) -> Option<(Point3<f32>, Point3<f32>)> {
        let first = *self.points.first()?;
        Some(self.points.iter().fold((first, first), |(lo, hi), p| {
            (
                Point3::new(lo.x.min(p.x), lo.y.min(p.y), lo.z.min(p.z)),
                Point3::new(hi.x.max(p.x), hi.y.max(p.y), hi.z.max(p.z)),
            )
        }))
    }

    /// Applies a rigid transform and re-labels the result with `frame`.
    pub fn transformed(&self, transform: &Isometry3<f32>, frame: &str) -> PointCloud {
        PointCloud {
            points: self.points.iter().map(|p| transform * p).collect(),
            colors: self.colors.clone(),
            normals: self
                .normals
                .as_ref()
                .map(|n| n.iter().map(|v| transform.rotation * v).collect()),
            frame: frame.to_string(),
            organized: self.organized,
            id: CloudId::fresh(),
        }
    }

    /// Replaces the geometry while keeping colors, frame and organization.
    /// The point count must not change.
    pub fn with_points_replaced(
        &self,
        points: Vec<Point3<f32>>,
        normals: Option<Vec<Vector3<f32>>>,
    ) -> crate::Result<PointCloud> {
        if points.len() != self.points.len() {
            return Err(crate::Error::InvalidInput(format!(
                "Replacement has {} points, cloud has {}",
                points.len(),
                self.points.len()
            )));
        }
        let cloud = PointCloud {
            points,
            colors: self.colors.clone(),
            normals: None,
            frame: self.frame.clone(),
            organized: false,
            id: CloudId::fresh(),
        };
        match normals {
            Some(n) => cloud.with_normals(n),
            None => Ok(cloud),
        }
    }

    /// Assembles a cloud from already validated parts. Used by stages that
    /// build their outputs point by point.
    pub fn from_parts(
        points: Vec<Point3<f32>>,
        colors: Option<Vec<Rgb>>,
        normals: Option<Vec<Vector3<f32>>>,
        frame: &str,
    ) -> crate::Result<PointCloud> {
        let mut cloud = PointCloud::new(points).with_frame(frame);
        if let Some(c) = colors {
            cloud = cloud.with_colors(c)?;
        }
        if let Some(n) = normals {
            cloud = cloud.with_normals(n)?;
        }
        Ok(cloud)
    }
}

/// Positions into one specific [`PointCloud`].
///
/// An index set remembers the identity and length of the cloud it was
/// computed from and refuses to be applied to any other cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSet {
    cloud: CloudId,
    cloud_len: usize,
    indices: Vec<usize>,
}

impl IndexSet {
    pub fn empty_for(cloud: &PointCloud) -> Self {
        Self {
            cloud: cloud.id(),
            cloud_len: cloud.len(),
            indices: Vec::new(),
        }
    }

    pub fn cloud_id(&self) -> CloudId {
        self.cloud
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.indices
    }

    pub fn into_vec(self) -> Vec<usize> {
        self.indices
    }

    pub fn validate_against(&self, cloud: &PointCloud) -> crate::Result<()> {
        if self.cloud != cloud.id() || self.cloud_len != cloud.len() {
            return Err(crate::Error::IndexMismatch {
                expected: self.cloud,
                actual: cloud.id(),
            });
        }
        Ok(())
    }
}
