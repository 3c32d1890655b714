use nalgebra::Isometry3;
use parking_lot::RwLock;
use std::collections::HashMap;
use sv_core::{Error, PointCloud, Result};

/// Coordinate-transform capability supplied by the host.
pub trait FrameTransformer: Send + Sync {
    /// Rigid transform taking points in `source_frame` into `target_frame`.
    ///
    /// Fails with [`Error::TransformUnavailable`] when the frames are not
    /// connected.
    fn lookup(&self, target_frame: &str, source_frame: &str) -> Result<Isometry3<f32>>;

    /// Express `cloud` (given in `source_frame`) in `target_frame`.
    fn transform(&self, cloud: &PointCloud, target_frame: &str, source_frame: &str) -> Result<PointCloud> {
        if target_frame == source_frame {
            return Ok(cloud.clone().with_frame(target_frame));
        }
        let iso = self.lookup(target_frame, source_frame)?;
        Ok(cloud.transformed(&iso, target_frame))
    }
}

/// Fixed table of rigid transforms between named frames.
///
/// Each entry answers its own direction and the inverse one. Chains of
/// entries are not composed.
#[derive(Default)]
pub struct StaticTransforms {
    table: RwLock<HashMap<(String, String), Isometry3<f32>>>,
}

impl StaticTransforms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the transform taking `source_frame` points into `target_frame`.
    pub fn insert(&self, target_frame: &str, source_frame: &str, transform: Isometry3<f32>) {
        self.table
            .write()
            .insert((target_frame.to_string(), source_frame.to_string()), transform);
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }
}

impl FrameTransformer for StaticTransforms {
    fn lookup(&self, target_frame: &str, source_frame: &str) -> Result<Isometry3<f32>> {
        if target_frame == source_frame {
            return Ok(Isometry3::identity());
        }
        let table = self.table.read();
        if let Some(iso) = table.get(&(target_frame.to_string(), source_frame.to_string())) {
            return Ok(*iso);
        }
        if let Some(iso) = table.get(&(source_frame.to_string(), target_frame.to_string())) {
            return Ok(iso.inverse());
        }
        Err(Error::TransformUnavailable {
            target_frame: target_frame.to_string(),
            source_frame: source_frame.to_string(),
        })
    }
}
