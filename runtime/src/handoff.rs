//! Snapshot slots shared between the frame supplier, the pipeline worker and
//! request handlers.
//!
//! Writers replace the whole `Arc`; readers clone it. A reader therefore
//! sees either the previous snapshot or the next one, never a mix.

use crate::pipeline::SceneReport;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use sv_core::PointCloud;

/// Latest raw frame published by the sensor side.
#[derive(Default)]
pub struct SceneBuffer {
    latest: RwLock<Option<Arc<PointCloud>>>,
    published: AtomicU64,
}

impl SceneBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the latest frame.
    pub fn publish(&self, cloud: PointCloud) {
        let cloud = Arc::new(cloud);
        *self.latest.write() = Some(cloud);
        self.published.fetch_add(1, Ordering::Release);
    }

    pub fn latest(&self) -> Option<Arc<PointCloud>> {
        self.latest.read().clone()
    }

    /// Number of frames published so far.
    pub fn generation(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }
}

/// Latest fully computed scene report.
#[derive(Default)]
pub struct ReportSlot {
    latest: RwLock<Option<Arc<SceneReport>>>,
}

impl ReportSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, report: SceneReport) -> Arc<SceneReport> {
        let report = Arc::new(report);
        *self.latest.write() = Some(report.clone());
        report
    }

    pub fn latest(&self) -> Option<Arc<SceneReport>> {
        self.latest.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    #[test]
    fn test_buffer_swaps_whole_frames() {
        let buffer = SceneBuffer::new();
        assert!(buffer.latest().is_none());

        buffer.publish(PointCloud::new(vec![Point3::origin(); 3]));
        let held = buffer.latest().unwrap();
        buffer.publish(PointCloud::new(vec![Point3::origin(); 7]));

        // The old snapshot stays intact for whoever still holds it.
        assert_eq!(held.len(), 3);
        assert_eq!(buffer.latest().unwrap().len(), 7);
        assert_eq!(buffer.generation(), 2);
    }
}
