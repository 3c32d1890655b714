//! Request-facing side of the runtime.
//!
//! A [`Perception`] owns the frame buffer and the report slot. Frames are
//! submitted from the sensor side, processed on a worker (or by an explicit
//! [`Perception::process_latest`] call) and served from the last complete
//! report.

#[cfg(feature = "simulation")]
use crate::fallback::FallbackProvider;
use crate::diagnostics::Diagnostic;
use crate::handoff::{ReportSlot, SceneBuffer};
use crate::pipeline::{ScenePipeline, SceneReport};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use sv_core::{Deadline, Error, FrameContext, PointCloud, Pose, Result};
use sv_features::FeatureVector;
use sv_recognition::{ObjectLabel, TemplateCatalog};
use tracing::{debug, info, warn};

/// Answer to a feature/classification request.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectsResponse {
    pub count: usize,
    /// Classified objects with their feature vectors.
    pub objects: Vec<(ObjectLabel, FeatureVector)>,
    pub degraded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseSource {
    Perception,
    #[cfg(feature = "simulation")]
    SimulationFallback,
}

/// Answer to a pose request.
#[derive(Debug, Clone, Serialize)]
pub struct PoseResponse {
    pub poses: Vec<Pose>,
    pub source: PoseSource,
    pub degraded: bool,
    /// Objects that fell back to a centroid pose or were skipped.
    pub diagnostics: Vec<Diagnostic>,
}

pub struct Perception {
    pipeline: ScenePipeline,
    catalog: Option<Arc<TemplateCatalog>>,
    frames: SceneBuffer,
    reports: ReportSlot,
    #[cfg(feature = "simulation")]
    fallback: Option<Arc<dyn FallbackProvider>>,
}

impl Perception {
    pub fn new(pipeline: ScenePipeline) -> Self {
        Self {
            pipeline,
            catalog: None,
            frames: SceneBuffer::new(),
            reports: ReportSlot::new(),
            #[cfg(feature = "simulation")]
            fallback: None,
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<TemplateCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    #[cfg(feature = "simulation")]
    pub fn with_fallback(mut self, fallback: Arc<dyn FallbackProvider>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn pipeline(&self) -> &ScenePipeline {
        &self.pipeline
    }

    /// Publish a new raw frame, replacing any unprocessed one.
    pub fn submit_frame(&self, cloud: PointCloud) {
        self.frames.publish(cloud);
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames.generation()
    }

    /// Run one pass over the latest frame and publish its report.
    ///
    /// Returns `Ok(None)` when no frame has been submitted yet.
    pub fn process_latest(&self) -> Result<Option<Arc<SceneReport>>> {
        let Some(cloud) = self.frames.latest() else {
            return Ok(None);
        };
        let ctx = self.pipeline.context_for(&cloud);
        let report = self.pipeline.process(&cloud, &ctx)?;
        if report.is_degraded() {
            for d in report.diagnostics.iter().filter(|d| d.degrading) {
                warn!(diagnostic = %d, "degraded frame");
            }
        }
        info!(objects = report.len(), elapsed_ms = ctx.deadline.elapsed().as_millis() as u64, "frame processed");
        Ok(Some(self.reports.publish(report)))
    }

    pub fn latest_report(&self) -> Option<Arc<SceneReport>> {
        self.reports.latest()
    }

    /// Labels and feature vectors of the last complete report.
    pub fn objects(&self) -> ObjectsResponse {
        let Some(report) = self.reports.latest() else {
            return ObjectsResponse {
                count: 0,
                objects: Vec::new(),
                degraded: true,
            };
        };
        let objects: Vec<(ObjectLabel, FeatureVector)> = report
            .objects
            .iter()
            .filter_map(|o| Some((o.label()?, o.features.clone()?)))
            .collect();
        ObjectsResponse {
            count: objects.len(),
            objects,
            degraded: report.is_degraded(),
        }
    }

    /// Poses of the objects in the last complete report, optionally only
    /// those of `label`.
    pub fn poses(&self, label: Option<ObjectLabel>) -> Result<PoseResponse> {
        let Some(report) = self.reports.latest() else {
            return Err(Error::StageEmpty("no frame processed yet".to_string()));
        };
        let ctx = FrameContext::new(
            report.frame.clone(),
            report.timestamp,
            Deadline::from_limit(self.pipeline.config().frame_timeout()),
        );
        let estimates = self
            .pipeline
            .estimate_poses(&report, self.catalog.as_deref(), label, &ctx)?;
        let degraded =
            report.is_degraded() || estimates.is_degraded() || estimates.poses.iter().any(|p| !p.is_converged());

        #[cfg(feature = "simulation")]
        if estimates.is_empty() {
            if let (Some(fallback), Some(label)) = (&self.fallback, label) {
                if let Some(pose) = fallback.object_pose(label, report.timestamp) {
                    debug!(%label, "serving simulator pose");
                    return Ok(PoseResponse {
                        poses: vec![pose],
                        source: PoseSource::SimulationFallback,
                        degraded: true,
                        diagnostics: estimates.diagnostics,
                    });
                }
            }
        }

        debug!(poses = estimates.len(), degraded, "poses served");
        Ok(PoseResponse {
            poses: estimates.poses,
            source: PoseSource::Perception,
            degraded,
            diagnostics: estimates.diagnostics,
        })
    }

    /// Process new frames on a background thread until the handle is stopped.
    pub fn spawn_worker(self: &Arc<Self>, poll: Duration) -> Result<WorkerHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let this = Arc::clone(self);
        let flag = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("sv-perception".to_string())
            .spawn(move || {
                let mut seen = 0;
                while !flag.load(Ordering::Acquire) {
                    let generation = this.frames.generation();
                    if generation == seen {
                        thread::sleep(poll);
                        continue;
                    }
                    seen = generation;
                    if let Err(e) = this.process_latest() {
                        warn!(error = %e, "frame rejected");
                    }
                }
            })?;
        Ok(WorkerHandle {
            stop,
            thread: Some(thread),
        })
    }
}

/// Stops and joins the worker on [`WorkerHandle::stop`] or drop.
pub struct WorkerHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("perception worker panicked");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
