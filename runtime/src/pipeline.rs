//! One synchronous perception pass over a single frame.
//!
//! ```text
//! raw -> range crop -> voxel grid -> MLS -> [support crop] -> plane stripping
//!     -> outlier removal -> clusters -> features -> labels
//! ```
//!
//! Recoverable conditions end the pass early or drop one object and leave a
//! [`Diagnostic`] on the report. Contract violations are returned as errors.

use crate::config::PipelineConfig;
use crate::diagnostics::{Diagnostic, Stage, StageCounts};
use crate::transform::FrameTransformer;
use rayon::prelude::*;
use std::sync::Arc;
use std::time::SystemTime;
use sv_core::{Deadline, Error, FrameContext, PointCloud, Pose, Result};
use sv_features::FeatureVector;
use sv_point_cloud::{
    crop_below_support, extract_clusters, range_crop, remove_statistical_outliers, smooth, strip_planes,
    voxel_downsample, Cluster,
};
use sv_recognition::{Classification, Classifier, ClassifierModel, ObjectLabel, TemplateCatalog};
use sv_registration::{centroid_pose, estimate_pose};
use tracing::{debug, info, warn};

/// Clusters of one frame with the trail that led to them.
#[derive(Debug, Clone, Default)]
pub struct Decomposition {
    pub clusters: Vec<Cluster>,
    pub counts: StageCounts,
    pub diagnostics: Vec<Diagnostic>,
}

impl Decomposition {
    fn record(&mut self, stage: Stage, error: &Error) {
        warn!(stage = %stage, %error, "stage degraded");
        self.diagnostics.push(Diagnostic::from_error(stage, error));
    }

    pub fn is_degraded(&self) -> bool {
        self.diagnostics.iter().any(|d| d.degrading)
    }
}

/// One detected object.
#[derive(Debug, Clone)]
pub struct SceneObject {
    pub cluster: Cluster,
    pub features: Option<FeatureVector>,
    pub classification: Option<Classification>,
}

impl SceneObject {
    pub fn label(&self) -> Option<ObjectLabel> {
        self.classification.as_ref().map(|c| c.label)
    }
}

/// Result of one full pass.
#[derive(Debug, Clone)]
pub struct SceneReport {
    /// Frame the object clouds are expressed in.
    pub frame: String,
    pub timestamp: SystemTime,
    pub objects: Vec<SceneObject>,
    pub counts: StageCounts,
    pub diagnostics: Vec<Diagnostic>,
}

impl SceneReport {
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Some stage hit a recoverable condition; consumers may skip acting on
    /// this report.
    pub fn is_degraded(&self) -> bool {
        self.diagnostics.iter().any(|d| d.degrading)
    }
}

pub struct ScenePipeline {
    config: PipelineConfig,
    transformer: Option<Arc<dyn FrameTransformer>>,
    classifier: Option<Classifier>,
}

impl ScenePipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            transformer: None,
            classifier: None,
        })
    }

    pub fn with_transformer(mut self, transformer: Arc<dyn FrameTransformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    /// Enables classification with the configured combination rule.
    /// The model is validated here.
    pub fn with_classifier(mut self, model: Arc<ClassifierModel>) -> Result<Self> {
        self.classifier = Some(Classifier::new(model, self.config.combination)?);
        Ok(self)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn has_classifier(&self) -> bool {
        self.classifier.is_some()
    }

    /// Context for a frame arriving now, bounded by the configured timeout.
    pub fn context_for(&self, cloud: &PointCloud) -> FrameContext {
        FrameContext::new(
            cloud.frame(),
            SystemTime::now(),
            Deadline::from_limit(self.config.frame_timeout()),
        )
    }

    /// Split a raw frame into object clusters.
    pub fn decompose(&self, cloud: &PointCloud, ctx: &FrameContext) -> Result<Decomposition> {
        let config = &self.config;
        let mut out = Decomposition::default();
        out.counts.raw = cloud.len();

        if cloud.len() < config.noise_threshold {
            out.record(
                Stage::Input,
                &Error::EmptyInput {
                    points: cloud.len(),
                    required: config.noise_threshold,
                },
            );
            return Ok(out);
        }

        let mut current = range_crop(cloud, &config.crop);
        if current.frame().is_empty() {
            current = current.with_frame(ctx.frame.as_str());
        }
        out.counts.cropped = Some(current.len());
        if stage_empty(&mut out, Stage::RangeCrop, &current) {
            return Ok(out);
        }

        current = voxel_downsample(&current, config.voxel_leaf);
        out.counts.downsampled = Some(current.len());
        debug!(points = current.len(), leaf = config.voxel_leaf, "downsampled");

        if config.smoothing.enabled {
            if out_of_time(&mut out, Stage::Smoothing, ctx) {
                return Ok(out);
            }
            current = smooth(
                &current,
                config.smoothing.search_radius,
                config.smoothing.polynomial_order,
            )?;
            out.counts.smoothed = Some(current.len());
        }

        if let Some(support) = &config.support {
            let transformer = self.transformer.as_ref().ok_or_else(|| {
                Error::InvalidInput("support crop configured without a frame transformer".to_string())
            })?;
            let source = current.frame().to_string();
            let world = transformer.transform(&current, &support.world_frame, &source)?;
            current = match crop_below_support(&world, &support.plane, &ctx.deadline) {
                Ok(cropped) => cropped,
                Err(e) if e.is_recoverable() => {
                    out.record(Stage::SupportCrop, &e);
                    world
                }
                Err(e) => return Err(e),
            };
            out.counts.supported = Some(current.len());
            if stage_empty(&mut out, Stage::SupportCrop, &current) {
                return Ok(out);
            }
        }

        if out_of_time(&mut out, Stage::PlaneStripping, ctx) {
            return Ok(out);
        }
        let stripped = strip_planes(&current, &config.stripper, &ctx.deadline)?;
        out.counts.stripped = Some(stripped.cloud.len());
        out.counts.planes_removed = stripped.planes_removed;
        if stripped.exhausted {
            out.record(
                Stage::PlaneStripping,
                &Error::BudgetExhausted(format!("stopped after {} planes", stripped.planes_removed)),
            );
        }
        current = stripped.cloud;
        if stage_empty(&mut out, Stage::PlaneStripping, &current) {
            return Ok(out);
        }

        let (cleaned, _) = remove_statistical_outliers(&current, config.outliers.mean_k, config.outliers.std_mul)?;
        out.counts.cleaned = Some(cleaned.len());
        if stage_empty(&mut out, Stage::OutlierRemoval, &cleaned) {
            return Ok(out);
        }

        if out_of_time(&mut out, Stage::Clustering, ctx) {
            return Ok(out);
        }
        out.clusters = extract_clusters(&cleaned, &config.clusters)?;
        out.counts.clusters = out.clusters.len();
        if out.clusters.is_empty() {
            out.record(Stage::Clustering, &Error::StageEmpty("clustering".to_string()));
        }
        info!(
            raw = out.counts.raw,
            planes = out.counts.planes_removed,
            clusters = out.counts.clusters,
            "decomposed frame"
        );
        Ok(out)
    }

    /// Feature vector of every cluster, computed in parallel.
    pub fn describe(&self, clusters: &[Cluster]) -> Vec<Result<FeatureVector>> {
        clusters
            .par_iter()
            .map(|c| sv_features::describe(&c.cloud, &self.config.shape))
            .collect()
    }

    /// Full pass: decompose, describe and classify.
    pub fn process(&self, cloud: &PointCloud, ctx: &FrameContext) -> Result<SceneReport> {
        let Decomposition {
            clusters,
            counts,
            mut diagnostics,
        } = self.decompose(cloud, ctx)?;

        let frame = clusters
            .first()
            .map(|c| c.cloud.frame().to_string())
            .unwrap_or_else(|| ctx.frame.clone());

        let features: Vec<Option<FeatureVector>> = if clusters.is_empty() {
            Vec::new()
        } else if !cloud.has_colors() {
            diagnostics.push(Diagnostic::note(
                Stage::Description,
                "cloud carries no colors; feature vectors unavailable",
            ));
            vec![None; clusters.len()]
        } else {
            let mut features = Vec::with_capacity(clusters.len());
            for (i, result) in self.describe(&clusters).into_iter().enumerate() {
                match result {
                    Ok(f) => features.push(Some(f)),
                    Err(e) if e.is_recoverable() => {
                        warn!(cluster = i, error = %e, "cluster not described");
                        diagnostics.push(Diagnostic::degraded(Stage::Description, format!("cluster {}: {}", i, e)));
                        features.push(None);
                    }
                    Err(e) => return Err(e),
                }
            }
            features
        };

        let mut objects = Vec::with_capacity(clusters.len());
        for (cluster, features) in clusters.into_iter().zip(features) {
            let classification = match (&self.classifier, &features) {
                (Some(classifier), Some(f)) => Some(classifier.classify(f)?),
                _ => None,
            };
            if let Some(c) = &classification {
                debug!(label = %c.label, confidence = c.confidence, points = cluster.len(), "classified object");
            }
            objects.push(SceneObject {
                cluster,
                features,
                classification,
            });
        }

        Ok(SceneReport {
            frame,
            timestamp: ctx.timestamp,
            objects,
            counts,
            diagnostics,
        })
    }

    /// One pose per object of `report`.
    ///
    /// With a `label`, that object's template is aligned onto every object
    /// classified as `label` (onto every object when nothing is classified).
    /// Without one, classified objects with a template get an aligned pose
    /// and the rest a centroid-only pose. An object whose alignment fails
    /// recoverably falls back to its centroid pose; both cases leave a
    /// degrading diagnostic on the result.
    pub fn estimate_poses(
        &self,
        report: &SceneReport,
        catalog: Option<&TemplateCatalog>,
        label: Option<ObjectLabel>,
        ctx: &FrameContext,
    ) -> Result<PoseEstimates> {
        let icp = &self.config.icp;

        let jobs: Vec<(&SceneObject, Option<ObjectLabel>)> = match label {
            Some(wanted) => {
                let classified = report.objects.iter().any(|o| o.classification.is_some());
                report
                    .objects
                    .iter()
                    .filter(|o| !classified || o.label() == Some(wanted))
                    .map(|o| (o, Some(wanted)))
                    .collect()
            }
            None => report
                .objects
                .iter()
                .map(|o| {
                    let templated = o.label().filter(|l| catalog.is_some_and(|c| c.contains(*l)));
                    (o, templated)
                })
                .collect(),
        };

        let mut templates = Vec::with_capacity(jobs.len());
        for (_, wanted) in &jobs {
            templates.push(match wanted {
                Some(l) => {
                    let catalog = catalog.ok_or_else(|| {
                        Error::InvalidInput(format!("pose for '{}' requested without a template catalog", l))
                    })?;
                    Some(catalog.get(*l)?)
                }
                None => None,
            });
        }

        let results: Vec<Result<(Option<Pose>, Option<Diagnostic>)>> = jobs
            .par_iter()
            .zip(templates.par_iter())
            .map(|((object, wanted), template)| {
                let cloud = &object.cluster.cloud;
                let aligned = match template {
                    Some(t) => estimate_pose(cloud, &t.cloud, t.policy, icp, ctx),
                    None => return skip_on_recoverable(centroid_pose(cloud, ctx), None),
                };
                match aligned {
                    Ok(pose) => Ok((Some(pose), None)),
                    Err(e) if e.is_recoverable() => {
                        let name = wanted.map(|l| l.to_string()).unwrap_or_default();
                        warn!(error = %e, template = %name, "alignment failed, using centroid pose");
                        let note = Diagnostic::degraded(
                            Stage::PoseEstimation,
                            format!("'{}' not aligned, centroid pose used: {}", name, e),
                        );
                        skip_on_recoverable(centroid_pose(cloud, ctx), Some(note))
                    }
                    Err(e) => Err(e),
                }
            })
            .collect();

        let mut out = PoseEstimates::default();
        for result in results {
            let (pose, diagnostic) = result?;
            out.poses.extend(pose);
            out.diagnostics.extend(diagnostic);
        }
        Ok(out)
    }
}

/// Poses of one request with the conditions met while estimating them.
#[derive(Debug, Clone, Default)]
pub struct PoseEstimates {
    pub poses: Vec<Pose>,
    pub diagnostics: Vec<Diagnostic>,
}

impl PoseEstimates {
    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    /// Some object fell back to a centroid pose or was skipped.
    pub fn is_degraded(&self) -> bool {
        self.diagnostics.iter().any(|d| d.degrading)
    }
}

fn skip_on_recoverable(
    pose: Result<Pose>,
    note: Option<Diagnostic>,
) -> Result<(Option<Pose>, Option<Diagnostic>)> {
    match pose {
        Ok(pose) => Ok((Some(pose), note)),
        Err(e) if e.is_recoverable() => {
            warn!(error = %e, "object skipped in pose estimation");
            Ok((None, Some(Diagnostic::from_error(Stage::PoseEstimation, &e))))
        }
        Err(e) => Err(e),
    }
}

fn stage_empty(out: &mut Decomposition, stage: Stage, cloud: &PointCloud) -> bool {
    if cloud.is_empty() {
        out.record(stage, &Error::StageEmpty(stage.to_string()));
        true
    } else {
        false
    }
}

fn out_of_time(out: &mut Decomposition, stage: Stage, ctx: &FrameContext) -> bool {
    if ctx.deadline.expired() {
        out.record(
            stage,
            &Error::BudgetExhausted(format!("frame deadline passed before {}", stage)),
        );
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SupportConfig;
    use crate::transform::StaticTransforms;
    use nalgebra::{Isometry3, Point3};
    use std::time::Duration;

    fn tabletop(colored: bool) -> PointCloud {
        let mut points = Vec::new();
        for i in 0..60 {
            for j in 0..60 {
                points.push(Point3::new(-0.3 + i as f32 * 0.01, -0.3 + j as f32 * 0.01, 1.0));
            }
        }
        for i in 0..10 {
            for j in 0..10 {
                for k in 0..8 {
                    points.push(Point3::new(
                        i as f32 * 0.01,
                        j as f32 * 0.01,
                        0.88 + k as f32 * 0.01,
                    ));
                }
            }
        }
        let cloud = PointCloud::new(points).with_frame("kinect");
        if colored {
            let n = cloud.len();
            cloud.with_colors(vec![[200, 40, 40]; n]).unwrap()
        } else {
            cloud
        }
    }

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.voxel_leaf = 0.005;
        config.smoothing.enabled = false;
        config.outliers.std_mul = 3.0;
        config.clusters.tolerance = 0.02;
        config.clusters.min_size = 100;
        config.stripper.plane.seed = Some(11);
        config
    }

    #[test]
    fn test_noise_frame_is_degraded_not_error() {
        let pipeline = ScenePipeline::new(PipelineConfig::default()).unwrap();
        let cloud = PointCloud::new(vec![Point3::new(0.0, 0.0, 1.0); 20]);
        let report = pipeline.process(&cloud, &FrameContext::unbounded("kinect")).unwrap();
        assert!(report.is_empty());
        assert!(report.is_degraded());
        assert_eq!(report.diagnostics[0].stage, Stage::Input);
        assert_eq!(report.counts.raw, 20);
        assert!(report.counts.cropped.is_none());
    }

    #[test]
    fn test_everything_cropped_away() {
        let pipeline = ScenePipeline::new(PipelineConfig::default()).unwrap();
        let cloud = PointCloud::new(vec![Point3::new(5.0, 5.0, 5.0); 600]);
        let report = pipeline.process(&cloud, &FrameContext::unbounded("kinect")).unwrap();
        assert!(report.is_empty());
        assert_eq!(report.counts.cropped, Some(0));
        assert_eq!(report.diagnostics[0].stage, Stage::RangeCrop);
    }

    #[test]
    fn test_tabletop_yields_one_object() {
        let pipeline = ScenePipeline::new(config()).unwrap();
        let cloud = tabletop(true);
        let report = pipeline.process(&cloud, &pipeline.context_for(&cloud)).unwrap();

        assert_eq!(report.len(), 1, "diagnostics: {:?}", report.diagnostics);
        assert_eq!(report.frame, "kinect");
        assert_eq!(report.counts.planes_removed, 1);
        let object = &report.objects[0];
        assert!(object.cluster.len() >= 700 && object.cluster.len() <= 800);
        assert_eq!(object.features.as_ref().unwrap().len(), sv_features::FEATURE_LEN);
        assert!(object.classification.is_none());
    }

    #[test]
    fn test_colorless_cloud_skips_features() {
        let pipeline = ScenePipeline::new(config()).unwrap();
        let report = pipeline
            .process(&tabletop(false), &FrameContext::unbounded("kinect"))
            .unwrap();
        assert_eq!(report.len(), 1);
        assert!(report.objects[0].features.is_none());
        assert!(!report.is_degraded());
        assert!(report.diagnostics.iter().any(|d| d.stage == Stage::Description));
    }

    #[test]
    fn test_expired_deadline_degrades() {
        let pipeline = ScenePipeline::new(config()).unwrap();
        let ctx = FrameContext::new("kinect", SystemTime::now(), Deadline::after(Duration::ZERO));
        let report = pipeline.process(&tabletop(true), &ctx).unwrap();
        assert!(report.is_empty());
        assert!(report.is_degraded());
        assert!(report.diagnostics[0].message.contains("Budget exhausted"));
    }

    #[test]
    fn test_support_crop_requires_transformer() {
        let mut cfg = config();
        cfg.support = Some(SupportConfig::default());
        let pipeline = ScenePipeline::new(cfg).unwrap();
        let err = pipeline
            .decompose(&tabletop(true), &FrameContext::unbounded("kinect"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_support_crop_unknown_frame_fails_fast() {
        let mut cfg = config();
        cfg.support = Some(SupportConfig::default());
        let pipeline = ScenePipeline::new(cfg)
            .unwrap()
            .with_transformer(Arc::new(StaticTransforms::new()));
        let err = pipeline
            .decompose(&tabletop(true), &FrameContext::unbounded("kinect"))
            .unwrap_err();
        assert!(matches!(err, Error::TransformUnavailable { .. }));
    }

    #[test]
    fn test_support_crop_reports_world_frame() {
        let mut cfg = config();
        let mut support = SupportConfig::default();
        support.plane.seed = Some(3);
        cfg.support = Some(support);
        // Sensor looking straight down onto the table.
        let tf = StaticTransforms::new();
        tf.insert(
            "odom_combined",
            "kinect",
            Isometry3::rotation(nalgebra::Vector3::x() * std::f32::consts::PI),
        );
        let pipeline = ScenePipeline::new(cfg).unwrap().with_transformer(Arc::new(tf));
        let out = pipeline
            .decompose(&tabletop(true), &FrameContext::unbounded("kinect"))
            .unwrap();
        assert_eq!(out.clusters.len(), 1);
        assert_eq!(out.clusters[0].cloud.frame(), "odom_combined");
        assert!(out.counts.supported.is_some());
    }

    #[test]
    fn test_centroid_poses_without_catalog() {
        let pipeline = ScenePipeline::new(config()).unwrap();
        let ctx = FrameContext::unbounded("kinect");
        let report = pipeline.process(&tabletop(true), &ctx).unwrap();
        let estimates = pipeline.estimate_poses(&report, None, None, &ctx).unwrap();
        assert_eq!(estimates.len(), 1);
        assert!(!estimates.is_degraded());
        let poses = &estimates.poses;
        assert_eq!(poses[0].frame, "kinect");
        assert!(!poses[0].is_converged());
        assert!((poses[0].position.z - 0.915).abs() < 0.01);

        let err = pipeline
            .estimate_poses(&report, None, Some(ObjectLabel::Cup), &ctx)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
