use nalgebra::Point3;
use scene_vision::core::{Confidence, FrameContext, PointCloud};
use scene_vision::features::FEATURE_LEN;
use scene_vision::recognition::{ClassifierModel, CombinationRule, ObjectLabel, TemplateCatalog};
use scene_vision::runtime::{Perception, PipelineConfig, PoseSource, ScenePipeline, Stage};
use std::fs;
use std::sync::Arc;

const TABLE: [u8; 3] = [120, 120, 120];
const BOX: [u8; 3] = [220, 30, 30];

fn box_lattice(origin: Point3<f32>) -> Vec<Point3<f32>> {
    let mut points = Vec::with_capacity(800);
    for i in 0..10 {
        for j in 0..10 {
            for k in 0..8 {
                points.push(Point3::new(
                    origin.x + i as f32 * 0.01,
                    origin.y + j as f32 * 0.01,
                    origin.z + k as f32 * 0.01,
                ));
            }
        }
    }
    points
}

/// 10,000-point ground plane at z = 1.0 with an 800-point box in front of it.
fn synthetic_scene() -> PointCloud {
    let mut points = Vec::with_capacity(10_800);
    let mut colors = Vec::with_capacity(10_800);
    for i in 0..100 {
        for j in 0..100 {
            points.push(Point3::new(-0.3 + i as f32 * 0.006, -0.3 + j as f32 * 0.006, 1.0));
            colors.push(TABLE);
        }
    }
    for p in box_lattice(Point3::new(0.0, 0.0, 0.88)) {
        points.push(p);
        colors.push(BOX);
    }
    PointCloud::new(points)
        .with_colors(colors)
        .unwrap()
        .with_frame("kinect")
}

fn scene_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.voxel_leaf = 0.005;
    config.smoothing.enabled = false;
    config.stripper.size_threshold = 500;
    config.stripper.plane.seed = Some(42);
    config.outliers.std_mul = 3.0;
    config.clusters.tolerance = 0.02;
    config.clusters.min_size = 100;
    config
}

#[test]
fn test_synthetic_scene_decomposes_into_one_object() {
    let pipeline = ScenePipeline::new(scene_config()).unwrap();
    let cloud = synthetic_scene();
    let ctx = FrameContext::unbounded("kinect");

    let report = pipeline.process(&cloud, &ctx).unwrap();
    assert_eq!(report.len(), 1, "diagnostics: {:?}", report.diagnostics);
    assert!(!report.is_degraded());

    let object = &report.objects[0];
    assert!(
        (700..=800).contains(&object.cluster.len()),
        "cluster has {} points",
        object.cluster.len()
    );
    let features = object.features.as_ref().unwrap();
    assert_eq!(features.len(), FEATURE_LEN);

    // Every surviving point is red, so the red channel lands in one bin.
    let red = &features.color()[..8];
    assert_eq!(red[6] as usize, object.cluster.len());
    assert_eq!(features.color().iter().sum::<f32>() as usize, 3 * object.cluster.len());
}

#[test]
fn test_synthetic_scene_with_smoothing() {
    let mut config = scene_config();
    config.smoothing.enabled = true;
    let pipeline = ScenePipeline::new(config).unwrap();
    let cloud = synthetic_scene();

    let report = pipeline.process(&cloud, &FrameContext::unbounded("kinect")).unwrap();
    assert_eq!(report.len(), 1, "diagnostics: {:?}", report.diagnostics);
    assert!(!report.is_degraded());
    assert!(report.counts.smoothed.is_some());

    let object = &report.objects[0];
    assert!(
        (700..=800).contains(&object.cluster.len()),
        "cluster has {} points",
        object.cluster.len()
    );
    assert_eq!(object.features.as_ref().unwrap().len(), FEATURE_LEN);
}

#[test]
fn test_classified_object_gets_template_pose() {
    let dir = tempfile::tempdir().unwrap();

    // Color ensemble: many points in red bin 6 means ketchup, otherwise rice.
    let model_path = dir.path().join("model.json");
    fs::write(
        &model_path,
        r#"{
            "version": 1,
            "feature_length": 332,
            "shape_length": 308,
            "color_length": 24,
            "labels": ["rice", "ketchup"],
            "color_forest": { "trees": [ { "nodes": [
                { "type": "split", "feature": 6, "threshold": 10.0, "left": 1, "right": 2 },
                { "type": "leaf", "class": 0 },
                { "type": "leaf", "class": 1 }
            ] } ] },
            "shape_forest": { "trees": [ { "nodes": [ { "type": "leaf", "class": 0 } ] } ] }
        }"#,
    )
    .unwrap();
    let model = Arc::new(ClassifierModel::load(&model_path).unwrap());

    let template = PointCloud::new(box_lattice(Point3::new(-0.045, -0.045, -0.035)));
    scene_vision::io::write_pcd_file(dir.path().join("ketchup.pcd"), &template).unwrap();
    fs::write(
        dir.path().join("catalog.json"),
        r#"{ "version": 1, "templates": { "ketchup": "ketchup.pcd" } }"#,
    )
    .unwrap();
    let catalog = Arc::new(TemplateCatalog::open(dir.path()).unwrap());

    let mut config = scene_config();
    config.combination = CombinationRule::PreferColor;
    let pipeline = ScenePipeline::new(config).unwrap().with_classifier(model).unwrap();
    let perception = Perception::new(pipeline).with_catalog(catalog);

    perception.submit_frame(synthetic_scene());
    let report = perception.process_latest().unwrap().unwrap();
    assert_eq!(report.len(), 1);

    let objects = perception.objects();
    assert_eq!(objects.count, 1);
    assert_eq!(objects.objects[0].0, ObjectLabel::Ketchup);
    assert_eq!(objects.objects[0].1.len(), FEATURE_LEN);

    let response = perception.poses(Some(ObjectLabel::Ketchup)).unwrap();
    assert_eq!(response.source, PoseSource::Perception);
    assert_eq!(response.poses.len(), 1);
    let pose = &response.poses[0];
    assert_eq!(pose.frame, "kinect");
    assert!((pose.position - Point3::new(0.045, 0.045, 0.915)).norm() < 0.01);
    assert!(pose.fitness < 1e-4);
    assert!(response.diagnostics.is_empty());

    // Nothing in the scene is rice.
    let none = perception.poses(Some(ObjectLabel::Rice)).unwrap();
    assert!(none.poses.is_empty());
}

#[test]
fn test_unalignable_template_falls_back_to_centroid() {
    let dir = tempfile::tempdir().unwrap();
    let template = PointCloud::new(vec![Point3::new(0.0, 0.0, 0.0), Point3::new(0.01, 0.0, 0.0)]);
    scene_vision::io::write_pcd_file(dir.path().join("cup.pcd"), &template).unwrap();
    fs::write(
        dir.path().join("catalog.json"),
        r#"{ "version": 1, "templates": { "cup": "cup.pcd" } }"#,
    )
    .unwrap();
    let catalog = Arc::new(TemplateCatalog::open(dir.path()).unwrap());

    let perception = Perception::new(ScenePipeline::new(scene_config()).unwrap()).with_catalog(catalog);
    perception.submit_frame(synthetic_scene());
    let report = perception.process_latest().unwrap().unwrap();
    assert_eq!(report.len(), 1);
    assert!(!report.is_degraded());

    let response = perception.poses(Some(ObjectLabel::Cup)).unwrap();
    assert_eq!(response.source, PoseSource::Perception);
    assert_eq!(response.poses.len(), 1);
    assert!(response.degraded);
    assert_eq!(response.poses[0].confidence, Confidence::Low);
    assert!((response.poses[0].position - Point3::new(0.045, 0.045, 0.915)).norm() < 0.01);
    assert_eq!(response.diagnostics.len(), 1);
    assert_eq!(response.diagnostics[0].stage, Stage::PoseEstimation);
    assert!(response.diagnostics[0].degrading);
}

#[test]
fn test_unknown_template_is_a_caller_error() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("catalog.json"), r#"{ "version": 1, "templates": {} }"#).unwrap();
    let catalog = Arc::new(TemplateCatalog::open(dir.path()).unwrap());

    let perception = Perception::new(ScenePipeline::new(scene_config()).unwrap()).with_catalog(catalog);
    perception.submit_frame(synthetic_scene());
    perception.process_latest().unwrap();

    let err = perception.poses(Some(ObjectLabel::Bowl)).unwrap_err();
    assert!(!err.is_recoverable());
}

#[test]
fn test_thread_pool_init_is_idempotent() {
    let first = scene_vision::init_thread_pool(Some(2));
    let second = scene_vision::init_thread_pool(Some(4));
    assert_eq!(first.is_ok(), second.is_ok());
}
