//! Benchmarks for the per-frame decomposition
//!
//! Synthetic tabletop frames of growing density, with and without smoothing.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nalgebra::Point3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use scene_vision::core::{FrameContext, PointCloud};
use scene_vision::features::{describe, ShapeConfig};
use scene_vision::runtime::{PipelineConfig, ScenePipeline};
use std::time::Duration;

/// Noisy table at z = 1.0 with two boxes standing in front of it.
fn create_tabletop(table_side: usize, seed: u64) -> PointCloud {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut points = Vec::new();
    let mut colors = Vec::new();
    let step = 0.6 / table_side as f32;
    for i in 0..table_side {
        for j in 0..table_side {
            let noise = rng.gen_range(-0.002..0.002);
            points.push(Point3::new(-0.3 + i as f32 * step, -0.3 + j as f32 * step, 1.0 + noise));
            colors.push([110, 100, 90]);
        }
    }
    for (ox, color) in [(-0.2f32, [200, 30, 30]), (0.1, [30, 30, 200])] {
        for i in 0..10 {
            for j in 0..10 {
                for k in 0..8 {
                    points.push(Point3::new(
                        ox + i as f32 * 0.01,
                        j as f32 * 0.01,
                        0.88 + k as f32 * 0.01,
                    ));
                    colors.push(color);
                }
            }
        }
    }
    PointCloud::new(points)
        .with_colors(colors)
        .expect("one color per point")
        .with_frame("kinect")
}

fn benchmark_decomposition(c: &mut Criterion) {
    let mut group = c.benchmark_group("decompose");
    group.measurement_time(Duration::from_secs(5));
    group.sample_size(20);

    for side in [60usize, 100, 160] {
        let cloud = create_tabletop(side, 7);
        for smoothing in [false, true] {
            let mut config = PipelineConfig::default();
            config.voxel_leaf = 0.005;
            config.smoothing.enabled = smoothing;
            config.clusters.tolerance = 0.02;
            config.clusters.min_size = 100;
            config.stripper.plane.seed = Some(1);
            let pipeline = ScenePipeline::new(config).expect("valid config");

            let name = if smoothing { "mls" } else { "raw" };
            group.bench_with_input(
                BenchmarkId::new(name, cloud.len()),
                &cloud,
                |b, cloud| {
                    b.iter(|| {
                        let ctx = FrameContext::unbounded("kinect");
                        black_box(pipeline.decompose(black_box(cloud), &ctx).expect("decomposition"))
                    });
                },
            );
        }
    }
    group.finish();
}

fn benchmark_feature_vector(c: &mut Criterion) {
    let mut group = c.benchmark_group("describe");
    group.sample_size(20);

    let cloud = create_tabletop(60, 3);
    let mut config = PipelineConfig::default();
    config.voxel_leaf = 0.005;
    config.smoothing.enabled = false;
    config.clusters.tolerance = 0.02;
    config.clusters.min_size = 100;
    let pipeline = ScenePipeline::new(config).expect("valid config");
    let clusters = pipeline
        .decompose(&cloud, &FrameContext::unbounded("kinect"))
        .expect("decomposition")
        .clusters;

    group.bench_function("single_cluster", |b| {
        let shape = ShapeConfig::default();
        b.iter(|| black_box(describe(black_box(&clusters[0].cloud), &shape)));
    });
    group.bench_function("all_clusters_parallel", |b| {
        b.iter(|| black_box(pipeline.describe(black_box(&clusters))));
    });
    group.finish();
}

criterion_group!(benches, benchmark_decomposition, benchmark_feature_vector);
criterion_main!(benches);
