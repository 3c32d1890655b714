use crate::icp::{centroid_initialization, registration_icp_point_to_point, IcpConfig};
use crate::orientation::OrientationPolicy;
use nalgebra::Matrix3;
use rayon::prelude::*;
use sv_core::{Confidence, Error, FrameContext, PointCloud, Pose, Result};
use tracing::{debug, warn};

const MIN_ALIGNMENT_POINTS: usize = 3;

/// Pose of `cluster` found by aligning `template` onto it.
///
/// The position is the template centroid under the alignment transform; the
/// orientation is its rotation passed through `policy`. A non-converged or
/// time-limited alignment still yields a pose, flagged
/// [`Confidence::Low`]. The pose is expressed in the cluster's frame.
pub fn estimate_pose(
    cluster: &PointCloud,
    template: &PointCloud,
    policy: OrientationPolicy,
    config: &IcpConfig,
    ctx: &FrameContext,
) -> Result<Pose> {
    for (name, cloud) in [("cluster", cluster), ("template", template)] {
        if cloud.len() < MIN_ALIGNMENT_POINTS {
            debug!(which = name, points = cloud.len(), "too few points to align");
            return Err(Error::EmptyInput {
                points: cloud.len(),
                required: MIN_ALIGNMENT_POINTS,
            });
        }
    }

    let init = centroid_initialization(template, cluster);
    let result = registration_icp_point_to_point(template, cluster, config, &init, &ctx.deadline)
        .ok_or_else(|| Error::NoModel("alignment".to_string()))?;

    let template_centroid = template
        .centroid()
        .ok_or_else(|| Error::NoModel("template centroid".to_string()))?;
    let position = result.transformation.transform_point(&template_centroid);
    let rotation: Matrix3<f32> = result.transformation.fixed_view::<3, 3>(0, 0).into_owned();

    let confidence = if result.converged && !result.exhausted {
        Confidence::Converged
    } else {
        warn!(
            iterations = result.num_iterations,
            exhausted = result.exhausted,
            "alignment did not converge"
        );
        Confidence::Low
    };

    Ok(Pose {
        position,
        orientation: policy.apply(&rotation),
        frame: cluster.frame().to_string(),
        timestamp: ctx.timestamp,
        confidence,
        fitness: result.fitness,
    })
}

/// Position-only pose at the cluster centroid, used when no template is
/// requested.
pub fn centroid_pose(cluster: &PointCloud, ctx: &FrameContext) -> Result<Pose> {
    let centroid = cluster.centroid().ok_or(Error::EmptyInput {
        points: 0,
        required: 1,
    })?;
    Ok(Pose::at_position(centroid, cluster.frame(), ctx.timestamp))
}

/// Index of the lowest fitness score. NaN scores are never selected; ties go
/// to the earliest index.
pub fn best_alignment(scores: &[f32]) -> Option<usize> {
    scores
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.is_nan())
        .min_by(|(ia, a), (ib, b)| a.total_cmp(b).then(ia.cmp(ib)))
        .map(|(i, _)| i)
}

/// Align every candidate template and keep the best-fitting pose.
///
/// Returns the index of the winning candidate together with its pose.
pub fn estimate_best_pose(
    cluster: &PointCloud,
    candidates: &[(&PointCloud, OrientationPolicy)],
    config: &IcpConfig,
    ctx: &FrameContext,
) -> Result<(usize, Pose)> {
    let poses: Vec<Result<Pose>> = candidates
        .par_iter()
        .map(|(template, policy)| estimate_pose(cluster, template, *policy, config, ctx))
        .collect();

    let mut scored = Vec::with_capacity(poses.len());
    for pose in poses {
        match pose {
            Ok(p) => scored.push(Some(p)),
            Err(e) if e.is_recoverable() => scored.push(None),
            Err(e) => return Err(e),
        }
    }

    let scores: Vec<f32> = scored
        .iter()
        .map(|p| p.as_ref().map_or(f32::NAN, |p| p.fitness))
        .collect();
    let best = best_alignment(&scores).ok_or_else(|| Error::NoModel("alignment".to_string()))?;
    debug!(candidates = candidates.len(), best, fitness = scores[best], "best alignment");
    scored[best]
        .take()
        .map(|p| (best, p))
        .ok_or_else(|| Error::NoModel("alignment".to_string()))
}
