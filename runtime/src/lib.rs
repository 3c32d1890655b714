//! Per-frame perception runtime.
//!
//! - [`config`]: [`PipelineConfig`] with serde defaults and JSON loading
//! - [`pipeline`]: [`ScenePipeline`], one synchronous pass per frame
//! - [`diagnostics`]: per-stage messages and point counts
//! - [`transform`]: [`FrameTransformer`] and a static transform table
//! - [`handoff`]: atomically swapped frame and report snapshots
//! - [`service`]: the [`Perception`] request facade and its worker

pub mod config;
pub mod diagnostics;
#[cfg(feature = "simulation")]
pub mod fallback;
pub mod handoff;
pub mod pipeline;
pub mod service;
pub mod transform;

pub use config::{PipelineConfig, SupportConfig};
pub use diagnostics::{Diagnostic, Stage, StageCounts};
#[cfg(feature = "simulation")]
pub use fallback::{FallbackProvider, FixedPositions};
pub use handoff::{ReportSlot, SceneBuffer};
pub use pipeline::{Decomposition, PoseEstimates, SceneObject, ScenePipeline, SceneReport};
pub use service::{ObjectsResponse, Perception, PoseResponse, PoseSource, WorkerHandle};
pub use sv_core::{Error, FrameContext, Result};
pub use transform::{FrameTransformer, StaticTransforms};
