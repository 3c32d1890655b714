//! Tabletop scene perception from a single point cloud: plane removal,
//! object clustering, shape and color features, classification and
//! template-based pose estimation.

pub use sv_core as core;
pub use sv_features as features;
pub use sv_io as io;
pub use sv_point_cloud as point_cloud;
pub use sv_recognition as recognition;
pub use sv_registration as registration;
pub use sv_runtime as runtime;

/// Size the global Rayon pool used by every CPU-parallel stage.
///
/// Call once at startup, before the first frame. Later calls return the
/// size chosen by the first. See [`sv_core::threads::THREADS_ENV`].
pub fn init_thread_pool(num_threads: Option<usize>) -> sv_core::Result<usize> {
    sv_core::init_thread_pool(num_threads)
}
