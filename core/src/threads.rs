//! Sizing of the global Rayon pool shared by every parallel stage.

use crate::{Error, Result};
use rayon::ThreadPoolBuilder;
use std::env;
use std::sync::OnceLock;
use tracing::info;

/// Environment variable consulted when no explicit size is requested.
pub const THREADS_ENV: &str = "SCENE_VISION_CPU_THREADS";

static POOL: OnceLock<std::result::Result<usize, String>> = OnceLock::new();

/// Build the global pool once and return its size.
///
/// An explicit `requested` size wins over [`THREADS_ENV`]; with neither,
/// Rayon picks. The first call decides; later calls report its outcome
/// whatever they request.
pub fn init_thread_pool(requested: Option<usize>) -> Result<usize> {
    let outcome = POOL.get_or_init(|| {
        let size = match requested {
            Some(n) => Some(n),
            None => env_thread_count()?,
        };
        let mut builder = ThreadPoolBuilder::new();
        if let Some(n) = size {
            builder = builder.num_threads(thread_count(n)?);
        }
        builder.build_global().map_err(|e| e.to_string())?;
        let threads = rayon::current_num_threads();
        info!(threads, "global thread pool ready");
        Ok(threads)
    });
    outcome.clone().map_err(Error::InvalidInput)
}

pub fn pool_threads() -> usize {
    rayon::current_num_threads()
}

fn env_thread_count() -> std::result::Result<Option<usize>, String> {
    match env::var(THREADS_ENV) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("{} is not a thread count: '{}'", THREADS_ENV, raw))
            .and_then(thread_count)
            .map(Some),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(format!("{}: {}", THREADS_ENV, e)),
    }
}

fn thread_count(n: usize) -> std::result::Result<usize, String> {
    if n == 0 {
        Err("thread pool needs at least one thread".to_string())
    } else {
        Ok(n)
    }
}
