use crate::budget::Deadline;
use std::time::SystemTime;

/// Immutable per-frame facts threaded through every stage of one pass.
#[derive(Debug, Clone)]
pub struct FrameContext {
    /// Frame the raw cloud was captured in.
    pub frame: String,
    pub timestamp: SystemTime,
    pub deadline: Deadline,
}

impl FrameContext {
    pub fn new(frame: impl Into<String>, timestamp: SystemTime, deadline: Deadline) -> Self {
        Self {
            frame: frame.into(),
            timestamp,
            deadline,
        }
    }

    /// Context stamped now, without a time limit.
    pub fn unbounded(frame: impl Into<String>) -> Self {
        Self::new(frame, SystemTime::now(), Deadline::unbounded())
    }
}
