use crate::vector::COLOR_LEN;
use sv_core::{Error, PointCloud, Result};

pub const BINS_PER_CHANNEL: usize = 8;

pub type ColorHistogram = [f32; COLOR_LEN];

/// Per-channel histogram with eight equal bins over `[0, 256)`, laid out
/// red, green, blue. Each channel's bins sum to the point count.
pub fn estimate_color_histogram(cloud: &PointCloud) -> Result<ColorHistogram> {
    let colors = cloud.colors().ok_or_else(|| {
        Error::InvalidInput("color histogram requires a colored cloud".to_string())
    })?;

    let mut hist = [0.0f32; COLOR_LEN];
    for rgb in colors {
        for (channel, &value) in rgb.iter().enumerate() {
            let bin = value as usize / (256 / BINS_PER_CHANNEL);
            hist[channel * BINS_PER_CHANNEL + bin] += 1.0;
        }
    }
    Ok(hist)
}
