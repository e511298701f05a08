//! Interleaved frame to single-channel luma conversion.
//!
//! Detectors consume one 8-bit sample per pixel. The conversion keeps channel 0
//! of every pixel and drops the rest; it is a first-channel approximation, not a
//! weighted luminance, and downstream consumers rely on that exact policy.

use crate::types::{FrameError, RawFrame};

/// Single-channel image derived from a [`RawFrame`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LumaBuffer {
    data: Vec<u8>,
    width: usize,
    height: usize,
}

impl LumaBuffer {
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }
}

/// Convert a frame to luma by sampling channel 0 of each pixel.
pub fn to_luma(frame: &RawFrame) -> Result<LumaBuffer, FrameError> {
    let meta = frame.metadata();
    luma_from_interleaved(frame.data(), meta.width, meta.height, meta.channels)
}

/// Slice-level variant of [`to_luma`] for callers holding a bare payload.
pub fn luma_from_interleaved(
    data: &[u8],
    width: u32,
    height: u32,
    channels: u32,
) -> Result<LumaBuffer, FrameError> {
    if channels == 0 {
        return Err(FrameError::NoChannels);
    }
    let pixels = width as usize * height as usize;
    let expected = pixels.checked_mul(channels as usize).unwrap_or(usize::MAX);
    if data.len() != expected {
        return Err(FrameError::SizeMismatch {
            width,
            height,
            channels,
            expected,
            actual: data.len(),
        });
    }

    let luma = if channels == 1 {
        data.to_vec()
    } else {
        data.chunks_exact(channels as usize)
            .map(|pixel| pixel[0])
            .collect()
    };

    Ok(LumaBuffer {
        data: luma,
        width: width as usize,
        height: height as usize,
    })
}
