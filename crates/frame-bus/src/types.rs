use chrono::Utc;
use thiserror::Error;

/// Frame geometry published next to the frame payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameMetadata {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl FrameMetadata {
    pub fn new(width: u32, height: u32, channels: u32) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    /// Number of payload bytes a frame with this geometry must carry, or `None`
    /// when the product does not fit in `usize`.
    pub fn byte_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.channels as usize)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame payload is {actual} bytes but {width}x{height}x{channels} metadata requires {expected}")]
    SizeMismatch {
        width: u32,
        height: u32,
        channels: u32,
        expected: usize,
        actual: usize,
    },
    #[error("frame metadata declares zero channels")]
    NoChannels,
}

/// Interleaved (channel-minor) pixel buffer received from the bus.
#[derive(Clone, Debug)]
pub struct RawFrame {
    meta: FrameMetadata,
    data: Vec<u8>,
    pub timestamp_ms: i64,
}

impl RawFrame {
    /// Wrap a payload, rejecting it when its length disagrees with `meta`.
    pub fn new(meta: FrameMetadata, data: Vec<u8>) -> Result<Self, FrameError> {
        if meta.channels == 0 {
            return Err(FrameError::NoChannels);
        }
        let expected = meta.byte_len().unwrap_or(usize::MAX);
        if data.len() != expected {
            return Err(FrameError::SizeMismatch {
                width: meta.width,
                height: meta.height,
                channels: meta.channels,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            meta,
            data,
            timestamp_ms: Utc::now().timestamp_millis(),
        })
    }

    pub fn metadata(&self) -> FrameMetadata {
        self.meta
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_payload() {
        let meta = FrameMetadata::new(4, 4, 3);
        let err = RawFrame::new(meta, vec![0; 47]).unwrap_err();
        assert_eq!(
            err,
            FrameError::SizeMismatch {
                width: 4,
                height: 4,
                channels: 3,
                expected: 48,
                actual: 47,
            }
        );
    }

    #[test]
    fn accepts_exact_payload() {
        let meta = FrameMetadata::new(2, 3, 1);
        let frame = RawFrame::new(meta, vec![7; 6]).unwrap();
        assert_eq!(frame.data().len(), 6);
        assert_eq!(frame.metadata(), meta);
    }

    #[test]
    fn zero_channels_is_rejected() {
        let meta = FrameMetadata::new(2, 2, 0);
        assert_eq!(RawFrame::new(meta, Vec::new()).unwrap_err(), FrameError::NoChannels);
    }
}
