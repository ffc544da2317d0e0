//! Decoded frames of a depth or color stream.
//!
//! Pixel storage mirrors what the recording hands out:
//! - depth: one `u16` per pixel (millimetres, 0 = no reading)
//! - color: packed RGB, 3 bytes per pixel
//!
//! The buffer lives behind an `Arc`, so cloning a cached frame is cheap and
//! every clone points at the same decoded data.

use std::sync::Arc;

/// Pixel buffer of a decoded frame
#[derive(Debug, Clone, PartialEq)]
pub enum PixelBuffer {
    Depth16(Vec<u16>), // Depth map, 16-bit per pixel
    Rgb8(Vec<u8>),     // Color image, 8-bit per channel, 3 channels
}

impl PixelBuffer {
    /// Raw bytes (native endianness for depth samples)
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            PixelBuffer::Depth16(samples) => bytemuck::cast_slice(samples.as_slice()),
            PixelBuffer::Rgb8(bytes) => bytes.as_slice(),
        }
    }

    /// Bytes per pixel of this format
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelBuffer::Depth16(_) => 2,
            PixelBuffer::Rgb8(_) => 3,
        }
    }
}

/// Single decoded frame
#[derive(Debug, Clone)]
pub struct Frame {
    index: usize,
    width: usize,
    height: usize,
    timestamp_us: u64,
    pixels: Arc<PixelBuffer>,
}

impl Frame {
    pub fn new(index: usize, width: usize, height: usize, timestamp_us: u64, pixels: PixelBuffer) -> Self {
        Self {
            index,
            width,
            height,
            timestamp_us,
            pixels: Arc::new(pixels),
        }
    }

    /// Frame index within its stream (0-based)
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Capture timestamp reported by the recording (microseconds)
    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    pub fn pixels(&self) -> &PixelBuffer {
        &self.pixels
    }

    /// Depth samples, if this is a depth frame
    pub fn depth_samples(&self) -> Option<&[u16]> {
        match &*self.pixels {
            PixelBuffer::Depth16(samples) => Some(samples),
            PixelBuffer::Rgb8(_) => None,
        }
    }

    /// Size of the decoded buffer in bytes
    pub fn byte_len(&self) -> usize {
        self.pixels.as_bytes().len()
    }

    /// True when both frames share one decoded buffer (cache hit identity)
    pub fn same_buffer(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_bytes() {
        let frame = Frame::new(0, 2, 1, 0, PixelBuffer::Depth16(vec![1, 0x0203]));
        assert_eq!(frame.byte_len(), 4);
        assert_eq!(frame.pixels().bytes_per_pixel(), 2);
        assert_eq!(frame.depth_samples(), Some(&[1u16, 0x0203][..]));
    }

    #[test]
    fn test_clone_shares_buffer() {
        let frame = Frame::new(3, 1, 1, 100, PixelBuffer::Rgb8(vec![1, 2, 3]));
        let copy = frame.clone();
        assert!(frame.same_buffer(&copy));

        let other = Frame::new(3, 1, 1, 100, PixelBuffer::Rgb8(vec![1, 2, 3]));
        assert!(!frame.same_buffer(&other));
        assert!(other.depth_samples().is_none());
    }
}
