//! Synthetic recordings: generated depth ramps and color gradients.
//!
//! Stands in for a recording SDK in the headless driver and in tests.
//! Streams count their reads and seeks so callers can check how often the
//! source was actually touched, and can be told to fail at a given index.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use log::debug;

use crate::core::error::{PlaybackError, Result};
use crate::core::frame::{Frame, PixelBuffer};
use crate::core::source::{FrameSource, Recording, StreamId, StreamReader};

/// Generated stream with a read cursor
#[derive(Debug)]
pub struct SyntheticStream {
    id: StreamId,
    frame_count: usize,
    fps: u32,
    width: usize,
    height: usize,
    position: usize,
    valid: bool,
    fail_at: Option<usize>,
    decode_delay: Option<Duration>,
    reads: Arc<AtomicUsize>,
    seeks: Arc<AtomicUsize>,
}

impl SyntheticStream {
    pub fn new(id: StreamId, frame_count: usize, fps: u32, width: usize, height: usize) -> Self {
        Self {
            id,
            frame_count,
            fps,
            width,
            height,
            position: 0,
            valid: true,
            fail_at: None,
            decode_delay: None,
            reads: Arc::new(AtomicUsize::new(0)),
            seeks: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn depth(frame_count: usize, fps: u32, width: usize, height: usize) -> Self {
        Self::new(StreamId::Depth, frame_count, fps, width, height)
    }

    pub fn color(frame_count: usize, fps: u32, width: usize, height: usize) -> Self {
        Self::new(StreamId::Color, frame_count, fps, width, height)
    }

    /// Make the read of `index` fail
    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Sleep this long per read to mimic decode cost
    pub fn with_decode_delay(mut self, delay: Duration) -> Self {
        self.decode_delay = Some(delay);
        self
    }

    /// Shared counter of `read_next` calls
    pub fn read_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }

    /// Shared counter of `seek` calls
    pub fn seek_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.seeks)
    }

    fn render(&self, index: usize) -> PixelBuffer {
        let pixels = self.width * self.height;
        match self.id {
            StreamId::Depth => PixelBuffer::Depth16(
                (0..pixels)
                    .map(|p| (500 + index * 4 + p % self.width) as u16)
                    .collect(),
            ),
            StreamId::Color => {
                let mut rgb = Vec::with_capacity(pixels * 3);
                for p in 0..pixels {
                    let x = p % self.width;
                    let y = p / self.width.max(1);
                    rgb.extend_from_slice(&[(x * 4) as u8, (y * 4) as u8, index as u8]);
                }
                PixelBuffer::Rgb8(rgb)
            }
        }
    }
}

impl StreamReader for SyntheticStream {
    fn stream_id(&self) -> StreamId {
        self.id
    }

    fn is_valid(&self) -> bool {
        self.valid
    }

    fn frame_count(&self) -> usize {
        self.frame_count
    }

    fn fps(&self) -> u32 {
        self.fps
    }

    fn read_next(&mut self) -> Result<Option<Frame>> {
        if !self.valid {
            return Err(PlaybackError::SourceUnavailable(format!("{} stream closed", self.id)));
        }
        if self.position >= self.frame_count {
            return Ok(None);
        }

        self.reads.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = self.decode_delay {
            std::thread::sleep(delay);
        }

        let index = self.position;
        self.position += 1;
        if self.fail_at == Some(index) {
            return Err(PlaybackError::DecodeFailure {
                stream: self.id,
                index,
                reason: "synthetic read failure".into(),
            });
        }

        let timestamp_us = match self.fps {
            0 => 0,
            fps => index as u64 * 1_000_000 / fps as u64,
        };
        Ok(Some(Frame::new(index, self.width, self.height, timestamp_us, self.render(index))))
    }

    fn seek(&mut self, index: usize) -> Result<()> {
        if !self.valid {
            return Err(PlaybackError::SourceUnavailable(format!("{} stream closed", self.id)));
        }
        self.seeks.fetch_add(1, Ordering::Relaxed);
        if index >= self.frame_count {
            return Err(PlaybackError::OutOfRange {
                value: index as f64,
                max: self.frame_count.saturating_sub(1) as f64,
            });
        }
        self.position = index;
        Ok(())
    }

    fn close(&mut self) {
        self.valid = false;
    }
}

/// Recording "SDK" producing synthetic recordings of a fixed shape
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    pub frame_count: usize,
    pub fps: u32,
    pub width: usize,
    pub height: usize,
    /// Depth read failure injected at this index
    pub fail_at: Option<usize>,
    pub decode_delay: Option<Duration>,
}

impl SyntheticSource {
    pub fn new(frame_count: usize, fps: u32) -> Self {
        Self {
            frame_count,
            fps,
            width: 64,
            height: 48,
            fail_at: None,
            decode_delay: None,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn open(&self, path: &Path) -> Result<Recording> {
        debug!(
            "Opening synthetic recording {} ({} frames @ {} fps, {}x{})",
            path.display(),
            self.frame_count,
            self.fps,
            self.width,
            self.height
        );

        let mut depth = SyntheticStream::depth(self.frame_count, self.fps, self.width, self.height);
        let mut color = SyntheticStream::color(self.frame_count, self.fps, self.width, self.height);
        if let Some(index) = self.fail_at {
            depth = depth.failing_at(index);
        }
        if let Some(delay) = self.decode_delay {
            depth = depth.with_decode_delay(delay);
            color = color.with_decode_delay(delay);
        }
        Ok(Recording::new(Box::new(depth), Box::new(color)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_reads_then_eof() {
        let mut stream = SyntheticStream::depth(2, 30, 2, 2);
        assert_eq!(stream.read_next().unwrap().unwrap().index(), 0);
        assert_eq!(stream.read_next().unwrap().unwrap().index(), 1);
        assert!(stream.read_next().unwrap().is_none());
        assert_eq!(stream.read_counter().load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_seek_and_fail() {
        let mut stream = SyntheticStream::color(10, 30, 2, 2).failing_at(4);
        stream.seek(4).unwrap();
        assert!(matches!(
            stream.read_next(),
            Err(PlaybackError::DecodeFailure { index: 4, .. })
        ));
        assert_eq!(stream.read_next().unwrap().unwrap().index(), 5);
        assert!(stream.seek(10).is_err());
    }

    #[test]
    fn test_close_invalidates() {
        let mut stream = SyntheticStream::depth(5, 30, 1, 1);
        stream.close();
        assert!(!stream.is_valid());
        assert!(stream.read_next().is_err());
    }
}
