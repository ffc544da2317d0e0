//! Frame source abstraction: the recording SDK seen from the playback core.
//!
//! A `FrameSource` opens a recording file into a `Recording`, which owns one
//! `StreamReader` per stream. Readers are owned exclusively by whoever holds
//! them (normally a `FrameCache`) and are replaced wholesale when a new
//! recording is opened, never mutated in place.

use std::fmt;
use std::path::Path;

use crate::core::error::{PlaybackError, Result};
use crate::core::frame::Frame;

/// Stream within a dual-stream recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamId {
    Depth,
    Color,
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamId::Depth => write!(f, "depth"),
            StreamId::Color => write!(f, "color"),
        }
    }
}

/// One stream of an opened recording.
///
/// `read_next` returns `Ok(None)` at end of stream. Reads are blocking and
/// bounded only by the underlying I/O.
pub trait StreamReader: Send {
    fn stream_id(&self) -> StreamId;

    /// Handle is open and usable
    fn is_valid(&self) -> bool;

    fn frame_count(&self) -> usize;

    /// Nominal frame rate
    fn fps(&self) -> u32;

    fn read_next(&mut self) -> Result<Option<Frame>>;

    /// Position the stream so that the next `read_next` yields `index`
    fn seek(&mut self, index: usize) -> Result<()>;

    fn close(&mut self);
}

/// Placeholder handle for a cache with no recording bound
#[derive(Debug, Clone, Copy)]
pub struct ClosedStream(pub StreamId);

impl StreamReader for ClosedStream {
    fn stream_id(&self) -> StreamId {
        self.0
    }

    fn is_valid(&self) -> bool {
        false
    }

    fn frame_count(&self) -> usize {
        0
    }

    fn fps(&self) -> u32 {
        0
    }

    fn read_next(&mut self) -> Result<Option<Frame>> {
        Err(PlaybackError::SourceUnavailable(format!("{} stream is closed", self.0)))
    }

    fn seek(&mut self, _index: usize) -> Result<()> {
        Err(PlaybackError::SourceUnavailable(format!("{} stream is closed", self.0)))
    }

    fn close(&mut self) {}
}

/// Frame range and rate shared by both streams of a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeline {
    /// Frames present in both streams
    pub frame_count: usize,
    pub fps: u32,
}

impl Timeline {
    /// Last index both streams can deliver
    pub fn last_valid_frame(&self) -> usize {
        self.frame_count.saturating_sub(1)
    }
}

/// An opened dual-stream recording
pub struct Recording {
    pub depth: Box<dyn StreamReader>,
    pub color: Box<dyn StreamReader>,
}

impl Recording {
    pub fn new(depth: Box<dyn StreamReader>, color: Box<dyn StreamReader>) -> Self {
        Self { depth, color }
    }

    /// Common timeline of both streams.
    ///
    /// Unequal frame counts truncate to the shorter stream. FPS comes from
    /// the color stream, falling back to depth when color reports none.
    pub fn timeline(&self) -> Result<Timeline> {
        if !self.depth.is_valid() || !self.color.is_valid() {
            return Err(PlaybackError::SourceUnavailable(
                "recording has no valid depth/color stream pair".into(),
            ));
        }

        let depth_count = self.depth.frame_count();
        let color_count = self.color.frame_count();
        if depth_count != color_count {
            log::warn!(
                "Stream frame counts differ (depth={}, color={}), truncating to {}",
                depth_count,
                color_count,
                depth_count.min(color_count)
            );
        }
        let frame_count = depth_count.min(color_count);
        if frame_count == 0 {
            return Err(PlaybackError::SourceUnavailable("recording contains no frames".into()));
        }

        let fps = match self.color.fps() {
            0 => self.depth.fps(),
            fps => fps,
        };
        if fps == 0 {
            return Err(PlaybackError::SourceUnavailable("recording reports 0 fps".into()));
        }

        Ok(Timeline { frame_count, fps })
    }
}

impl fmt::Debug for Recording {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recording")
            .field("depth_frames", &self.depth.frame_count())
            .field("color_frames", &self.color.frame_count())
            .finish()
    }
}

/// Opens recordings (the camera / recording SDK)
pub trait FrameSource: Send + Sync {
    fn open(&self, path: &Path) -> Result<Recording>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticStream;

    #[test]
    fn test_timeline_truncates_to_shorter_stream() {
        let recording = Recording::new(
            Box::new(SyntheticStream::depth(120, 30, 4, 4)),
            Box::new(SyntheticStream::color(100, 30, 4, 4)),
        );
        let timeline = recording.timeline().unwrap();
        assert_eq!(timeline.frame_count, 100);
        assert_eq!(timeline.last_valid_frame(), 99);
        assert_eq!(timeline.fps, 30);
    }

    #[test]
    fn test_timeline_fps_falls_back_to_depth() {
        let recording = Recording::new(
            Box::new(SyntheticStream::depth(10, 15, 2, 2)),
            Box::new(SyntheticStream::color(10, 0, 2, 2)),
        );
        assert_eq!(recording.timeline().unwrap().fps, 15);
    }

    #[test]
    fn test_closed_streams_are_unavailable() {
        let recording = Recording::new(
            Box::new(ClosedStream(StreamId::Depth)),
            Box::new(ClosedStream(StreamId::Color)),
        );
        assert!(matches!(recording.timeline(), Err(PlaybackError::SourceUnavailable(_))));

        let mut closed = ClosedStream(StreamId::Color);
        assert!(closed.read_next().is_err());
        assert!(closed.seek(0).is_err());
    }
}
