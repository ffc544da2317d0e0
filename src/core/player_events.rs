//! Events the playback core publishes for the display layer.

use crate::core::frame::Frame;

/// Pre-scan progress while no frame can be shown yet (0.0-1.0)
#[derive(Clone, Debug, PartialEq)]
pub struct LoadingProgressEvent(pub f32);

/// First frame of both streams decoded; emitted once per recording
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadyEvent {
    pub total_frames: usize,
    pub fps: u32,
}

/// Frame pair to display
#[derive(Clone, Debug)]
pub struct FrameReadyEvent {
    pub color: Frame,
    pub depth: Frame,
    pub index: usize,
    pub total_frames: usize,
    pub fps: u32,
}

/// User-facing warning (stream desync and similar)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlertEvent(pub String);
