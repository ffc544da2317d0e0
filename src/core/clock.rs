//! Wall-clock driven playback position.
//!
//! The target frame is derived from time elapsed since the playback origin,
//! never from a per-tick counter: however irregular the scheduler's ticks
//! are, the played-back speed stays at the stream's FPS.
//!
//! Origin and state sit behind one mutex, so a restart, pause or seek is
//! atomic with respect to a concurrent `target_frame`.

use std::sync::Mutex;
use std::time::Instant;

use log::{debug, trace};

use crate::core::error::{PlaybackError, Result};

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

/// Instant and frame from which elapsed time is mapped to frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackOrigin {
    pub timestamp: Instant,
    pub frame: usize,
}

#[derive(Debug)]
struct ClockState {
    state: PlaybackState,
    origin: PlaybackOrigin,
    /// Frame returned while not playing
    held: usize,
    /// Last frame reported by `target_frame` while playing
    last_target: usize,
}

/// Maps wall-clock time to frame indices
#[derive(Debug)]
pub struct PlaybackClock {
    inner: Mutex<ClockState>,
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock {
    /// Stopped at frame 0
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ClockState {
                state: PlaybackState::Stopped,
                origin: PlaybackOrigin {
                    timestamp: Instant::now(),
                    frame: 0,
                },
                held: 0,
                last_target: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClockState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> PlaybackState {
        self.lock().state
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    pub fn origin(&self) -> PlaybackOrigin {
        self.lock().origin
    }

    /// Frame returned while paused or stopped
    pub fn held_frame(&self) -> usize {
        self.lock().held
    }

    /// Start playing from `frame` now
    pub fn restart_from(&self, frame: usize) {
        self.restart_from_at(frame, Instant::now());
    }

    pub fn restart_from_at(&self, frame: usize, now: Instant) {
        let mut clock = self.lock();
        clock.origin = PlaybackOrigin { timestamp: now, frame };
        clock.last_target = frame;
        clock.held = frame;
        clock.state = PlaybackState::Playing;
        debug!("Playback restarted from frame {}", frame);
    }

    /// Freeze at the frame last reported by `target_frame`
    pub fn pause(&self) {
        let mut clock = self.lock();
        if clock.state == PlaybackState::Playing {
            clock.held = clock.last_target;
        }
        clock.state = PlaybackState::Paused;
        trace!("Playback paused at frame {}", clock.held);
    }

    /// Pause at an explicit frame
    pub fn hold(&self, frame: usize) {
        let mut clock = self.lock();
        clock.held = frame;
        clock.state = PlaybackState::Paused;
        trace!("Holding frame {}", frame);
    }

    /// Stopped at frame 0
    pub fn stop(&self) {
        let mut clock = self.lock();
        clock.held = 0;
        clock.last_target = 0;
        clock.state = PlaybackState::Stopped;
        trace!("Playback stopped");
    }

    /// Frame to show now
    pub fn target_frame(&self, fps: u32, last_valid_frame: usize) -> usize {
        self.target_frame_at(fps, last_valid_frame, Instant::now())
    }

    /// Frame to show at `now`.
    ///
    /// While playing: `origin + floor(elapsed_ms * fps / 1000)`, clamped to
    /// `last_valid_frame`. Running past the end pauses the clock there.
    pub fn target_frame_at(&self, fps: u32, last_valid_frame: usize, now: Instant) -> usize {
        let mut clock = self.lock();
        if clock.state != PlaybackState::Playing {
            return clock.held.min(last_valid_frame);
        }

        let elapsed_ms = now.saturating_duration_since(clock.origin.timestamp).as_millis();
        let advanced = elapsed_ms.saturating_mul(fps as u128) / 1000;
        let target = (clock.origin.frame as u128).saturating_add(advanced);

        if target > last_valid_frame as u128 {
            clock.state = PlaybackState::Paused;
            clock.held = last_valid_frame;
            clock.last_target = last_valid_frame;
            debug!("Reached last frame {}, pausing", last_valid_frame);
            return last_valid_frame;
        }

        let target = target as usize;
        clock.last_target = target;
        target
    }

    /// Restart from `round(pos * last_valid_frame)`.
    ///
    /// `pos` must lie in [0, 1]; otherwise nothing changes.
    pub fn seek_to_position(&self, pos: f64, last_valid_frame: usize) -> Result<usize> {
        self.seek_to_position_at(pos, last_valid_frame, Instant::now())
    }

    pub fn seek_to_position_at(&self, pos: f64, last_valid_frame: usize, now: Instant) -> Result<usize> {
        if !(0.0..=1.0).contains(&pos) {
            return Err(PlaybackError::OutOfRange { value: pos, max: 1.0 });
        }
        let frame = (pos * last_valid_frame as f64).round() as usize;
        self.restart_from_at(frame.min(last_valid_frame), now);
        Ok(frame)
    }
}

/// Format seconds as `HH:MM:SS`
pub fn format_timecode(seconds: u64) -> String {
    format!("{:02}:{:02}:{:02}", seconds / 3600, (seconds % 3600) / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_scenario_900_frames_at_30fps() {
        let clock = PlaybackClock::new();
        let start = Instant::now();
        clock.restart_from_at(0, start);

        let frame = clock.target_frame_at(30, 899, start + Duration::from_millis(500));
        assert!((14..=16).contains(&frame), "got {}", frame);
        assert!(clock.is_playing());

        let frame = clock.target_frame_at(30, 899, start + Duration::from_secs(31));
        assert_eq!(frame, 899);
        assert_eq!(clock.state(), PlaybackState::Paused);
    }

    #[test]
    fn test_monotonic_while_playing() {
        let clock = PlaybackClock::new();
        let start = Instant::now();
        clock.restart_from_at(10, start);

        let mut previous = 0;
        for ms in (0..5000).step_by(7) {
            let frame = clock.target_frame_at(24, 10_000, start + Duration::from_millis(ms));
            assert!(frame >= previous);
            previous = frame;
        }
        assert_eq!(previous, 10 + 4998 * 24 / 1000);
    }

    #[test]
    fn test_end_of_stream_pauses_once() {
        let clock = PlaybackClock::new();
        let start = Instant::now();
        clock.restart_from_at(95, start);

        let mut transitions = 0;
        let mut was_playing = true;
        for ms in (0..2000).step_by(50) {
            let frame = clock.target_frame_at(30, 99, start + Duration::from_millis(ms));
            assert!(frame <= 99);
            let playing = clock.is_playing();
            if was_playing && !playing {
                transitions += 1;
            }
            was_playing = playing;
        }
        assert_eq!(transitions, 1);
        assert_eq!(clock.held_frame(), 99);
    }

    #[test]
    fn test_pause_holds_last_target() {
        let clock = PlaybackClock::new();
        let start = Instant::now();
        clock.restart_from_at(0, start);
        assert_eq!(clock.target_frame_at(10, 100, start + Duration::from_millis(1000)), 10);

        clock.pause();
        assert_eq!(clock.state(), PlaybackState::Paused);
        assert_eq!(clock.target_frame_at(10, 100, start + Duration::from_secs(60)), 10);

        // Resuming moves the origin to the held frame
        let resume = start + Duration::from_secs(60);
        clock.restart_from_at(clock.held_frame(), resume);
        assert_eq!(clock.target_frame_at(10, 100, resume + Duration::from_millis(200)), 12);
    }

    #[test]
    fn test_seek_to_position() {
        let clock = PlaybackClock::new();
        let now = Instant::now();

        assert_eq!(clock.seek_to_position_at(0.5, 899, now).unwrap(), 450);
        assert!(clock.is_playing());
        assert_eq!(clock.origin().frame, 450);

        clock.hold(3);
        assert!(matches!(
            clock.seek_to_position_at(1.5, 899, now),
            Err(PlaybackError::OutOfRange { .. })
        ));
        assert!(clock.seek_to_position_at(f64::NAN, 899, now).is_err());
        assert!(clock.seek_to_position_at(-0.1, 899, now).is_err());
        assert_eq!(clock.state(), PlaybackState::Paused);
        assert_eq!(clock.held_frame(), 3);

        assert_eq!(clock.seek_to_position_at(1.0, 899, now).unwrap(), 899);
    }

    #[test]
    fn test_stopped_returns_held() {
        let clock = PlaybackClock::new();
        assert_eq!(clock.state(), PlaybackState::Stopped);
        assert_eq!(clock.target_frame(30, 100), 0);
        clock.hold(42);
        assert_eq!(clock.target_frame(30, 100), 42);
        clock.stop();
        assert_eq!(clock.target_frame(30, 100), 0);
    }

    #[test]
    fn test_format_timecode() {
        assert_eq!(format_timecode(0), "00:00:00");
        assert_eq!(format_timecode(61), "00:01:01");
        assert_eq!(format_timecode(3600 + 600 + 5), "01:10:05");
    }
}
