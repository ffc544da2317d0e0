//! Playback controller: clock + scheduler + one cache per stream.
//!
//! The controller does not draw anything. Each scheduler tick it works out
//! which frame should be on screen and publishes it on the `EventBus`:
//!
//! - while the caches are cold: `LoadingProgressEvent`
//! - once both streams decoded a frame: `ReadyEvent` (once per recording)
//! - afterwards: `FrameReadyEvent` whenever the target frame changes, or on
//!   every tick while playing
//!
//! # Failures
//!
//! - no frame for the target in a cache that has not read that far yet, or in
//!   both caches: the tick is skipped, the previous frame stays up and the
//!   clock runs on
//! - one stream failed to read the target while the other delivered it: the
//!   streams are out of step; playback pauses and one `AlertEvent` goes out
//!   for that frame
//!
//! # Threads
//!
//! Ticks run on the scheduler thread (or on the host's loop when built with
//! `without_scheduler`). Controls may be called from any thread; clock
//! changes are atomic with respect to a running tick.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::config::PlayerConfig;
use crate::core::clock::{PlaybackClock, PlaybackState, format_timecode};
use crate::core::error::{PlaybackError, Result};
use crate::core::event_bus::EventBus;
use crate::core::frame_cache::{FillStop, FrameCache};
use crate::core::player_events::{AlertEvent, FrameReadyEvent, LoadingProgressEvent, ReadyEvent};
use crate::core::scheduler::AdaptiveScheduler;
use crate::core::source::{ClosedStream, FrameSource, Recording, StreamId, Timeline};
use crate::core::workers::{Epoch, Workers};

/// What a tick did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// No recording loaded
    Idle,
    /// Caches still cold; pre-scan fraction
    Loading(f32),
    /// Paused on the frame already shown
    Unchanged,
    Rendered(usize),
    /// Neither stream could deliver this frame
    Unavailable(usize),
}

#[derive(Debug, Default)]
struct Session {
    timeline: Option<Timeline>,
    ready: bool,
    /// Last frame delivered to the display
    current: Option<usize>,
    /// Frame whose desync was already reported
    alerted: Option<usize>,
}

struct PlayerCore {
    depth: Arc<FrameCache>,
    color: Arc<FrameCache>,
    clock: PlaybackClock,
    bus: EventBus,
    autoplay: bool,
    session: Mutex<Session>,
}

impl PlayerCore {
    fn session(&self) -> std::sync::MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn tick(&self) -> Result<TickOutcome> {
        let (timeline, ready, current, alerted) = {
            let session = self.session();
            match session.timeline {
                Some(timeline) => (timeline, session.ready, session.current, session.alerted),
                None => return Ok(TickOutcome::Idle),
            }
        };

        if !ready && !self.become_ready(timeline) {
            let fraction = self.depth.loading_fraction().min(self.color.loading_fraction());
            self.bus.emit(LoadingProgressEvent(fraction));
            return Ok(TickOutcome::Loading(fraction));
        }

        let last = timeline.last_valid_frame();
        let target = self.clock.target_frame(timeline.fps, last);
        if !self.clock.is_playing() && (current == Some(target) || alerted == Some(target)) {
            return Ok(TickOutcome::Unchanged);
        }

        let color = self.color.move_to(target);
        let depth = self.depth.move_to(target);
        match (color, depth) {
            (Some(color), Some(depth)) => {
                {
                    let mut session = self.session();
                    session.current = Some(target);
                    session.alerted = None;
                }
                trace!("Frame {} ready", target);
                self.bus.emit(FrameReadyEvent {
                    color,
                    depth,
                    index: target,
                    total_frames: timeline.frame_count,
                    fps: timeline.fps,
                });
                Ok(TickOutcome::Rendered(target))
            }
            (None, None) => {
                debug!("Frame {} unavailable in both streams, keeping previous", target);
                Ok(TickOutcome::Unavailable(target))
            }
            (color, _) => {
                let missing = if color.is_none() { &self.color } else { &self.depth };
                if !missing.is_failed(target) {
                    trace!("{} frame {} not loaded yet", missing.stream_id(), target);
                    return Ok(TickOutcome::Unavailable(target));
                }

                self.clock.hold(current.unwrap_or(target));
                self.session().alerted = Some(target);
                let err = PlaybackError::StreamDesync { index: target };
                warn!("{} (missing {} frame)", err, missing.stream_id());
                self.bus
                    .emit(AlertEvent(format!("{}: {} frame is missing", err, missing.stream_id())));
                Err(err)
            }
        }
    }

    /// Flip to ready once both caches decoded something
    fn become_ready(&self, timeline: Timeline) -> bool {
        if !(self.depth.has_decoded() && self.color.has_decoded()) {
            return false;
        }
        {
            let mut session = self.session();
            if session.ready {
                return true;
            }
            session.ready = true;
        }

        info!(
            "Recording ready: {} frames @ {} fps",
            timeline.frame_count, timeline.fps
        );
        self.bus.emit(ReadyEvent {
            total_frames: timeline.frame_count,
            fps: timeline.fps,
        });
        if self.autoplay {
            self.clock.restart_from(0);
        } else {
            self.clock.hold(0);
        }
        true
    }
}

/// Walk `cache` window by window until the stream ends or the epoch moves on
fn prescan(cache: &FrameCache, epoch: &Epoch, started_at: u64) {
    let mut next = 0;
    loop {
        if !epoch.is_current(started_at) {
            debug!("{} pre-scan abandoned at {}", cache.stream_id(), next);
            return;
        }
        match cache.preload_window(next) {
            FillStop::Complete { next: n } => next = n,
            FillStop::Failed { index } => next = index + 1,
            FillStop::Exhausted => break,
        }
    }
    debug!(
        "{} pre-scan finished: {} frames decoded",
        cache.stream_id(),
        cache.decoded_count()
    );
}

/// Playback controller driving two frame caches from a wall clock
pub struct PlaybackController {
    // Dropped first: no tick may outlive the core
    scheduler: Option<AdaptiveScheduler>,
    workers: Workers,
    core: Arc<PlayerCore>,
}

impl PlaybackController {
    /// Controller with its own scheduler thread
    pub fn new(config: &PlayerConfig, bus: EventBus) -> anyhow::Result<Self> {
        let mut controller = Self::without_scheduler(config, bus);

        let mut scheduler = AdaptiveScheduler::new("playback", config.scheduler);
        let core = Arc::clone(&controller.core);
        scheduler.start(
            move || core.tick().map(|_| ()).map_err(anyhow::Error::from),
            Duration::from_millis(config.scheduler.initial_period_ms),
        )?;
        controller.scheduler = Some(scheduler);
        Ok(controller)
    }

    /// Controller whose `tick()` is driven by the host's own loop
    pub fn without_scheduler(config: &PlayerConfig, bus: EventBus) -> Self {
        let core = PlayerCore {
            depth: Arc::new(FrameCache::new(Box::new(ClosedStream(StreamId::Depth)), config.prefetch_window)),
            color: Arc::new(FrameCache::new(Box::new(ClosedStream(StreamId::Color)), config.prefetch_window)),
            clock: PlaybackClock::new(),
            bus,
            autoplay: config.autoplay,
            session: Mutex::new(Session::default()),
        };
        Self {
            scheduler: None,
            workers: Workers::new(config.loader_threads, Epoch::new()),
            core: Arc::new(core),
        }
    }

    /// Open `path` through `source` and start loading it
    pub fn open(&self, source: &dyn FrameSource, path: &Path) -> Result<Timeline> {
        info!("Opening {}", path.display());
        let recording = source.open(path)?;
        self.load(recording)
    }

    /// Replace the current recording.
    ///
    /// On error nothing changes. Otherwise both caches are rebound, the clock
    /// stops and the background pre-scan of both streams is queued.
    pub fn load(&self, recording: Recording) -> Result<Timeline> {
        let timeline = recording.timeline()?;
        let epoch = self.workers.epoch().advance();

        {
            let mut session = self.core.session();
            self.core.clock.stop();
            self.core.depth.invalidate(recording.depth);
            self.core.color.invalidate(recording.color);
            *session = Session {
                timeline: Some(timeline),
                ..Session::default()
            };
        }

        for cache in [&self.core.depth, &self.core.color] {
            let cache = Arc::clone(cache);
            let loader_epoch = self.workers.epoch().clone();
            self.workers
                .execute_with_epoch(epoch, move || prescan(&cache, &loader_epoch, epoch));
        }

        info!(
            "Loaded recording: {} frames @ {} fps",
            timeline.frame_count, timeline.fps
        );
        Ok(timeline)
    }

    /// One scheduler step (see module docs)
    pub fn tick(&self) -> Result<TickOutcome> {
        self.core.tick()
    }

    /// Play from the shown frame; from the start when parked on the last one
    pub fn play(&self) {
        let Some(timeline) = self.timeline() else {
            return;
        };
        if self.core.clock.is_playing() {
            return;
        }
        let from = self.current_frame().unwrap_or_else(|| self.core.clock.held_frame());
        let from = if from >= timeline.last_valid_frame() { 0 } else { from };
        self.core.clock.restart_from(from);
    }

    pub fn pause(&self) {
        self.core.clock.pause();
    }

    /// Restart playback at `pos` (0.0-1.0) of the recording
    pub fn seek_to_position(&self, pos: f64) -> Result<usize> {
        let timeline = self
            .timeline()
            .ok_or_else(|| PlaybackError::SourceUnavailable("no recording loaded".into()))?;
        self.core.clock.seek_to_position(pos, timeline.last_valid_frame())
    }

    pub fn step_forward(&self) {
        if let Some(timeline) = self.timeline() {
            let frame = self.anchor_frame();
            self.core.clock.hold((frame + 1).min(timeline.last_valid_frame()));
        }
    }

    pub fn step_backward(&self) {
        if self.timeline().is_some() {
            let frame = self.anchor_frame();
            self.core.clock.hold(frame.saturating_sub(1));
        }
    }

    pub fn jump_to_start(&self) {
        if self.timeline().is_none() {
            return;
        }
        if self.core.clock.is_playing() {
            self.core.clock.restart_from(0);
        } else {
            self.core.clock.hold(0);
        }
    }

    pub fn jump_to_end(&self) {
        let Some(timeline) = self.timeline() else {
            return;
        };
        let last = timeline.last_valid_frame();
        if self.core.clock.is_playing() {
            self.core.clock.restart_from(last);
        } else {
            self.core.clock.hold(last);
        }
    }

    /// Force the next tick delay (e.g. while the UI is disabled)
    pub fn set_tick_period(&self, period: Duration) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.reassign_period(period);
        }
    }

    /// `HH:MM:SS (F<n>)` for the shown frame
    pub fn position_label(&self) -> String {
        let frame = self.current_frame().unwrap_or(0);
        let fps = self.timeline().map(|t| t.fps).unwrap_or(0);
        let seconds = if fps == 0 { 0 } else { (frame / fps as usize) as u64 };
        format!("{} (F{})", format_timecode(seconds), frame)
    }

    pub fn timeline(&self) -> Option<Timeline> {
        self.core.session().timeline
    }

    /// Last frame delivered to the display
    pub fn current_frame(&self) -> Option<usize> {
        self.core.session().current
    }

    pub fn is_ready(&self) -> bool {
        self.core.session().ready
    }

    pub fn state(&self) -> PlaybackState {
        self.core.clock.state()
    }

    /// Pre-scan fraction of the slower stream
    pub fn loading_fraction(&self) -> f32 {
        self.core.depth.loading_fraction().min(self.core.color.loading_fraction())
    }

    /// Background pre-scan has nothing queued or running
    pub fn loader_idle(&self) -> bool {
        self.workers.is_idle()
    }

    pub fn cache(&self, stream: StreamId) -> &FrameCache {
        match stream {
            StreamId::Depth => &self.core.depth,
            StreamId::Color => &self.core.color,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.core.bus
    }

    fn anchor_frame(&self) -> usize {
        self.current_frame().unwrap_or_else(|| self.core.clock.held_frame())
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.cancel();
        }
        debug!("Playback controller dropped");
    }
}
