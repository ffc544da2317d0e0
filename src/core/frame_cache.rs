//! Lazily filled frame cache for one stream of a recording.
//!
//! Frames are keyed by index and read from the bound `StreamReader` on
//! demand. A miss triggers a forward fill of up to `reserved_local_capacity`
//! frames, so sequential playback pays for stream reads in batches and the
//! background loader can run the same fill ahead of the playhead.
//!
//! # Locking
//!
//! One mutex guards the stream handle, the entry map and the cursor. A fill
//! takes it once per index: check, read, commit. The lock is
//! never held across two reads, so a foreground tick waits for at most one
//! decode of the background loader.
//!
//! # Cursor
//!
//! `first_non_initialised` is the read frontier: one past the highest index
//! ever committed. `move_to` only fills behind the frontier; requests at or
//! beyond it are answered from what is cached.
//!
//! Capacity is a prefetch window, not an eviction bound. Entries live until
//! `invalidate`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, trace, warn};

use crate::core::frame::Frame;
use crate::core::source::{StreamId, StreamReader};

/// Cache entry state
#[derive(Debug, Clone)]
enum CacheEntry {
    Ready(Frame),
    /// Read failed, reported unavailable until the stream is replaced
    Failed,
}

/// Hit/miss counters
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 { 0.0 } else { self.hits() as f64 / total as f64 }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

/// Why a forward fill ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillStop {
    /// Window fully covered; next index to fill
    Complete { next: usize },
    /// Read failed at this index
    Failed { index: usize },
    /// Stream ended, was swapped, or became invalid
    Exhausted,
}

struct CacheState {
    stream: Box<dyn StreamReader>,
    entries: HashMap<usize, CacheEntry>,
    first_non_initialised: usize,
    /// Index the stream will yield on the next `read_next`, if known
    read_position: Option<usize>,
    decoded: usize,
    /// Bumped by `invalidate` so in-flight fills notice the swap
    generation: u64,
}

impl CacheState {
    fn ready(&self, index: usize) -> Option<Frame> {
        match self.entries.get(&index) {
            Some(CacheEntry::Ready(frame)) => Some(frame.clone()),
            _ => None,
        }
    }

    fn in_range(&self, index: usize) -> bool {
        self.stream.is_valid() && index < self.stream.frame_count()
    }

    /// Read `index` into the map. Caller holds the lock.
    fn read_into(&mut self, index: usize) -> Result<Option<Frame>, ()> {
        let stream_id = self.stream.stream_id();

        // Position is unknown until the read commits. A panic in the reader
        // leaves the index absent and forces a seek, so a later call retries.
        let positioned = self.read_position.take() == Some(index);
        if !positioned && let Err(e) = self.stream.seek(index) {
            warn!("{} seek to {} failed: {}", stream_id, index, e);
            self.entries.insert(index, CacheEntry::Failed);
            return Err(());
        }

        match self.stream.read_next() {
            Ok(Some(frame)) => {
                self.read_position = Some(index + 1);
                self.entries.insert(index, CacheEntry::Ready(frame.clone()));
                self.decoded += 1;
                self.first_non_initialised = self.first_non_initialised.max(index + 1);
                trace!("{} frame {} cached", stream_id, index);
                Ok(Some(frame))
            }
            Ok(None) => {
                debug!("{} stream ended at {}", stream_id, index);
                Ok(None)
            }
            Err(e) => {
                debug!("{} read of {} failed: {}", stream_id, index, e);
                self.entries.insert(index, CacheEntry::Failed);
                Err(())
            }
        }
    }
}

/// Frame cache bound to one stream
pub struct FrameCache {
    stream_id: StreamId,
    reserved_local_capacity: usize,
    state: Mutex<CacheState>,
    stats: CacheStats,
}

impl FrameCache {
    /// Create cache over `stream` with a prefetch window of
    /// `reserved_local_capacity` frames (at least 1).
    pub fn new(stream: Box<dyn StreamReader>, reserved_local_capacity: usize) -> Self {
        let stream_id = stream.stream_id();
        let reserved_local_capacity = reserved_local_capacity.max(1);
        debug!(
            "FrameCache created: stream={}, window={}, frames={}",
            stream_id,
            reserved_local_capacity,
            stream.frame_count()
        );

        Self {
            stream_id,
            reserved_local_capacity,
            state: Mutex::new(CacheState {
                stream,
                entries: HashMap::new(),
                first_non_initialised: 0,
                read_position: Some(0),
                decoded: 0,
                generation: 0,
            }),
            stats: CacheStats::default(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn capacity(&self) -> usize {
        self.reserved_local_capacity
    }

    /// Frame at `index`, reading forward from it on a miss.
    ///
    /// Returns `None` when the stream is closed, the index is out of range,
    /// or the read of `index` itself failed.
    pub fn ensure_available(&self, index: usize) -> Option<Frame> {
        {
            let state = self.lock();
            if !state.in_range(index) {
                return None;
            }
            match state.entries.get(&index) {
                Some(CacheEntry::Ready(frame)) => {
                    self.stats.record_hit();
                    return Some(frame.clone());
                }
                Some(CacheEntry::Failed) => {
                    self.stats.record_miss();
                    return None;
                }
                None => {}
            }
        }

        self.stats.record_miss();
        self.fill_forward(index).0
    }

    /// Frame at `index` for sequential playback.
    ///
    /// Behind the cursor a missing frame is filled like `ensure_available`;
    /// at or past it the cache is consulted without reading.
    pub fn move_to(&self, index: usize) -> Option<Frame> {
        let needs_fill = {
            let state = self.lock();
            if !state.in_range(index) {
                return None;
            }
            if let Some(frame) = state.ready(index) {
                self.stats.record_hit();
                return Some(frame);
            }
            index < state.first_non_initialised && !state.entries.contains_key(&index)
        };

        self.stats.record_miss();
        if needs_fill {
            trace!("{} move_to {} behind cursor, filling", self.stream_id, index);
            self.fill_forward(index).0
        } else {
            None
        }
    }

    /// Fill the window starting at `start` and report where it stopped.
    ///
    /// Used by the background loader to walk a stream window by window.
    pub fn preload_window(&self, start: usize) -> FillStop {
        self.fill_forward(start).1
    }

    /// Read forward from `start`, one lock acquisition per index.
    fn fill_forward(&self, start: usize) -> (Option<Frame>, FillStop) {
        let generation = self.lock().generation;
        let end = start.saturating_add(self.reserved_local_capacity);
        let mut requested = None;

        for index in start..end {
            let mut state = self.lock();
            if state.generation != generation || !state.in_range(index) {
                return (requested, FillStop::Exhausted);
            }

            match state.entries.get(&index) {
                Some(CacheEntry::Ready(frame)) => {
                    if index == start {
                        requested = Some(frame.clone());
                    }
                    continue;
                }
                Some(CacheEntry::Failed) => return (requested, FillStop::Failed { index }),
                None => {}
            }

            match state.read_into(index) {
                Ok(Some(frame)) => {
                    if index == start {
                        requested = Some(frame);
                    }
                }
                Ok(None) => return (requested, FillStop::Exhausted),
                Err(()) => return (requested, FillStop::Failed { index }),
            }
        }

        debug!("{} window {}..{} filled", self.stream_id, start, end);
        (requested, FillStop::Complete { next: end })
    }

    /// Swap in a replacement stream; drops every cached entry.
    pub fn invalidate(&self, stream: Box<dyn StreamReader>) {
        let mut state = self.lock();
        let mut previous = std::mem::replace(&mut state.stream, stream);
        previous.close();

        let dropped = state.entries.len();
        state.entries.clear();
        state.first_non_initialised = 0;
        state.read_position = Some(0);
        state.decoded = 0;
        state.generation += 1;
        self.stats.reset();

        debug!(
            "{} cache invalidated: dropped {} entries, new stream has {} frames",
            self.stream_id,
            dropped,
            state.stream.frame_count()
        );
    }

    /// Stream handle is open and valid
    pub fn is_ready(&self) -> bool {
        self.lock().stream.is_valid()
    }

    /// Frame count of the bound stream (0 when closed)
    pub fn frame_count(&self) -> usize {
        let state = self.lock();
        if state.stream.is_valid() { state.stream.frame_count() } else { 0 }
    }

    /// Read frontier (`first_non_initialised`)
    pub fn cursor(&self) -> usize {
        self.lock().first_non_initialised
    }

    /// Fraction of the stream behind the cursor, 0.0-1.0
    pub fn loading_fraction(&self) -> f32 {
        let state = self.lock();
        let count = state.stream.frame_count();
        if !state.stream.is_valid() || count == 0 {
            0.0
        } else {
            (state.first_non_initialised.min(count) as f32) / count as f32
        }
    }

    /// Number of successfully decoded frames held
    pub fn decoded_count(&self) -> usize {
        self.lock().decoded
    }

    /// At least one frame has been decoded since the stream was bound
    pub fn has_decoded(&self) -> bool {
        self.decoded_count() > 0
    }

    /// Index holds a decoded frame (no read, no stats)
    pub fn contains(&self, index: usize) -> bool {
        self.lock().ready(index).is_some()
    }

    /// Read of `index` failed on the bound stream
    pub fn is_failed(&self, index: usize) -> bool {
        matches!(self.lock().entries.get(&index), Some(CacheEntry::Failed))
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

impl std::fmt::Debug for FrameCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("FrameCache")
            .field("stream", &self.stream_id)
            .field("window", &self.reserved_local_capacity)
            .field("entries", &state.entries.len())
            .field("cursor", &state.first_non_initialised)
            .finish()
    }
}
