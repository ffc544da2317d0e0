//! Playback core - frame source, caches, clock, scheduler, controller
//!
//! Independent of any UI: results leave through the `EventBus`.

pub mod clock;
pub mod error;
pub mod event_bus;
pub mod frame;
pub mod frame_cache;
pub mod player;
pub mod player_events;
pub mod scheduler;
pub mod source;
pub mod workers;

// Re-exports for convenience
pub use clock::{PlaybackClock, PlaybackState};
pub use error::PlaybackError;
pub use event_bus::EventBus;
pub use frame::{Frame, PixelBuffer};
pub use frame_cache::FrameCache;
pub use player::{PlaybackController, TickOutcome};
pub use scheduler::{AdaptiveScheduler, SchedulerConfig};
pub use source::{FrameSource, Recording, StreamId, StreamReader, Timeline};
pub use workers::Workers;
