//! DEPTHPLAY - playback core for recorded depth + color footage
//!
//! Re-exports all modules for use by the binary target.

// Core engine (source, cache, clock, scheduler, controller)
pub mod core;

// App modules
pub mod cli;
pub mod config;
pub mod paths;
pub mod synthetic;

pub use config::PlayerConfig;
pub use self::core::event_bus::{BoxedEvent, EventBus, downcast_event};
pub use self::core::player::{PlaybackController, TickOutcome};
pub use self::core::{Frame, FrameCache, FrameSource, PlaybackClock, PlaybackError, Recording, StreamId};
