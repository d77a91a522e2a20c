//! # Syncloop Engine Library (syncloop-engine)
//!
//! Synchronized loop playback engine with gapless boundaries.
//!
//! **Purpose:** Play several independent video fragments in perfect,
//! repeating synchrony against one shared loop timeline: a master loop
//! clock computes boundaries algorithmically, per-fragment double-buffered
//! loopers swap prerolled players at each boundary, and an orchestrator
//! manages attach/detach with grace-period debouncing.
//!
//! **Architecture:** Single control-thread confinement; media decoding and
//! rendering are behind external backend traits ([`media`]).

pub mod config;
pub mod control;
pub mod error;
pub mod media;
pub mod playback;
pub mod state;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use playback::{EngineHandle, PlaybackEngine};
pub use state::SharedState;
