//! # Syncloop Common Library
//!
//! Shared code for the Syncloop workspace including:
//! - Tick-based timing (240,000 Hz) and conversions
//! - Event types (EngineEvent enum)
//! - Fragment and asset types
//! - Common error types

pub mod error;
pub mod events;
pub mod fragment;
pub mod timing;

pub use error::{Error, Result};
pub use events::{EngineEvent, LoopPhase};
pub use fragment::{AssetHandle, AssetLocator, Fragment};
pub use timing::{Ticks, TICK_RATE};
