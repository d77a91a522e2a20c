//! Tick-based timing system for frame-accurate loop timing
//!
//! This module provides the core timing abstraction for Syncloop, using a
//! unified tick rate of 240,000 Hz that divides evenly into all common video
//! frame rates as well as 1 kHz (milliseconds).
//!
//! # Architecture
//!
//! Syncloop uses three time representations:
//!
//! 1. **Ticks (Internal)**: i64 values at 240,000 Hz - all engine arithmetic
//! 2. **Milliseconds (API)**: i64 values for configuration and diagnostics
//! 3. **Seconds (Logging)**: f64 values for human-readable log output
//!
//! ## Tick Rate Selection
//!
//! The tick rate of 240,000 Hz was chosen as the LCM (Least Common Multiple)
//! of common video frame rates:
//!
//! - 24 fps (film): 240,000 ÷ 24 = 10,000 ticks/frame
//! - 25 fps (PAL): 240,000 ÷ 25 = 9,600 ticks/frame
//! - 30 fps (NTSC): 240,000 ÷ 30 = 8,000 ticks/frame
//! - 50 fps: 240,000 ÷ 50 = 4,800 ticks/frame
//! - 60 fps: 240,000 ÷ 60 = 4,000 ticks/frame
//! - 120 fps: 240,000 ÷ 120 = 2,000 ticks/frame
//! - 1,000 Hz (ms): 240,000 ÷ 1,000 = 240 ticks/ms
//!
//! This ensures frame counts and millisecond values both convert to ticks
//! with zero rounding error, which matters for the loop-boundary arithmetic:
//! boundary times are computed algorithmically (`first + duration × n`), so
//! any per-conversion rounding would compound across loops.
//!
//! # Precision and Overflow
//!
//! - i64::MAX ticks ≈ 1.2 million years of playback
//! - Millisecond conversions use truncating division
//! - Frame conversions are exact for all supported rates

// ============================================================================
// Constants
// ============================================================================

/// Tick rate: 240,000 Hz
///
/// LCM of common video frame rates (24/25/30/50/60/120 fps) and of 1 kHz,
/// providing frame-accurate conversions with zero rounding error.
pub const TICK_RATE: i64 = 240_000;

/// Ticks per millisecond: 240
///
/// Used for fast millisecond ↔ tick conversions:
/// - `ticks = milliseconds × TICKS_PER_MS`
/// - `milliseconds = ticks ÷ TICKS_PER_MS` (truncating division)
pub const TICKS_PER_MS: i64 = 240;

/// Time duration or instant expressed in ticks at [`TICK_RATE`].
///
/// Instants are measured from the origin of a host clock; durations are
/// plain differences. Plain i64 keeps the loop arithmetic (modulo, scaled
/// multiplication) direct.
pub type Ticks = i64;

// ============================================================================
// Core Conversion Functions
// ============================================================================

/// Convert milliseconds to ticks
///
/// Lossless: all millisecond values convert exactly to tick boundaries.
///
/// # Examples
///
/// ```rust
/// use syncloop_common::timing::ms_to_ticks;
///
/// assert_eq!(ms_to_ticks(0), 0);
/// assert_eq!(ms_to_ticks(1), 240);
/// assert_eq!(ms_to_ticks(1000), 240_000);  // 1 second
/// assert_eq!(ms_to_ticks(-500), -120_000); // relative offsets
/// ```
pub fn ms_to_ticks(milliseconds: i64) -> Ticks {
    milliseconds * TICKS_PER_MS
}

/// Convert ticks to milliseconds using truncating division
///
/// Tick values that don't fall exactly on millisecond boundaries round down
/// (maximum error 239 ticks ≈ 0.996 ms). For tick-aligned values the
/// roundtrip through [`ms_to_ticks`] is exact.
///
/// # Examples
///
/// ```rust
/// use syncloop_common::timing::ticks_to_ms;
///
/// assert_eq!(ticks_to_ms(240), 1);
/// assert_eq!(ticks_to_ms(239), 0);
/// assert_eq!(ticks_to_ms(241), 1);
/// ```
pub fn ticks_to_ms(ticks: Ticks) -> i64 {
    ticks / TICKS_PER_MS
}

/// Convert seconds (f64) to ticks, rounding to the nearest tick
///
/// Intended for configuration values and log-friendly constants, not for the
/// boundary arithmetic (which stays in integer ticks end to end).
pub fn seconds_to_ticks(seconds: f64) -> Ticks {
    (seconds * TICK_RATE as f64).round() as Ticks
}

/// Convert ticks to seconds (f64) for human-readable logging
pub fn ticks_to_seconds(ticks: Ticks) -> f64 {
    ticks as f64 / TICK_RATE as f64
}

/// Convert a frame count at a given frame rate to ticks
///
/// Exact for all frame rates that divide [`TICK_RATE`].
///
/// # Panics
///
/// Panics if `frame_rate` is 0.
///
/// # Examples
///
/// ```rust
/// use syncloop_common::timing::frames_to_ticks;
///
/// assert_eq!(frames_to_ticks(30, 30), 240_000);  // 1 second @ 30fps
/// assert_eq!(frames_to_ticks(1, 60), 4_000);
/// ```
pub fn frames_to_ticks(frames: i64, frame_rate: u32) -> Ticks {
    assert!(frame_rate > 0, "frame_rate must be > 0");
    (frames * TICK_RATE) / frame_rate as i64
}

/// Convert ticks to a whole frame count at a given frame rate (truncating)
///
/// # Panics
///
/// Panics if `frame_rate` is 0.
pub fn ticks_to_frames(ticks: Ticks, frame_rate: u32) -> i64 {
    assert!(frame_rate > 0, "frame_rate must be > 0");
    (ticks * frame_rate as i64) / TICK_RATE
}

/// Convert ticks to a [`std::time::Duration`]
///
/// Negative tick values clamp to zero; callers schedule "due now" work
/// rather than panicking on an already-elapsed deadline.
pub fn ticks_to_duration(ticks: Ticks) -> std::time::Duration {
    if ticks <= 0 {
        return std::time::Duration::ZERO;
    }
    let nanos = (ticks as u128 * 1_000_000_000) / TICK_RATE as u128;
    std::time::Duration::from_nanos(nanos as u64)
}
