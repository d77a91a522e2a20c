//! Event types for the Syncloop engine
//!
//! Provides the central event enum delivered to engine subscribers. Events
//! are broadcast over a `tokio::sync::broadcast` channel owned by the engine
//! and can be serialized for transport to a UI layer.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::timing::Ticks;

/// Lifecycle phase of the master loop
///
/// The coordinator moves Idle → Looping on the first-ready transition,
/// Looping → Paused on pause, back to Looping on unpause, and to Idle when
/// cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopPhase {
    /// No loop has started yet (no boundary recorded)
    Idle,
    /// The loop timer is running and boundaries are being recorded
    Looping,
    /// Playback position captured, loopers cleared, awaiting unpause
    Paused,
}

/// Engine event types
///
/// Events are broadcast to all subscribers and can be serialized for
/// delivery outside the process. All aggregate events (buffering) are
/// edge-triggered: they fire on state transitions, never per poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// Playback of the very first loop began
    ///
    /// Fired once per loop session: on the first-ready transition, and again
    /// after a hard reset-to-time (which starts a fresh boundary history).
    PlaybackStarted {
        /// When playback started
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The master timeline crossed a loop boundary
    ///
    /// Fired once per boundary, including the first (loop_count = 0).
    Looped {
        /// Absolute host-clock time of the boundary, in ticks
        at_ticks: Ticks,
        /// Number of completed loops (0 for the initial boundary)
        loop_count: usize,
        /// When the boundary was recorded
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// At least one attached looper started buffering
    ///
    /// Edge-triggered: fires only on the 0 → 1 transition of the aggregate
    /// buffering count.
    BufferingStarted {
        /// When buffering began
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// All attached loopers finished buffering
    ///
    /// Edge-triggered: fires only on the 1 → 0 transition of the aggregate
    /// buffering count.
    BufferingStopped {
        /// When buffering ended
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A player exhausted its stall-recovery budget and was cleared
    ///
    /// The rest of the loop keeps running; the affected slot simply stops
    /// rendering until it is reattached.
    RecoveryFailed {
        /// Looper whose player gave up
        looper_id: Uuid,
        /// Number of rebuild attempts made before giving up
        attempts: u32,
        /// When recovery was abandoned
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_tags() {
        let event = EngineEvent::Looped {
            at_ticks: 480_000,
            loop_count: 1,
            timestamp: chrono::Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Looped\""));
        assert!(json.contains("480000"));
    }

    #[test]
    fn test_event_roundtrip() {
        let event = EngineEvent::RecoveryFailed {
            looper_id: Uuid::new_v4(),
            attempts: 5,
            timestamp: chrono::Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        let back: EngineEvent = serde_json::from_str(&json).unwrap();
        match back {
            EngineEvent::RecoveryFailed { attempts, .. } => assert_eq!(attempts, 5),
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}
