//! Shared playback state
//!
//! Event distribution and pushed policy values (mute, master volume) shared
//! between the control loop and external observers. Uses `std::sync::RwLock`
//! because every accessor is called from synchronous contexts (the control
//! loop on one side, the owning application on the other).

use tokio::sync::broadcast;

use syncloop_common::events::{EngineEvent, LoopPhase};

/// Shared state accessible by the control loop and the engine handle
pub struct SharedState {
    /// Event broadcaster for engine subscribers
    event_tx: broadcast::Sender<EngineEvent>,

    /// Current phase of the master loop
    loop_phase: std::sync::RwLock<LoopPhase>,

    /// Hardware-mute policy value, pushed in by the application shell
    muted: std::sync::RwLock<bool>,

    /// Master volume (0.0-1.0), multiplied into every fragment volume
    master_volume: std::sync::RwLock<f32>,
}

impl SharedState {
    /// Create new shared state with default values
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(100); // Buffer up to 100 events
        Self {
            event_tx,
            loop_phase: std::sync::RwLock::new(LoopPhase::Idle),
            muted: std::sync::RwLock::new(false),
            master_volume: std::sync::RwLock::new(1.0),
        }
    }

    /// Broadcast an event to all subscribers
    pub fn broadcast_event(&self, event: EngineEvent) {
        // Ignore send errors (no receivers is OK)
        let _ = self.event_tx.send(event);
    }

    /// Subscribe to the engine event stream
    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    /// Get the current loop phase
    pub fn loop_phase(&self) -> LoopPhase {
        *self.loop_phase.read().unwrap()
    }

    /// Set the current loop phase
    pub fn set_loop_phase(&self, phase: LoopPhase) {
        *self.loop_phase.write().unwrap() = phase;
    }

    /// Get the pushed mute policy value
    pub fn is_muted(&self) -> bool {
        *self.muted.read().unwrap()
    }

    /// Set the pushed mute policy value
    pub fn set_muted(&self, muted: bool) {
        *self.muted.write().unwrap() = muted;
    }

    /// Get master volume (0.0-1.0)
    pub fn master_volume(&self) -> f32 {
        *self.master_volume.read().unwrap()
    }

    /// Set master volume (0.0-1.0)
    pub fn set_master_volume(&self, volume: f32) {
        *self.master_volume.write().unwrap() = volume.clamp(0.0, 1.0);
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
