//! Playback engine module
//!
//! **Module Structure:**
//! - `looper.rs`: the Looper capability trait and its upward events
//! - `scheduled_player.rs`: single scheduled player with stall recovery
//! - `gapless_looper.rs`: double-buffered gapless looper per asset
//! - `looper_group.rs`: lockstep composite of several loopers
//! - `coordinator.rs`: master loop clock and boundary timer
//! - `orchestrator.rs`: fragment → looper slot management
//! - `engine.rs`: control loop and public handle

pub mod coordinator;
pub mod engine;
pub mod gapless_looper;
pub mod looper;
pub mod looper_group;
pub mod orchestrator;
pub mod scheduled_player;

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::control::{ControlHandle, HostClock};
use crate::media::PlayerBackend;
use crate::state::SharedState;

pub use coordinator::LoopCoordinator;
pub use engine::{EngineCommand, EngineHandle, PlaybackEngine};
pub use gapless_looper::GaplessLooper;
pub use looper::{Looper, LooperEvent};
pub use looper_group::LooperGroup;
pub use orchestrator::PlaybackOrchestrator;
pub use scheduled_player::ScheduledPlayer;

/// Shared handles every playback component needs
///
/// Cheap to clone; the clock and backend are read-only shared, the control
/// handle funnels everything back to the one control thread.
#[derive(Clone)]
pub struct PlaybackContext {
    /// Media backend building players
    pub backend: Arc<dyn PlayerBackend>,

    /// Control channel + confinement assertion + timer helpers
    pub control: ControlHandle,

    /// Monotonic host clock
    pub clock: HostClock,

    /// Engine timing constants
    pub config: Arc<EngineConfig>,

    /// Event broadcast + pushed policy values
    pub state: Arc<SharedState>,
}
