//! The Looper capability
//!
//! Anything the coordinator can preheat, play, loop, and clear. Instead of
//! a back-reference from looper to coordinator, handlers push
//! [`LooperEvent`]s into a caller-provided buffer and the coordinator
//! (which observes the loopers but does not own their lifecycle) reacts to
//! them immediately on the control thread.

use crate::control::LooperId;
use crate::media::{PlayerId, PlayerSignal};
use syncloop_common::timing::Ticks;

/// Events a looper reports upward
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LooperEvent {
    /// The looper finished preheating and can join the loop
    ReadyToLoop,

    /// A player of this looper started buffering
    BufferingStarted,

    /// A player of this looper stopped buffering
    BufferingStopped,

    /// A player of this looper exhausted its stall-recovery budget
    RecoveryFailed { attempts: u32 },
}

/// Capability set the coordinator drives
///
/// All methods require the control thread. Recoverable playback failures
/// never surface as errors here; they are absorbed and reported through
/// [`LooperEvent`]s or log lines.
pub trait Looper: Send {
    /// Stable unique id used for membership checks and de-duplication
    fn id(&self) -> LooperId;

    /// Whether this looper has reported ready since its last clear
    fn is_ready_to_loop(&self) -> bool;

    /// Prepare for playback without committing to a start time
    fn preheat(&mut self);

    /// Begin playing at media-relative `item_time`, timed to host clock
    /// `sync_time`
    fn play(&mut self, item_time: Ticks, sync_time: Ticks);

    /// Execute the loop-boundary restart for the boundary at `loop_time`
    fn restart_loop(&mut self, loop_time: Ticks, loop_duration: Ticks);

    /// Tear down all players; idempotent
    fn clear(&mut self);

    /// Push a volume value to the live players
    fn set_volume(&mut self, volume: f32);

    /// Push a mute value to the live players
    fn set_muted(&mut self, muted: bool);

    /// Whether `player` belongs to this looper
    fn owns_player(&self, player: PlayerId) -> bool;

    /// Route a marshalled backend signal to the owning player, pushing any
    /// upward events into `out`
    fn handle_player_signal(
        &mut self,
        player: PlayerId,
        signal: PlayerSignal,
        out: &mut Vec<LooperEvent>,
    );

    /// Route a deferred play-preparation wakeup to the owning player
    fn handle_player_work_due(&mut self, player: PlayerId, generation: u64);
}
