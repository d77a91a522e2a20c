//! Control-thread plumbing
//!
//! All coordinator/orchestrator/looper state lives on a single logical
//! control thread; safety comes from confinement, not mutexes. This module
//! provides the pieces that make confinement workable:
//!
//! - [`HostClock`]: the monotonic, freely-shared clock reference
//! - [`ControlMessage`]: everything that can arrive at the control loop
//! - [`ControlHandle`]: channel sender plus the thread-confinement
//!   assertion and timer-spawning helpers
//! - [`PlayerSignalSender`]: marshals media-backend callbacks (which may
//!   originate on arbitrary threads) onto the control thread
//!
//! Deferred work (loop timers, delayed play preparation, grace-period
//! detaches) is invalidated by generation counters or tokens checked when
//! the message is handled, never by cancelling tasks.

use std::sync::Arc;
use std::thread::ThreadId;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use syncloop_common::fragment::{AssetHandle, Fragment};
use syncloop_common::timing::{ticks_to_duration, Ticks};

use crate::media::{PlayerId, PlayerSignal, SlotId, SurfaceHandle};
use crate::playback::engine::EngineCommand;

/// Monotonic host clock shared by every component
///
/// Read-only after creation; clones share the same origin. Built on
/// `tokio::time::Instant` so paused-time tests see the same clock the loop
/// timers run on.
#[derive(Debug, Clone)]
pub struct HostClock {
    origin: tokio::time::Instant,
}

impl HostClock {
    /// Create a clock anchored at "now"
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }

    /// Current host time in ticks since the clock origin
    pub fn now_ticks(&self) -> Ticks {
        let elapsed = self.origin.elapsed();
        ((elapsed.as_nanos() * syncloop_common::timing::TICK_RATE as u128) / 1_000_000_000) as Ticks
    }

    /// Absolute deadline for a host time in ticks
    ///
    /// Past times yield an already-elapsed deadline; a sleep on it returns
    /// immediately rather than panicking.
    pub fn deadline(&self, at_ticks: Ticks) -> tokio::time::Instant {
        self.origin + ticks_to_duration(at_ticks)
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything that can arrive at the engine control loop
pub enum ControlMessage {
    /// A media-backend callback, marshalled from whatever thread produced it
    PlayerSignal { player: PlayerId, signal: PlayerSignal },

    /// A scheduled player's deferred play preparation came due
    PlayerWorkDue { player: PlayerId, generation: u64 },

    /// The loop timer fired for the next boundary
    LoopTimerDue { generation: u64 },

    /// A grace-period detach came due
    DetachDue { slot: SlotId, token: u32 },

    /// Asset resolution for a single slot completed
    AssetResolved {
        slot: SlotId,
        token: u32,
        fragment: Fragment,
        asset: Option<AssetHandle>,
    },

    /// Asset resolution for a coordinated group completed
    GroupAssetsResolved {
        generation: u64,
        resolved: Vec<(Fragment, SurfaceHandle, Option<AssetHandle>)>,
    },

    /// A public API command
    Command(EngineCommand),
}

/// Sender half of the control channel, with confinement assertion and
/// deferred-work helpers
#[derive(Clone)]
pub struct ControlHandle {
    tx: mpsc::UnboundedSender<ControlMessage>,
    clock: HostClock,
    control_thread: Arc<std::sync::OnceLock<ThreadId>>,
}

impl ControlHandle {
    /// Create a control handle and the receiver the control loop consumes
    pub fn new(clock: HostClock) -> (Self, mpsc::UnboundedReceiver<ControlMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                clock,
                control_thread: Arc::new(std::sync::OnceLock::new()),
            },
            rx,
        )
    }

    /// Record the current thread as the control thread
    ///
    /// Called once by the control loop before it starts consuming messages.
    pub fn bind_control_thread(&self) {
        let _ = self.control_thread.set(std::thread::current().id());
    }

    /// Assert (debug builds) that the caller is on the control thread
    ///
    /// Mutating entry points call this instead of taking a lock; until the
    /// loop binds a thread the assertion passes, so components can be built
    /// before the loop starts.
    #[inline]
    pub fn assert_control_thread(&self) {
        #[cfg(debug_assertions)]
        if let Some(expected) = self.control_thread.get() {
            debug_assert_eq!(
                *expected,
                std::thread::current().id(),
                "engine state touched off the control thread"
            );
        }
    }

    /// Send a message to the control loop
    pub fn send(&self, message: ControlMessage) {
        // The loop shutting down while deferred work is in flight is normal
        if self.tx.send(message).is_err() {
            debug!("control loop gone; dropping message");
        }
    }

    /// Create a signal sender for one backend player
    pub fn signal_sender(&self, player: PlayerId) -> PlayerSignalSender {
        PlayerSignalSender {
            player,
            tx: self.tx.clone(),
        }
    }

    /// Arm deferred play preparation for a scheduled player
    ///
    /// Superseded by bumping the player's generation; the stale message is
    /// ignored on arrival.
    pub fn schedule_player_work(&self, player: PlayerId, generation: u64, due_ticks: Ticks) {
        let tx = self.tx.clone();
        let deadline = self.clock.deadline(due_ticks);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = tx.send(ControlMessage::PlayerWorkDue { player, generation });
        });
    }

    /// Arm the one-shot loop timer for the next boundary
    pub fn schedule_loop_timer(&self, generation: u64, due_ticks: Ticks) {
        let tx = self.tx.clone();
        let deadline = self.clock.deadline(due_ticks);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = tx.send(ControlMessage::LoopTimerDue { generation });
        });
    }

    /// Arm a grace-period detach for a slot
    pub fn schedule_detach(&self, slot: SlotId, token: u32, due_ticks: Ticks) {
        let tx = self.tx.clone();
        let deadline = self.clock.deadline(due_ticks);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = tx.send(ControlMessage::DetachDue { slot, token });
        });
    }
}

/// Marshals one backend player's callbacks onto the control thread
///
/// Cloneable and Send; the media backend may call [`send`](Self::send) from
/// any thread. Dropping the sender when the player is torn down ends the
/// subscription: begin/end observation pairs are the sender's lifetime.
#[derive(Clone)]
pub struct PlayerSignalSender {
    player: PlayerId,
    tx: mpsc::UnboundedSender<ControlMessage>,
}

impl PlayerSignalSender {
    /// Deliver a signal for this player to the control loop
    pub fn send(&self, signal: PlayerSignal) {
        let _ = self.tx.send(ControlMessage::PlayerSignal {
            player: self.player,
            signal,
        });
    }

    /// The player this sender reports for
    pub fn player(&self) -> PlayerId {
        self.player
    }
}

/// Generate a fresh attach/detach token
///
/// Tokens guard deferred detaches: every attach replaces the slot's token,
/// and a detach only proceeds if the token it captured is still current.
pub fn new_attach_token() -> u32 {
    rand::random::<u32>()
}

/// Stable unique id for a looper attachment
pub type LooperId = Uuid;
