//! Media-layer abstraction
//!
//! The engine does not decode, render, or fetch media. It drives external
//! collaborators through the traits here: an [`AssetResolver`] that turns
//! fragments into openable assets, and a [`PlayerBackend`] that builds
//! [`PlayerInstance`]s bound to one asset each. Backends report readiness,
//! buffering, and rate changes through a [`PlayerSignalSender`], which
//! marshals them onto the control thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use syncloop_common::fragment::{AssetHandle, Fragment};
use syncloop_common::timing::Ticks;

use crate::control::PlayerSignalSender;
use crate::error::Result;

/// Identity of one backend player instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlayerId(u64);

impl PlayerId {
    /// Allocate the next player id
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "player-{}", self.0)
    }
}

/// Identity of a visible slot; equal to its surface's id
pub type SlotId = Uuid;

/// Callbacks a backend player delivers to the engine
///
/// May originate on any thread; delivery always goes through a
/// [`PlayerSignalSender`].
#[derive(Debug, Clone)]
pub enum PlayerSignal {
    /// The player finished initial preparation and can accept rate changes
    StatusReady,

    /// The player failed to become ready
    StatusFailed { reason: String },

    /// A preroll requested via [`PlayerInstance::preroll`] completed
    PrerollFinished { success: bool },

    /// The effective playback rate changed (0.0 means stopped)
    EffectiveRateChanged { rate: f64 },

    /// The "likely to keep up" readiness signal changed
    LikelyToKeepUpChanged { likely: bool },

    /// The "buffer full" readiness signal changed
    BufferFullChanged { full: bool },
}

/// Parameters for building one backend player
#[derive(Debug, Clone)]
pub struct PlayerParams {
    /// Offset into the asset where the playable range starts
    pub playback_start_ticks: Ticks,

    /// Length of the playable range (the loop duration)
    pub playback_duration_ticks: Ticks,

    /// Forward buffer the backend should maintain
    pub preferred_forward_buffer_ticks: Ticks,

    /// Initial volume (0.0-1.0)
    pub volume: f32,

    /// Initial mute state
    pub muted: bool,
}

/// One underlying media player bound to one asset
///
/// All methods are called from the control thread. Completion of the
/// asynchronous operations (preroll, readiness) is reported through the
/// [`PlayerSignalSender`] the instance was created with.
pub trait PlayerInstance: Send {
    /// Begin prerolling at the given rate; completion arrives as
    /// [`PlayerSignal::PrerollFinished`]
    fn preroll(&mut self, rate: f64);

    /// Start playback immediately, unsynchronized
    fn play(&mut self);

    /// Commit to rate `rate` at media time `item_time`, anchored to host
    /// clock time `host_time`
    fn set_rate_at_host_time(&mut self, rate: f64, item_time: Ticks, host_time: Ticks);

    /// Stop playback, keeping the player alive
    fn pause(&mut self);

    /// Cancel any preroll still in flight
    fn cancel_pending_prerolls(&mut self);

    /// Current media time, if the player has one
    fn current_item_time(&self) -> Option<Ticks>;

    /// Effective playback rate (0.0 when stopped)
    fn effective_rate(&self) -> f64;

    /// Whether playback is likely to keep up without stalling
    fn is_likely_to_keep_up(&self) -> bool;

    /// Whether the forward buffer is full
    fn is_buffer_full(&self) -> bool;

    /// Whether the forward buffer is empty (starved)
    fn is_buffer_empty(&self) -> bool;

    /// Push a volume value
    fn set_volume(&mut self, volume: f32);

    /// Push a mute value
    fn set_muted(&mut self, muted: bool);

    /// Bind this player's output to a surface
    fn attach_surface(&mut self, surface: &SurfaceHandle);

    /// Release this player's output binding
    fn detach_surface(&mut self);
}

/// Factory for backend players
pub trait PlayerBackend: Send + Sync {
    /// Build a player bound to `asset`, reporting through `signals`
    fn create_player(
        &self,
        asset: &AssetHandle,
        params: PlayerParams,
        signals: PlayerSignalSender,
    ) -> Result<Box<dyn PlayerInstance>>;
}

/// External asset manager
///
/// Resolution is asynchronous and unbounded; results for slots that were
/// detached or reassigned in the meantime are discarded by token checks at
/// the call site, not by cancelling the resolution itself.
#[async_trait::async_trait]
pub trait AssetResolver: Send + Sync {
    /// Resolve a fragment to an openable asset; `Ok(None)` means the asset
    /// is gone (deleted, never uploaded) rather than an error
    async fn resolve(&self, fragment: &Fragment) -> Result<Option<AssetHandle>>;
}

/// A per-slot rendering surface
///
/// The surface outlives the players that render onto it; the looper swap
/// re-targets it without it ever being dropped. Exactly one player owns the
/// surface at a time, and ownership transfers on the control thread.
#[derive(Clone)]
pub struct SurfaceHandle {
    inner: Arc<SurfaceInner>,
}

struct SurfaceInner {
    slot_id: SlotId,
    attached: Mutex<Option<PlayerId>>,
}

impl SurfaceHandle {
    /// Create a surface for a new slot
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SurfaceInner {
                slot_id: Uuid::new_v4(),
                attached: Mutex::new(None),
            }),
        }
    }

    /// The slot this surface belongs to
    pub fn id(&self) -> SlotId {
        self.inner.slot_id
    }

    /// The player currently owning this surface, if any
    pub fn attached_player(&self) -> Option<PlayerId> {
        *self.inner.attached.lock().unwrap()
    }

    /// Transfer surface ownership to `player`
    pub(crate) fn attach(&self, player: PlayerId) {
        *self.inner.attached.lock().unwrap() = Some(player);
    }

    /// Release the surface, but only if `player` still owns it
    ///
    /// A player cleared after losing the surface must not wipe out its
    /// successor's binding.
    pub(crate) fn detach_if(&self, player: PlayerId) {
        let mut attached = self.inner.attached.lock().unwrap();
        if *attached == Some(player) {
            *attached = None;
        }
    }
}

impl Default for SurfaceHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SurfaceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceHandle")
            .field("slot_id", &self.inner.slot_id)
            .field("attached", &self.attached_player())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_ids_monotonic() {
        let a = PlayerId::next();
        let b = PlayerId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_surface_conditional_detach() {
        let surface = SurfaceHandle::new();
        let old = PlayerId::next();
        let new = PlayerId::next();

        surface.attach(old);
        surface.attach(new);

        // The old owner releasing must not clear the new owner's binding
        surface.detach_if(old);
        assert_eq!(surface.attached_player(), Some(new));

        surface.detach_if(new);
        assert_eq!(surface.attached_player(), None);
    }
}
