//! Gapless double-buffered looper
//!
//! Owns exactly one asset and at most two scheduled players: the *current*
//! one rendering onto the surface and the *buffer* one prerolled for the
//! next loop. The buffer player is always scheduled a full loop duration
//! ahead, so at the boundary it is already running at media time zero and
//! promoting it produces no visible gap.

use tracing::{debug, warn};
use uuid::Uuid;

use syncloop_common::fragment::AssetHandle;
use syncloop_common::timing::{ticks_to_seconds, Ticks};

use crate::control::LooperId;
use crate::media::{PlayerId, PlayerSignal, SurfaceHandle};
use crate::playback::looper::{Looper, LooperEvent};
use crate::playback::scheduled_player::{PlayerCallback, ScheduledPlayer};
use crate::playback::PlaybackContext;

/// Which of the two player slots a signal was routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlayerSlot {
    Current,
    Buffer,
}

/// Double-buffered looper for one asset
pub struct GaplessLooper {
    id: LooperId,
    ctx: PlaybackContext,
    asset: AssetHandle,

    /// Offset into the asset where the playable range starts
    playback_start: Ticks,

    /// The loop duration; every player renders exactly this much
    playback_duration: Ticks,

    /// The slot's surface; current player owns it, buffer player waits
    surface: SurfaceHandle,

    current: Option<ScheduledPlayer>,
    buffer: Option<ScheduledPlayer>,

    is_preheating: bool,
    is_ready_to_loop: bool,

    volume: f32,
    muted: bool,
}

impl GaplessLooper {
    pub fn new(
        ctx: PlaybackContext,
        asset: AssetHandle,
        playback_start: Ticks,
        playback_duration: Ticks,
        surface: SurfaceHandle,
        volume: f32,
        muted: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ctx,
            asset,
            playback_start,
            playback_duration,
            surface,
            current: None,
            buffer: None,
            is_preheating: false,
            is_ready_to_loop: false,
            volume,
            muted,
        }
    }

    /// The current player, if any (the one owning the surface)
    pub fn current_player(&self) -> Option<&ScheduledPlayer> {
        self.current.as_ref()
    }

    /// The buffer player, if any (prerolled for the next boundary)
    pub fn buffer_player(&self) -> Option<&ScheduledPlayer> {
        self.buffer.as_ref()
    }

    /// The surface this looper renders onto
    pub fn surface(&self) -> &SurfaceHandle {
        &self.surface
    }

    fn create_player(&mut self) -> ScheduledPlayer {
        ScheduledPlayer::new(
            self.ctx.clone(),
            self.asset.clone(),
            self.playback_start,
            self.playback_duration,
            self.surface.clone(),
            self.volume,
            self.muted,
        )
    }

    /// Replace the buffer player with a fresh one scheduled at media time
    /// zero for the given boundary
    fn set_buffer_player(&mut self, sync_time: Ticks) {
        if let Some(mut old) = self.buffer.take() {
            old.clear();
        }

        debug!(
            looper = %self.id,
            sync_time = ticks_to_seconds(sync_time),
            "creating buffer player for next boundary"
        );
        let mut buffer = self.create_player();
        buffer.schedule(0, Some(sync_time));
        self.buffer = Some(buffer);
    }

    /// Which slot, if any, holds `player`
    fn slot_of(&self, player: PlayerId) -> Option<PlayerSlot> {
        if self.current.as_ref().map(|p| p.id()) == Some(player) {
            return Some(PlayerSlot::Current);
        }
        if self.buffer.as_ref().map(|p| p.id()) == Some(player) {
            return Some(PlayerSlot::Buffer);
        }
        None
    }
}

impl Looper for GaplessLooper {
    fn id(&self) -> LooperId {
        self.id
    }

    fn is_ready_to_loop(&self) -> bool {
        self.is_ready_to_loop
    }

    fn preheat(&mut self) {
        self.ctx.control.assert_control_thread();
        self.is_preheating = true;
        let mut player = self.create_player();
        player.preheat();
        self.current = Some(player);
    }

    fn play(&mut self, item_time: Ticks, sync_time: Ticks) {
        self.ctx.control.assert_control_thread();
        debug!(
            looper = %self.id,
            item_time = ticks_to_seconds(item_time),
            sync_time = ticks_to_seconds(sync_time),
            "play looper"
        );

        // A player may already exist from preheating; scheduling it is
        // fine, it will prepare playback once its preroll completes.
        if self.current.is_some() {
            debug!(looper = %self.id, "play called on a looper that was already preheating");
        }
        let mut current = match self.current.take() {
            Some(player) => player,
            None => self.create_player(),
        };
        current.schedule(item_time, Some(sync_time));
        current.attach_to_surface();
        self.current = Some(current);

        // Pre-arm the next loop: the buffer player starts at media time
        // zero exactly when this player's remaining range runs out.
        let remaining = self.playback_duration - item_time;
        self.set_buffer_player(sync_time + remaining);
    }

    fn restart_loop(&mut self, loop_time: Ticks, loop_duration: Ticks) {
        self.ctx.control.assert_control_thread();
        debug!(
            looper = %self.id,
            loop_time = ticks_to_seconds(loop_time),
            "loop looper"
        );

        let Some(mut promoted) = self.buffer.take() else {
            warn!(looper = %self.id, "tried to loop but there is no buffer player");
            return;
        };

        // Looping consists of three steps:
        // 1) tear down the current player
        // 2) promote the buffer player onto the surface
        // 3) create a new buffer player for the boundary after this one
        if let Some(mut old) = self.current.take() {
            old.clear();
        }

        promoted.attach_to_surface();
        self.current = Some(promoted);

        self.set_buffer_player(loop_time + loop_duration);
    }

    fn clear(&mut self) {
        self.ctx.control.assert_control_thread();
        if let Some(mut player) = self.current.take() {
            player.clear();
        }
        if let Some(mut player) = self.buffer.take() {
            player.clear();
        }
        self.is_preheating = false;
        self.is_ready_to_loop = false;
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
        if let Some(player) = self.current.as_mut() {
            player.set_volume(volume);
        }
        if let Some(player) = self.buffer.as_mut() {
            player.set_volume(volume);
        }
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        if let Some(player) = self.current.as_mut() {
            player.set_muted(muted);
        }
        if let Some(player) = self.buffer.as_mut() {
            player.set_muted(muted);
        }
    }

    fn owns_player(&self, player: PlayerId) -> bool {
        self.slot_of(player).is_some()
    }

    fn handle_player_signal(
        &mut self,
        player: PlayerId,
        signal: PlayerSignal,
        out: &mut Vec<LooperEvent>,
    ) {
        self.ctx.control.assert_control_thread();
        let Some(slot) = self.slot_of(player) else {
            // Signals from players cleared mid-flight are expected noise.
            debug!(looper = %self.id, %player, "signal for a player this looper no longer holds");
            return;
        };

        let mut callbacks = Vec::new();
        match slot {
            PlayerSlot::Current => {
                if let Some(p) = self.current.as_mut() {
                    p.handle_signal(signal, &mut callbacks);
                }
            }
            PlayerSlot::Buffer => {
                if let Some(p) = self.buffer.as_mut() {
                    p.handle_signal(signal, &mut callbacks);
                }
            }
        }

        for callback in callbacks {
            match callback {
                PlayerCallback::Preheated => {
                    // Guard against preheat completing for a player that is
                    // no longer current, or after the looper moved on.
                    if slot != PlayerSlot::Current {
                        debug!(looper = %self.id, "preheat completed for a non-current player");
                        continue;
                    }
                    if !self.is_preheating {
                        debug!(looper = %self.id, "preheat completed but looper is no longer preheating");
                        continue;
                    }
                    self.is_preheating = false;
                    self.is_ready_to_loop = true;
                    out.push(LooperEvent::ReadyToLoop);
                }
                PlayerCallback::BufferingStarted => out.push(LooperEvent::BufferingStarted),
                PlayerCallback::BufferingStopped => out.push(LooperEvent::BufferingStopped),
                PlayerCallback::RecoveryFailed { attempts } => {
                    out.push(LooperEvent::RecoveryFailed { attempts })
                }
            }
        }
    }

    fn handle_player_work_due(&mut self, player: PlayerId, generation: u64) {
        self.ctx.control.assert_control_thread();
        match self.slot_of(player) {
            Some(PlayerSlot::Current) => {
                if let Some(p) = self.current.as_mut() {
                    p.handle_work_due(generation);
                }
            }
            Some(PlayerSlot::Buffer) => {
                if let Some(p) = self.buffer.as_mut() {
                    p.handle_work_due(generation);
                }
            }
            None => {
                debug!(looper = %self.id, %player, "work due for a player this looper no longer holds");
            }
        }
    }
}

impl std::fmt::Debug for GaplessLooper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GaplessLooper")
            .field("id", &self.id)
            .field("asset", &self.asset.locator)
            .field("has_current", &self.current.is_some())
            .field("has_buffer", &self.buffer.is_some())
            .field("is_ready_to_loop", &self.is_ready_to_loop)
            .finish()
    }
}
