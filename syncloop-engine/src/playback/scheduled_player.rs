//! Single scheduled player
//!
//! Wraps one backend player bound to one asset. A scheduled player can be
//! *preheated* (prepared with no target time) or *scheduled* (told to begin
//! at an absolute host-clock time before the backend player even exists).
//! When the schedule is far enough out, creating the backend player is
//! deferred so decoder resources are not held a full loop in advance.
//!
//! It also owns the two failure paths that keep the loop alive:
//! buffering detection (two independent readiness signals, edge-triggered
//! upward) and stall recovery (rate drops to zero mid-item → tear down and
//! rebuild at the same schedule, bounded by a retry budget).

use tracing::{debug, info, warn};

use syncloop_common::fragment::AssetHandle;
use syncloop_common::timing::{ticks_to_seconds, Ticks};

use crate::media::{PlayerId, PlayerInstance, PlayerParams, PlayerSignal, SurfaceHandle};
use crate::playback::PlaybackContext;

/// Events a scheduled player reports to its owning looper
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PlayerCallback {
    /// Preheat finished and no schedule arrived meanwhile
    Preheated,

    /// Either readiness signal went unready for the first time
    BufferingStarted,

    /// A readiness signal recovered; playback is being restarted
    BufferingStopped,

    /// The stall-recovery budget is exhausted; the player stays cleared
    RecoveryFailed { attempts: u32 },
}

/// One player that can be scheduled before it exists
pub struct ScheduledPlayer {
    id: PlayerId,
    ctx: PlaybackContext,
    asset: AssetHandle,

    /// Offset into the asset where the playable range starts
    playback_start: Ticks,

    /// Length of the playable range (the loop duration)
    playback_duration: Ticks,

    surface: SurfaceHandle,
    player: Option<Box<dyn PlayerInstance>>,

    /// Active scheduling request; exactly one at a time, a new request
    /// supersedes any pending deferred preparation
    item_time: Option<Ticks>,
    sync_time: Option<Ticks>,

    is_preheating: bool,
    is_scheduled: bool,
    should_be_playing: bool,

    /// Guards the duplicate-callback window while both readiness signals
    /// are being watched
    is_observing_buffering: bool,
    is_detecting_stall: bool,

    /// Whether this player currently owns its looper's surface
    surface_attached: bool,

    /// Invalidates deferred play preparation when bumped
    work_generation: u64,

    recovery_attempts: u32,

    volume: f32,
    muted: bool,
}

impl ScheduledPlayer {
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
            id: PlayerId::next(),
            ctx,
            asset,
            playback_start,
            playback_duration,
            surface,
            player: None,
            item_time: None,
            sync_time: None,
            is_preheating: false,
            is_scheduled: false,
            should_be_playing: false,
            is_observing_buffering: false,
            is_detecting_stall: false,
            surface_attached: false,
            work_generation: 0,
            recovery_attempts: 0,
            volume,
            muted,
        }
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    /// Media time relative to the playable range, if the backend has one
    pub fn current_time(&self) -> Option<Ticks> {
        self.player
            .as_ref()
            .and_then(|p| p.current_item_time())
            .map(|t| t - self.playback_start)
    }

    /// Prepare the backend player without a target time
    pub fn preheat(&mut self) {
        self.ctx.control.assert_control_thread();
        if self.is_scheduled {
            warn!(player = %self.id, "tried to preheat a player that is already scheduled");
            return;
        }

        self.is_preheating = true;
        self.create_player();
    }

    /// Commit to begin at media time `item_time`, host time `sync_time`
    ///
    /// `sync_time = None` means "play as soon as ready", unsynchronized.
    pub fn schedule(&mut self, item_time: Ticks, sync_time: Option<Ticks>) {
        self.ctx.control.assert_control_thread();
        self.item_time = Some(item_time);
        self.sync_time = sync_time;
        self.is_scheduled = true;

        debug!(
            player = %self.id,
            item_time = ticks_to_seconds(item_time),
            sync_time = sync_time.map(ticks_to_seconds),
            "scheduled player"
        );

        // A preheating player picks the schedule up when its preroll
        // completes; nothing more to do now.
        if self.is_preheating {
            return;
        }
        self.prepare_playback();
    }

    /// Take ownership of the looper's surface
    pub fn attach_to_surface(&mut self) {
        self.ctx.control.assert_control_thread();
        self.surface.attach(self.id);
        self.surface_attached = true;
        if let Some(player) = self.player.as_mut() {
            player.attach_surface(&self.surface);
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
        if let Some(player) = self.player.as_mut() {
            player.set_volume(volume);
        }
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        if let Some(player) = self.player.as_mut() {
            player.set_muted(muted);
        }
    }

    /// Cancel pending work, release the backend player and the surface.
    /// Idempotent.
    pub fn clear(&mut self) {
        self.ctx.control.assert_control_thread();
        self.clear_internal_state();

        if self.surface_attached {
            self.surface.detach_if(self.id);
            self.surface_attached = false;
        }
    }

    // ------------------------------------------------------------------
    // Playback preparation
    // ------------------------------------------------------------------

    /// Decide when to build the backend player for the active schedule
    fn prepare_playback(&mut self) {
        // No sync time: play whenever the player is ready.
        let Some(sync_time) = self.sync_time else {
            self.prepare_to_play();
            return;
        };

        let now = self.ctx.clock.now_ticks();
        let end_time = sync_time + self.playback_duration;
        if now > end_time {
            info!(
                player = %self.id,
                "skipping player creation; its scheduled window already passed"
            );
            return;
        }

        // Defer preparation when there is more lead time than the preroll
        // needs, so decoder resources are not held a full loop early.
        let preroll_lead = self.ctx.config.preroll_lead_ticks();
        let wait = sync_time - now - preroll_lead;
        if wait > 0 {
            self.work_generation += 1;
            debug!(
                player = %self.id,
                wait = ticks_to_seconds(wait),
                "deferring play preparation"
            );
            self.ctx
                .control
                .schedule_player_work(self.id, self.work_generation, sync_time - preroll_lead);
            return;
        }

        self.prepare_to_play();
    }

    /// Deferred preparation came due
    pub fn handle_work_due(&mut self, generation: u64) {
        self.ctx.control.assert_control_thread();
        if generation != self.work_generation {
            debug!(player = %self.id, "ignoring superseded play work");
            return;
        }
        self.prepare_to_play();
    }

    fn prepare_to_play(&mut self) {
        // A player may already exist from preheating; reuse it.
        if self.player.is_some() {
            self.play_at_scheduled_time();
            return;
        }
        self.create_player();
    }

    fn create_player(&mut self) {
        let params = PlayerParams {
            playback_start_ticks: self.playback_start,
            playback_duration_ticks: self.playback_duration,
            preferred_forward_buffer_ticks: self.ctx.config.preferred_forward_buffer_ticks(),
            volume: self.volume,
            muted: self.muted,
        };

        let signals = self.ctx.control.signal_sender(self.id);
        match self.ctx.backend.create_player(&self.asset, params, signals) {
            Ok(mut player) => {
                if self.surface_attached {
                    player.attach_surface(&self.surface);
                }
                self.player = Some(player);
                self.is_detecting_stall = true;
            }
            Err(e) => {
                warn!(player = %self.id, error = %e, "backend failed to create player");
            }
        }
    }

    fn play_at_scheduled_time(&mut self) {
        let now = self.ctx.clock.now_ticks();
        let playback_start = self.playback_start;

        let Some(player) = self.player.as_mut() else {
            warn!(player = %self.id, "tried to play at scheduled time with no backend player");
            return;
        };

        let (Some(item_time), Some(sync_time)) = (self.item_time, self.sync_time) else {
            // Scheduled without a sync time: just play.
            debug!(player = %self.id, "no sync time; playing immediately");
            player.play();
            self.should_be_playing = true;
            return;
        };

        let mut relative_item_time = playback_start + item_time;
        let mut host_time = sync_time;

        // If the sync time has already passed, shift the item time forward
        // by the elapsed amount and anchor to "now" instead, so the video
        // doesn't visibly fast-forward to catch up.
        if now > sync_time {
            relative_item_time += now - sync_time;
            host_time = now;
        }

        // committed_at is load-time diagnostics: how late after the sync
        // instant the rate was actually set.
        debug!(
            player = %self.id,
            item_time = ticks_to_seconds(relative_item_time),
            host_time = ticks_to_seconds(host_time),
            committed_at = ticks_to_seconds(now),
            "setting rate 1.0 at host time"
        );
        player.set_rate_at_host_time(1.0, relative_item_time, host_time);
        self.should_be_playing = true;
    }

    /// Continue whatever mode this player is in after the backend became
    /// ready or buffering resolved
    fn play(&mut self) {
        if self.is_preheating {
            if let Some(player) = self.player.as_mut() {
                player.preroll(1.0);
            }
            return;
        }
        if self.is_scheduled {
            self.play_at_scheduled_time();
            return;
        }
        debug_assert!(false, "player became ready while neither preheating nor scheduled");
        warn!(player = %self.id, "player ready while neither preheating nor scheduled");
    }

    // ------------------------------------------------------------------
    // Backend signals
    // ------------------------------------------------------------------

    /// Handle a marshalled backend signal, pushing upward callbacks into
    /// `out`
    pub(crate) fn handle_signal(&mut self, signal: PlayerSignal, out: &mut Vec<PlayerCallback>) {
        self.ctx.control.assert_control_thread();
        match signal {
            PlayerSignal::StatusReady => self.handle_status_ready(out),
            PlayerSignal::StatusFailed { reason } => {
                warn!(player = %self.id, %reason, "player failed to get ready; recovering");
                self.recover(out);
            }
            PlayerSignal::PrerollFinished { success } => self.handle_preroll_finished(success, out),
            PlayerSignal::EffectiveRateChanged { rate } => self.handle_rate_changed(rate, out),
            PlayerSignal::LikelyToKeepUpChanged { likely } => {
                if likely && self.is_observing_buffering {
                    debug!(player = %self.id, "playback likely to keep up - restart");
                    self.end_buffering_and_restart(out);
                }
            }
            PlayerSignal::BufferFullChanged { full } => {
                if full && self.is_observing_buffering {
                    debug!(player = %self.id, "playback buffer full - restart");
                    self.end_buffering_and_restart(out);
                }
            }
        }
    }

    fn handle_status_ready(&mut self, out: &mut Vec<PlayerCallback>) {
        let ready = self
            .player
            .as_ref()
            .map(|p| p.is_likely_to_keep_up() || p.is_buffer_full())
            .unwrap_or(false);

        if ready {
            self.play();
        } else {
            self.begin_observing_buffering(out);
        }
    }

    fn handle_preroll_finished(&mut self, success: bool, out: &mut Vec<PlayerCallback>) {
        if !success {
            warn!(player = %self.id, "failed to preroll player");
            return;
        }

        self.is_preheating = false;

        // A schedule may have arrived while prerolling; go straight to
        // play preparation instead of reporting preheated.
        if self.item_time.is_some() {
            debug!(player = %self.id, "preroll complete - preparing scheduled playback");
            self.prepare_playback();
            return;
        }

        debug!(player = %self.id, "preroll complete - not scheduled, reporting preheated");
        out.push(PlayerCallback::Preheated);
    }

    // ------------------------------------------------------------------
    // Buffering
    // ------------------------------------------------------------------

    fn begin_observing_buffering(&mut self, out: &mut Vec<PlayerCallback>) {
        out.push(PlayerCallback::BufferingStarted);
        self.is_observing_buffering = true;

        // The player may have buffered between the decision to observe and
        // now; close the window immediately so the started/stopped pair
        // stays balanced.
        let already_ready = self
            .player
            .as_ref()
            .map(|p| p.is_likely_to_keep_up() || p.is_buffer_full())
            .unwrap_or(false);
        if already_ready {
            self.end_buffering_and_restart(out);
        }
    }

    fn end_buffering_and_restart(&mut self, out: &mut Vec<PlayerCallback>) {
        // Both readiness signals may fire; only the first one ends the
        // observation.
        if !self.is_observing_buffering {
            return;
        }
        self.is_observing_buffering = false;
        out.push(PlayerCallback::BufferingStopped);
        self.play();
    }

    // ------------------------------------------------------------------
    // Stall recovery
    // ------------------------------------------------------------------

    fn handle_rate_changed(&mut self, rate: f64, out: &mut Vec<PlayerCallback>) {
        if rate != 0.0 || !self.is_detecting_stall {
            return;
        }

        if !self.playback_is_stuck() {
            debug!(player = %self.id, "rate hit zero but playback is not stuck; no recovery");
            return;
        }

        // Stopped because the forward buffer starved: that is buffering,
        // not a stall.
        let buffer_empty = self
            .player
            .as_ref()
            .map(|p| p.is_buffer_empty())
            .unwrap_or(false);
        if buffer_empty {
            debug!(player = %self.id, "stall caused by empty buffer; observing buffering");
            self.begin_observing_buffering(out);
            return;
        }

        warn!(player = %self.id, "playback stalled mid-item; rebuilding player");
        self.recover(out);
    }

    /// A player is stuck when its rate is zero while the item time is
    /// strictly inside the playable range: not finished, not yet started.
    fn playback_is_stuck(&self) -> bool {
        let Some(player) = self.player.as_ref() else {
            return false;
        };
        if player.effective_rate() != 0.0 {
            return false;
        }
        let Some(item_time) = player.current_item_time() else {
            return false;
        };
        let end_time = self.playback_start + self.playback_duration;
        item_time > 0 && item_time < end_time
    }

    fn recover(&mut self, out: &mut Vec<PlayerCallback>) {
        self.recovery_attempts += 1;
        if self.recovery_attempts > self.ctx.config.max_recovery_attempts {
            warn!(
                player = %self.id,
                attempts = self.recovery_attempts - 1,
                "recovery budget exhausted; abandoning player"
            );
            self.clear_internal_state();
            out.push(PlayerCallback::RecoveryFailed {
                attempts: self.recovery_attempts - 1,
            });
            return;
        }

        info!(
            player = %self.id,
            attempt = self.recovery_attempts,
            asset = %self.asset.locator,
            "recovering player from scratch at the same schedule"
        );
        self.clear_internal_state();
        self.prepare_playback();
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    fn clear_internal_state(&mut self) {
        self.is_detecting_stall = false;
        self.is_observing_buffering = false;
        self.should_be_playing = false;

        // Invalidate any deferred play preparation still in flight.
        self.work_generation += 1;

        if let Some(mut player) = self.player.take() {
            player.pause();
            player.cancel_pending_prerolls();
            player.detach_surface();
        }
    }
}

impl std::fmt::Debug for ScheduledPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledPlayer")
            .field("id", &self.id)
            .field("asset", &self.asset.locator)
            .field("item_time", &self.item_time)
            .field("sync_time", &self.sync_time)
            .field("is_preheating", &self.is_preheating)
            .field("is_scheduled", &self.is_scheduled)
            .field("should_be_playing", &self.should_be_playing)
            .finish()
    }
}
