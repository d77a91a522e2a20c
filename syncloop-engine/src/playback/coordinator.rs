//! Master loop clock and coordinator
//!
//! The single source of truth for the loop timeline. Owns the append-only
//! boundary history, arms a one-shot timer slightly before each boundary so
//! the gapless swap has time to execute, and fans play/loop/clear commands
//! to whatever loopers are currently attached.
//!
//! Boundary times are computed algorithmically (`first_boundary +
//! duration * n`), never by sampling the clock at timer fire, so timer
//! jitter cannot drift the timeline.

use tracing::{debug, info, warn};

use syncloop_common::events::{EngineEvent, LoopPhase};
use syncloop_common::timing::{ticks_to_seconds, Ticks};

use crate::control::LooperId;
use crate::media::{PlayerId, PlayerSignal};
use crate::playback::looper::{Looper, LooperEvent};
use crate::playback::PlaybackContext;

/// Coordinates attached loopers against one shared loop timeline
pub struct LoopCoordinator {
    ctx: PlaybackContext,

    /// Fixed loop duration in ticks
    duration: Ticks,

    /// Absolute host times at which a loop restarted, in the order the
    /// boundaries occurred. Append-only while looping; discarded on clear,
    /// pause, and reset.
    boundary_times: Vec<Ticks>,

    /// Playback-relative position captured at pause or suspension
    last_observed_playback_time: Option<Ticks>,

    /// Playback-relative position the next first-ready transition should
    /// resume from (set by unpause)
    scheduled_playback_time: Option<Ticks>,

    /// Loopers cleared by pause, kept for unpause
    paused_loopers: Option<Vec<Box<dyn Looper>>>,

    /// Loopers queued while suspended, re-attached on resume
    loopers_to_recover: Option<Vec<Box<dyn Looper>>>,

    /// The loopers being coordinated. The coordinator manages their
    /// playback state and its references to them, not their creation or
    /// destruction.
    loopers: Vec<Box<dyn Looper>>,

    /// How many attached loopers are currently buffering; aggregate events
    /// fire only on 0↔1 transitions
    buffering_looper_count: usize,

    /// Invalidates pending loop timers when bumped
    timer_generation: u64,

    /// Set between suspend() and resume(); attaches are postponed while set
    suspended: bool,
}

impl LoopCoordinator {
    /// Create a coordinator for a fixed loop duration
    ///
    /// # Panics
    ///
    /// Panics if `duration` is not positive; a loop with no duration is a
    /// programming error in the surrounding orchestration.
    pub fn new(ctx: PlaybackContext, duration: Ticks) -> Self {
        assert!(duration > 0, "loop duration must be positive");
        Self {
            ctx,
            duration,
            boundary_times: Vec::new(),
            last_observed_playback_time: None,
            scheduled_playback_time: None,
            paused_loopers: None,
            loopers_to_recover: None,
            loopers: Vec::new(),
            buffering_looper_count: 0,
            timer_generation: 0,
            suspended: false,
        }
    }

    /// Fixed loop duration in ticks
    pub fn duration(&self) -> Ticks {
        self.duration
    }

    /// Number of completed loops
    pub fn loop_count(&self) -> usize {
        self.boundary_times.len().saturating_sub(1)
    }

    /// Boundary history, oldest first
    pub fn boundary_times(&self) -> &[Ticks] {
        &self.boundary_times
    }

    /// Number of currently attached loopers
    pub fn attached_count(&self) -> usize {
        self.loopers.len()
    }

    /// Whether a looper with this id is currently attached
    pub fn is_attached(&self, id: LooperId) -> bool {
        self.loopers.iter().any(|l| l.id() == id)
    }

    // ------------------------------------------------------------------
    // Looper management
    // ------------------------------------------------------------------

    /// Attach a looper, or queue it for recovery while suspended
    pub fn attach(&mut self, looper: Box<dyn Looper>) {
        self.ctx.control.assert_control_thread();

        if self.suspended {
            self.postpone_attach_until_resumed(looper);
            return;
        }
        self.actively_attach(looper);
    }

    /// Clear and remove a looper; returns it if it was attached
    pub fn detach(&mut self, id: LooperId) -> Option<Box<dyn Looper>> {
        self.ctx.control.assert_control_thread();

        let Some(index) = self.loopers.iter().position(|l| l.id() == id) else {
            debug!(looper = %id, "tried to detach a looper that was never attached");
            return None;
        };

        let mut looper = self.loopers.remove(index);
        looper.clear();
        debug!(looper = %id, "detached looper");
        Some(looper)
    }

    fn postpone_attach_until_resumed(&mut self, looper: Box<dyn Looper>) {
        debug!(looper = %looper.id(), "postponing attach until resumed");
        self.loopers_to_recover
            .get_or_insert_with(Vec::new)
            .push(looper);

        if self.last_observed_playback_time.is_none() {
            self.last_observed_playback_time = Some(0);
        }
    }

    fn actively_attach(&mut self, looper: Box<dyn Looper>) {
        let id = looper.id();
        if self.is_attached(id) {
            warn!(looper = %id, attached = self.loopers.len(), "looper already attached; ignoring");
            return;
        }

        debug!(looper = %id, "attaching looper");
        self.loopers.push(looper);
        let index = self.loopers.len() - 1;

        // If the loop hasn't started yet, preheat instead of syncing, so
        // the eventual first playback starts from time zero rather than
        // mid-loop at whatever offset the preroll delay lands on.
        if self.boundary_times.is_empty() {
            debug!(looper = %id, "no loop started yet; preheating instead of syncing");
            self.loopers[index].preheat();
        } else {
            let now = self.ctx.clock.now_ticks();
            self.sync_to_loop(index, now);
        }
    }

    /// Sync one attached looper into the running loop at host time `at`
    fn sync_to_loop(&mut self, index: usize, at: Ticks) {
        let playback_time = self.calculate_playback_time(at);
        debug!(
            looper = %self.loopers[index].id(),
            at = ticks_to_seconds(at),
            playback_time = ticks_to_seconds(playback_time),
            "syncing looper into loop"
        );
        self.loopers[index].play(playback_time, at);
    }

    // ------------------------------------------------------------------
    // Loop timing
    // ------------------------------------------------------------------

    /// Record a boundary and arm the timer for the next one
    ///
    /// `loop_start` may lie in the past (reset to an arbitrary playback
    /// position, resume from pause); the timer deadline is absolute, so the
    /// armed interval is automatically the *remaining* part of the loop.
    fn dispatch_loop_event(&mut self, loop_start: Ticks) {
        debug!(
            loop_start = ticks_to_seconds(loop_start),
            "dispatching loop event"
        );

        self.boundary_times.push(loop_start);
        self.ctx.state.set_loop_phase(LoopPhase::Looping);
        self.emit(EngineEvent::Looped {
            at_ticks: loop_start,
            loop_count: self.loop_count(),
            timestamp: chrono::Utc::now(),
        });

        // Fire the timer one look-ahead early so the swap completes before
        // the precise boundary instant.
        let next_fire = loop_start + self.duration - self.ctx.config.loop_lookahead_ticks();
        self.timer_generation += 1;
        self.ctx
            .control
            .schedule_loop_timer(self.timer_generation, next_fire);

        debug!(fire_at = ticks_to_seconds(next_fire), "armed loop timer");
    }

    /// The loop timer fired: compute the boundary algorithmically and fan
    /// the restart out
    pub fn handle_loop_timer(&mut self, generation: u64) {
        self.ctx.control.assert_control_thread();

        if generation != self.timer_generation {
            debug!(generation, "ignoring stale loop timer");
            return;
        }

        let Some(&first) = self.boundary_times.first() else {
            warn!("loop timer fired but there is no initial boundary");
            return;
        };

        // Algorithmic, not observed: the n-th boundary is exactly n loop
        // durations after the first, so clock-sampling error never
        // compounds across loops.
        let boundary = first + self.duration * self.boundary_times.len() as Ticks;
        debug!(
            observed = ticks_to_seconds(self.ctx.clock.now_ticks()),
            algorithmic = ticks_to_seconds(boundary),
            "loop boundary"
        );

        for looper in &mut self.loopers {
            looper.restart_loop(boundary, self.duration);
        }

        self.dispatch_loop_event(boundary);
    }

    /// Playback-relative position, if the loop has started
    pub fn current_playback_time(&self) -> Option<Ticks> {
        if self.boundary_times.is_empty() {
            return None;
        }
        Some(self.calculate_playback_time(self.ctx.clock.now_ticks()))
    }

    fn calculate_playback_time(&self, current: Ticks) -> Ticks {
        let Some(&loop_start) = self.boundary_times.last() else {
            debug!("playback time requested before looping started; returning zero");
            return 0;
        };
        // Position wraps every loop duration.
        (current - loop_start).rem_euclid(self.duration)
    }

    fn calculate_start_time(&self, playback_time: Ticks, at: Ticks) -> Ticks {
        at - playback_time
    }

    // ------------------------------------------------------------------
    // Playback control
    // ------------------------------------------------------------------

    /// Capture the current position, clear every looper, and keep the
    /// looper set for a later unpause
    pub fn pause(&mut self) {
        self.ctx.control.assert_control_thread();

        let position = self
            .current_playback_time()
            .unwrap_or(0);
        self.last_observed_playback_time = Some(position);
        info!(position = ticks_to_seconds(position), "pausing loop");

        let mut paused = std::mem::take(&mut self.loopers);
        for looper in &mut paused {
            looper.clear();
        }
        self.clear_playback_state();
        self.paused_loopers = Some(paused);
        self.ctx.state.set_loop_phase(LoopPhase::Paused);
    }

    /// Re-attach the paused loopers, resuming at `playback_time` (or the
    /// position captured at pause) once the first one becomes ready
    pub fn unpause(&mut self, playback_time: Option<Ticks>) {
        self.ctx.control.assert_control_thread();

        let Some(target) = playback_time.or(self.last_observed_playback_time) else {
            warn!("unpause requested but no playback position is known");
            return;
        };

        info!(position = ticks_to_seconds(target), "unpausing loop");
        // The first-ready transition consumes this instead of "now".
        self.scheduled_playback_time = Some(target);

        if let Some(paused) = self.paused_loopers.take() {
            for looper in paused {
                self.attach(looper);
            }
        }
    }

    /// Hard resynchronization to an arbitrary playback position
    ///
    /// Discards the boundary history and plays every attached looper
    /// immediately, without waiting for readiness. This accepts a possible
    /// visible gap as the cost of an instantaneous resync.
    pub fn reset_to_playback_time(&mut self, playback_time: Ticks, at: Ticks) {
        self.ctx.control.assert_control_thread();
        info!(
            playback_time = ticks_to_seconds(playback_time),
            at = ticks_to_seconds(at),
            "reset loop to playback time"
        );

        self.boundary_times.clear();

        let new_start = self.calculate_start_time(playback_time, at);
        self.dispatch_loop_event(new_start);

        for looper in &mut self.loopers {
            looper.clear();
            looper.play(playback_time, at);
        }

        self.emit(EngineEvent::PlaybackStarted {
            timestamp: chrono::Utc::now(),
        });
    }

    /// Detach everything and discard all playback state
    pub fn clear(&mut self) {
        self.ctx.control.assert_control_thread();
        self.clear_loopers_and_playback_state();
        self.loopers_to_recover = None;
        self.paused_loopers = None;
        self.last_observed_playback_time = None;
        self.scheduled_playback_time = None;
    }

    fn clear_loopers_and_playback_state(&mut self) {
        self.clear_playback_state();

        let mut loopers = std::mem::take(&mut self.loopers);
        for looper in &mut loopers {
            looper.clear();
        }

        // Pair off any outstanding buffering edge before the count resets.
        if self.buffering_looper_count > 0 {
            self.buffering_looper_count = 0;
            self.emit(EngineEvent::BufferingStopped {
                timestamp: chrono::Utc::now(),
            });
        }
    }

    fn clear_playback_state(&mut self) {
        self.boundary_times.clear();
        // Invalidate any pending loop timer.
        self.timer_generation += 1;
        self.ctx.state.set_loop_phase(LoopPhase::Idle);
    }

    // ------------------------------------------------------------------
    // Suspension
    // ------------------------------------------------------------------

    /// The surrounding application is going to background: capture the
    /// position and looper set, free all players, postpone new attaches
    pub fn suspend(&mut self) {
        self.ctx.control.assert_control_thread();
        self.suspended = true;

        if self.loopers.is_empty() {
            return;
        }

        let position = self.current_playback_time().unwrap_or(0);
        self.last_observed_playback_time = Some(position);
        info!(position = ticks_to_seconds(position), "suspending loop");

        let mut recover = std::mem::take(&mut self.loopers);
        for looper in &mut recover {
            looper.clear();
        }
        self.loopers_to_recover = Some(recover);
        self.clear_playback_state();
    }

    /// The application is active again: re-attach the captured loopers and
    /// restart the loop at the position it was suspended at
    pub fn resume(&mut self) {
        self.ctx.control.assert_control_thread();
        self.suspended = false;

        let (Some(recover), Some(position)) = (
            self.loopers_to_recover.take(),
            self.last_observed_playback_time,
        ) else {
            return;
        };

        info!(position = ticks_to_seconds(position), "resuming loop");
        for looper in recover {
            self.attach(looper);
        }
        let now = self.ctx.clock.now_ticks();
        self.reset_to_playback_time(position, now);
    }

    // ------------------------------------------------------------------
    // Looper events and routing
    // ------------------------------------------------------------------

    /// Route a marshalled backend signal to the looper owning the player
    pub fn route_player_signal(&mut self, player: PlayerId, signal: PlayerSignal) {
        self.ctx.control.assert_control_thread();

        let Some(index) = self.loopers.iter().position(|l| l.owns_player(player)) else {
            debug!(%player, "signal for a player no attached looper holds");
            return;
        };

        let id = self.loopers[index].id();
        let mut events = Vec::new();
        self.loopers[index].handle_player_signal(player, signal, &mut events);

        for event in events {
            self.handle_looper_event(id, event);
        }
    }

    /// Route a deferred play-preparation wakeup
    pub fn route_player_work(&mut self, player: PlayerId, generation: u64) {
        self.ctx.control.assert_control_thread();

        if let Some(index) = self.loopers.iter().position(|l| l.owns_player(player)) {
            self.loopers[index].handle_player_work_due(player, generation);
        } else {
            debug!(%player, "work due for a player no attached looper holds");
        }
    }

    /// React to an upward looper event
    pub fn handle_looper_event(&mut self, looper_id: LooperId, event: LooperEvent) {
        self.ctx.control.assert_control_thread();

        match event {
            LooperEvent::ReadyToLoop => self.handle_ready_to_loop(looper_id),
            LooperEvent::BufferingStarted => {
                self.buffering_looper_count += 1;
                if self.buffering_looper_count == 1 {
                    self.emit(EngineEvent::BufferingStarted {
                        timestamp: chrono::Utc::now(),
                    });
                }
            }
            LooperEvent::BufferingStopped => {
                if self.buffering_looper_count == 0 {
                    warn!(looper = %looper_id, "buffering-stopped without a matching start");
                    return;
                }
                self.buffering_looper_count -= 1;
                if self.buffering_looper_count == 0 {
                    self.emit(EngineEvent::BufferingStopped {
                        timestamp: chrono::Utc::now(),
                    });
                }
            }
            LooperEvent::RecoveryFailed { attempts } => {
                self.emit(EngineEvent::RecoveryFailed {
                    looper_id,
                    attempts,
                    timestamp: chrono::Utc::now(),
                });
            }
        }
    }

    /// The first looper to become ready starts the master loop; later
    /// readiness reports are absorbed (their loopers were already synced
    /// at attach or will be at the next boundary).
    fn handle_ready_to_loop(&mut self, looper_id: LooperId) {
        if !self.boundary_times.is_empty() {
            debug!(looper = %looper_id, "looper ready but the loop already started");
            return;
        }

        info!(looper = %looper_id, "first looper ready; starting the hot loop");

        let now = self.ctx.clock.now_ticks();
        // A scheduled resume position shifts the synthetic first boundary
        // back so playback continues from that offset, not from zero.
        let start_time = match self.scheduled_playback_time.take() {
            Some(position) => self.calculate_start_time(position, now),
            None => now,
        };

        self.dispatch_loop_event(start_time);

        self.emit(EngineEvent::PlaybackStarted {
            timestamp: chrono::Utc::now(),
        });

        for index in 0..self.loopers.len() {
            self.sync_to_loop(index, now);
        }
    }

    /// Push a volume value to one attached looper
    pub fn set_looper_volume(&mut self, id: LooperId, volume: f32) {
        self.ctx.control.assert_control_thread();
        if let Some(looper) = self.loopers.iter_mut().find(|l| l.id() == id) {
            looper.set_volume(volume);
        }
    }

    /// Push a mute value to every attached looper
    pub fn set_all_muted(&mut self, muted: bool) {
        self.ctx.control.assert_control_thread();
        for looper in &mut self.loopers {
            looper.set_muted(muted);
        }
    }

    fn emit(&self, event: EngineEvent) {
        self.ctx.state.broadcast_event(event);
    }
}

impl std::fmt::Debug for LoopCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopCoordinator")
            .field("duration", &self.duration)
            .field("boundaries", &self.boundary_times.len())
            .field("loopers", &self.loopers.len())
            .field("buffering", &self.buffering_looper_count)
            .field("suspended", &self.suspended)
            .finish()
    }
}
