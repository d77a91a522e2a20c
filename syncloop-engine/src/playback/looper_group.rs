//! Lockstep looper group
//!
//! A composite that fans every looper command out to an ordered list of
//! child loopers so heterogeneous tracks move through their lifecycle
//! together. Readiness aggregates ("ready" only once every child is
//! ready, recomputed on each callback rather than cached); buffering edges
//! pass straight through, since each child's signal is already
//! edge-triggered and the coordinator holds the single aggregate count.

use tracing::debug;
use uuid::Uuid;

use syncloop_common::timing::Ticks;

use crate::control::LooperId;
use crate::media::{PlayerId, PlayerSignal};
use crate::playback::gapless_looper::GaplessLooper;
use crate::playback::looper::{Looper, LooperEvent};

/// Loopers that play at the same time
pub struct LooperGroup {
    id: LooperId,
    loopers: Vec<GaplessLooper>,
}

impl LooperGroup {
    pub fn new(loopers: Vec<GaplessLooper>) -> Self {
        Self {
            id: Uuid::new_v4(),
            loopers,
        }
    }

    /// Number of children in the group
    pub fn len(&self) -> usize {
        self.loopers.len()
    }

    /// Whether the group has no children
    pub fn is_empty(&self) -> bool {
        self.loopers.is_empty()
    }

    /// Recomputed on every readiness callback so a child clearing and
    /// re-preheating can never leave a stale cached answer behind.
    fn group_ready_to_loop(&self) -> bool {
        self.loopers.iter().all(|l| l.is_ready_to_loop())
    }
}

impl Looper for LooperGroup {
    fn id(&self) -> LooperId {
        self.id
    }

    fn is_ready_to_loop(&self) -> bool {
        self.group_ready_to_loop()
    }

    fn preheat(&mut self) {
        for looper in &mut self.loopers {
            looper.preheat();
        }
    }

    fn play(&mut self, item_time: Ticks, sync_time: Ticks) {
        for looper in &mut self.loopers {
            looper.play(item_time, sync_time);
        }
    }

    fn restart_loop(&mut self, loop_time: Ticks, loop_duration: Ticks) {
        for looper in &mut self.loopers {
            looper.restart_loop(loop_time, loop_duration);
        }
    }

    fn clear(&mut self) {
        for looper in &mut self.loopers {
            looper.clear();
        }
    }

    fn set_volume(&mut self, volume: f32) {
        for looper in &mut self.loopers {
            looper.set_volume(volume);
        }
    }

    fn set_muted(&mut self, muted: bool) {
        for looper in &mut self.loopers {
            looper.set_muted(muted);
        }
    }

    fn owns_player(&self, player: PlayerId) -> bool {
        self.loopers.iter().any(|l| l.owns_player(player))
    }

    fn handle_player_signal(
        &mut self,
        player: PlayerId,
        signal: PlayerSignal,
        out: &mut Vec<LooperEvent>,
    ) {
        let Some(index) = self.loopers.iter().position(|l| l.owns_player(player)) else {
            debug!(group = %self.id, %player, "signal for a player no child holds");
            return;
        };

        let mut child_events = Vec::new();
        self.loopers[index].handle_player_signal(player, signal, &mut child_events);

        for event in child_events {
            match event {
                LooperEvent::ReadyToLoop => {
                    if self.group_ready_to_loop() {
                        out.push(LooperEvent::ReadyToLoop);
                    }
                }
                // Buffering and recovery pass through untouched; each
                // child's edge is the coordinator's unit of counting.
                other => out.push(other),
            }
        }
    }

    fn handle_player_work_due(&mut self, player: PlayerId, generation: u64) {
        if let Some(index) = self.loopers.iter().position(|l| l.owns_player(player)) {
            self.loopers[index].handle_player_work_due(player, generation);
        }
    }
}

impl std::fmt::Debug for LooperGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LooperGroup")
            .field("id", &self.id)
            .field("children", &self.loopers.len())
            .field("ready", &self.group_ready_to_loop())
            .finish()
    }
}
