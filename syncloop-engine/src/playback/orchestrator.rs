//! Fragment → looper orchestration
//!
//! Maps domain fragments to gapless loopers, one per visible slot. Attach
//! resolves the fragment's asset asynchronously; detach is deferred by a
//! grace period and token-guarded so rapid detach/reattach toggling settles
//! on "last attach wins". Multi-clip groups are coordinated through a
//! [`LooperGroup`] attached as a single unit.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use syncloop_common::fragment::{AssetHandle, Fragment};
use syncloop_common::timing::Ticks;

use crate::control::{new_attach_token, ControlMessage, LooperId};
use crate::media::{AssetResolver, SlotId, SurfaceHandle};
use crate::playback::coordinator::LoopCoordinator;
use crate::playback::gapless_looper::GaplessLooper;
use crate::playback::looper::Looper;
use crate::playback::looper_group::LooperGroup;
use crate::playback::PlaybackContext;

/// Per-slot attachment bookkeeping
struct SlotState {
    /// Replaced on every attach; a deferred detach only proceeds if the
    /// token it captured is still current
    token: u32,

    /// Fragment currently assigned to this slot
    fragment_id: uuid::Uuid,

    /// Fragment volume, before progress/master scaling
    volume: f32,

    /// The slot's rendering surface
    surface: SurfaceHandle,

    /// Looper attached for this slot, once the asset resolved
    looper: Option<LooperId>,

    /// Asset resolution in flight
    waiting: bool,
}

/// Maps fragments to loopers and drives the coordinator
pub struct PlaybackOrchestrator {
    ctx: PlaybackContext,
    resolver: Arc<dyn AssetResolver>,
    coordinator: LoopCoordinator,

    /// Per visible slot, at most one looper
    slots: HashMap<SlotId, SlotState>,

    /// The coordinated group currently attached, if any
    group: Option<LooperId>,

    /// Invalidates group resolutions superseded by a newer group
    group_generation: u64,

    /// When set, pushed mute policy values are not applied to loopers
    ignore_mute: bool,
}

impl PlaybackOrchestrator {
    pub fn new(
        ctx: PlaybackContext,
        resolver: Arc<dyn AssetResolver>,
        duration: Ticks,
        ignore_mute: bool,
    ) -> Self {
        let coordinator = LoopCoordinator::new(ctx.clone(), duration);
        Self {
            ctx,
            resolver,
            coordinator,
            slots: HashMap::new(),
            group: None,
            group_generation: 0,
            ignore_mute,
        }
    }

    /// Direct access to the coordinator (advanced callers and tests)
    pub fn coordinator(&self) -> &LoopCoordinator {
        &self.coordinator
    }

    pub fn coordinator_mut(&mut self) -> &mut LoopCoordinator {
        &mut self.coordinator
    }

    /// Shared state (events + pushed policy values)
    pub fn shared_state(&self) -> &crate::state::SharedState {
        &self.ctx.state
    }

    // ------------------------------------------------------------------
    // Attach / detach
    // ------------------------------------------------------------------

    /// Assign a fragment to the slot owning `surface` and begin attaching
    ///
    /// Resolution is asynchronous; the slot attaches once the asset
    /// arrives, unless it was detached or reassigned in the meantime.
    pub fn attach(&mut self, fragment: Fragment, surface: SurfaceHandle) {
        self.ctx.control.assert_control_thread();
        let slot = surface.id();

        // Assigning a different fragment to an occupied slot replaces it.
        if let Some(entry) = self.slots.get(&slot) {
            if entry.fragment_id != fragment.fragment_id {
                info!(%slot, "slot reassigned to a different fragment; detaching old looper");
                self.detach_now(slot);
            }
        }

        let token = new_attach_token();
        match self.slots.get_mut(&slot) {
            Some(entry) => {
                // Same fragment again: refresh the token (cancelling any
                // pending detach) and keep whatever is already attached or
                // in flight.
                entry.token = token;
                if entry.looper.is_some() || entry.waiting {
                    debug!(%slot, "attach requested but slot is already attached or resolving");
                    return;
                }
                entry.waiting = true;
                entry.volume = fragment.volume;
            }
            None => {
                self.slots.insert(
                    slot,
                    SlotState {
                        token,
                        fragment_id: fragment.fragment_id,
                        volume: fragment.volume,
                        surface: surface.clone(),
                        looper: None,
                        waiting: true,
                    },
                );
            }
        }

        info!(%slot, fragment = %fragment.fragment_id, asset = %fragment.asset, "resolving asset for attach");
        self.spawn_resolution(slot, token, fragment);
    }

    fn spawn_resolution(&self, slot: SlotId, token: u32, fragment: Fragment) {
        let resolver = Arc::clone(&self.resolver);
        let control = self.ctx.control.clone();
        tokio::spawn(async move {
            let asset = match resolver.resolve(&fragment).await {
                Ok(asset) => asset,
                Err(e) => {
                    warn!(fragment = %fragment.fragment_id, error = %e, "asset resolution failed");
                    None
                }
            };
            control.send(ControlMessage::AssetResolved {
                slot,
                token,
                fragment,
                asset,
            });
        });
    }

    /// An asset resolution completed; attach if the slot still wants it
    pub fn handle_asset_resolved(
        &mut self,
        slot: SlotId,
        token: u32,
        fragment: Fragment,
        asset: Option<AssetHandle>,
    ) {
        self.ctx.control.assert_control_thread();

        let Some(entry) = self.slots.get_mut(&slot) else {
            debug!(%slot, "asset resolved for a slot that was detached meanwhile");
            return;
        };
        if entry.token != token {
            debug!(%slot, "asset resolved but the slot was reassigned meanwhile");
            return;
        }
        entry.waiting = false;

        let Some(asset) = asset else {
            // Resolution failed or the asset is gone; the slot simply is
            // not attached.
            warn!(%slot, fragment = %fragment.fragment_id, "asset could not be fetched; slot not attached");
            return;
        };
        if !asset.is_playable() {
            warn!(
                %slot,
                asset = %asset.locator,
                has_video = asset.has_video,
                has_audio = asset.has_audio,
                "asset is missing a required track; slot not attached"
            );
            return;
        }

        let surface = entry.surface.clone();
        let volume = entry.volume;
        let looper = self.build_looper(&asset, fragment.playback_start_ticks, surface, volume);

        info!(%slot, looper = %looper.id(), asset = %asset.locator, "attaching looper for resolved asset");
        if let Some(e) = self.slots.get_mut(&slot) {
            e.looper = Some(looper.id());
        }
        self.coordinator.attach(Box::new(looper));
    }

    fn build_looper(
        &self,
        asset: &AssetHandle,
        playback_start: Ticks,
        surface: SurfaceHandle,
        volume: f32,
    ) -> GaplessLooper {
        GaplessLooper::new(
            self.ctx.clone(),
            asset.clone(),
            playback_start,
            self.coordinator.duration(),
            surface,
            self.effective_volume(volume),
            self.effective_muted(),
        )
    }

    /// Schedule a grace-period detach for the slot owning `surface`
    ///
    /// A reattach of the same slot before the grace period elapses replaces
    /// the token and cancels this detach.
    pub fn detach(&mut self, slot: SlotId) {
        self.ctx.control.assert_control_thread();

        let Some(entry) = self.slots.get(&slot) else {
            debug!(%slot, "detach requested for an empty slot");
            return;
        };

        if entry.looper.is_none() && !entry.waiting {
            // Nothing attached and nothing in flight; just drop the slot.
            self.slots.remove(&slot);
            return;
        }

        let token = entry.token;
        let due = self.ctx.clock.now_ticks() + self.ctx.config.detach_grace_period_ticks();
        debug!(%slot, "scheduling deferred detach");
        self.ctx.control.schedule_detach(slot, token, due);
    }

    /// A grace-period detach came due
    pub fn handle_detach_due(&mut self, slot: SlotId, token: u32) {
        self.ctx.control.assert_control_thread();

        let Some(entry) = self.slots.get(&slot) else {
            return;
        };
        if entry.token != token {
            debug!(%slot, "deferred detach cancelled by a newer attach");
            return;
        }

        info!(%slot, "deferred detach firing");
        self.detach_now(slot);
    }

    /// Detach the slot immediately, dropping its looper
    pub fn detach_now(&mut self, slot: SlotId) {
        self.ctx.control.assert_control_thread();

        let Some(entry) = self.slots.remove(&slot) else {
            return;
        };
        if let Some(looper_id) = entry.looper {
            // The looper is cleared and dropped here; it never outlives its
            // attach/detach cycle.
            self.coordinator.detach(looper_id);
        }
    }

    // ------------------------------------------------------------------
    // Coordinated groups
    // ------------------------------------------------------------------

    /// Resolve several fragments and attach them as one lockstep group
    ///
    /// Fragments whose assets cannot be fetched are skipped with a log
    /// line. Attaching a new group detaches the previous one.
    pub fn coordinate_and_attach(&mut self, items: Vec<(Fragment, SurfaceHandle)>) {
        self.ctx.control.assert_control_thread();

        self.group_generation += 1;
        let generation = self.group_generation;
        let resolver = Arc::clone(&self.resolver);
        let control = self.ctx.control.clone();

        tokio::spawn(async move {
            let futures = items.into_iter().map(|(fragment, surface)| {
                let resolver = Arc::clone(&resolver);
                async move {
                    let asset = match resolver.resolve(&fragment).await {
                        Ok(asset) => asset,
                        Err(e) => {
                            warn!(fragment = %fragment.fragment_id, error = %e, "group asset resolution failed");
                            None
                        }
                    };
                    (fragment, surface, asset)
                }
            });
            let resolved = futures::future::join_all(futures).await;
            control.send(ControlMessage::GroupAssetsResolved {
                generation,
                resolved,
            });
        });
    }

    /// Group asset resolution completed; build and attach the group
    pub fn handle_group_assets_resolved(
        &mut self,
        generation: u64,
        resolved: Vec<(Fragment, SurfaceHandle, Option<AssetHandle>)>,
    ) {
        self.ctx.control.assert_control_thread();

        if generation != self.group_generation {
            debug!("group resolution superseded by a newer group");
            return;
        }

        // Attaching a new group replaces the previous one.
        if let Some(old) = self.group.take() {
            self.coordinator.detach(old);
        }

        let mut loopers = Vec::new();
        for (fragment, surface, asset) in resolved {
            let Some(asset) = asset else {
                warn!(fragment = %fragment.fragment_id, "group member asset could not be fetched; skipping");
                continue;
            };
            if !asset.is_playable() {
                warn!(asset = %asset.locator, "group member asset missing a required track; skipping");
                continue;
            }
            loopers.push(self.build_looper(
                &asset,
                fragment.playback_start_ticks,
                surface,
                fragment.volume,
            ));
        }

        if loopers.is_empty() {
            warn!("no group member resolved; nothing to attach");
            return;
        }

        let group = LooperGroup::new(loopers);
        info!(group = %group.id(), members = group.len(), "attaching coordinated looper group");
        self.group = Some(group.id());
        self.coordinator.attach(Box::new(group));
    }

    // ------------------------------------------------------------------
    // Volume / mute policy
    // ------------------------------------------------------------------

    fn effective_volume(&self, fragment_volume: f32) -> f32 {
        fragment_volume * self.ctx.state.master_volume()
    }

    fn effective_muted(&self) -> bool {
        !self.ignore_mute && self.ctx.state.is_muted()
    }

    /// Push a new volume for the fragment on this slot
    pub fn set_fragment_volume(&mut self, slot: SlotId, volume: f32) {
        self.ctx.control.assert_control_thread();
        let Some(entry) = self.slots.get_mut(&slot) else {
            return;
        };
        entry.volume = volume;
        if let Some(looper_id) = entry.looper {
            let effective = self.effective_volume(volume);
            self.coordinator.set_looper_volume(looper_id, effective);
        }
    }

    /// Scale the fragment's volume by a transient progress factor
    /// (e.g. fade during an interactive gesture)
    pub fn update_progress(&mut self, slot: SlotId, progress: f32) {
        self.ctx.control.assert_control_thread();
        let Some(entry) = self.slots.get(&slot) else {
            return;
        };
        if let Some(looper_id) = entry.looper {
            let effective = self.effective_volume(entry.volume * progress);
            self.coordinator.set_looper_volume(looper_id, effective);
        }
    }

    /// Push the hardware-mute policy value
    pub fn set_muted(&mut self, muted: bool) {
        self.ctx.control.assert_control_thread();
        self.ctx.state.set_muted(muted);
        self.coordinator.set_all_muted(self.effective_muted());
    }

    // ------------------------------------------------------------------
    // Playback control pass-throughs
    // ------------------------------------------------------------------

    pub fn pause(&mut self) {
        self.coordinator.pause();
    }

    pub fn unpause(&mut self, playback_time: Option<Ticks>) {
        self.coordinator.unpause(playback_time);
    }

    /// Hard resync to a playback position; `at = None` means "now"
    pub fn reset_to_time(&mut self, playback_time: Ticks, at: Option<Ticks>) {
        let at = at.unwrap_or_else(|| self.ctx.clock.now_ticks());
        self.coordinator.reset_to_playback_time(playback_time, at);
    }

    /// Stop the loop but keep slot assignments
    pub fn stop_loop(&mut self) {
        self.coordinator.clear();
        for entry in self.slots.values_mut() {
            entry.looper = None;
            entry.waiting = false;
        }
        self.group = None;
    }

    /// Detach everything and forget all slots
    pub fn clear(&mut self) {
        info!(slots = self.slots.len(), "clearing orchestrator");
        self.coordinator.clear();
        self.slots.clear();
        self.group = None;
    }

    pub fn suspend(&mut self) {
        self.coordinator.suspend();
    }

    pub fn resume(&mut self) {
        self.coordinator.resume();
    }

    /// Playback-relative position, if the loop has started
    pub fn current_time(&self) -> Option<Ticks> {
        self.coordinator.current_playback_time()
    }

    /// Loop boundary history, oldest first
    pub fn boundary_times(&self) -> Vec<Ticks> {
        self.coordinator.boundary_times().to_vec()
    }
}
