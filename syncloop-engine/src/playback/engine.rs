//! Engine control loop and public handle
//!
//! All engine state lives inside [`PlaybackEngine::run`], which consumes
//! every control message (backend signals, timers, deferred detaches,
//! resolutions, and public commands) on one task. [`EngineHandle`] is the
//! cloneable public API; it only ever sends messages, so it is safe to use
//! from any thread or task.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use syncloop_common::events::{EngineEvent, LoopPhase};
use syncloop_common::fragment::Fragment;
use syncloop_common::timing::Ticks;

use crate::config::EngineConfig;
use crate::control::{ControlHandle, ControlMessage, HostClock};
use crate::media::{AssetResolver, PlayerBackend, SlotId, SurfaceHandle};
use crate::playback::orchestrator::PlaybackOrchestrator;
use crate::playback::PlaybackContext;
use crate::state::SharedState;

/// Public API commands
pub enum EngineCommand {
    /// Assign a fragment to the slot owning `surface` and attach it
    Attach {
        fragment: Fragment,
        surface: SurfaceHandle,
    },

    /// Detach a slot after the grace period (token-guarded)
    Detach { slot: SlotId },

    /// Detach a slot immediately
    DetachImmediately { slot: SlotId },

    /// Resolve and attach several fragments as one lockstep group
    CoordinateGroup {
        items: Vec<(Fragment, SurfaceHandle)>,
    },

    /// Capture position and clear loopers, keeping them for unpause
    Pause,

    /// Resume at the given position (or the one captured at pause)
    Unpause { playback_time: Option<Ticks> },

    /// Hard resync to a playback position, accepting a visible gap
    ResetToPlaybackTime { playback_time: Ticks },

    /// Stop the loop but keep slot assignments
    StopLoop,

    /// Detach everything and forget all slots
    Clear,

    /// Application went to background: free players, defer attaches
    Suspend,

    /// Application is active again: recover and restart where it left off
    Resume,

    /// Push a fragment volume value
    SetFragmentVolume { slot: SlotId, volume: f32 },

    /// Scale a fragment's volume by a transient progress factor
    UpdateProgress { slot: SlotId, progress: f32 },

    /// Push the hardware-mute policy value
    SetMuted { muted: bool },

    /// Push the master volume policy value
    SetMasterVolume { volume: f32 },

    /// Query the playback-relative position
    QueryPlaybackTime {
        reply: oneshot::Sender<Option<Ticks>>,
    },

    /// Query the loop boundary history
    QueryBoundaryTimes { reply: oneshot::Sender<Vec<Ticks>> },

    /// Stop the control loop
    Shutdown,
}

/// The engine control loop
pub struct PlaybackEngine {
    orchestrator: PlaybackOrchestrator,
    rx: mpsc::UnboundedReceiver<ControlMessage>,
    control: ControlHandle,
}

impl PlaybackEngine {
    /// Build an engine and its handle
    ///
    /// # Panics
    ///
    /// Panics if `duration` is not positive or the configuration is
    /// invalid; both are programming errors in the surrounding setup.
    pub fn new(
        duration: Ticks,
        config: EngineConfig,
        resolver: Arc<dyn AssetResolver>,
        backend: Arc<dyn PlayerBackend>,
    ) -> (Self, EngineHandle) {
        config.validate().expect("invalid engine configuration");

        let clock = HostClock::new();
        let (control, rx) = ControlHandle::new(clock.clone());
        let state = Arc::new(SharedState::new());

        let ctx = PlaybackContext {
            backend,
            control: control.clone(),
            clock,
            config: Arc::new(config),
            state: Arc::clone(&state),
        };

        let orchestrator = PlaybackOrchestrator::new(ctx, resolver, duration, false);

        let handle = EngineHandle {
            control: control.clone(),
            state,
        };

        (
            Self {
                orchestrator,
                rx,
                control,
            },
            handle,
        )
    }

    /// Consume control messages until shutdown
    ///
    /// Public so tests can drive the loop inside a paused-time runtime;
    /// production callers usually use [`spawn`](Self::spawn).
    pub async fn run(mut self) {
        self.control.bind_control_thread();
        info!("playback engine control loop started");

        while let Some(message) = self.rx.recv().await {
            match message {
                ControlMessage::PlayerSignal { player, signal } => {
                    self.orchestrator
                        .coordinator_mut()
                        .route_player_signal(player, signal);
                }
                ControlMessage::PlayerWorkDue { player, generation } => {
                    self.orchestrator
                        .coordinator_mut()
                        .route_player_work(player, generation);
                }
                ControlMessage::LoopTimerDue { generation } => {
                    self.orchestrator
                        .coordinator_mut()
                        .handle_loop_timer(generation);
                }
                ControlMessage::DetachDue { slot, token } => {
                    self.orchestrator.handle_detach_due(slot, token);
                }
                ControlMessage::AssetResolved {
                    slot,
                    token,
                    fragment,
                    asset,
                } => {
                    self.orchestrator
                        .handle_asset_resolved(slot, token, fragment, asset);
                }
                ControlMessage::GroupAssetsResolved {
                    generation,
                    resolved,
                } => {
                    self.orchestrator
                        .handle_group_assets_resolved(generation, resolved);
                }
                ControlMessage::Command(command) => {
                    if self.handle_command(command) {
                        break;
                    }
                }
            }
        }

        info!("playback engine control loop stopped");
    }

    /// Returns true when the loop should stop
    fn handle_command(&mut self, command: EngineCommand) -> bool {
        match command {
            EngineCommand::Attach { fragment, surface } => {
                self.orchestrator.attach(fragment, surface);
            }
            EngineCommand::Detach { slot } => {
                self.orchestrator.detach(slot);
            }
            EngineCommand::DetachImmediately { slot } => {
                self.orchestrator.detach_now(slot);
            }
            EngineCommand::CoordinateGroup { items } => {
                self.orchestrator.coordinate_and_attach(items);
            }
            EngineCommand::Pause => self.orchestrator.pause(),
            EngineCommand::Unpause { playback_time } => self.orchestrator.unpause(playback_time),
            EngineCommand::ResetToPlaybackTime { playback_time } => {
                self.orchestrator.reset_to_time(playback_time, None);
            }
            EngineCommand::StopLoop => self.orchestrator.stop_loop(),
            EngineCommand::Clear => self.orchestrator.clear(),
            EngineCommand::Suspend => self.orchestrator.suspend(),
            EngineCommand::Resume => self.orchestrator.resume(),
            EngineCommand::SetFragmentVolume { slot, volume } => {
                self.orchestrator.set_fragment_volume(slot, volume);
            }
            EngineCommand::UpdateProgress { slot, progress } => {
                self.orchestrator.update_progress(slot, progress);
            }
            EngineCommand::SetMuted { muted } => self.orchestrator.set_muted(muted),
            EngineCommand::SetMasterVolume { volume } => {
                // Applied to loopers lazily: the next volume push uses it.
                self.orchestrator.shared_state().set_master_volume(volume);
            }
            EngineCommand::QueryPlaybackTime { reply } => {
                let _ = reply.send(self.orchestrator.current_time());
            }
            EngineCommand::QueryBoundaryTimes { reply } => {
                let _ = reply.send(self.orchestrator.boundary_times());
            }
            EngineCommand::Shutdown => {
                debug!("shutdown requested");
                self.orchestrator.clear();
                return true;
            }
        }
        false
    }

    /// Run the control loop on a dedicated thread with its own
    /// current-thread runtime
    ///
    /// The dedicated thread is what makes the confinement assertion
    /// meaningful in production: every message is handled on exactly the
    /// thread the loop bound at startup.
    pub fn spawn(self) -> std::thread::JoinHandle<()> {
        std::thread::Builder::new()
            .name("syncloop-control".to_string())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to build control runtime");
                runtime.block_on(self.run());
            })
            .expect("failed to spawn control thread")
    }
}

/// Cloneable public API for a running engine
#[derive(Clone)]
pub struct EngineHandle {
    control: ControlHandle,
    state: Arc<SharedState>,
}

impl EngineHandle {
    fn command(&self, command: EngineCommand) {
        self.control.send(ControlMessage::Command(command));
    }

    /// Subscribe to engine events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.state.subscribe_events()
    }

    /// Current loop phase
    pub fn loop_phase(&self) -> LoopPhase {
        self.state.loop_phase()
    }

    pub fn attach(&self, fragment: Fragment, surface: SurfaceHandle) {
        self.command(EngineCommand::Attach { fragment, surface });
    }

    pub fn detach(&self, slot: SlotId) {
        self.command(EngineCommand::Detach { slot });
    }

    pub fn detach_immediately(&self, slot: SlotId) {
        self.command(EngineCommand::DetachImmediately { slot });
    }

    pub fn coordinate_group(&self, items: Vec<(Fragment, SurfaceHandle)>) {
        self.command(EngineCommand::CoordinateGroup { items });
    }

    pub fn pause(&self) {
        self.command(EngineCommand::Pause);
    }

    pub fn unpause(&self, playback_time: Option<Ticks>) {
        self.command(EngineCommand::Unpause { playback_time });
    }

    pub fn reset_to_playback_time(&self, playback_time: Ticks) {
        self.command(EngineCommand::ResetToPlaybackTime { playback_time });
    }

    pub fn stop_loop(&self) {
        self.command(EngineCommand::StopLoop);
    }

    pub fn clear(&self) {
        self.command(EngineCommand::Clear);
    }

    pub fn suspend(&self) {
        self.command(EngineCommand::Suspend);
    }

    pub fn resume(&self) {
        self.command(EngineCommand::Resume);
    }

    pub fn set_fragment_volume(&self, slot: SlotId, volume: f32) {
        self.command(EngineCommand::SetFragmentVolume { slot, volume });
    }

    pub fn update_progress(&self, slot: SlotId, progress: f32) {
        self.command(EngineCommand::UpdateProgress { slot, progress });
    }

    pub fn set_muted(&self, muted: bool) {
        self.command(EngineCommand::SetMuted { muted });
    }

    pub fn set_master_volume(&self, volume: f32) {
        self.command(EngineCommand::SetMasterVolume { volume });
    }

    /// Playback-relative position, if the loop has started
    pub async fn current_playback_time(&self) -> Option<Ticks> {
        let (reply, rx) = oneshot::channel();
        self.command(EngineCommand::QueryPlaybackTime { reply });
        rx.await.ok().flatten()
    }

    /// Loop boundary history, oldest first
    pub async fn boundary_times(&self) -> Vec<Ticks> {
        let (reply, rx) = oneshot::channel();
        self.command(EngineCommand::QueryBoundaryTimes { reply });
        rx.await.unwrap_or_default()
    }

    /// Stop the control loop
    pub fn shutdown(&self) {
        self.command(EngineCommand::Shutdown);
    }
}
