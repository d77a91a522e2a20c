//! Test harness for the loop engine
//!
//! Provides a scriptable fake media backend and asset resolver:
//! - `FakeBackend` records every player it builds and exposes per-player
//!   flags/call logs, optionally auto-reporting readiness so full-engine
//!   tests run to "playing" without manual signal delivery
//! - `FakeResolver` resolves any locator to a playable asset, with
//!   per-locator delays and failures
//! - `direct_ctx` builds a `PlaybackContext` for driving components
//!   synchronously without the control loop

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use syncloop_common::fragment::{AssetHandle, AssetLocator, Fragment};
use syncloop_common::timing::{ms_to_ticks, Ticks};

use syncloop_engine::config::EngineConfig;
use syncloop_engine::control::{ControlHandle, ControlMessage, HostClock, PlayerSignalSender};
use syncloop_engine::error::Result;
use syncloop_engine::media::{
    AssetResolver, PlayerBackend, PlayerId, PlayerInstance, PlayerParams, PlayerSignal,
    SurfaceHandle,
};
use syncloop_engine::playback::{EngineHandle, PlaybackContext, PlaybackEngine};
use syncloop_engine::state::SharedState;

/// Observable backend-player state, shared between the fake player and the
/// test
#[derive(Debug, Clone)]
pub struct PlayerFlags {
    pub likely_to_keep_up: bool,
    pub buffer_full: bool,
    pub buffer_empty: bool,
    pub rate: f64,
    pub item_time: Option<Ticks>,
}

impl Default for PlayerFlags {
    fn default() -> Self {
        Self {
            likely_to_keep_up: true,
            buffer_full: false,
            buffer_empty: false,
            rate: 0.0,
            item_time: None,
        }
    }
}

/// Call log for one fake player
#[derive(Debug, Default)]
pub struct PlayerCalls {
    pub prerolls: u32,
    pub plays: u32,
    pub pauses: u32,
    pub cancelled_prerolls: u32,
    /// (rate, item_time, host_time) per set_rate_at_host_time call
    pub rate_commits: Vec<(f64, Ticks, Ticks)>,
    pub surface_attached: bool,
}

/// One player the fake backend built
#[derive(Clone)]
pub struct FakePlayerRecord {
    pub id: PlayerId,
    pub params: PlayerParams,
    pub flags: Arc<Mutex<PlayerFlags>>,
    pub calls: Arc<Mutex<PlayerCalls>>,
    pub signals: PlayerSignalSender,
}

impl FakePlayerRecord {
    pub fn set_flags(&self, f: impl FnOnce(&mut PlayerFlags)) {
        f(&mut self.flags.lock().unwrap());
    }

    pub fn send(&self, signal: PlayerSignal) {
        self.signals.send(signal);
    }

    pub fn rate_commits(&self) -> Vec<(f64, Ticks, Ticks)> {
        self.calls.lock().unwrap().rate_commits.clone()
    }

    pub fn pauses(&self) -> u32 {
        self.calls.lock().unwrap().pauses
    }

    pub fn prerolls(&self) -> u32 {
        self.calls.lock().unwrap().prerolls
    }
}

struct FakePlayer {
    flags: Arc<Mutex<PlayerFlags>>,
    calls: Arc<Mutex<PlayerCalls>>,
    signals: PlayerSignalSender,
    auto_preroll: bool,
}

impl PlayerInstance for FakePlayer {
    fn preroll(&mut self, _rate: f64) {
        self.calls.lock().unwrap().prerolls += 1;
        if self.auto_preroll {
            self.signals.send(PlayerSignal::PrerollFinished { success: true });
        }
    }

    fn play(&mut self) {
        let mut calls = self.calls.lock().unwrap();
        calls.plays += 1;
        self.flags.lock().unwrap().rate = 1.0;
    }

    fn set_rate_at_host_time(&mut self, rate: f64, item_time: Ticks, host_time: Ticks) {
        self.calls
            .lock()
            .unwrap()
            .rate_commits
            .push((rate, item_time, host_time));
        let mut flags = self.flags.lock().unwrap();
        flags.rate = rate;
        flags.item_time = Some(item_time);
    }

    fn pause(&mut self) {
        self.calls.lock().unwrap().pauses += 1;
        self.flags.lock().unwrap().rate = 0.0;
    }

    fn cancel_pending_prerolls(&mut self) {
        self.calls.lock().unwrap().cancelled_prerolls += 1;
    }

    fn current_item_time(&self) -> Option<Ticks> {
        self.flags.lock().unwrap().item_time
    }

    fn effective_rate(&self) -> f64 {
        self.flags.lock().unwrap().rate
    }

    fn is_likely_to_keep_up(&self) -> bool {
        self.flags.lock().unwrap().likely_to_keep_up
    }

    fn is_buffer_full(&self) -> bool {
        self.flags.lock().unwrap().buffer_full
    }

    fn is_buffer_empty(&self) -> bool {
        self.flags.lock().unwrap().buffer_empty
    }

    fn set_volume(&mut self, _volume: f32) {}

    fn set_muted(&mut self, _muted: bool) {}

    fn attach_surface(&mut self, _surface: &SurfaceHandle) {
        self.calls.lock().unwrap().surface_attached = true;
    }

    fn detach_surface(&mut self) {
        self.calls.lock().unwrap().surface_attached = false;
    }
}

/// Scriptable player backend
pub struct FakeBackend {
    /// Send StatusReady as soon as a player is created
    pub auto_ready: bool,

    /// Complete prerolls immediately
    pub auto_preroll: bool,

    players: Mutex<Vec<FakePlayerRecord>>,
}

impl FakeBackend {
    pub fn new(auto_ready: bool, auto_preroll: bool) -> Arc<Self> {
        Arc::new(Self {
            auto_ready,
            auto_preroll,
            players: Mutex::new(Vec::new()),
        })
    }

    /// Fully automatic backend: players report ready and preroll instantly
    pub fn automatic() -> Arc<Self> {
        Self::new(true, true)
    }

    /// Manual backend: the test delivers every signal itself
    pub fn manual() -> Arc<Self> {
        Self::new(false, false)
    }

    /// All players built so far, oldest first
    pub fn players(&self) -> Vec<FakePlayerRecord> {
        self.players.lock().unwrap().clone()
    }

    pub fn created_count(&self) -> usize {
        self.players.lock().unwrap().len()
    }

    /// Record of the player with the given id (latest build wins)
    pub fn player(&self, id: PlayerId) -> Option<FakePlayerRecord> {
        self.players
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|p| p.id == id)
            .cloned()
    }
}

impl PlayerBackend for FakeBackend {
    fn create_player(
        &self,
        _asset: &AssetHandle,
        params: PlayerParams,
        signals: PlayerSignalSender,
    ) -> Result<Box<dyn PlayerInstance>> {
        let flags = Arc::new(Mutex::new(PlayerFlags::default()));
        let calls = Arc::new(Mutex::new(PlayerCalls::default()));

        let record = FakePlayerRecord {
            id: signals.player(),
            params,
            flags: Arc::clone(&flags),
            calls: Arc::clone(&calls),
            signals: signals.clone(),
        };
        self.players.lock().unwrap().push(record);

        if self.auto_ready {
            signals.send(PlayerSignal::StatusReady);
        }

        Ok(Box::new(FakePlayer {
            flags,
            calls,
            signals,
            auto_preroll: self.auto_preroll,
        }))
    }
}

/// Scriptable asset resolver
#[derive(Default)]
pub struct FakeResolver {
    /// Per-locator resolution delay in milliseconds
    delays: Mutex<HashMap<String, u64>>,

    /// Locators that resolve to nothing (asset gone)
    missing: Mutex<Vec<String>>,

    /// Locators that resolve without an audio track
    silent: Mutex<Vec<String>>,
}

impl FakeResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(self: Arc<Self>, locator: &str, delay_ms: u64) -> Arc<Self> {
        self.delays
            .lock()
            .unwrap()
            .insert(locator.to_string(), delay_ms);
        self
    }

    pub fn with_missing(self: Arc<Self>, locator: &str) -> Arc<Self> {
        self.missing.lock().unwrap().push(locator.to_string());
        self
    }

    pub fn with_silent(self: Arc<Self>, locator: &str) -> Arc<Self> {
        self.silent.lock().unwrap().push(locator.to_string());
        self
    }
}

#[async_trait::async_trait]
impl AssetResolver for FakeResolver {
    async fn resolve(&self, fragment: &Fragment) -> Result<Option<AssetHandle>> {
        let locator = fragment.asset.0.clone();

        let delay = self.delays.lock().unwrap().get(&locator).copied();
        if let Some(delay_ms) = delay {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }

        if self.missing.lock().unwrap().contains(&locator) {
            return Ok(None);
        }

        let has_audio = !self.silent.lock().unwrap().contains(&locator);
        Ok(Some(AssetHandle {
            asset_id: uuid::Uuid::new_v4(),
            locator: fragment.asset.clone(),
            duration_ticks: ms_to_ticks(60_000),
            has_video: true,
            has_audio,
        }))
    }
}

/// Build a fragment for a locator
pub fn fragment(locator: &str) -> Fragment {
    Fragment::new(AssetLocator(locator.to_string()), 0, 1.0)
}

/// A playable asset handle for direct component construction
pub fn asset(locator: &str) -> AssetHandle {
    AssetHandle {
        asset_id: uuid::Uuid::new_v4(),
        locator: AssetLocator(locator.to_string()),
        duration_ticks: ms_to_ticks(60_000),
        has_video: true,
        has_audio: true,
    }
}

/// Context for driving components directly, without the control loop
///
/// The returned receiver must stay alive; deferred work lands there and is
/// simply never consumed.
pub fn direct_ctx(
    backend: Arc<FakeBackend>,
    config: EngineConfig,
) -> (
    PlaybackContext,
    tokio::sync::mpsc::UnboundedReceiver<ControlMessage>,
) {
    let clock = HostClock::new();
    let (control, rx) = ControlHandle::new(clock.clone());
    let backend: Arc<dyn PlayerBackend> = backend;
    let ctx = PlaybackContext {
        backend,
        control,
        clock,
        config: Arc::new(config),
        state: Arc::new(SharedState::new()),
    };
    (ctx, rx)
}

/// Build and start a full engine inside the current (test) runtime
pub fn start_engine(
    duration_ms: i64,
    config: EngineConfig,
    backend: Arc<FakeBackend>,
    resolver: Arc<FakeResolver>,
) -> EngineHandle {
    let backend: Arc<dyn PlayerBackend> = backend;
    let resolver: Arc<dyn AssetResolver> = resolver;
    let (engine, handle) = PlaybackEngine::new(ms_to_ticks(duration_ms), config, resolver, backend);
    tokio::spawn(engine.run());
    handle
}

/// Initialize test logging once; honors RUST_LOG
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
