//! Coordinator state machine: first-ready transition, idempotent attach,
//! mid-loop sync, pause/unpause, reset-to-time, suspension recovery, and
//! edge-triggered buffering aggregation, driven with scripted loopers.

mod helpers;

use std::sync::{Arc, Mutex};

use helpers::{direct_ctx, FakeBackend};

use syncloop_common::events::EngineEvent;
use syncloop_common::timing::{ms_to_ticks, Ticks};
use syncloop_engine::config::EngineConfig;
use syncloop_engine::control::LooperId;
use syncloop_engine::media::{PlayerId, PlayerSignal};
use syncloop_engine::playback::{LoopCoordinator, Looper, LooperEvent, PlaybackContext};

const LOOP_MS: i64 = 2_000;

#[derive(Default)]
struct ScriptedCalls {
    preheats: u32,
    plays: Vec<(Ticks, Ticks)>,
    loops: Vec<(Ticks, Ticks)>,
    clears: u32,
}

/// A looper whose readiness the test scripts by hand
struct ScriptedLooper {
    id: LooperId,
    ready: bool,
    calls: Arc<Mutex<ScriptedCalls>>,
}

impl ScriptedLooper {
    fn new() -> (Box<Self>, LooperId, Arc<Mutex<ScriptedCalls>>) {
        let id = uuid::Uuid::new_v4();
        let calls = Arc::new(Mutex::new(ScriptedCalls::default()));
        (
            Box::new(Self {
                id,
                ready: false,
                calls: Arc::clone(&calls),
            }),
            id,
            calls,
        )
    }

    fn with_id(id: LooperId) -> Box<Self> {
        Box::new(Self {
            id,
            ready: false,
            calls: Arc::new(Mutex::new(ScriptedCalls::default())),
        })
    }
}

impl Looper for ScriptedLooper {
    fn id(&self) -> LooperId {
        self.id
    }

    fn is_ready_to_loop(&self) -> bool {
        self.ready
    }

    fn preheat(&mut self) {
        self.calls.lock().unwrap().preheats += 1;
    }

    fn play(&mut self, item_time: Ticks, sync_time: Ticks) {
        self.calls.lock().unwrap().plays.push((item_time, sync_time));
    }

    fn restart_loop(&mut self, loop_time: Ticks, loop_duration: Ticks) {
        self.calls
            .lock()
            .unwrap()
            .loops
            .push((loop_time, loop_duration));
    }

    fn clear(&mut self) {
        self.calls.lock().unwrap().clears += 1;
        self.ready = false;
    }

    fn set_volume(&mut self, _volume: f32) {}
    fn set_muted(&mut self, _muted: bool) {}

    fn owns_player(&self, _player: PlayerId) -> bool {
        false
    }

    fn handle_player_signal(
        &mut self,
        _player: PlayerId,
        _signal: PlayerSignal,
        _out: &mut Vec<LooperEvent>,
    ) {
    }

    fn handle_player_work_due(&mut self, _player: PlayerId, _generation: u64) {}
}

fn make_coordinator() -> (LoopCoordinator, PlaybackContext) {
    let (ctx, rx) = direct_ctx(FakeBackend::manual(), EngineConfig::default());
    std::mem::forget(rx);
    let coordinator = LoopCoordinator::new(ctx.clone(), ms_to_ticks(LOOP_MS));
    (coordinator, ctx)
}

async fn advance_ms(ms: u64) {
    tokio::time::advance(std::time::Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_attach_is_ignored() {
    let (mut coordinator, _ctx) = make_coordinator();

    let (first, id, calls) = ScriptedLooper::new();
    coordinator.attach(first);
    coordinator.attach(ScriptedLooper::with_id(id));

    assert_eq!(coordinator.attached_count(), 1);
    assert!(coordinator.is_attached(id));
    // Only the first instance was preheated; the duplicate was dropped.
    assert_eq!(calls.lock().unwrap().preheats, 1);
}

#[tokio::test(start_paused = true)]
async fn test_first_ready_starts_loop_and_syncs_all() {
    let (mut coordinator, ctx) = make_coordinator();

    let (a, a_id, a_calls) = ScriptedLooper::new();
    let (b, _b_id, b_calls) = ScriptedLooper::new();
    coordinator.attach(a);
    coordinator.attach(b);

    // Before the loop starts, attaches preheat rather than sync.
    assert_eq!(a_calls.lock().unwrap().preheats, 1);
    assert_eq!(b_calls.lock().unwrap().preheats, 1);
    assert!(coordinator.boundary_times().is_empty());

    advance_ms(300).await;
    let now = ctx.clock.now_ticks();
    coordinator.handle_looper_event(a_id, LooperEvent::ReadyToLoop);

    // The first boundary is recorded at "now"; both loopers are synced to
    // playback time zero.
    assert_eq!(coordinator.boundary_times(), &[now]);
    assert_eq!(coordinator.loop_count(), 0);
    assert_eq!(a_calls.lock().unwrap().plays, vec![(0, now)]);
    assert_eq!(b_calls.lock().unwrap().plays, vec![(0, now)]);
}

#[tokio::test(start_paused = true)]
async fn test_later_readiness_does_not_restart_the_loop() {
    let (mut coordinator, _ctx) = make_coordinator();

    let (a, a_id, _) = ScriptedLooper::new();
    let (b, b_id, b_calls) = ScriptedLooper::new();
    coordinator.attach(a);
    coordinator.attach(b);

    coordinator.handle_looper_event(a_id, LooperEvent::ReadyToLoop);
    let boundaries = coordinator.boundary_times().to_vec();

    coordinator.handle_looper_event(b_id, LooperEvent::ReadyToLoop);
    assert_eq!(coordinator.boundary_times(), boundaries.as_slice());
    // B was synced once at the first-ready transition, not again.
    assert_eq!(b_calls.lock().unwrap().plays.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_attach_after_loop_started_syncs_mid_loop() {
    let (mut coordinator, ctx) = make_coordinator();

    let (a, a_id, _) = ScriptedLooper::new();
    coordinator.attach(a);
    coordinator.handle_looper_event(a_id, LooperEvent::ReadyToLoop);

    advance_ms(500).await;
    let (b, _b_id, b_calls) = ScriptedLooper::new();
    coordinator.attach(b);

    // B joins the running loop at the current playback-relative position,
    // without being preheated first.
    let calls = b_calls.lock().unwrap();
    assert_eq!(calls.preheats, 0);
    assert_eq!(calls.plays, vec![(ms_to_ticks(500), ctx.clock.now_ticks())]);
}

#[tokio::test(start_paused = true)]
async fn test_loop_timer_fans_out_algorithmic_boundaries() {
    let (mut coordinator, ctx) = make_coordinator();

    let (a, a_id, a_calls) = ScriptedLooper::new();
    coordinator.attach(a);

    advance_ms(300).await;
    let t0 = ctx.clock.now_ticks();
    coordinator.handle_looper_event(a_id, LooperEvent::ReadyToLoop);

    // Fire the armed timer by letting virtual time reach it.
    advance_ms(2_000).await;
    tokio::task::yield_now().await;

    // The timer message sits in the unconsumed channel in this direct
    // harness, so deliver the generation by hand: the boundary it computes
    // must be algorithmic, one exact duration after the first.
    coordinator.handle_loop_timer(1);

    assert_eq!(
        coordinator.boundary_times(),
        &[t0, t0 + ms_to_ticks(LOOP_MS)]
    );
    assert_eq!(coordinator.loop_count(), 1);
    assert_eq!(
        a_calls.lock().unwrap().loops,
        vec![(t0 + ms_to_ticks(LOOP_MS), ms_to_ticks(LOOP_MS))]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stale_loop_timer_is_ignored() {
    let (mut coordinator, _ctx) = make_coordinator();

    let (a, a_id, a_calls) = ScriptedLooper::new();
    coordinator.attach(a);
    coordinator.handle_looper_event(a_id, LooperEvent::ReadyToLoop);

    // Generation 1 is armed; an older (or cleared) timer must do nothing.
    coordinator.handle_loop_timer(0);
    assert_eq!(coordinator.loop_count(), 0);
    assert!(a_calls.lock().unwrap().loops.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_pause_captures_position_and_unpause_resumes_there() {
    let (mut coordinator, ctx) = make_coordinator();

    let (a, a_id, a_calls) = ScriptedLooper::new();
    coordinator.attach(a);
    coordinator.handle_looper_event(a_id, LooperEvent::ReadyToLoop);

    advance_ms(1_200).await;
    coordinator.pause();

    assert_eq!(a_calls.lock().unwrap().clears, 1);
    assert!(coordinator.boundary_times().is_empty());
    assert_eq!(coordinator.current_playback_time(), None);

    coordinator.unpause(None);
    // Unpause preheats again; readiness restarts the loop.
    assert_eq!(a_calls.lock().unwrap().preheats, 2);

    advance_ms(250).await;
    let now = ctx.clock.now_ticks();
    coordinator.handle_looper_event(a_id, LooperEvent::ReadyToLoop);

    // The synthetic first boundary is shifted so playback continues from
    // the captured 1.2s, not from zero.
    assert_eq!(coordinator.boundary_times(), &[now - ms_to_ticks(1_200)]);
    assert_eq!(
        a_calls.lock().unwrap().plays.last().copied(),
        Some((ms_to_ticks(1_200), now))
    );
    assert_eq!(coordinator.current_playback_time(), Some(ms_to_ticks(1_200)));
}

#[tokio::test(start_paused = true)]
async fn test_unpause_with_explicit_position_overrides_captured_one() {
    let (mut coordinator, ctx) = make_coordinator();

    let (a, a_id, a_calls) = ScriptedLooper::new();
    coordinator.attach(a);
    coordinator.handle_looper_event(a_id, LooperEvent::ReadyToLoop);

    advance_ms(700).await;
    coordinator.pause();
    coordinator.unpause(Some(ms_to_ticks(1_500)));

    let now = ctx.clock.now_ticks();
    coordinator.handle_looper_event(a_id, LooperEvent::ReadyToLoop);

    assert_eq!(
        a_calls.lock().unwrap().plays.last().copied(),
        Some((ms_to_ticks(1_500), now))
    );
}

#[tokio::test(start_paused = true)]
async fn test_reset_to_time_bypasses_preheat_and_plays_immediately() {
    let (mut coordinator, ctx) = make_coordinator();

    // Neither looper ever reports ready.
    let (a, _a_id, a_calls) = ScriptedLooper::new();
    let (b, _b_id, b_calls) = ScriptedLooper::new();
    coordinator.attach(a);
    coordinator.attach(b);

    advance_ms(100).await;
    let at = ctx.clock.now_ticks();
    coordinator.reset_to_playback_time(ms_to_ticks(500), at);

    // Both were cleared and played directly, readiness notwithstanding.
    for calls in [&a_calls, &b_calls] {
        let calls = calls.lock().unwrap();
        assert_eq!(calls.clears, 1);
        assert_eq!(calls.plays, vec![(ms_to_ticks(500), at)]);
    }
    assert_eq!(coordinator.boundary_times(), &[at - ms_to_ticks(500)]);
}

#[tokio::test(start_paused = true)]
async fn test_suspend_postpones_attach_and_resume_recovers() {
    let (mut coordinator, _ctx) = make_coordinator();

    let (a, a_id, a_calls) = ScriptedLooper::new();
    coordinator.attach(a);
    coordinator.handle_looper_event(a_id, LooperEvent::ReadyToLoop);

    advance_ms(800).await;
    coordinator.suspend();
    assert_eq!(coordinator.attached_count(), 0);
    assert_eq!(a_calls.lock().unwrap().clears, 1);

    // Attaches while suspended are queued, not applied.
    let (b, _b_id, b_calls) = ScriptedLooper::new();
    coordinator.attach(b);
    assert_eq!(coordinator.attached_count(), 0);
    assert_eq!(b_calls.lock().unwrap().preheats, 0);

    coordinator.resume();
    assert_eq!(coordinator.attached_count(), 2);

    // Recovery restarts the loop at the captured position on everyone,
    // without waiting for readiness.
    assert_eq!(
        a_calls.lock().unwrap().plays.last().map(|p| p.0),
        Some(ms_to_ticks(800))
    );
    assert_eq!(
        b_calls.lock().unwrap().plays.last().map(|p| p.0),
        Some(ms_to_ticks(800))
    );
}

#[tokio::test(start_paused = true)]
async fn test_buffering_aggregation_is_edge_triggered() {
    let (mut coordinator, ctx) = make_coordinator();
    let mut events = ctx.state.subscribe_events();

    let (a, a_id, _) = ScriptedLooper::new();
    let (b, b_id, _) = ScriptedLooper::new();
    coordinator.attach(a);
    coordinator.attach(b);

    coordinator.handle_looper_event(a_id, LooperEvent::BufferingStarted);
    coordinator.handle_looper_event(b_id, LooperEvent::BufferingStarted);
    coordinator.handle_looper_event(a_id, LooperEvent::BufferingStopped);
    coordinator.handle_looper_event(b_id, LooperEvent::BufferingStopped);

    // Two loopers entering and leaving buffering produce exactly one
    // started/stopped pair, on the 0↔1 transitions.
    let mut started = 0;
    let mut stopped = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            EngineEvent::BufferingStarted { .. } => started += 1,
            EngineEvent::BufferingStopped { .. } => stopped += 1,
            other => panic!("unexpected event: {:?}", other),
        }
    }
    assert_eq!((started, stopped), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn test_detach_clears_and_removes() {
    let (mut coordinator, _ctx) = make_coordinator();

    let (a, a_id, a_calls) = ScriptedLooper::new();
    coordinator.attach(a);

    let detached = coordinator.detach(a_id);
    assert!(detached.is_some());
    assert_eq!(coordinator.attached_count(), 0);
    assert_eq!(a_calls.lock().unwrap().clears, 1);

    // Detaching an unknown looper is a logged no-op.
    assert!(coordinator.detach(uuid::Uuid::new_v4()).is_none());
}
