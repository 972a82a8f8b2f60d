//! Real-time loop that keeps the tracked window on top of its container.

use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::overlay::cancel::CancelToken;
use crate::overlay::error::{OverlayError, PlatformError};
use crate::overlay::geometry::{BoundsSample, ContainerRef, CoordinateSystem, ScreenRect};
use crate::overlay::messages::{EventBus, OverlayEventKind};
use crate::overlay::metrics::{SyncMetrics, SyncStats};
use crate::overlay::platform::{WindowBackend, WindowHandle, ZOrder};
use crate::overlay::process::ProcessProbe;
use crate::overlay::state::SessionId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub idle_rate_hz: f64,
    pub active_rate_hz: f64,
    /// Fraction of the remaining distance covered per tick; 1.0 disables
    /// smoothing.
    pub smoothing: f64,
    pub tolerance_px: i32,
    pub quiescence_ms: u64,
    pub always_on_top: bool,
    pub os_call_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            idle_rate_hz: 20.0,
            active_rate_hz: 60.0,
            smoothing: 0.85,
            tolerance_px: 2,
            quiescence_ms: 300,
            always_on_top: true,
            os_call_timeout_ms: 250,
        }
    }
}

impl SyncConfig {
    /// Clamp values read from disk into a usable range.
    pub fn sanitized(&self) -> Self {
        let defaults = Self::default();
        let rate = |hz: f64, fallback: f64| {
            if hz.is_finite() && hz > 0.0 {
                hz.clamp(1.0, 240.0)
            } else {
                fallback
            }
        };
        let idle_rate_hz = rate(self.idle_rate_hz, defaults.idle_rate_hz);
        let active_rate_hz = rate(self.active_rate_hz, defaults.active_rate_hz).max(idle_rate_hz);
        let smoothing = if self.smoothing.is_finite() {
            self.smoothing.clamp(0.05, 1.0)
        } else {
            defaults.smoothing
        };
        Self {
            idle_rate_hz,
            active_rate_hz,
            smoothing,
            tolerance_px: self.tolerance_px.clamp(1, 64),
            quiescence_ms: self.quiescence_ms.min(10_000),
            always_on_top: self.always_on_top,
            os_call_timeout_ms: self.os_call_timeout_ms.clamp(10, 5_000),
        }
    }

    pub fn os_call_timeout(&self) -> Duration {
        Duration::from_millis(self.os_call_timeout_ms)
    }

    fn z_order(&self) -> ZOrder {
        if self.always_on_top {
            ZOrder::Topmost
        } else {
            ZOrder::Unchanged
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncLifecycle {
    Stopped,
    Running,
    /// Container hidden; no move calls are issued.
    Paused,
}

/// Tick interval that speeds up while bounds are changing.
#[derive(Debug, Clone)]
pub struct AdaptiveRate {
    idle: Duration,
    active: Duration,
    quiescence: Duration,
    last_activity: Option<Instant>,
}

impl AdaptiveRate {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            idle: Duration::from_secs_f64(1.0 / config.idle_rate_hz),
            active: Duration::from_secs_f64(1.0 / config.active_rate_hz),
            quiescence: Duration::from_millis(config.quiescence_ms),
            last_activity: None,
        }
    }

    pub fn mark_active(&mut self, now: Instant) {
        self.last_activity = Some(now);
    }

    pub fn is_active(&self, now: Instant) -> bool {
        self.last_activity
            .is_some_and(|at| now.saturating_duration_since(at) < self.quiescence)
    }

    pub fn interval(&self, now: Instant) -> Duration {
        if self.is_active(now) {
            self.active
        } else {
            self.idle
        }
    }
}

/// Exponential smoothing of the window position. Sizes are never smoothed.
#[derive(Debug, Clone)]
pub struct MotionSmoother {
    alpha: f64,
    tolerance: i32,
    position: Option<(f64, f64)>,
}

impl MotionSmoother {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            alpha: config.smoothing,
            tolerance: config.tolerance_px.max(1),
            position: None,
        }
    }

    /// The next step lands directly on its target.
    pub fn reset(&mut self) {
        self.position = None;
    }

    pub fn step(&mut self, target: ScreenRect) -> ScreenRect {
        let (tx, ty) = (target.x as f64, target.y as f64);
        let (x, y) = match self.position {
            None => (tx, ty),
            Some((x, y)) => {
                let nx = x + (tx - x) * self.alpha;
                let ny = y + (ty - y) * self.alpha;
                let tol = self.tolerance as f64;
                if (tx - nx).abs() < tol && (ty - ny).abs() < tol {
                    (tx, ty)
                } else {
                    (nx, ny)
                }
            }
        };
        self.position = Some((x, y));
        ScreenRect {
            x: x.round() as i32,
            y: y.round() as i32,
            width: target.width,
            height: target.height,
        }
    }
}

#[derive(Debug)]
enum CallResult {
    Done(Result<(), PlatformError>),
    TimedOut,
    /// A previous call is still running.
    Busy,
}

struct MoveRequest {
    window: WindowHandle,
    rect: ScreenRect,
    z_order: ZOrder,
}

/// Runs move/resize calls on a helper thread so a hung call cannot stall the
/// loop. At most one call is in flight.
struct CallWorker {
    name: String,
    backend: Arc<dyn WindowBackend>,
    channels: Option<(Sender<MoveRequest>, Receiver<Result<(), PlatformError>>)>,
    in_flight: bool,
}

impl CallWorker {
    fn new(name: String, backend: Arc<dyn WindowBackend>) -> Self {
        Self {
            name,
            backend,
            channels: None,
            in_flight: false,
        }
    }

    fn ensure_started(&mut self) -> Result<(), PlatformError> {
        if self.channels.is_some() {
            return Ok(());
        }
        let (req_tx, req_rx) = channel::<MoveRequest>();
        let (done_tx, done_rx) = channel();
        let backend = Arc::clone(&self.backend);
        std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                while let Ok(req) = req_rx.recv() {
                    let result = backend.set_window_rect(req.window, req.rect, req.z_order);
                    if done_tx.send(result).is_err() {
                        break;
                    }
                }
            })
            .map_err(|err| PlatformError::Os {
                call: "spawn call worker",
                message: err.to_string(),
            })?;
        self.channels = Some((req_tx, done_rx));
        Ok(())
    }

    fn submit(&mut self, req: MoveRequest, timeout: Duration) -> CallResult {
        if let Err(err) = self.ensure_started() {
            return CallResult::Done(Err(err));
        }
        let Some((req_tx, done_rx)) = self.channels.as_ref() else {
            return CallResult::Done(Err(PlatformError::TimedOut {
                call: "SetWindowPos",
            }));
        };
        if self.in_flight {
            match done_rx.try_recv() {
                Ok(_) => self.in_flight = false,
                Err(TryRecvError::Empty) => return CallResult::Busy,
                Err(TryRecvError::Disconnected) => {
                    self.channels = None;
                    self.in_flight = false;
                    return CallResult::Done(Err(worker_gone()));
                }
            }
        }
        if req_tx.send(req).is_err() {
            self.channels = None;
            return CallResult::Done(Err(worker_gone()));
        }
        self.in_flight = true;
        match done_rx.recv_timeout(timeout) {
            Ok(result) => {
                self.in_flight = false;
                CallResult::Done(result)
            }
            Err(RecvTimeoutError::Timeout) => CallResult::TimedOut,
            Err(RecvTimeoutError::Disconnected) => {
                self.channels = None;
                self.in_flight = false;
                CallResult::Done(Err(worker_gone()))
            }
        }
    }

    /// Wait (bounded) for an in-flight call to finish.
    fn drain(&mut self, timeout: Duration) -> bool {
        if !self.in_flight {
            return true;
        }
        let Some((_, done_rx)) = self.channels.as_ref() else {
            return true;
        };
        let finished = done_rx.recv_timeout(timeout).is_ok();
        if finished {
            self.in_flight = false;
        }
        finished
    }
}

fn worker_gone() -> PlatformError {
    PlatformError::Os {
        call: "SetWindowPos",
        message: "call worker exited".into(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Moved(ScreenRect),
    /// Window already within tolerance of the target.
    Unchanged,
    Paused,
    /// Previous move call still running; nothing queued.
    Busy,
    TimedOut,
    /// Move call failed; the loop keeps going.
    Failed(PlatformError),
    TargetLost,
}

/// Why a sync thread ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncExit {
    Cancelled,
    TargetLost,
}

/// State shared between a sync thread and its [`SyncHandle`].
#[derive(Default)]
struct SyncShared {
    lifecycle: Mutex<Option<SyncLifecycle>>,
    metrics: Mutex<SyncMetrics>,
    pending: Mutex<Option<Weak<dyn ContainerRef>>>,
}

impl SyncShared {
    fn lifecycle(&self) -> SyncLifecycle {
        self.lifecycle
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .unwrap_or(SyncLifecycle::Stopped)
    }

    fn set_lifecycle(&self, lifecycle: SyncLifecycle) {
        *self.lifecycle.lock().unwrap_or_else(|p| p.into_inner()) = Some(lifecycle);
    }
}

/// The window to keep in place and where its liveness comes from.
pub struct SyncTarget {
    pub session: SessionId,
    pub window: WindowHandle,
    /// Process owning `window`; not necessarily the launched one.
    pub owner: u32,
    pub probe: Arc<dyn ProcessProbe>,
    pub container: Weak<dyn ContainerRef>,
}

pub struct PositionSyncEngine {
    session: SessionId,
    window: WindowHandle,
    owner: u32,
    probe: Arc<dyn ProcessProbe>,
    container: Weak<dyn ContainerRef>,
    backend: Arc<dyn WindowBackend>,
    config: SyncConfig,
    events: Option<Arc<EventBus>>,
    shared: Arc<SyncShared>,
    rate: AdaptiveRate,
    smoother: MotionSmoother,
    stats: SyncStats,
    calls: CallWorker,
    last_target: Option<ScreenRect>,
}

impl PositionSyncEngine {
    pub fn new(
        backend: Arc<dyn WindowBackend>,
        target: SyncTarget,
        config: &SyncConfig,
        events: Option<Arc<EventBus>>,
    ) -> Self {
        let config = config.sanitized();
        let shared = Arc::new(SyncShared::default());
        shared.set_lifecycle(SyncLifecycle::Running);
        Self {
            session: target.session,
            window: target.window,
            owner: target.owner,
            probe: target.probe,
            container: target.container,
            calls: CallWorker::new(
                format!("overlay-call-{}", target.session.0),
                Arc::clone(&backend),
            ),
            backend,
            rate: AdaptiveRate::new(&config),
            smoother: MotionSmoother::new(&config),
            stats: SyncStats::default(),
            config,
            events,
            shared,
            last_target: None,
        }
    }

    pub fn lifecycle(&self) -> SyncLifecycle {
        self.shared.lifecycle()
    }

    pub fn metrics(&self) -> SyncMetrics {
        self.stats.snapshot()
    }

    /// Swap the container; takes effect on the next tick.
    pub fn retarget(&self, container: Weak<dyn ContainerRef>) {
        *self.shared.pending.lock().unwrap_or_else(|p| p.into_inner()) = Some(container);
    }

    /// Delay until the next tick should start.
    pub fn next_interval(&self, now: Instant) -> Duration {
        self.rate.interval(now)
    }

    /// Run one sync step as of `now`.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        let outcome = self.tick_inner(now);
        if let TickOutcome::Failed(err) = &outcome {
            self.stats.record_error(err.to_string());
        }
        *self.shared.metrics.lock().unwrap_or_else(|p| p.into_inner()) = self.stats.snapshot();
        outcome
    }

    fn tick_inner(&mut self, now: Instant) -> TickOutcome {
        self.stats.record_tick(now);

        if !self.probe.is_pid_alive(self.owner) || !self.backend.is_window(self.window) {
            return self.target_lost();
        }

        let pending = self
            .shared
            .pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(container) = pending {
            tracing::debug!(session = %self.session, "sync container retargeted");
            self.container = container;
        }

        let sample = match self.container.upgrade() {
            Some(container) => CoordinateSystem::sample(container.as_ref(), self.backend.as_ref()),
            None => BoundsSample::Hidden,
        };
        let Some(bounds) = sample.visible() else {
            self.pause();
            return TickOutcome::Paused;
        };
        self.resume();

        let target = bounds.rect;
        if self.last_target != Some(target) {
            self.stats.observe_change(now);
            self.rate.mark_active(now);
            self.last_target = Some(target);
        }

        let tolerance = self.config.tolerance_px;
        let current = match self.backend.window_rect(self.window) {
            Ok(rect) => Some(rect),
            Err(PlatformError::WindowGone(_)) => return self.target_lost(),
            Err(err) => {
                tracing::debug!(window = %self.window, %err, "could not read window rect");
                None
            }
        };
        if current.is_some_and(|rect| rect.approx_eq(&target, tolerance)) {
            self.stats.record_converged(now);
            self.smoother.step(target);
            return TickOutcome::Unchanged;
        }

        let next = self.smoother.step(target);
        self.rate.mark_active(now);
        let request = MoveRequest {
            window: self.window,
            rect: next,
            z_order: self.config.z_order(),
        };
        match self.calls.submit(request, self.config.os_call_timeout()) {
            CallResult::Done(Ok(())) => {
                self.stats.record_move();
                if next.approx_eq(&target, tolerance) {
                    self.stats.record_converged(Instant::now().max(now));
                }
                tracing::trace!(window = %self.window, ?next, "overlay window moved");
                TickOutcome::Moved(next)
            }
            CallResult::Done(Err(PlatformError::WindowGone(_))) => self.target_lost(),
            CallResult::Done(Err(err)) => {
                tracing::debug!(window = %self.window, %err, "move call failed");
                TickOutcome::Failed(err)
            }
            CallResult::TimedOut => {
                self.stats.record_timeout();
                tracing::warn!(window = %self.window, "move call timed out");
                TickOutcome::TimedOut
            }
            CallResult::Busy => TickOutcome::Busy,
        }
    }

    fn target_lost(&mut self) -> TickOutcome {
        self.stats.record_error(OverlayError::TargetLost.to_string());
        TickOutcome::TargetLost
    }

    fn pause(&mut self) {
        if self.lifecycle() == SyncLifecycle::Running {
            tracing::info!(session = %self.session, "container hidden, sync paused");
            self.shared.set_lifecycle(SyncLifecycle::Paused);
            self.smoother.reset();
            self.stats.discard_change();
            self.last_target = None;
            self.publish(OverlayEventKind::Paused);
        }
    }

    fn resume(&mut self) {
        if self.lifecycle() == SyncLifecycle::Paused {
            tracing::info!(session = %self.session, "container visible, sync resumed");
            self.shared.set_lifecycle(SyncLifecycle::Running);
            self.publish(OverlayEventKind::Resumed);
        }
    }

    fn publish(&self, kind: OverlayEventKind) {
        if let Some(events) = &self.events {
            events.publish(self.session, kind);
        }
    }

    fn finish(&mut self) {
        if !self.calls.drain(self.config.os_call_timeout()) {
            tracing::warn!(window = %self.window, "in-flight move call still running at shutdown");
        }
        self.shared.set_lifecycle(SyncLifecycle::Stopped);
        *self.shared.metrics.lock().unwrap_or_else(|p| p.into_inner()) = self.stats.snapshot();
    }

    /// Start the loop on its own thread. `on_exit` runs on that thread after
    /// the loop ended and any in-flight call completed.
    pub fn begin<F>(mut self, on_exit: F) -> Result<SyncHandle, OverlayError>
    where
        F: FnOnce(SyncExit) + Send + 'static,
    {
        let cancel = CancelToken::new();
        let shared = Arc::clone(&self.shared);
        let token = cancel.clone();
        let session = self.session;
        let join = std::thread::Builder::new()
            .name(format!("overlay-sync-{}", session.0))
            .spawn(move || {
                let exit = self.run(&token);
                self.finish();
                tracing::info!(session = %session, ?exit, "sync loop exited");
                on_exit(exit);
            })
            .map_err(|err| {
                OverlayError::Platform(PlatformError::Os {
                    call: "spawn sync thread",
                    message: err.to_string(),
                })
            })?;
        Ok(SyncHandle {
            session,
            shared,
            cancel,
            join: Some(join),
        })
    }

    fn run(&mut self, cancel: &CancelToken) -> SyncExit {
        loop {
            if cancel.is_cancelled() {
                return SyncExit::Cancelled;
            }
            let started = Instant::now();
            if self.tick(started) == TickOutcome::TargetLost {
                tracing::warn!(session = %self.session, window = %self.window, "overlay target lost");
                return SyncExit::TargetLost;
            }
            let wait = self
                .next_interval(started)
                .saturating_sub(started.elapsed());
            if cancel.wait(wait) {
                return SyncExit::Cancelled;
            }
        }
    }
}

/// Control side of a running sync loop.
pub struct SyncHandle {
    session: SessionId,
    shared: Arc<SyncShared>,
    cancel: CancelToken,
    join: Option<JoinHandle<()>>,
}

impl SyncHandle {
    pub fn lifecycle(&self) -> SyncLifecycle {
        self.shared.lifecycle()
    }

    pub fn metrics(&self) -> SyncMetrics {
        self.shared
            .metrics
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn retarget(&self, container: Weak<dyn ContainerRef>) {
        *self.shared.pending.lock().unwrap_or_else(|p| p.into_inner()) = Some(container);
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |join| join.is_finished())
    }

    /// Cancel the loop and wait up to `join_timeout` for the thread.
    /// Returns `false` when the thread did not finish in time.
    pub fn stop(&mut self, join_timeout: Duration) -> bool {
        self.cancel.cancel();
        let Some(handle) = self.join.take() else {
            return true;
        };
        if handle.thread().id() == std::thread::current().id() {
            return true;
        }

        let (done_tx, done_rx) = channel();
        std::thread::spawn(move || {
            let join_result = handle.join();
            let _ = done_tx.send(join_result);
        });

        match done_rx.recv_timeout(join_timeout) {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                tracing::error!(session = %self.session, "sync thread panicked while joining");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::error!(session = %self.session, "sync thread join timed out");
                false
            }
            Err(RecvTimeoutError::Disconnected) => {
                tracing::error!(session = %self.session, "sync thread join channel disconnected");
                false
            }
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::geometry::FixedContainer;
    use crate::overlay::process::{LaunchSpec, ManagedProcess, ProcessLauncher};
    use crate::overlay::simulated::{ProgramBehavior, SimulatedDesktop, WindowSpec};

    struct Fixture {
        desktop: SimulatedDesktop,
        process: Box<dyn ManagedProcess>,
        window: WindowHandle,
        owner: u32,
        container: Arc<FixedContainer>,
    }

    fn fixture(rect: ScreenRect) -> Fixture {
        let desktop = SimulatedDesktop::new();
        desktop.register_program("viewer", ProgramBehavior::new());
        let process = desktop.launch(&LaunchSpec::new("viewer")).expect("launch");
        let window = desktop.create_window(
            WindowSpec::new(process.pid(), "Viewer", "ViewerFrame")
                .with_rect(ScreenRect::new(0, 0, 300, 200)),
        );
        Fixture {
            owner: process.pid(),
            desktop,
            process,
            window,
            container: Arc::new(FixedContainer::on_desktop(rect)),
        }
    }

    fn engine(fx: &Fixture, config: SyncConfig) -> PositionSyncEngine {
        let container: Arc<dyn ContainerRef> = fx.container.clone();
        PositionSyncEngine::new(
            Arc::new(fx.desktop.clone()),
            SyncTarget {
                session: SessionId(1),
                window: fx.window,
                owner: fx.owner,
                probe: fx.process.probe(),
                container: Arc::downgrade(&container),
            },
            &config,
            None,
        )
    }

    fn ms(base: Instant, n: u64) -> Instant {
        base + Duration::from_millis(n)
    }

    #[test]
    fn first_tick_places_window_exactly() {
        let target = ScreenRect::new(100, 100, 800, 600);
        let fx = fixture(target);
        let mut engine = engine(&fx, SyncConfig::default());
        assert_eq!(engine.tick(Instant::now()), TickOutcome::Moved(target));
        assert_eq!(fx.desktop.rect_of(fx.window), Some(target));
    }

    #[test]
    fn resize_is_applied_in_one_tick_with_low_lag() {
        let fx = fixture(ScreenRect::new(100, 100, 800, 600));
        let mut engine = engine(&fx, SyncConfig::default());
        let base = Instant::now();
        engine.tick(base);

        let smaller = ScreenRect::new(100, 100, 400, 300);
        fx.container.set_rect(smaller);
        assert_eq!(engine.tick(ms(base, 16)), TickOutcome::Moved(smaller));
        let lag = engine.metrics().last_sync_lag_ms.expect("lag recorded");
        assert!(lag < 100.0, "lag was {lag}");
        assert_eq!(engine.tick(ms(base, 32)), TickOutcome::Unchanged);
    }

    #[test]
    fn smoothing_converges_and_stays_within_tolerance() {
        let fx = fixture(ScreenRect::new(0, 0, 400, 300));
        let mut engine = engine(&fx, SyncConfig::default());
        let base = Instant::now();
        engine.tick(base);

        let moved = ScreenRect::new(600, 400, 400, 300);
        fx.container.set_rect(moved);
        let mut t = 0;
        for step in 1..=20u64 {
            t = step * 16;
            engine.tick(ms(base, t));
            if fx.desktop.rect_of(fx.window) == Some(moved) {
                break;
            }
        }
        let rect = fx.desktop.rect_of(fx.window).expect("window exists");
        assert!(rect.approx_eq(&moved, 2), "{rect:?}");
        assert!(t <= 300, "convergence took {t} ms");
        let moves = fx.desktop.move_count();
        assert_eq!(engine.tick(ms(base, t + 16)), TickOutcome::Unchanged);
        assert_eq!(fx.desktop.move_count(), moves);
    }

    #[test]
    fn hidden_container_pauses_without_moving() {
        let fx = fixture(ScreenRect::new(100, 100, 800, 600));
        let mut engine = engine(&fx, SyncConfig::default());
        let base = Instant::now();
        engine.tick(base);
        let moves = fx.desktop.move_count();

        fx.container.set_rect(ScreenRect::new(0, 0, 0, 0));
        assert_eq!(engine.tick(ms(base, 50)), TickOutcome::Paused);
        assert_eq!(engine.tick(ms(base, 100)), TickOutcome::Paused);
        assert_eq!(engine.lifecycle(), SyncLifecycle::Paused);
        assert_eq!(fx.desktop.move_count(), moves);

        let back = ScreenRect::new(300, 200, 640, 480);
        fx.container.set_rect(back);
        assert_eq!(engine.tick(ms(base, 150)), TickOutcome::Moved(back));
        assert_eq!(engine.lifecycle(), SyncLifecycle::Running);
    }

    #[test]
    fn dropped_container_counts_as_hidden() {
        let fx = fixture(ScreenRect::new(10, 10, 100, 100));
        let temp: Arc<dyn ContainerRef> = Arc::new(FixedContainer::on_desktop(ScreenRect::new(0, 0, 50, 50)));
        let mut engine = engine(&fx, SyncConfig::default());
        engine.retarget(Arc::downgrade(&temp));
        drop(temp);
        assert_eq!(engine.tick(Instant::now()), TickOutcome::Paused);
    }

    #[test]
    fn retarget_applies_on_next_tick() {
        let fx = fixture(ScreenRect::new(10, 10, 100, 100));
        let mut engine = engine(&fx, SyncConfig::default());
        engine.tick(Instant::now());
        let other: Arc<dyn ContainerRef> = Arc::new(FixedContainer::on_desktop(ScreenRect::new(10, 10, 500, 500)));
        engine.retarget(Arc::downgrade(&other));
        assert_eq!(
            engine.tick(Instant::now()),
            TickOutcome::Moved(ScreenRect::new(10, 10, 500, 500))
        );
    }

    #[test]
    fn killed_process_is_target_lost() {
        let mut fx = fixture(ScreenRect::new(10, 10, 100, 100));
        let mut engine = engine(&fx, SyncConfig::default());
        engine.tick(Instant::now());
        fx.process.terminate().expect("terminate");
        assert_eq!(engine.tick(Instant::now()), TickOutcome::TargetLost);
        assert!(engine.metrics().last_error.is_some());
    }

    #[test]
    fn closed_window_is_target_lost_while_process_runs() {
        let fx = fixture(ScreenRect::new(10, 10, 100, 100));
        let mut engine = engine(&fx, SyncConfig::default());
        engine.tick(Instant::now());
        fx.desktop.close_window(fx.window);
        assert!(fx.process.probe().is_alive());
        assert_eq!(engine.tick(Instant::now()), TickOutcome::TargetLost);
    }

    #[test]
    fn window_owned_by_orphaned_child_keeps_syncing() {
        let desktop = SimulatedDesktop::new();
        desktop.register_program(
            "stub",
            ProgramBehavior::new()
                .child_window_after(Duration::ZERO, "Viewer", "ViewerFrame")
                .exit_after(Duration::from_millis(30)),
        );
        let process = desktop.launch(&LaunchSpec::new("stub")).expect("launch");
        let window = desktop.enumerate_windows().expect("enumerate")[0].handle;
        let fx = Fixture {
            owner: desktop.owner_of(window).expect("owner"),
            desktop,
            process,
            window,
            container: Arc::new(FixedContainer::on_desktop(ScreenRect::new(50, 50, 300, 200))),
        };
        let mut engine = engine(&fx, SyncConfig::default());
        let base = Instant::now();
        assert!(matches!(engine.tick(base), TickOutcome::Moved(_)));

        std::thread::sleep(Duration::from_millis(60));
        assert!(!fx.process.probe().is_alive());
        fx.container.set_rect(ScreenRect::new(80, 50, 300, 200));
        assert!(matches!(engine.tick(ms(base, 100)), TickOutcome::Moved(_)));

        fx.desktop.kill(fx.owner);
        assert_eq!(engine.tick(ms(base, 150)), TickOutcome::TargetLost);
    }

    #[test]
    fn large_move_at_own_rate_stays_under_fifty_ms_lag() {
        let fx = fixture(ScreenRect::new(100, 100, 640, 480));
        let mut engine = engine(&fx, SyncConfig::default());
        let mut now = Instant::now();
        engine.tick(now);
        now += engine.next_interval(now);
        assert_eq!(engine.tick(now), TickOutcome::Unchanged);

        let moved = ScreenRect::new(500, 100, 640, 480);
        fx.container.set_rect(moved);
        for _ in 0..30 {
            now += engine.next_interval(now);
            engine.tick(now);
            if fx.desktop.rect_of(fx.window) == Some(moved) {
                break;
            }
        }
        assert_eq!(fx.desktop.rect_of(fx.window), Some(moved));
        let lag = engine.metrics().last_sync_lag_ms.expect("lag recorded");
        assert!(lag < 50.0, "lag was {lag}");
    }

    #[test]
    fn hung_move_call_is_bounded_and_not_stacked() {
        let fx = fixture(ScreenRect::new(10, 10, 100, 100));
        fx.desktop.set_move_delay(Duration::from_millis(400));
        let config = SyncConfig {
            os_call_timeout_ms: 50,
            ..SyncConfig::default()
        };
        let mut engine = engine(&fx, config);
        let started = Instant::now();
        assert_eq!(engine.tick(started), TickOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_millis(300));
        assert_eq!(engine.tick(Instant::now()), TickOutcome::Busy);
        assert_eq!(fx.desktop.move_calls_started(), 1);
        assert_eq!(engine.metrics().os_call_timeouts, 1);
    }

    #[test]
    fn rate_speeds_up_while_active_then_idles() {
        let config = SyncConfig::default();
        let mut rate = AdaptiveRate::new(&config);
        let base = Instant::now();
        assert_eq!(rate.interval(base), Duration::from_secs_f64(1.0 / 20.0));
        rate.mark_active(base);
        assert_eq!(rate.interval(ms(base, 100)), Duration::from_secs_f64(1.0 / 60.0));
        assert_eq!(rate.interval(ms(base, 301)), Duration::from_secs_f64(1.0 / 20.0));
    }

    #[test]
    fn smoother_snaps_and_applies_size_directly() {
        let mut smoother = MotionSmoother::new(&SyncConfig {
            smoothing: 0.5,
            ..SyncConfig::default()
        });
        let first = ScreenRect::new(0, 0, 100, 100);
        assert_eq!(smoother.step(first), first);
        let far = ScreenRect::new(100, 0, 300, 200);
        let step = smoother.step(far);
        assert_eq!((step.x, step.width, step.height), (50, 300, 200));
        let mut last = step;
        for _ in 0..10 {
            last = smoother.step(far);
        }
        assert_eq!(last, far);
    }

    #[test]
    fn sanitize_clamps_bad_values() {
        let config = SyncConfig {
            idle_rate_hz: f64::NAN,
            active_rate_hz: 5.0,
            smoothing: 3.0,
            tolerance_px: 0,
            quiescence_ms: 300,
            always_on_top: false,
            os_call_timeout_ms: 0,
        }
        .sanitized();
        assert_eq!(config.idle_rate_hz, 20.0);
        assert_eq!(config.active_rate_hz, 20.0);
        assert_eq!(config.smoothing, 1.0);
        assert_eq!(config.tolerance_px, 1);
        assert_eq!(config.os_call_timeout_ms, 10);
    }

    #[test]
    fn spawned_loop_tracks_and_stops_promptly() {
        let target = ScreenRect::new(100, 100, 800, 600);
        let fx = fixture(target);
        let (exit_tx, exit_rx) = channel();
        let mut handle = engine(&fx, SyncConfig::default())
            .begin(move |exit| {
                let _ = exit_tx.send(exit);
            })
            .expect("spawn sync thread");
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(fx.desktop.rect_of(fx.window), Some(target));
        assert!(handle.metrics().ticks > 0);

        let started = Instant::now();
        assert!(handle.stop(Duration::from_secs(2)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(exit_rx.recv_timeout(Duration::from_secs(1)), Ok(SyncExit::Cancelled));
        assert_eq!(handle.lifecycle(), SyncLifecycle::Stopped);
    }

    #[test]
    fn spawned_loop_reports_target_loss() {
        let mut fx = fixture(ScreenRect::new(10, 10, 100, 100));
        let (exit_tx, exit_rx) = channel();
        let mut handle = engine(&fx, SyncConfig::default())
            .begin(move |exit| {
                let _ = exit_tx.send(exit);
            })
            .expect("spawn sync thread");
        std::thread::sleep(Duration::from_millis(60));
        fx.process.terminate().expect("terminate");
        assert_eq!(exit_rx.recv_timeout(Duration::from_secs(1)), Ok(SyncExit::TargetLost));
        assert!(handle.stop(Duration::from_secs(2)));
    }
}
