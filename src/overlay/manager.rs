//! Session orchestration: launch, discovery, decoration and sync.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::overlay::cancel::CancelToken;
use crate::overlay::decoration::{ChromeElement, DecorationOutcome, DecorationRemover};
use crate::overlay::error::{FailureReason, OverlayError};
use crate::overlay::geometry::{ContainerRef, CoordinateSystem};
use crate::overlay::messages::{EventBus, OverlayEvent, OverlayEventKind};
use crate::overlay::metrics::SyncMetrics;
use crate::overlay::platform::{WindowBackend, WindowHandle};
use crate::overlay::process::{LaunchSpec, ManagedProcess, ProcessLauncher, ProcessProbe};
use crate::overlay::state::{can_transition, SessionId, SessionState};
use crate::overlay::sync::{
    PositionSyncEngine, SyncConfig, SyncExit, SyncHandle, SyncLifecycle, SyncTarget,
};
use crate::overlay::tracker::{DiscoveryBaseline, DiscoveryPlan, TrackerConfig, WindowTracker};

#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    pub tracker: TrackerConfig,
    /// Bound on every thread join performed by `stop`.
    pub stop_join_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            stop_join_timeout: Duration::from_secs(2),
        }
    }
}

/// Non-blocking snapshot of one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub id: SessionId,
    pub state: SessionState,
    pub pid: Option<u32>,
    /// Process owning the tracked window. Differs from `pid` when the
    /// launched program handed the window off to a child.
    pub owner_pid: Option<u32>,
    pub window: Option<WindowHandle>,
    pub sync: Option<SyncLifecycle>,
    pub fps: f64,
    pub last_sync_lag_ms: Option<f64>,
    pub last_error: Option<String>,
    pub failure: Option<FailureReason>,
    /// Chrome elements the platform refused to remove.
    pub degraded_chrome: Vec<ChromeElement>,
    pub metrics: SyncMetrics,
}

struct SessionRecord {
    state: SessionState,
    program: String,
    container: Weak<dyn ContainerRef>,
    sync_config: SyncConfig,
    process: Option<Box<dyn ManagedProcess>>,
    pid: Option<u32>,
    owner_pid: Option<u32>,
    window: Option<WindowHandle>,
    cancel: CancelToken,
    discovery: Option<JoinHandle<()>>,
    sync: Option<SyncHandle>,
    last_metrics: SyncMetrics,
    failure: Option<FailureReason>,
    last_error: Option<String>,
    degraded: Vec<ChromeElement>,
}

impl SessionRecord {
    fn status(&self, id: SessionId) -> SessionStatus {
        let metrics = self
            .sync
            .as_ref()
            .map(SyncHandle::metrics)
            .unwrap_or_else(|| self.last_metrics.clone());
        SessionStatus {
            id,
            state: self.state,
            pid: self.pid,
            owner_pid: self.owner_pid,
            window: self.window,
            sync: self.sync.as_ref().map(SyncHandle::lifecycle),
            fps: metrics.fps,
            last_sync_lag_ms: metrics.last_sync_lag_ms,
            last_error: self.last_error.clone().or_else(|| metrics.last_error.clone()),
            failure: self.failure,
            degraded_chrome: self.degraded.clone(),
            metrics,
        }
    }
}

struct ManagerInner {
    backend: Arc<dyn WindowBackend>,
    launcher: Arc<dyn ProcessLauncher>,
    config: ManagerConfig,
    sessions: Mutex<HashMap<SessionId, SessionRecord>>,
    next_id: AtomicU64,
    events: Arc<EventBus>,
}

impl ManagerInner {
    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, SessionRecord>> {
        self.sessions.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn transition_locked(
        id: SessionId,
        record: &mut SessionRecord,
        next: SessionState,
    ) -> Result<(), OverlayError> {
        if !can_transition(record.state, next) {
            return Err(OverlayError::InvalidState {
                session: id,
                action: "transition",
                state: record.state,
            });
        }
        tracing::info!(session = %id, from = ?record.state, to = ?next, "overlay session transition");
        record.state = next;
        Ok(())
    }

    /// Move an active session to `Failed` and kill its process. Sessions that
    /// are already stopping or resting are left alone.
    fn fail(&self, id: SessionId, err: &OverlayError) {
        let reason = err.failure_reason();
        let process = {
            let mut sessions = self.sessions();
            let Some(record) = sessions.get_mut(&id) else {
                return;
            };
            if !record.state.is_active() {
                return;
            }
            if Self::transition_locked(id, record, SessionState::Failed).is_err() {
                return;
            }
            tracing::error!(session = %id, program = %record.program, %err, "overlay session failed");
            record.failure = Some(reason);
            record.last_error = Some(err.to_string());
            record.window = None;
            record.process.take()
        };
        terminate(id, process);
        if reason == FailureReason::TargetLost {
            self.events.publish(id, OverlayEventKind::TargetLost);
        }
        self.events.publish(id, OverlayEventKind::Failed { reason });
    }

    fn run_discovery(
        self: &Arc<Self>,
        id: SessionId,
        pid: u32,
        probe: Arc<dyn ProcessProbe>,
        plan: DiscoveryPlan,
        baseline: DiscoveryBaseline,
        cancel: CancelToken,
    ) {
        let mut tracker = WindowTracker::new(self.backend.as_ref(), self.config.tracker.clone());
        let located = match tracker.locate(pid, probe.as_ref(), &plan, &baseline, &cancel) {
            Ok(located) => located,
            Err(OverlayError::Cancelled) => {
                tracing::debug!(session = %id, "window discovery cancelled");
                return;
            }
            Err(err) => {
                self.fail(id, &err);
                return;
            }
        };

        let restore = {
            let mut sessions = self.sessions();
            let Some(record) = sessions.get_mut(&id) else {
                return;
            };
            if record.state != SessionState::Locating {
                return;
            }
            if Self::transition_locked(id, record, SessionState::Preparing).is_err() {
                return;
            }
            record.window = Some(located.handle);
            record.owner_pid = Some(located.pid);
            record.container.upgrade().and_then(|container| {
                CoordinateSystem::sample(container.as_ref(), self.backend.as_ref())
                    .visible()
                    .map(|bounds| bounds.rect)
            })
        };

        let window = located.handle;
        let degraded = match DecorationRemover::new(self.backend.as_ref()).strip(window, restore) {
            Ok(DecorationOutcome::Partial { remaining }) => {
                let partial = OverlayError::DecorationPartial {
                    remaining: remaining.clone(),
                };
                tracing::warn!(session = %id, %window, %partial, "continuing with degraded chrome");
                remaining
            }
            Ok(_) => Vec::new(),
            Err(err) => {
                self.fail(id, &OverlayError::DecorationFailed(err));
                return;
            }
        };

        let mut sessions = self.sessions();
        let Some(record) = sessions.get_mut(&id) else {
            return;
        };
        if cancel.is_cancelled() || record.state != SessionState::Preparing {
            return;
        }
        record.degraded = degraded;
        let engine = PositionSyncEngine::new(
            Arc::clone(&self.backend),
            SyncTarget {
                session: id,
                window,
                owner: located.pid,
                probe,
                container: record.container.clone(),
            },
            &record.sync_config,
            Some(Arc::clone(&self.events)),
        );
        let weak = Arc::downgrade(self);
        let started = engine.begin(move |exit| {
            if exit == SyncExit::TargetLost {
                if let Some(inner) = weak.upgrade() {
                    inner.fail(id, &OverlayError::TargetLost);
                }
            }
        });
        match started {
            Ok(handle) => {
                record.sync = Some(handle);
                if Self::transition_locked(id, record, SessionState::Tracking).is_ok() {
                    drop(sessions);
                    self.events.publish(id, OverlayEventKind::Tracking);
                }
            }
            Err(err) => {
                drop(sessions);
                self.fail(id, &err);
            }
        }
    }

    fn stop(&self, id: SessionId) -> Result<(), OverlayError> {
        let (discovery, sync, process) = {
            let mut sessions = self.sessions();
            let record = sessions
                .get_mut(&id)
                .ok_or(OverlayError::UnknownSession(id))?;
            match record.state {
                SessionState::Idle | SessionState::Stopping => return Ok(()),
                _ => Self::transition_locked(id, record, SessionState::Stopping)?,
            }
            record.cancel.cancel();
            (
                record.discovery.take(),
                record.sync.take(),
                record.process.take(),
            )
        };

        let timeout = self.config.stop_join_timeout;
        let metrics = sync.map(|mut handle| {
            handle.stop(timeout);
            handle.metrics()
        });
        join_with_timeout(discovery, timeout, id);
        terminate(id, process);

        let mut sessions = self.sessions();
        if let Some(record) = sessions.get_mut(&id) {
            if let Some(metrics) = metrics {
                record.last_metrics = metrics;
            }
            record.window = None;
            Self::transition_locked(id, record, SessionState::Idle)?;
        }
        drop(sessions);
        self.events.publish(id, OverlayEventKind::Stopped);
        Ok(())
    }
}

fn terminate(id: SessionId, process: Option<Box<dyn ManagedProcess>>) {
    if let Some(mut process) = process {
        if let Err(err) = process.terminate() {
            tracing::error!(session = %id, pid = process.pid(), %err, "failed to terminate overlay process");
        }
    }
}

fn join_with_timeout(handle: Option<JoinHandle<()>>, timeout: Duration, id: SessionId) {
    let Some(handle) = handle else {
        return;
    };
    let (done_tx, done_rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let join_result = handle.join();
        let _ = done_tx.send(join_result);
    });

    match done_rx.recv_timeout(timeout) {
        Ok(Ok(())) => {}
        Ok(Err(_)) => {
            tracing::error!(session = %id, "discovery thread panicked while joining");
        }
        Err(RecvTimeoutError::Timeout) => {
            tracing::error!(session = %id, "discovery thread join timed out");
        }
        Err(RecvTimeoutError::Disconnected) => {
            tracing::error!(session = %id, "discovery thread join channel disconnected");
        }
    }
}

/// Owns every overlay session of one host application.
pub struct OverlayManager {
    inner: Arc<ManagerInner>,
}

impl OverlayManager {
    pub fn new(
        backend: Arc<dyn WindowBackend>,
        launcher: Arc<dyn ProcessLauncher>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                backend,
                launcher,
                config,
                sessions: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                events: Arc::new(EventBus::new()),
            }),
        }
    }

    /// Launch `spec` and overlay its window on `container`.
    ///
    /// Returns as soon as the process runs; discovery, decoration and sync
    /// continue on a worker thread. Watch [`Self::status`] or
    /// [`Self::subscribe`] for `Tracking` or `Failed`.
    pub fn start(
        &self,
        spec: &LaunchSpec,
        container: &Arc<dyn ContainerRef>,
        sync_config: SyncConfig,
    ) -> Result<SessionId, OverlayError> {
        let inner = &self.inner;
        inner.launcher.validate(spec)?;
        let plan = DiscoveryPlan::for_launch(spec)?;
        if CoordinateSystem::sample(container.as_ref(), inner.backend.as_ref())
            .visible()
            .is_none()
        {
            return Err(OverlayError::InvalidContainer);
        }
        let baseline = if inner.config.tracker.ignore_preexisting {
            DiscoveryBaseline::capture(inner.backend.as_ref())?
        } else {
            DiscoveryBaseline::default()
        };

        let id = SessionId(inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mut record = SessionRecord {
            state: SessionState::Idle,
            program: spec.program_name(),
            container: Arc::downgrade(container),
            sync_config: sync_config.sanitized(),
            process: None,
            pid: None,
            owner_pid: None,
            window: None,
            cancel: CancelToken::new(),
            discovery: None,
            sync: None,
            last_metrics: SyncMetrics::default(),
            failure: None,
            last_error: None,
            degraded: Vec::new(),
        };
        ManagerInner::transition_locked(id, &mut record, SessionState::Launching)?;
        let process = inner.launcher.launch(spec).map_err(|err| {
            tracing::error!(session = %id, program = %record.program, %err, "overlay launch failed");
            err
        })?;
        let pid = process.pid();
        let probe = process.probe();
        record.pid = Some(pid);
        record.process = Some(process);
        ManagerInner::transition_locked(id, &mut record, SessionState::Locating)?;
        let cancel = record.cancel.clone();
        inner.sessions().insert(id, record);

        let worker = Arc::clone(inner);
        let spawned = std::thread::Builder::new()
            .name(format!("overlay-discovery-{}", id.0))
            .spawn(move || worker.run_discovery(id, pid, probe, plan, baseline, cancel));
        match spawned {
            Ok(handle) => {
                if let Some(record) = inner.sessions().get_mut(&id) {
                    record.discovery = Some(handle);
                }
                Ok(id)
            }
            Err(err) => {
                let record = inner.sessions().remove(&id);
                terminate(id, record.and_then(|mut r| r.process.take()));
                Err(OverlayError::LaunchFailed {
                    program: spec.program_name(),
                    reason: format!("could not start discovery worker: {err}"),
                })
            }
        }
    }

    /// Point a session at a different container without relaunching.
    pub fn update_bounds(
        &self,
        id: SessionId,
        container: &Arc<dyn ContainerRef>,
    ) -> Result<(), OverlayError> {
        let mut sessions = self.inner.sessions();
        let record = sessions
            .get_mut(&id)
            .ok_or(OverlayError::UnknownSession(id))?;
        if !record.state.is_active() {
            return Err(OverlayError::InvalidState {
                session: id,
                action: "update bounds of",
                state: record.state,
            });
        }
        record.container = Arc::downgrade(container);
        if let Some(sync) = &record.sync {
            sync.retarget(Arc::downgrade(container));
        }
        Ok(())
    }

    /// Stop a session from any state. Repeated calls are no-ops.
    pub fn stop(&self, id: SessionId) -> Result<(), OverlayError> {
        self.inner.stop(id)
    }

    pub fn status(&self, id: SessionId) -> Result<SessionStatus, OverlayError> {
        self.inner
            .sessions()
            .get(&id)
            .map(|record| record.status(id))
            .ok_or(OverlayError::UnknownSession(id))
    }

    pub fn subscribe(&self) -> Receiver<OverlayEvent> {
        self.inner.events.subscribe()
    }

    pub fn sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.inner.sessions().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Forget a stopped or failed session.
    pub fn release(&self, id: SessionId) -> Result<(), OverlayError> {
        let mut sessions = self.inner.sessions();
        let record = sessions.get(&id).ok_or(OverlayError::UnknownSession(id))?;
        if !record.state.is_resting() {
            return Err(OverlayError::InvalidState {
                session: id,
                action: "release",
                state: record.state,
            });
        }
        if let Some(record) = sessions.remove(&id) {
            record.cancel.cancel();
        }
        Ok(())
    }

    /// Stop every session.
    pub fn shutdown(&self) {
        for id in self.sessions() {
            if let Err(err) = self.stop(id) {
                tracing::error!(session = %id, %err, "failed to stop overlay session");
            }
        }
    }
}

impl Drop for OverlayManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
