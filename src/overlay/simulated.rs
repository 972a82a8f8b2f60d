//! In-memory desktop: a [`WindowBackend`] and [`ProcessLauncher`] for hosts
//! without a native backend and for tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::overlay::decoration::ChromeElement;
use crate::overlay::error::{OverlayError, PlatformError};
use crate::overlay::geometry::{
    select_monitor_for_point, HostGeometry, HostWindowId, OriginConvention, ScreenRect,
};
use crate::overlay::platform::{ChromeState, WindowBackend, WindowHandle, WindowInfo, ZOrder};
use crate::overlay::process::{
    descendants_of, LaunchSpec, ManagedProcess, ProcessLauncher, ProcessProbe,
};

const FULL_CHROME: ChromeState = ChromeState {
    title_bar: true,
    resize_border: true,
    taskbar_entry: true,
};
const DEFAULT_WINDOW_RECT: ScreenRect = ScreenRect::new(40, 40, 640, 480);

#[derive(Debug, Clone)]
pub struct WindowSpec {
    pub pid: u32,
    pub title: String,
    pub class: String,
    pub rect: ScreenRect,
    pub chrome: ChromeState,
}

impl WindowSpec {
    pub fn new(pid: u32, title: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            pid,
            title: title.into(),
            class: class.into(),
            rect: DEFAULT_WINDOW_RECT,
            chrome: FULL_CHROME,
        }
    }

    pub fn with_rect(mut self, rect: ScreenRect) -> Self {
        self.rect = rect;
        self
    }

    pub fn with_chrome(mut self, chrome: ChromeState) -> Self {
        self.chrome = chrome;
        self
    }
}

#[derive(Debug, Clone)]
struct ScheduledWindow {
    delay: Duration,
    title: String,
    class: String,
    /// Owned by a helper child process instead of the launched one.
    from_child: bool,
}

/// What a registered program does once launched.
#[derive(Debug, Clone, Default)]
pub struct ProgramBehavior {
    windows: Vec<ScheduledWindow>,
    exit_after: Option<Duration>,
    locked_chrome: Vec<ChromeElement>,
}

impl ProgramBehavior {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn window_after(mut self, delay: Duration, title: &str, class: &str) -> Self {
        self.windows.push(ScheduledWindow {
            delay,
            title: title.to_string(),
            class: class.to_string(),
            from_child: false,
        });
        self
    }

    /// The launched process spawns a child which opens the window.
    pub fn child_window_after(mut self, delay: Duration, title: &str, class: &str) -> Self {
        self.windows.push(ScheduledWindow {
            delay,
            title: title.to_string(),
            class: class.to_string(),
            from_child: true,
        });
        self
    }

    pub fn exit_after(mut self, delay: Duration) -> Self {
        self.exit_after = Some(delay);
        self
    }

    /// Windows of this program refuse to drop `element`.
    pub fn with_locked_chrome(mut self, element: ChromeElement) -> Self {
        self.locked_chrome.push(element);
        self
    }
}

#[derive(Debug)]
struct SimWindow {
    pid: u32,
    title: String,
    class: String,
    rect: ScreenRect,
    chrome: ChromeState,
    locked: HashSet<ChromeElement>,
    created_at: Instant,
}

#[derive(Debug)]
struct SimProcess {
    parent: Option<u32>,
    started: Instant,
    exit_at: Option<Instant>,
    alive: bool,
    pending: Vec<ScheduledWindow>,
    locked_chrome: HashSet<ChromeElement>,
}

impl SimProcess {
    fn running(parent: Option<u32>, started: Instant) -> Self {
        Self {
            parent,
            started,
            exit_at: None,
            alive: true,
            pending: Vec::new(),
            locked_chrome: HashSet::new(),
        }
    }
}

#[derive(Debug)]
struct DesktopState {
    monitors: Vec<ScreenRect>,
    hosts: HashMap<HostWindowId, HostGeometry>,
    windows: BTreeMap<WindowHandle, SimWindow>,
    processes: HashMap<u32, SimProcess>,
    programs: HashMap<String, ProgramBehavior>,
    next_pid: u32,
    next_handle: u64,
    move_delay: Duration,
    move_calls_started: usize,
    move_count: usize,
    style_changes: usize,
    style_change_resets_geometry: bool,
}

impl DesktopState {
    fn add_window(&mut self, spec: WindowSpec, created_at: Instant) -> WindowHandle {
        self.add_locked_window(spec, created_at, HashSet::new())
    }

    fn add_locked_window(
        &mut self,
        spec: WindowSpec,
        created_at: Instant,
        locked: HashSet<ChromeElement>,
    ) -> WindowHandle {
        // Windows created directly belong to processes we did not launch.
        self.processes
            .entry(spec.pid)
            .or_insert_with(|| SimProcess::running(None, created_at));
        let handle = WindowHandle(self.next_handle);
        self.next_handle += 0x10;
        self.windows.insert(
            handle,
            SimWindow {
                pid: spec.pid,
                title: spec.title,
                class: spec.class,
                rect: spec.rect,
                chrome: spec.chrome,
                locked,
                created_at,
            },
        );
        handle
    }

    fn add_process(&mut self, parent: Option<u32>, started: Instant) -> u32 {
        while self.processes.contains_key(&self.next_pid) {
            self.next_pid += 1;
        }
        let pid = self.next_pid;
        self.next_pid += 1;
        self.processes.insert(pid, SimProcess::running(parent, started));
        pid
    }

    /// Advance scheduled exits and window openings up to `now`.
    fn advance(&mut self, now: Instant) {
        let exiting: Vec<u32> = self
            .processes
            .iter()
            .filter(|(_, p)| p.alive && p.exit_at.is_some_and(|at| at <= now))
            .map(|(pid, _)| *pid)
            .collect();
        for pid in exiting {
            self.end_process(pid);
        }

        let mut due = Vec::new();
        for (pid, process) in self.processes.iter_mut() {
            if !process.alive {
                continue;
            }
            let started = process.started;
            let (ready, later): (Vec<_>, Vec<_>) = process
                .pending
                .drain(..)
                .partition(|w| started + w.delay <= now);
            process.pending = later;
            let locked = process.locked_chrome.clone();
            due.extend(ready.into_iter().map(|w| (*pid, started, w, locked.clone())));
        }
        due.sort_by_key(|(_, started, w, _)| *started + w.delay);
        for (pid, started, window, locked) in due {
            let owner = if window.from_child {
                self.add_process(Some(pid), started + window.delay)
            } else {
                pid
            };
            self.add_locked_window(
                WindowSpec::new(owner, window.title, window.class),
                started + window.delay,
                locked,
            );
        }
    }

    fn end_process(&mut self, pid: u32) {
        if let Some(process) = self.processes.get_mut(&pid) {
            process.alive = false;
            process.pending.clear();
        }
        self.windows.retain(|_, w| w.pid != pid);
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.processes.get(&pid).is_some_and(|p| p.alive)
    }

    fn process_table(&self) -> Vec<(u32, Option<u32>)> {
        self.processes
            .iter()
            .filter(|(_, p)| p.alive)
            .map(|(pid, p)| (*pid, p.parent))
            .collect()
    }

    fn window_mut(&mut self, handle: WindowHandle) -> Result<&mut SimWindow, PlatformError> {
        self.windows
            .get_mut(&handle)
            .ok_or(PlatformError::WindowGone(handle))
    }
}

/// Shared in-memory desktop. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct SimulatedDesktop {
    state: Arc<Mutex<DesktopState>>,
}

impl Default for SimulatedDesktop {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDesktop {
    /// One 1920x1080 monitor at the origin.
    pub fn new() -> Self {
        Self::with_monitors(vec![ScreenRect::new(0, 0, 1920, 1080)])
    }

    /// The first monitor is the primary one.
    pub fn with_monitors(monitors: Vec<ScreenRect>) -> Self {
        Self {
            state: Arc::new(Mutex::new(DesktopState {
                monitors,
                hosts: HashMap::new(),
                windows: BTreeMap::new(),
                processes: HashMap::new(),
                programs: HashMap::new(),
                next_pid: 1000,
                next_handle: 0x1_0000,
                move_delay: Duration::ZERO,
                move_calls_started: 0,
                move_count: 0,
                style_changes: 0,
                style_change_resets_geometry: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DesktopState> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.advance(Instant::now());
        state
    }

    pub fn register_program(&self, name: &str, behavior: ProgramBehavior) {
        self.lock().programs.insert(name.to_string(), behavior);
    }

    pub fn create_window(&self, spec: WindowSpec) -> WindowHandle {
        self.lock().add_window(spec, Instant::now())
    }

    pub fn close_window(&self, handle: WindowHandle) {
        self.lock().windows.remove(&handle);
    }

    /// End a process as if it crashed or was killed externally.
    pub fn kill(&self, pid: u32) {
        self.lock().end_process(pid);
    }

    pub fn is_process_alive(&self, pid: u32) -> bool {
        self.lock().is_alive(pid)
    }

    pub fn windows_of(&self, pid: u32) -> Vec<WindowHandle> {
        self.lock()
            .windows
            .iter()
            .filter(|(_, w)| w.pid == pid)
            .map(|(h, _)| *h)
            .collect()
    }

    pub fn owner_of(&self, handle: WindowHandle) -> Option<u32> {
        self.lock().windows.get(&handle).map(|w| w.pid)
    }

    pub fn title_of(&self, handle: WindowHandle) -> Option<String> {
        self.lock().windows.get(&handle).map(|w| w.title.clone())
    }

    pub fn rect_of(&self, handle: WindowHandle) -> Option<ScreenRect> {
        self.lock().windows.get(&handle).map(|w| w.rect)
    }

    pub fn chrome_of(&self, handle: WindowHandle) -> Option<ChromeState> {
        self.lock().windows.get(&handle).map(|w| w.chrome)
    }

    /// Make `element` refuse removal on `handle`.
    pub fn lock_chrome(&self, handle: WindowHandle, element: ChromeElement) {
        if let Some(window) = self.lock().windows.get_mut(&handle) {
            window.locked.insert(element);
        }
    }

    /// Emulate platforms that move a window back to a default spot when its
    /// style changes.
    pub fn set_style_change_resets_geometry(&self, enabled: bool) {
        self.lock().style_change_resets_geometry = enabled;
    }

    pub fn style_change_count(&self) -> usize {
        self.lock().style_changes
    }

    /// Make every move call block for `delay`.
    pub fn set_move_delay(&self, delay: Duration) {
        self.lock().move_delay = delay;
    }

    /// Completed move/resize calls.
    pub fn move_count(&self) -> usize {
        self.lock().move_count
    }

    pub fn move_calls_started(&self) -> usize {
        self.lock().move_calls_started
    }

    pub fn set_host(&self, host: HostWindowId, geometry: HostGeometry) {
        self.lock().hosts.insert(host, geometry);
    }

    /// Place a host window's content area at `origin` (top-left, physical
    /// pixels) with the given scale.
    pub fn place_host(&self, host: HostWindowId, origin: (i32, i32), scale_factor: f64) {
        let mut state = self.lock();
        let monitor = select_monitor_for_point(&state.monitors, origin).unwrap_or_default();
        let desktop_height = state.monitors.first().map_or(0, |m| m.height) as f64;
        state.hosts.insert(
            host,
            HostGeometry {
                content_origin: (origin.0 as f64, origin.1 as f64),
                scale_factor,
                origin: OriginConvention::TopLeft,
                desktop_height,
                monitor,
                minimized: false,
            },
        );
    }

    pub fn set_host_minimized(&self, host: HostWindowId, minimized: bool) {
        if let Some(geometry) = self.lock().hosts.get_mut(&host) {
            geometry.minimized = minimized;
        }
    }

    pub fn window_count(&self) -> usize {
        self.lock().windows.len()
    }
}

impl WindowBackend for SimulatedDesktop {
    fn enumerate_windows(&self) -> Result<Vec<WindowInfo>, PlatformError> {
        Ok(self
            .lock()
            .windows
            .iter()
            .map(|(handle, w)| WindowInfo {
                handle: *handle,
                pid: w.pid,
                title: w.title.clone(),
                class: w.class.clone(),
                created_at: Some(w.created_at),
            })
            .collect())
    }

    fn is_window(&self, handle: WindowHandle) -> bool {
        self.lock().windows.contains_key(&handle)
    }

    fn window_rect(&self, handle: WindowHandle) -> Result<ScreenRect, PlatformError> {
        self.lock()
            .windows
            .get(&handle)
            .map(|w| w.rect)
            .ok_or(PlatformError::WindowGone(handle))
    }

    fn set_window_rect(
        &self,
        handle: WindowHandle,
        rect: ScreenRect,
        _z_order: ZOrder,
    ) -> Result<(), PlatformError> {
        let delay = {
            let mut state = self.lock();
            state.window_mut(handle)?;
            state.move_calls_started += 1;
            state.move_delay
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let mut state = self.lock();
        state.window_mut(handle)?.rect = rect;
        state.move_count += 1;
        Ok(())
    }

    fn chrome_state(&self, handle: WindowHandle) -> Result<ChromeState, PlatformError> {
        self.lock()
            .windows
            .get(&handle)
            .map(|w| w.chrome)
            .ok_or(PlatformError::WindowGone(handle))
    }

    fn remove_chrome(
        &self,
        handle: WindowHandle,
        element: ChromeElement,
    ) -> Result<(), PlatformError> {
        let mut state = self.lock();
        state.style_changes += 1;
        let resets = state.style_change_resets_geometry;
        let window = state.window_mut(handle)?;
        if window.locked.contains(&element) {
            return Err(PlatformError::Os {
                call: "SetWindowLongPtrW",
                message: format!("{element} is locked"),
            });
        }
        match element {
            ChromeElement::TitleBar => window.chrome.title_bar = false,
            ChromeElement::ResizeBorder => window.chrome.resize_border = false,
            ChromeElement::TaskbarEntry => window.chrome.taskbar_entry = false,
        }
        if resets {
            window.rect = ScreenRect::new(0, 0, window.rect.width, window.rect.height);
        }
        Ok(())
    }

    fn host_geometry(&self, host: HostWindowId) -> Option<HostGeometry> {
        let state = self.lock();
        if host == HostWindowId::DESKTOP {
            return state.monitors.first().copied().map(HostGeometry::desktop);
        }
        state.hosts.get(&host).copied()
    }
}

impl ProcessLauncher for SimulatedDesktop {
    fn validate(&self, spec: &LaunchSpec) -> Result<(), OverlayError> {
        if self.lock().programs.contains_key(&spec.program_name()) {
            Ok(())
        } else {
            Err(OverlayError::LaunchFailed {
                program: spec.program_name(),
                reason: "no such program".into(),
            })
        }
    }

    fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ManagedProcess>, OverlayError> {
        self.validate(spec)?;
        let mut state = self.lock();
        let behavior = state
            .programs
            .get(&spec.program_name())
            .cloned()
            .unwrap_or_default();
        let now = Instant::now();
        let pid = state.add_process(None, now);
        if let Some(process) = state.processes.get_mut(&pid) {
            process.pending = behavior.windows;
            process.exit_at = behavior.exit_after.map(|delay| now + delay);
            process.locked_chrome = behavior.locked_chrome.into_iter().collect();
        }
        drop(state);
        tracing::debug!(pid, program = %spec.program_name(), "launched simulated process");
        Ok(Box::new(SimulatedProcess {
            desktop: self.clone(),
            pid,
            terminated: false,
        }))
    }
}

struct SimulatedProbe {
    desktop: SimulatedDesktop,
    pid: u32,
}

impl ProcessProbe for SimulatedProbe {
    fn is_alive(&self) -> bool {
        self.desktop.is_process_alive(self.pid)
    }

    fn is_pid_alive(&self, pid: u32) -> bool {
        self.desktop.is_process_alive(pid)
    }

    fn pids(&self) -> Vec<u32> {
        let table = self.desktop.lock().process_table();
        let mut pids = vec![self.pid];
        pids.extend(descendants_of(self.pid, &table));
        pids
    }
}

pub struct SimulatedProcess {
    desktop: SimulatedDesktop,
    pid: u32,
    terminated: bool,
}

impl ManagedProcess for SimulatedProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn probe(&self) -> Arc<dyn ProcessProbe> {
        Arc::new(SimulatedProbe {
            desktop: self.desktop.clone(),
            pid: self.pid,
        })
    }

    fn terminate(&mut self) -> Result<(), OverlayError> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;
        let mut state = self.desktop.lock();
        let mut doomed = descendants_of(self.pid, &state.process_table());
        doomed.push(self.pid);
        for pid in doomed {
            state.end_process(pid);
        }
        Ok(())
    }
}

impl Drop for SimulatedProcess {
    fn drop(&mut self) {
        let _ = self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduled_windows_appear_after_their_delay() {
        let desktop = SimulatedDesktop::new();
        desktop.register_program(
            "viewer",
            ProgramBehavior::new().window_after(Duration::from_millis(40), "Doc", "Frame"),
        );
        let process = desktop.launch(&LaunchSpec::new("viewer")).expect("launch");
        assert!(desktop.windows_of(process.pid()).is_empty());
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(desktop.windows_of(process.pid()).len(), 1);
    }

    #[test]
    fn terminate_removes_process_tree_and_windows() {
        let desktop = SimulatedDesktop::new();
        desktop.register_program(
            "broker",
            ProgramBehavior::new().child_window_after(Duration::ZERO, "Doc", "Frame"),
        );
        let mut process = desktop.launch(&LaunchSpec::new("broker")).expect("launch");
        let probe = process.probe();
        assert_eq!(probe.pids().len(), 2);
        assert_eq!(desktop.window_count(), 1);

        process.terminate().expect("terminate");
        assert!(!probe.is_alive());
        assert_eq!(desktop.window_count(), 0);
        assert_eq!(probe.pids().len(), 1);
    }

    #[test]
    fn child_outlives_the_launched_process() {
        let desktop = SimulatedDesktop::new();
        desktop.register_program(
            "stub",
            ProgramBehavior::new()
                .child_window_after(Duration::ZERO, "Doc", "Frame")
                .exit_after(Duration::from_millis(30)),
        );
        let process = desktop.launch(&LaunchSpec::new("stub")).expect("launch");
        let probe = process.probe();
        std::thread::sleep(Duration::from_millis(60));

        let window = desktop.enumerate_windows().expect("enumerate")[0].handle;
        let owner = desktop.owner_of(window).expect("window kept");
        assert!(!probe.is_alive());
        assert!(probe.is_pid_alive(owner));
        assert!(probe.is_tree_alive());
        assert!(probe.pids().contains(&owner));
    }

    #[test]
    fn unknown_programs_fail_validation() {
        let desktop = SimulatedDesktop::new();
        assert!(matches!(
            desktop.validate(&LaunchSpec::new("nope")),
            Err(OverlayError::LaunchFailed { .. })
        ));
    }

    #[test]
    fn hosts_resolve_to_the_monitor_they_sit_on() {
        let desktop = SimulatedDesktop::with_monitors(vec![
            ScreenRect::new(0, 0, 1920, 1080),
            ScreenRect::new(1920, 0, 2560, 1440),
        ]);
        let host = HostWindowId(7);
        desktop.place_host(host, (2000, 100), 2.0);
        let geometry = desktop.host_geometry(host).expect("host placed");
        assert_eq!(geometry.monitor, ScreenRect::new(1920, 0, 2560, 1440));
        assert_eq!(
            desktop.host_geometry(HostWindowId::DESKTOP).map(|g| g.monitor),
            Some(ScreenRect::new(0, 0, 1920, 1080))
        );
    }
}
