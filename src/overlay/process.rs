//! Launching and owning the external application process.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};

use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

use crate::overlay::error::OverlayError;

/// What to launch and how to recognise its window.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Title substring used by the title discovery strategy.
    pub expected_title: Option<String>,
    /// Treat `expected_title` as a case-insensitive regular expression.
    pub title_is_regex: bool,
    pub window_class: Option<String>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Parse a shell-style command line such as `viewer --page 3 "my doc.pdf"`.
    pub fn from_command_line(line: &str) -> Result<Self, OverlayError> {
        let parts = shlex::split(line).ok_or_else(|| OverlayError::LaunchFailed {
            program: line.to_string(),
            reason: "unbalanced quotes in command line".into(),
        })?;
        let mut parts = parts.into_iter();
        let program = parts.next().ok_or_else(|| OverlayError::LaunchFailed {
            program: String::new(),
            reason: "empty command line".into(),
        })?;
        Ok(Self::new(program).with_args(parts))
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.expected_title = Some(title.into());
        self.title_is_regex = false;
        self
    }

    pub fn with_title_regex(mut self, pattern: impl Into<String>) -> Self {
        self.expected_title = Some(pattern.into());
        self.title_is_regex = true;
        self
    }

    pub fn with_window_class(mut self, class: impl Into<String>) -> Self {
        self.window_class = Some(class.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().to_string()
    }
}

/// Read-only view of a launched process, safe to hand to worker threads.
pub trait ProcessProbe: Send + Sync {
    /// The launched process itself is still running.
    fn is_alive(&self) -> bool;
    /// `pid` is still running. Used for the owner of the tracked window, which
    /// may be a descendant that outlived the launched process.
    fn is_pid_alive(&self, pid: u32) -> bool;
    /// The launched process followed by any descendants that are known.
    fn pids(&self) -> Vec<u32>;

    /// The launched process or one of the descendants it left behind runs.
    fn is_tree_alive(&self) -> bool {
        self.is_alive() || self.pids().into_iter().any(|pid| self.is_pid_alive(pid))
    }
}

/// Exclusive owner of a launched process.
pub trait ManagedProcess: Send {
    fn pid(&self) -> u32;
    fn probe(&self) -> Arc<dyn ProcessProbe>;
    /// Kill the process (and its descendants). Safe to call repeatedly.
    fn terminate(&mut self) -> Result<(), OverlayError>;
}

pub trait ProcessLauncher: Send + Sync {
    /// Check that the launch target exists and is executable.
    fn validate(&self, spec: &LaunchSpec) -> Result<(), OverlayError> {
        resolve_program(&spec.program).map(|_| ())
    }

    fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ManagedProcess>, OverlayError>;
}

fn launch_error(program: &Path, reason: impl Into<String>) -> OverlayError {
    OverlayError::LaunchFailed {
        program: program.to_string_lossy().to_string(),
        reason: reason.into(),
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Resolve `program` to an executable path, searching `PATH` for bare names.
pub fn resolve_program(program: &Path) -> Result<PathBuf, OverlayError> {
    if program.as_os_str().is_empty() {
        return Err(launch_error(program, "no program given"));
    }
    if program.is_absolute() || program.components().count() > 1 {
        return if is_executable(program) {
            Ok(program.to_path_buf())
        } else {
            Err(launch_error(program, "file does not exist or is not executable"))
        };
    }

    let path_var = std::env::var_os("PATH").unwrap_or_default();
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(program);
        if is_executable(&candidate) {
            return Ok(candidate);
        }
        if cfg!(windows) && candidate.extension().is_none() {
            let with_exe = candidate.with_extension("exe");
            if is_executable(&with_exe) {
                return Ok(with_exe);
            }
        }
    }
    Err(launch_error(program, "not found on PATH"))
}

/// Every descendant of `root` given `(pid, parent)` pairs, breadth first.
pub fn descendants_of(root: u32, processes: &[(u32, Option<u32>)]) -> Vec<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (pid, parent) in processes {
        if let Some(parent) = parent {
            children.entry(*parent).or_default().push(*pid);
        }
    }
    let mut seen = HashSet::from([root]);
    let mut queue = VecDeque::from([root]);
    let mut out = Vec::new();
    while let Some(pid) = queue.pop_front() {
        if let Some(kids) = children.get(&pid) {
            for kid in kids {
                if seen.insert(*kid) {
                    out.push(*kid);
                    queue.push_back(*kid);
                }
            }
        }
    }
    out
}

fn process_table(system: &mut System) -> Vec<(u32, Option<u32>)> {
    system.refresh_processes(ProcessesToUpdate::All, true);
    system
        .processes()
        .iter()
        .map(|(pid, process)| (pid.as_u32(), process.parent().map(|p| p.as_u32())))
        .collect()
}

/// Spawns real processes with `std::process::Command`.
#[derive(Debug, Clone)]
pub struct NativeLauncher {
    pub include_child_processes: bool,
}

impl Default for NativeLauncher {
    fn default() -> Self {
        Self {
            include_child_processes: true,
        }
    }
}

impl ProcessLauncher for NativeLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ManagedProcess>, OverlayError> {
        let program = resolve_program(&spec.program)?;
        let mut command = Command::new(&program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }
        let child = command
            .spawn()
            .map_err(|err| launch_error(&program, err.to_string()))?;
        let pid = child.id();
        tracing::info!(pid, program = %program.display(), "launched overlay process");
        Ok(Box::new(NativeProcess {
            pid,
            shared: Arc::new(NativeShared {
                child: Mutex::new(child),
                system: Mutex::new(System::new()),
                known: Mutex::new(HashMap::new()),
                include_children: self.include_child_processes,
            }),
            terminated: false,
        }))
    }
}

struct NativeShared {
    child: Mutex<Child>,
    system: Mutex<System>,
    /// Descendants seen so far, keyed by pid with their start time. Orphaned
    /// descendants are reparented and no longer reachable from the root.
    known: Mutex<HashMap<u32, u64>>,
    include_children: bool,
}

impl NativeShared {
    fn descendants(&self, root: u32) -> Vec<u32> {
        let mut system = self.system.lock().unwrap_or_else(|p| p.into_inner());
        let mut found = descendants_of(root, &process_table(&mut system));
        let mut known = self.known.lock().unwrap_or_else(|p| p.into_inner());
        for pid in &found {
            if let Some(process) = system.process(Pid::from_u32(*pid)) {
                known.insert(*pid, process.start_time());
            }
        }
        known.retain(|pid, started| {
            system
                .process(Pid::from_u32(*pid))
                .is_some_and(|p| p.start_time() == *started && status_is_running(p.status()))
        });
        let orphans: Vec<u32> = known
            .keys()
            .filter(|pid| !found.contains(*pid))
            .copied()
            .collect();
        found.extend(orphans);
        found
    }

    fn is_running(&self, pid: u32) -> bool {
        let sys_pid = Pid::from_u32(pid);
        let mut system = self.system.lock().unwrap_or_else(|p| p.into_inner());
        system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
        let Some(process) = system.process(sys_pid) else {
            return false;
        };
        if !status_is_running(process.status()) {
            return false;
        }
        let known = self.known.lock().unwrap_or_else(|p| p.into_inner());
        known
            .get(&pid)
            .map_or(true, |started| *started == process.start_time())
    }
}

fn status_is_running(status: ProcessStatus) -> bool {
    !matches!(status, ProcessStatus::Zombie | ProcessStatus::Dead)
}

struct NativeProbe {
    pid: u32,
    shared: Arc<NativeShared>,
}

impl ProcessProbe for NativeProbe {
    fn is_alive(&self) -> bool {
        let mut child = self.shared.child.lock().unwrap_or_else(|p| p.into_inner());
        matches!(child.try_wait(), Ok(None))
    }

    fn is_pid_alive(&self, pid: u32) -> bool {
        if pid == self.pid {
            return self.is_alive();
        }
        self.shared.is_running(pid)
    }

    fn pids(&self) -> Vec<u32> {
        let mut pids = vec![self.pid];
        if self.shared.include_children {
            pids.extend(self.shared.descendants(self.pid));
        }
        pids
    }
}

pub struct NativeProcess {
    pid: u32,
    shared: Arc<NativeShared>,
    terminated: bool,
}

impl ManagedProcess for NativeProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn probe(&self) -> Arc<dyn ProcessProbe> {
        Arc::new(NativeProbe {
            pid: self.pid,
            shared: Arc::clone(&self.shared),
        })
    }

    fn terminate(&mut self) -> Result<(), OverlayError> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;

        let descendants = self.shared.descendants(self.pid);
        {
            let mut child = self.shared.child.lock().unwrap_or_else(|p| p.into_inner());
            if let Ok(None) = child.try_wait() {
                if let Err(err) = child.kill() {
                    tracing::error!(pid = self.pid, %err, "failed to kill overlay process");
                }
            }
            let _ = child.wait();
        }

        if !descendants.is_empty() {
            let mut system = self.shared.system.lock().unwrap_or_else(|p| p.into_inner());
            system.refresh_processes(ProcessesToUpdate::All, true);
            for pid in descendants {
                if let Some(process) = system.process(Pid::from_u32(pid)) {
                    let _ = process.kill();
                }
            }
        }
        tracing::info!(pid = self.pid, "terminated overlay process");
        Ok(())
    }
}

impl Drop for NativeProcess {
    fn drop(&mut self) {
        let _ = self.terminate();
    }
}
