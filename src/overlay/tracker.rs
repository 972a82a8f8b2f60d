//! Discovery of the top-level window belonging to a freshly launched process.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use regex::{Regex, RegexBuilder};

use crate::overlay::cancel::CancelToken;
use crate::overlay::error::{OverlayError, PlatformError};
use crate::overlay::platform::{WindowBackend, WindowHandle, WindowInfo};
use crate::overlay::process::{LaunchSpec, ProcessProbe};

#[derive(Debug, Clone)]
pub enum TitleMatcher {
    /// Lower-cased, trimmed substring.
    Substring(String),
    Pattern(Regex),
}

impl TitleMatcher {
    pub fn substring(value: &str) -> Self {
        TitleMatcher::Substring(value.trim().to_lowercase())
    }

    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map(TitleMatcher::Pattern)
    }

    pub fn matches(&self, title: &str) -> bool {
        match self {
            TitleMatcher::Substring(needle) => {
                !needle.is_empty() && title.trim().to_lowercase().contains(needle.as_str())
            }
            TitleMatcher::Pattern(re) => re.is_match(title),
        }
    }
}

/// Discovery strategies, most reliable first.
#[derive(Debug, Clone)]
pub enum DiscoveryStrategy {
    /// Windows owned by the launched process or its descendants.
    ByProcessId,
    ByTitleSubstring(TitleMatcher),
    ByWindowClass(String),
}

impl DiscoveryStrategy {
    fn name(&self) -> &'static str {
        match self {
            DiscoveryStrategy::ByProcessId => "process id",
            DiscoveryStrategy::ByTitleSubstring(_) => "title",
            DiscoveryStrategy::ByWindowClass(_) => "window class",
        }
    }
}

/// Ordered strategy list for one launch.
#[derive(Debug, Clone)]
pub struct DiscoveryPlan {
    pub strategies: Vec<DiscoveryStrategy>,
}

impl DiscoveryPlan {
    pub fn for_launch(spec: &LaunchSpec) -> Result<Self, OverlayError> {
        let mut strategies = vec![DiscoveryStrategy::ByProcessId];
        if let Some(title) = spec.expected_title.as_deref().filter(|t| !t.trim().is_empty()) {
            let matcher = if spec.title_is_regex {
                TitleMatcher::pattern(title).map_err(|err| OverlayError::LaunchFailed {
                    program: spec.program_name(),
                    reason: format!("invalid title pattern: {err}"),
                })?
            } else {
                TitleMatcher::substring(title)
            };
            strategies.push(DiscoveryStrategy::ByTitleSubstring(matcher));
        }
        if let Some(class) = spec.window_class.as_deref().filter(|c| !c.trim().is_empty()) {
            strategies.push(DiscoveryStrategy::ByWindowClass(class.trim().to_string()));
        }
        Ok(Self { strategies })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    pub poll_interval: Duration,
    pub timeout: Duration,
    /// Ignore windows that existed before launch in the title and class
    /// strategies.
    pub ignore_preexisting: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(150),
            timeout: Duration::from_secs(10),
            ignore_preexisting: true,
        }
    }
}

/// Window handles present before the process was launched.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryBaseline {
    handles: HashSet<WindowHandle>,
}

impl DiscoveryBaseline {
    pub fn capture(backend: &dyn WindowBackend) -> Result<Self, PlatformError> {
        let handles = backend
            .enumerate_windows()?
            .into_iter()
            .map(|w| w.handle)
            .collect();
        Ok(Self { handles })
    }

    pub fn contains(&self, handle: WindowHandle) -> bool {
        self.handles.contains(&handle)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowCandidate {
    pub handle: WindowHandle,
    pub pid: u32,
    pub title: String,
    pub class: String,
    pub created_at: Instant,
}

pub struct WindowTracker<'a> {
    backend: &'a dyn WindowBackend,
    config: TrackerConfig,
    first_seen: HashMap<WindowHandle, Instant>,
}

impl<'a> WindowTracker<'a> {
    pub fn new(backend: &'a dyn WindowBackend, config: TrackerConfig) -> Self {
        Self {
            backend,
            config,
            first_seen: HashMap::new(),
        }
    }

    /// Poll until a window for `pid` appears, the process and every
    /// descendant it started have exited, the timeout expires or `cancel`
    /// fires. The returned candidate carries the pid owning the window.
    pub fn locate(
        &mut self,
        pid: u32,
        probe: &dyn ProcessProbe,
        plan: &DiscoveryPlan,
        baseline: &DiscoveryBaseline,
        cancel: &CancelToken,
    ) -> Result<WindowCandidate, OverlayError> {
        let started = Instant::now();
        let mut polls = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(OverlayError::Cancelled);
            }
            if !probe.is_tree_alive() {
                tracing::warn!(pid, "process exited before its window appeared");
                return Err(OverlayError::ProcessExited { pid });
            }

            polls += 1;
            match self.poll_once(probe, plan, baseline) {
                Ok(Some(candidate)) => {
                    tracing::info!(
                        pid,
                        owner = candidate.pid,
                        window = %candidate.handle,
                        title = %candidate.title,
                        polls,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "located overlay window"
                    );
                    return Ok(candidate);
                }
                Ok(None) => {}
                Err(PlatformError::Unsupported) => {
                    return Err(OverlayError::Platform(PlatformError::Unsupported));
                }
                Err(err) => tracing::debug!(pid, %err, "window enumeration failed, retrying"),
            }

            let elapsed = started.elapsed();
            if elapsed >= self.config.timeout {
                return Err(OverlayError::WindowNotFound {
                    pid,
                    timeout_ms: self.config.timeout.as_millis() as u64,
                });
            }
            let wait = self.config.poll_interval.min(self.config.timeout - elapsed);
            if cancel.wait(wait) {
                return Err(OverlayError::Cancelled);
            }
        }
    }

    /// One enumeration pass over every strategy.
    pub fn poll_once(
        &mut self,
        probe: &dyn ProcessProbe,
        plan: &DiscoveryPlan,
        baseline: &DiscoveryBaseline,
    ) -> Result<Option<WindowCandidate>, PlatformError> {
        let windows = self.backend.enumerate_windows()?;
        let now = Instant::now();
        let candidates: Vec<WindowCandidate> = windows
            .into_iter()
            .map(|window| self.candidate(window, now))
            .collect();
        let pids = probe.pids();

        for strategy in &plan.strategies {
            let newest = candidates
                .iter()
                .filter(|c| self.strategy_matches(strategy, c, &pids, baseline))
                .max_by_key(|c| c.created_at);
            if let Some(found) = newest {
                tracing::debug!(strategy = strategy.name(), window = %found.handle, "window candidate matched");
                return Ok(Some(found.clone()));
            }
        }
        Ok(None)
    }

    fn candidate(&mut self, window: WindowInfo, now: Instant) -> WindowCandidate {
        let first_seen = *self.first_seen.entry(window.handle).or_insert(now);
        WindowCandidate {
            handle: window.handle,
            pid: window.pid,
            title: window.title,
            class: window.class,
            created_at: window.created_at.unwrap_or(first_seen),
        }
    }

    fn strategy_matches(
        &self,
        strategy: &DiscoveryStrategy,
        candidate: &WindowCandidate,
        pids: &[u32],
        baseline: &DiscoveryBaseline,
    ) -> bool {
        let fresh = !self.config.ignore_preexisting || !baseline.contains(candidate.handle);
        match strategy {
            DiscoveryStrategy::ByProcessId => pids.contains(&candidate.pid),
            DiscoveryStrategy::ByTitleSubstring(matcher) => {
                fresh && matcher.matches(&candidate.title)
            }
            DiscoveryStrategy::ByWindowClass(class) => {
                fresh && candidate.class.eq_ignore_ascii_case(class)
            }
        }
    }
}
