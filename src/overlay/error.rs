use thiserror::Error;

use crate::overlay::decoration::ChromeElement;
use crate::overlay::platform::WindowHandle;
use crate::overlay::state::{SessionId, SessionState};

/// Failures reported by a [`crate::overlay::platform::WindowBackend`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("window management is not supported on this platform")]
    Unsupported,
    #[error("window {0} no longer exists")]
    WindowGone(WindowHandle),
    #[error("{call} failed: {message}")]
    Os { call: &'static str, message: String },
    #[error("{call} did not complete in time")]
    TimedOut { call: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecorationError {
    #[error("window {0} disappeared while removing decorations")]
    WindowGone(WindowHandle),
    #[error("no decoration could be removed: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("failed to launch {program}: {reason}")]
    LaunchFailed { program: String, reason: String },
    #[error("no window appeared for process {pid} within {timeout_ms} ms")]
    WindowNotFound { pid: u32, timeout_ms: u64 },
    #[error("process {pid} exited before its window appeared")]
    ProcessExited { pid: u32 },
    #[error("decorations only partially removed, still present: {remaining:?}")]
    DecorationPartial { remaining: Vec<ChromeElement> },
    #[error(transparent)]
    DecorationFailed(#[from] DecorationError),
    #[error("tracked window or its process disappeared")]
    TargetLost,
    #[error("container reports no visible bounds")]
    InvalidContainer,
    #[error("unknown overlay session {0}")]
    UnknownSession(SessionId),
    #[error("cannot {action} session {session} while {state:?}")]
    InvalidState {
        session: SessionId,
        action: &'static str,
        state: SessionState,
    },
    #[error("window discovery cancelled")]
    Cancelled,
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Cloneable summary of why a session ended up in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    LaunchFailed,
    WindowNotFound,
    ProcessExited,
    DecorationFailed,
    TargetLost,
    Platform,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::LaunchFailed => write!(f, "launch failed"),
            FailureReason::WindowNotFound => write!(f, "window not found"),
            FailureReason::ProcessExited => write!(f, "process exited"),
            FailureReason::DecorationFailed => write!(f, "decoration failed"),
            FailureReason::TargetLost => write!(f, "target lost"),
            FailureReason::Platform => write!(f, "platform error"),
        }
    }
}

impl OverlayError {
    /// The status-side reason for a session failing with this error.
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            OverlayError::LaunchFailed { .. } => FailureReason::LaunchFailed,
            OverlayError::WindowNotFound { .. } => FailureReason::WindowNotFound,
            OverlayError::ProcessExited { .. } => FailureReason::ProcessExited,
            OverlayError::DecorationPartial { .. } | OverlayError::DecorationFailed(_) => {
                FailureReason::DecorationFailed
            }
            OverlayError::TargetLost => FailureReason::TargetLost,
            _ => FailureReason::Platform,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoration_errors_map_to_decoration_failure() {
        let err: OverlayError = DecorationError::Rejected("style locked".into()).into();
        assert_eq!(err.failure_reason(), FailureReason::DecorationFailed);
        assert_eq!(
            err.to_string(),
            "no decoration could be removed: style locked"
        );
    }

    #[test]
    fn discovery_errors_keep_their_reason() {
        let err = OverlayError::WindowNotFound {
            pid: 7,
            timeout_ms: 500,
        };
        assert_eq!(err.failure_reason(), FailureReason::WindowNotFound);
        assert_eq!(
            OverlayError::ProcessExited { pid: 7 }.failure_reason(),
            FailureReason::ProcessExited
        );
    }
}
