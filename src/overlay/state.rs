#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Launching,
    Locating,
    Preparing,
    Tracking,
    Stopping,
    Failed,
}

impl SessionState {
    /// States in which the session owns a live process.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Launching | Self::Locating | Self::Preparing | Self::Tracking
        )
    }

    /// `Idle` and `Failed` are the only rest states.
    pub fn is_resting(self) -> bool {
        matches!(self, Self::Idle | Self::Failed)
    }
}

pub fn can_transition(from: SessionState, to: SessionState) -> bool {
    use SessionState::*;
    matches!(
        (from, to),
        (Idle, Launching)
            | (Launching, Locating)
            | (Locating, Preparing)
            | (Preparing, Tracking)
            | (Launching | Locating | Preparing | Tracking | Failed, Stopping)
            | (Stopping, Idle)
            | (Launching | Locating | Preparing | Tracking | Stopping, Failed)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_allowed() {
        let path = [
            SessionState::Idle,
            SessionState::Launching,
            SessionState::Locating,
            SessionState::Preparing,
            SessionState::Tracking,
            SessionState::Stopping,
            SessionState::Idle,
        ];
        for pair in path.windows(2) {
            assert!(can_transition(pair[0], pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn every_working_state_can_fail() {
        for state in [
            SessionState::Launching,
            SessionState::Locating,
            SessionState::Preparing,
            SessionState::Tracking,
            SessionState::Stopping,
        ] {
            assert!(can_transition(state, SessionState::Failed));
        }
    }

    #[test]
    fn state_machine_rejects_invalid_transitions() {
        let cases = [
            (SessionState::Idle, SessionState::Tracking),
            (SessionState::Idle, SessionState::Stopping),
            (SessionState::Locating, SessionState::Tracking),
            (SessionState::Tracking, SessionState::Locating),
            (SessionState::Failed, SessionState::Tracking),
            (SessionState::Failed, SessionState::Idle),
            (SessionState::Idle, SessionState::Failed),
        ];
        for (from, to) in cases {
            assert!(!can_transition(from, to), "unexpected transition {from:?} -> {to:?}");
        }
    }
}
