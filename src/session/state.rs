use crate::xr::XrTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Uninitialized,
    Idle,
    Ready,
    Synchronized,
    Visible,
    Focused,
    Stopping,
    Exiting,
    LossPending,
}

impl SessionState {
    pub const ALL: [SessionState; 9] = [
        SessionState::Uninitialized,
        SessionState::Idle,
        SessionState::Ready,
        SessionState::Synchronized,
        SessionState::Visible,
        SessionState::Focused,
        SessionState::Stopping,
        SessionState::Exiting,
        SessionState::LossPending,
    ];

    /// Edges the runtime may report from this state.
    pub fn runtime_successors(self) -> &'static [SessionState] {
        use SessionState::*;
        match self {
            Uninitialized => &[Idle],
            Idle => &[Ready, Exiting, LossPending],
            Ready => &[Synchronized, Stopping, LossPending],
            Synchronized => &[Visible, Stopping, LossPending],
            Visible => &[Focused, Synchronized, Stopping, LossPending],
            Focused => &[Visible, Stopping, LossPending],
            Stopping => &[Idle, Exiting, LossPending],
            Exiting | LossPending => &[],
        }
    }

    pub fn accepts_runtime_transition(self, next: SessionState) -> bool {
        self.runtime_successors().contains(&next)
    }

    /// Full edge set: runtime edges plus the local teardown edge back to
    /// `Uninitialized` taken when the session handle is destroyed.
    pub fn can_transition_to(self, next: SessionState, cause: TransitionCause) -> bool {
        match cause {
            TransitionCause::Runtime => self.accepts_runtime_transition(next),
            TransitionCause::Teardown => {
                next == SessionState::Uninitialized && self != SessionState::Uninitialized
            }
        }
    }

    /// States between `Ready` and `Focused` in which the runtime considers the
    /// session active.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Ready
                | SessionState::Synchronized
                | SessionState::Visible
                | SessionState::Focused
        )
    }

    /// Frames may carry rendered content from `Synchronized` on.
    pub fn allows_rendering(self) -> bool {
        matches!(
            self,
            SessionState::Synchronized | SessionState::Visible | SessionState::Focused
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Exiting | SessionState::LossPending)
    }

    pub fn label(self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Idle => "idle",
            SessionState::Ready => "ready",
            SessionState::Synchronized => "synchronized",
            SessionState::Visible => "visible",
            SessionState::Focused => "focused",
            SessionState::Stopping => "stopping",
            SessionState::Exiting => "exiting",
            SessionState::LossPending => "loss-pending",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCause {
    Runtime,
    Teardown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
    pub cause: TransitionCause,
    pub generation: u64,
    pub time: Option<XrTime>,
}

impl Transition {
    pub fn is_valid(&self) -> bool {
        self.from.can_transition_to(self.to, self.cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_permitted() {
        let path = [
            SessionState::Uninitialized,
            SessionState::Idle,
            SessionState::Ready,
            SessionState::Synchronized,
            SessionState::Visible,
            SessionState::Focused,
            SessionState::Stopping,
            SessionState::Exiting,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].accepts_runtime_transition(pair[1]),
                "{:?} -> {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn skipping_states_is_rejected() {
        assert!(!SessionState::Idle.accepts_runtime_transition(SessionState::Focused));
        assert!(!SessionState::Uninitialized.accepts_runtime_transition(SessionState::Ready));
        assert!(!SessionState::Ready.accepts_runtime_transition(SessionState::Visible));
        assert!(!SessionState::Exiting.accepts_runtime_transition(SessionState::Idle));
    }

    #[test]
    fn every_active_state_can_reach_stopping() {
        for state in SessionState::ALL.into_iter().filter(|s| s.is_active()) {
            assert!(state.accepts_runtime_transition(SessionState::Stopping));
            assert!(state.accepts_runtime_transition(SessionState::LossPending));
        }
    }

    #[test]
    fn teardown_only_targets_uninitialized() {
        assert!(SessionState::Exiting.can_transition_to(
            SessionState::Uninitialized,
            TransitionCause::Teardown
        ));
        assert!(!SessionState::Exiting.can_transition_to(
            SessionState::Idle,
            TransitionCause::Teardown
        ));
        assert!(!SessionState::Uninitialized.can_transition_to(
            SessionState::Uninitialized,
            TransitionCause::Teardown
        ));
    }
}
