//! Recording session state management

use crate::capture::BackendKind;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// Session state machine
///
/// Transitions only ever move forward:
/// Idle → Starting → Running → Stopping → Stopped | Failed,
/// with Starting → Failed for a start that never got going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, nothing launched yet
    Idle,

    /// Backend is acquiring processes or handles
    Starting,

    /// Recording
    Running,

    /// Backend is releasing its resources
    Stopping,

    /// Shut down cleanly
    Stopped,

    /// Start failed, capture crashed, or release could not be confirmed
    Failed,
}

impl SessionState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, target),
            (Idle, Starting)
                | (Starting, Running)
                | (Starting, Failed)
                | (Running, Stopping)
                | (Stopping, Stopped)
                | (Stopping, Failed)
        )
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Starting => "Starting",
            SessionState::Running => "Running",
            SessionState::Stopping => "Stopping",
            SessionState::Stopped => "Stopped",
            SessionState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid session transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

/// One capture attempt, owned and mutated by the supervisor only.
#[derive(Debug, Clone)]
pub struct RecordingSession {
    output_path: PathBuf,
    backend_kind: BackendKind,
    state: SessionState,
    started_at: Option<DateTime<Local>>,
    stopped_at: Option<DateTime<Local>>,
}

impl RecordingSession {
    pub fn new(output_path: PathBuf, backend_kind: BackendKind) -> Self {
        Self {
            output_path,
            backend_kind,
            state: SessionState::Idle,
            started_at: None,
            stopped_at: None,
        }
    }

    /// Move to `next`, stamping `started_at` on Running and `stopped_at` on
    /// the terminal states.
    pub fn advance(&mut self, next: SessionState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(&next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;

        let now = Local::now();
        match next {
            SessionState::Running => {
                self.started_at.get_or_insert(now);
            }
            SessionState::Stopped | SessionState::Failed => {
                self.stopped_at.get_or_insert(now);
            }
            _ => {}
        }
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend_kind
    }

    pub fn started_at(&self) -> Option<DateTime<Local>> {
        self.started_at
    }

    pub fn stopped_at(&self) -> Option<DateTime<Local>> {
        self.stopped_at
    }

    /// Wall-clock recording time, once both ends are known.
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.stopped_at? - self.started_at?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SessionState; 6] = [
        SessionState::Idle,
        SessionState::Starting,
        SessionState::Running,
        SessionState::Stopping,
        SessionState::Stopped,
        SessionState::Failed,
    ];

    #[test]
    fn test_valid_transitions() {
        use SessionState::*;

        assert!(Idle.can_transition_to(&Starting));
        assert!(Starting.can_transition_to(&Running));
        assert!(Starting.can_transition_to(&Failed));
        assert!(Running.can_transition_to(&Stopping));
        assert!(Stopping.can_transition_to(&Stopped));
        assert!(Stopping.can_transition_to(&Failed));
    }

    #[test]
    fn test_invalid_transitions() {
        use SessionState::*;

        assert!(!Idle.can_transition_to(&Running)); // must go through Starting
        assert!(!Running.can_transition_to(&Stopped)); // must go through Stopping
        assert!(!Running.can_transition_to(&Starting)); // no going back
        assert!(!Stopping.can_transition_to(&Running));
        assert!(!Running.can_transition_to(&Running));

        for target in ALL {
            assert!(!Stopped.can_transition_to(&target));
            assert!(!Failed.can_transition_to(&target));
        }
    }

    #[test]
    fn test_session_lifecycle_stamps_times_once() {
        let mut session = RecordingSession::new(PathBuf::from("out.mp4"), BackendKind::LocalEncode);
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.started_at().is_none());

        session.advance(SessionState::Starting).unwrap();
        session.advance(SessionState::Running).unwrap();
        let started = session.started_at().unwrap();

        session.advance(SessionState::Stopping).unwrap();
        session.advance(SessionState::Stopped).unwrap();
        let stopped = session.stopped_at().unwrap();

        assert!(stopped >= started);
        assert!(session.duration().unwrap() >= chrono::Duration::zero());
        assert_eq!(session.state(), SessionState::Stopped);

        let err = session.advance(SessionState::Failed).unwrap_err();
        assert_eq!(err.from, SessionState::Stopped);
        assert_eq!(session.stopped_at(), Some(stopped));
        assert_eq!(session.started_at(), Some(started));
    }

    #[test]
    fn test_failed_start_has_no_start_time() {
        let mut session = RecordingSession::new(PathBuf::from("out.mp4"), BackendKind::DelegatedScreencast);
        session.advance(SessionState::Starting).unwrap();
        session.advance(SessionState::Failed).unwrap();

        assert!(session.started_at().is_none());
        assert!(session.stopped_at().is_some());
        assert!(session.duration().is_none());
    }
}
