//! Connector lifecycle state machine
//!
//! ```text
//! unsubmitted --accepted--> pending --healthy--> running --errors--> degraded
//!      |                      |                    |                    |
//!      +--rejected--+         +------error---------+-------error--------+
//!                   v                              v
//!                 failed <-------------------------+
//!                   |
//!                   +--restart--> pending
//! ```
//!
//! `apply_event` is pure; `SinkConnector` owns the current state.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorState {
    Unsubmitted,
    Pending,
    Running,
    Failed,
    Degraded,
}

impl ConnectorState {
    /// Running or degraded: the worker is draining the topic
    pub fn is_serving(self) -> bool {
        matches!(self, Self::Running | Self::Degraded)
    }

    /// Numeric code for the state gauge
    pub fn code(self) -> i64 {
        match self {
            Self::Unsubmitted => 0,
            Self::Pending => 1,
            Self::Running => 2,
            Self::Degraded => 3,
            Self::Failed => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unsubmitted => "unsubmitted",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Degraded => "degraded",
        }
    }
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observations and commands that drive the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectorEvent {
    /// The worker accepted the descriptor (new, changed, or already present)
    SubmissionAccepted,
    SubmissionRejected { reason: String },
    /// Connector and every task report RUNNING
    HealthyPoll,
    /// Connector RUNNING but some tasks failed
    DegradedPoll { failed_tasks: usize },
    /// Connector or all of its tasks FAILED
    ErrorPoll { reason: String },
    RestartRequested,
}

impl fmt::Display for ConnectorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SubmissionAccepted => write!(f, "SubmissionAccepted"),
            Self::SubmissionRejected { reason } => write!(f, "SubmissionRejected({})", reason),
            Self::HealthyPoll => write!(f, "HealthyPoll"),
            Self::DegradedPoll { failed_tasks } => {
                write!(f, "DegradedPoll(failed_tasks={})", failed_tasks)
            }
            Self::ErrorPoll { reason } => write!(f, "ErrorPoll({})", reason),
            Self::RestartRequested => write!(f, "RestartRequested"),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransitionError {
    #[error("invalid transition from {from} on {event}: {reason}")]
    InvalidTransition {
        from: ConnectorState,
        event: String,
        reason: String,
    },
}

/// Apply an event to the current state, returning the next state.
pub fn apply_event(
    current: ConnectorState,
    event: &ConnectorEvent,
) -> Result<ConnectorState, TransitionError> {
    use ConnectorEvent as E;
    use ConnectorState as S;

    let invalid = |reason: &str| {
        Err(TransitionError::InvalidTransition {
            from: current,
            event: event.to_string(),
            reason: reason.to_string(),
        })
    };

    match (current, event) {
        // A (re)submission restarts the worker's view of the connector
        (_, E::SubmissionAccepted) => Ok(S::Pending),
        (_, E::SubmissionRejected { .. }) => Ok(S::Failed),

        (S::Unsubmitted, _) => invalid("connector has not been submitted"),

        (S::Pending | S::Running | S::Degraded, E::HealthyPoll) => Ok(S::Running),
        (S::Pending | S::Running | S::Degraded, E::DegradedPoll { .. }) => Ok(S::Degraded),
        (S::Pending | S::Running | S::Degraded, E::ErrorPoll { .. }) => Ok(S::Failed),
        (S::Failed, E::ErrorPoll { .. }) => Ok(S::Failed),
        (S::Failed, E::HealthyPoll | E::DegradedPoll { .. }) => {
            invalid("a failed connector must be restarted")
        }

        (S::Failed | S::Running | S::Degraded | S::Pending, E::RestartRequested) => Ok(S::Pending),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_poll() -> ConnectorEvent {
        ConnectorEvent::ErrorPoll {
            reason: "task 0 FAILED".to_string(),
        }
    }

    #[test]
    fn test_happy_path() {
        let s = ConnectorState::Unsubmitted;
        let s = apply_event(s, &ConnectorEvent::SubmissionAccepted).unwrap();
        assert_eq!(s, ConnectorState::Pending);
        let s = apply_event(s, &ConnectorEvent::HealthyPoll).unwrap();
        assert_eq!(s, ConnectorState::Running);
    }

    #[test]
    fn test_failure_and_restart() {
        let s = apply_event(ConnectorState::Running, &error_poll()).unwrap();
        assert_eq!(s, ConnectorState::Failed);
        let s = apply_event(s, &ConnectorEvent::RestartRequested).unwrap();
        assert_eq!(s, ConnectorState::Pending);
    }

    #[test]
    fn test_pending_error_poll_fails() {
        let s = apply_event(ConnectorState::Pending, &error_poll()).unwrap();
        assert_eq!(s, ConnectorState::Failed);
    }

    #[test]
    fn test_rejection_fails() {
        let event = ConnectorEvent::SubmissionRejected {
            reason: "400".to_string(),
        };
        assert_eq!(
            apply_event(ConnectorState::Unsubmitted, &event).unwrap(),
            ConnectorState::Failed
        );
    }

    #[test]
    fn test_degraded_round_trip() {
        let degraded = ConnectorEvent::DegradedPoll { failed_tasks: 1 };
        let s = apply_event(ConnectorState::Running, &degraded).unwrap();
        assert_eq!(s, ConnectorState::Degraded);
        assert!(s.is_serving());
        let s = apply_event(s, &ConnectorEvent::HealthyPoll).unwrap();
        assert_eq!(s, ConnectorState::Running);
        let s = apply_event(ConnectorState::Degraded, &error_poll()).unwrap();
        assert_eq!(s, ConnectorState::Failed);
    }

    #[test]
    fn test_unsubmitted_cannot_be_polled_or_restarted() {
        for event in [
            ConnectorEvent::HealthyPoll,
            error_poll(),
            ConnectorEvent::RestartRequested,
        ] {
            let err = apply_event(ConnectorState::Unsubmitted, &event).unwrap_err();
            assert!(err.to_string().contains("unsubmitted"));
        }
    }

    #[test]
    fn test_failed_needs_restart_before_running() {
        assert!(apply_event(ConnectorState::Failed, &ConnectorEvent::HealthyPoll).is_err());
        assert_eq!(
            apply_event(ConnectorState::Failed, &error_poll()).unwrap(),
            ConnectorState::Failed
        );
    }
}
