//! Execution lifecycle states.

use std::fmt;

/// The lifecycle of one execution.
///
/// ```text
/// Pending -> Preparing -> Running -> Draining -> {Complete, Failed}
///                                             -> TimedOut
///                                             -> Canceled
/// ```
///
/// Every terminal state runs the same cleanup.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    /// Received, not yet validated.
    Pending,
    /// Workspace and container are being set up.
    Preparing,
    /// The container is running.
    Running,
    /// Output is being drained.
    Draining,
    /// The program exited zero.
    Complete,
    /// The program exited nonzero or setup failed.
    Failed,
    /// The deadline expired during drain.
    TimedOut,
    /// The execution was canceled externally or by peer loss.
    Canceled,
}

impl State {
    /// Whether this state ends the execution.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            State::Complete | State::Failed | State::TimedOut | State::Canceled
        )
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Pending => "pending",
            State::Preparing => "preparing",
            State::Running => "running",
            State::Draining => "draining",
            State::Complete => "complete",
            State::Failed => "failed",
            State::TimedOut => "timed-out",
            State::Canceled => "canceled",
        };

        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!State::Pending.is_terminal());
        assert!(!State::Draining.is_terminal());
        assert!(State::Complete.is_terminal());
        assert!(State::Failed.is_terminal());
        assert!(State::TimedOut.is_terminal());
        assert!(State::Canceled.is_terminal());
    }
}
