//! Invocation state machine.

use crate::observability::trace_state_change;
use std::fmt;

/// Stage an invocation has reached.
///
/// ```text
/// ArgsCollected → HostToLibraryConverted → Invoked → LibraryToHostConverted → Published → Completed
///        └──────────────────┴────────────────┴─────────────────┴──────────────────┴──→ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvocationState {
    /// Arguments were received and the operation was found.
    ArgsCollected,
    /// Host buffers were converted to matrices.
    HostToLibraryConverted,
    /// The callable returned.
    Invoked,
    /// Results and in/out buffers were converted back.
    LibraryToHostConverted,
    /// The result was published to the store, or there was nothing to publish.
    Published,
    /// The invocation finished successfully.
    Completed,
    /// The invocation failed.
    Failed,
}

impl InvocationState {
    /// Returns true for `Completed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ArgsCollected => "args-collected",
            Self::HostToLibraryConverted => "host-to-library-converted",
            Self::Invoked => "invoked",
            Self::LibraryToHostConverted => "library-to-host-converted",
            Self::Published => "published",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// States visited by one invocation, in order.
#[derive(Debug)]
pub(crate) struct StateTrail<'a> {
    signature: &'a str,
    states: Vec<InvocationState>,
}

impl<'a> StateTrail<'a> {
    pub(crate) fn new(signature: &'a str) -> Self {
        Self {
            signature,
            states: vec![InvocationState::ArgsCollected],
        }
    }

    pub(crate) fn current(&self) -> InvocationState {
        self.states
            .last()
            .copied()
            .unwrap_or(InvocationState::ArgsCollected)
    }

    pub(crate) fn advance(&mut self, to: InvocationState) {
        let from = self.current();
        if from.is_terminal() {
            return;
        }
        trace_state_change(self.signature, &from.to_string(), &to.to_string());
        self.states.push(to);
    }

    pub(crate) fn into_states(self) -> Vec<InvocationState> {
        self.states
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trail_stops_at_terminal() {
        let mut trail = StateTrail::new("void f()");
        trail.advance(InvocationState::HostToLibraryConverted);
        trail.advance(InvocationState::Failed);
        trail.advance(InvocationState::Invoked);
        assert_eq!(
            trail.into_states(),
            vec![
                InvocationState::ArgsCollected,
                InvocationState::HostToLibraryConverted,
                InvocationState::Failed
            ]
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(InvocationState::Invoked.to_string(), "invoked");
        assert!(InvocationState::Completed.is_terminal());
        assert!(!InvocationState::Published.is_terminal());
    }
}
