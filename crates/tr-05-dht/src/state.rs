//! DHT lifecycle state machine.
//!
//! `New → ConnectingBootstrap → (GenesisAssigned | AwaitingOnboarding)
//! → Bootstrapped → Running`. Reaching `Bootstrapped` requires at least
//! one peer connection with a verified membership chain (or a genesis
//! assignment, which is a network of one). A failure before `Running`
//! drops the node back to `ConnectingBootstrap`; the bootstrap client
//! retries with exponential backoff.

use std::fmt;

/// Lifecycle states of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhtState {
    /// Constructed, nothing started.
    New,
    /// Talking to the bootstrap coordinator.
    ConnectingBootstrap,
    /// Elected genesis; membership token held, zero peers expected.
    GenesisAssigned,
    /// Waiting for an onboarding helper or bridge coordination.
    AwaitingOnboarding,
    /// At least one validated member connection exists.
    Bootstrapped,
    /// Fully operational.
    Running,
}

impl DhtState {
    /// Whether a transition to `next` is legal.
    pub fn can_transition_to(&self, next: DhtState) -> bool {
        use DhtState::*;
        matches!(
            (self, next),
            (New, ConnectingBootstrap)
                | (ConnectingBootstrap, GenesisAssigned)
                | (ConnectingBootstrap, AwaitingOnboarding)
                | (GenesisAssigned, Bootstrapped)
                | (AwaitingOnboarding, Bootstrapped)
                | (Bootstrapped, Running)
                // Pre-running failures return to the bootstrap phase.
                | (ConnectingBootstrap, ConnectingBootstrap)
                | (GenesisAssigned, ConnectingBootstrap)
                | (AwaitingOnboarding, ConnectingBootstrap)
                | (Bootstrapped, ConnectingBootstrap)
                // A running node that loses everything starts over.
                | (Running, ConnectingBootstrap)
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, DhtState::Running)
    }
}

impl fmt::Display for DhtState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DhtState::New => "new",
            DhtState::ConnectingBootstrap => "connecting_bootstrap",
            DhtState::GenesisAssigned => "genesis_assigned",
            DhtState::AwaitingOnboarding => "awaiting_onboarding",
            DhtState::Bootstrapped => "bootstrapped",
            DhtState::Running => "running",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        use DhtState::*;
        let path = [New, ConnectingBootstrap, GenesisAssigned, Bootstrapped, Running];
        for window in path.windows(2) {
            assert!(window[0].can_transition_to(window[1]), "{:?}", window);
        }
    }

    #[test]
    fn onboarding_path_transitions() {
        use DhtState::*;
        assert!(ConnectingBootstrap.can_transition_to(AwaitingOnboarding));
        assert!(AwaitingOnboarding.can_transition_to(Bootstrapped));
    }

    #[test]
    fn failures_fall_back_to_bootstrap() {
        use DhtState::*;
        assert!(AwaitingOnboarding.can_transition_to(ConnectingBootstrap));
        assert!(Bootstrapped.can_transition_to(ConnectingBootstrap));
        assert!(Running.can_transition_to(ConnectingBootstrap));
    }

    #[test]
    fn no_skipping_to_running() {
        use DhtState::*;
        assert!(!New.can_transition_to(Running));
        assert!(!ConnectingBootstrap.can_transition_to(Running));
        assert!(!AwaitingOnboarding.can_transition_to(Running));
    }
}
