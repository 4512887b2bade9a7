use std::fmt;

use super::ConnectionError;

/// Lifecycle state of the persistent connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    Failed,
    Offline,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Offline => "offline",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What callers (and UIs) see: state plus the context needed to render it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Reconnect attempt in the current outage; 0 while connected.
    pub reconnect_attempt: u32,
    pub last_error: Option<String>,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Connecting,
            reconnect_attempt: 0,
            last_error: None,
        }
    }
}

/// Inputs that move the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Connected,
    ConnectFailed,
    Dropped,
    Exhausted,
    NetworkLost,
    NetworkRestored,
    Close,
    Retry,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Transition::Connected => "connected",
            Transition::ConnectFailed => "connect_failed",
            Transition::Dropped => "dropped",
            Transition::Exhausted => "exhausted",
            Transition::NetworkLost => "network_lost",
            Transition::NetworkRestored => "network_restored",
            Transition::Close => "close",
            Transition::Retry => "retry",
        };
        f.write_str(s)
    }
}

/// Pure connection state machine. Rejects transitions that are not part of
/// the lifecycle instead of silently ignoring them.
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self {
            state: ConnectionState::Connecting,
        }
    }
}

impl ConnectionStateMachine {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn apply(&mut self, transition: Transition) -> Result<ConnectionState, ConnectionError> {
        use ConnectionState::*;

        match transition {
            Transition::Connected => self.transition_from_any_of(&[Connecting, Reconnecting], Connected, transition),
            Transition::ConnectFailed => {
                self.transition_from_any_of(&[Connecting, Reconnecting], Reconnecting, transition)
            }
            Transition::Dropped => self.transition_from_any_of(&[Connected], Reconnecting, transition),
            Transition::Exhausted => self.transition_from_any_of(&[Connecting, Reconnecting], Failed, transition),
            Transition::NetworkLost => {
                self.transition_from_any_of(&[Connecting, Connected, Reconnecting, Failed], Offline, transition)
            }
            Transition::NetworkRestored => self.transition_from_any_of(&[Offline], Reconnecting, transition),
            Transition::Close => self.transition_from_any_of(
                &[Connecting, Connected, Reconnecting, Failed, Offline],
                Disconnected,
                transition,
            ),
            Transition::Retry => self.transition_from_any_of(&[Disconnected, Failed], Connecting, transition),
        }
    }

    fn transition_from_any_of(
        &mut self,
        expected: &[ConnectionState],
        next: ConnectionState,
        transition: Transition,
    ) -> Result<ConnectionState, ConnectionError> {
        if !expected.contains(&self.state) {
            return Err(ConnectionError::InvalidTransition {
                from: self.state,
                transition,
            });
        }
        self.state = next;
        Ok(next)
    }
}
