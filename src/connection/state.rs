use std::fmt;

use crate::RpcError;

/// Lifecycle state of a [`ConnectionManager`](crate::ConnectionManager).
///
/// ```text
/// disconnected ──start()──► connecting ──► connected
///      ▲                        │              │
///      └────── failure/stop() ──┴──────────────┤
///                               ▲              │
///                               └── reconnect ─┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Snapshot broadcast on every lifecycle transition.
///
/// `connected()` being true always implies `error()` is `None`; the
/// constructors enforce it.
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    // ---
    state: ConnectionState,
    error: Option<RpcError>,
}

impl ConnectionEvent {
    // ---

    /// Event for entering `state`, optionally caused by `error`.
    ///
    /// Any error passed along with [`ConnectionState::Connected`] is discarded.
    pub fn new(state: ConnectionState, error: Option<RpcError>) -> Self {
        // ---
        let error = match state {
            ConnectionState::Connected => None,
            _ => error,
        };
        Self { state, error }
    }

    /// True only for the `Connected` state.
    pub fn connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// The failure that triggered this transition, if any.
    pub fn error(&self) -> Option<&RpcError> {
        self.error.as_ref()
    }

    /// The state that was entered.
    pub fn state(&self) -> ConnectionState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_connected_event_never_carries_error() {
        // ---
        let event = ConnectionEvent::new(
            ConnectionState::Connected,
            Some(RpcError::Transport("ignored".into())),
        );
        assert!(event.connected());
        assert!(event.error().is_none());
    }

    #[test]
    fn test_disconnected_event_keeps_error() {
        // ---
        let event = ConnectionEvent::new(
            ConnectionState::Disconnected,
            Some(RpcError::ConnectionLost("reset".into())),
        );
        assert!(!event.connected());
        assert!(event.error().unwrap().is_connection_lost());
    }
}
