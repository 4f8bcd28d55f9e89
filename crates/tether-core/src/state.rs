//! Connection lifecycle states.

use std::fmt;

/// Connection state.
///
/// Exactly one state is active at a time. Transitions are driven only by
/// transport signals, the authentication answer, the reconnection deadline,
/// and explicit `connect`/`disconnect` calls.
///
/// ```text
/// Disconnected --connect--> Connecting --open--> ConnectedUnauthenticated
///   --authenticated--> Authenticated --closed/error--> Reconnecting
///   --deadline--> Connecting ...
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No transport, no retry pending.
    #[default]
    Disconnected,
    /// Transport is being opened.
    Connecting,
    /// Transport is open, waiting for the authentication answer.
    ConnectedUnauthenticated,
    /// Server accepted the token for this socket.
    Authenticated,
    /// Transport was lost; a retry is scheduled.
    Reconnecting,
}

impl ConnectionState {
    /// `true` only when the session is authenticated and usable.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Authenticated)
    }

    /// `true` while a physical transport is open.
    pub fn is_transport_open(self) -> bool {
        matches!(self, Self::ConnectedUnauthenticated | Self::Authenticated)
    }

    /// `true` while a connection attempt or a retry is in flight.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Connecting | Self::ConnectedUnauthenticated | Self::Reconnecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::ConnectedUnauthenticated => "connected-unauthenticated",
            Self::Authenticated => "authenticated",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}
