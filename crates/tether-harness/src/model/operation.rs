//! Operations for model-based testing.
//!
//! Operations represent every input the outside world can give the client:
//! caller intents, network conditions, server behavior and the passage of
//! time. They are generated by proptest (or decoded from fuzzer bytes) and
//! applied to both the model and the real client.

use arbitrary::Arbitrary;
use tether_proto::RoomId;

/// Room identifier (small, so operations collide on the same rooms).
pub type ModelRoomId = u8;

/// Number of distinct rooms operations refer to.
pub const MODEL_ROOMS: u8 = 4;

/// Real room id for a model room.
pub fn room_id(room: ModelRoomId) -> RoomId {
    RoomId::new(format!("room-{}", room % MODEL_ROOMS))
}

/// Operations that can be applied to the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub enum Operation {
    /// Caller connects with a token the server accepts or rejects.
    Connect {
        /// Whether the backend accepts the token.
        valid_token: bool,
    },

    /// Caller tears everything down.
    Disconnect,

    /// Caller joins a room.
    JoinRoom {
        /// Room to join.
        room: ModelRoomId,
    },

    /// Caller leaves a room.
    LeaveRoom {
        /// Room to leave.
        room: ModelRoomId,
    },

    /// Caller signals typing. Never changes observable state.
    StartTyping {
        /// Room being typed in.
        room: ModelRoomId,
    },

    /// Server drops the live transport.
    DropTransport,

    /// Network goes down or comes back. Affects new opens only.
    SetNetwork {
        /// Whether opens succeed.
        up: bool,
    },

    /// Server pushes a chat message for a room.
    DeliverMessage {
        /// Room the message belongs to.
        room: ModelRoomId,
    },

    /// Advance simulation time.
    AdvanceTime {
        /// Milliseconds to advance.
        millis: u16,
    },
}
