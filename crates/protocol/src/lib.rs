//! Wire types shared between the gateway and its clients: the JSON frames
//! that cross the WebSocket, the pub/sub envelope that crosses instances,
//! and the small set of constants both sides need to agree on.

use serde::{Deserialize, Serialize};

/// Default auth handshake timeout (ms) if `WS_AUTH_TIMEOUT_MS` is unset.
pub const DEFAULT_AUTH_TIMEOUT_MS: u64 = 5_000;
/// Default ping/pong heartbeat interval (ms) if `WS_HEARTBEAT_INTERVAL_MS` is unset.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
/// Default rate-limit window (ms) if `WS_RATE_LIMIT_WINDOW_MS` is unset.
pub const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 10_000;
/// Default rate-limit max requests per window if `WS_RATE_LIMIT_MAX` is unset.
pub const DEFAULT_RATE_LIMIT_MAX: u64 = 20;
/// Maximum chat message length, trimmed, in characters.
pub const CHAT_MAX_CHARS: usize = 500;
/// Seat id bounds, inclusive.
pub const SEAT_ID_MIN: i64 = 0;
pub const SEAT_ID_MAX: i64 = 8;
/// Default buy-in when omitted or non-positive.
pub const DEFAULT_BUY_IN: f64 = 200.0;

/// Policy-denial / result reason codes. These are sent verbatim as the
/// `reason` field of `ActionResult`/`ChatError` and are part of the wire
/// contract, not just internal book-keeping.
pub mod reasons {
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const NOT_SEATED: &str = "not_seated";
    pub const MUTED: &str = "muted";
    pub const EMPTY_MESSAGE: &str = "empty_message";
    pub const MESSAGE_TOO_LONG: &str = "message_too_long";
    pub const MISSING_AMOUNT: &str = "missing_amount";
    pub const INVALID_ACTION: &str = "invalid_action";
    pub const INTERNAL_ERROR: &str = "internal_error";
}

/// Close codes used when tearing down a WebSocket per the session lifecycle.
pub mod close_codes {
    pub const UNAUTHORIZED: u16 = 1008;
    pub const INTERNAL_ERROR: u16 = 1011;
}

/// A channel name in the subscription index: `lobby`, `table:<id>`, or `chat:<id>`.
pub fn table_channel(table_id: &str) -> String {
    format!("table:{table_id}")
}

pub fn chat_channel(table_id: &str) -> String {
    format!("chat:{table_id}")
}

pub const LOBBY_CHANNEL: &str = "lobby";

/// The fixed, closed set of actions the table hub accepts. `ALL_IN` is
/// deliberately absent; unknown action strings (including `ALL_IN`) are
/// rejected with `reasons::INVALID_ACTION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableAction {
    #[serde(rename = "FOLD")]
    Fold,
    #[serde(rename = "CHECK")]
    Check,
    #[serde(rename = "CALL")]
    Call,
    #[serde(rename = "BET")]
    Bet,
    #[serde(rename = "RAISE")]
    Raise,
}

impl TableAction {
    /// Maps the client-facing action label to the fixed variant set.
    /// Anything not in the table (including `ALL_IN`) is `None`.
    pub fn from_client_label(label: &str) -> Option<Self> {
        match label {
            "Fold" => Some(Self::Fold),
            "Check" => Some(Self::Check),
            "Call" => Some(Self::Call),
            "Bet" => Some(Self::Bet),
            "Raise" => Some(Self::Raise),
            _ => None,
        }
    }

    pub fn requires_amount(self) -> bool {
        matches!(self, Self::Bet | Self::Raise)
    }
}

/// Client -> server frames, discriminated by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    Authenticate {
        token: String,
    },
    SubscribeTable {
        #[serde(rename = "tableId")]
        table_id: String,
    },
    UnsubscribeTable {
        #[serde(rename = "tableId")]
        table_id: String,
    },
    ResyncTable {
        #[serde(rename = "tableId")]
        table_id: String,
    },
    JoinSeat {
        #[serde(rename = "tableId")]
        table_id: String,
        #[serde(rename = "seatId")]
        seat_id: serde_json::Value,
        #[serde(rename = "buyInAmount", default)]
        buy_in_amount: Option<serde_json::Value>,
    },
    LeaveTable {
        #[serde(rename = "tableId")]
        table_id: String,
    },
    Action {
        #[serde(rename = "tableId")]
        table_id: String,
        action: String,
        #[serde(default)]
        amount: Option<serde_json::Value>,
    },
    SubscribeChat {
        #[serde(rename = "tableId")]
        table_id: String,
    },
    UnsubscribeChat {
        #[serde(rename = "tableId")]
        table_id: String,
    },
    ChatSend {
        #[serde(rename = "tableId")]
        table_id: String,
        message: String,
    },
}

impl ClientMessage {
    /// Table id this frame is scoped to, if any; used by the router to
    /// attach a tracing attribute without matching on every variant twice.
    pub fn table_id(&self) -> Option<&str> {
        match self {
            ClientMessage::Authenticate { .. } => None,
            ClientMessage::SubscribeTable { table_id }
            | ClientMessage::UnsubscribeTable { table_id }
            | ClientMessage::ResyncTable { table_id }
            | ClientMessage::JoinSeat { table_id, .. }
            | ClientMessage::LeaveTable { table_id }
            | ClientMessage::Action { table_id, .. }
            | ClientMessage::SubscribeChat { table_id }
            | ClientMessage::UnsubscribeChat { table_id }
            | ClientMessage::ChatSend { table_id, .. } => Some(table_id),
        }
    }
}

/// A persisted/broadcast chat record. The display-name field is `username`
/// in both the persisted record and the broadcast payload (see DESIGN.md
/// for why this name was picked over `nickname`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub username: String,
    pub text: String,
    pub ts: String,
}

/// Server -> client frames, discriminated by `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    Welcome {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "connectionId")]
        connection_id: String,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    LobbyTablesUpdated {
        tables: Vec<serde_json::Value>,
    },
    TableSnapshot {
        #[serde(rename = "tableState")]
        table_state: serde_json::Value,
    },
    TablePatch {
        #[serde(rename = "tableId")]
        table_id: String,
        patch: serde_json::Value,
    },
    HoleCards {
        #[serde(rename = "tableId")]
        table_id: String,
        #[serde(rename = "handId", skip_serializing_if = "Option::is_none")]
        hand_id: Option<String>,
        cards: Vec<serde_json::Value>,
    },
    ActionResult {
        #[serde(rename = "tableId")]
        table_id: String,
        accepted: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    ChatSubscribed {
        #[serde(rename = "tableId")]
        table_id: String,
        history: Vec<ChatRecord>,
    },
    ChatError {
        #[serde(rename = "tableId")]
        table_id: String,
        reason: String,
    },
    ChatMessage {
        #[serde(rename = "tableId")]
        table_id: String,
        message: ChatRecord,
    },
    TimerUpdate {
        #[serde(rename = "tableId")]
        table_id: String,
        #[serde(rename = "handId")]
        hand_id: String,
        #[serde(rename = "currentTurnSeat")]
        current_turn_seat: i64,
        #[serde(rename = "deadlineTs")]
        deadline_ts: String,
    },
    SpectatorJoined {
        #[serde(rename = "tableId")]
        table_id: String,
        #[serde(rename = "userId")]
        user_id: String,
    },
    SpectatorLeft {
        #[serde(rename = "tableId")]
        table_id: String,
        #[serde(rename = "userId")]
        user_id: String,
    },
}

/// The channel kind stamped on every pub/sub message. `Lobby` always pairs
/// with `table_id == "lobby"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PubSubKind {
    Table,
    Chat,
    Timer,
    Lobby,
}

/// The single envelope published on `gateway:ws:events`. `source_instance_id`
/// is always non-empty; receivers drop messages whose source is themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubSubMessage {
    pub kind: PubSubKind,
    #[serde(rename = "tableId")]
    pub table_id: String,
    pub payload: serde_json::Value,
    #[serde(rename = "sourceInstanceId")]
    pub source_instance_id: String,
}

impl PubSubMessage {
    pub fn new(
        kind: PubSubKind,
        table_id: impl Into<String>,
        payload: serde_json::Value,
        source_instance_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            table_id: table_id.into(),
            payload,
            source_instance_id: source_instance_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_action_rejects_all_in() {
        assert!(TableAction::from_client_label("AllIn").is_none());
        assert!(TableAction::from_client_label("ALL_IN").is_none());
    }

    #[test]
    fn table_action_maps_known_labels() {
        assert_eq!(TableAction::from_client_label("Fold"), Some(TableAction::Fold));
        assert_eq!(TableAction::from_client_label("Raise"), Some(TableAction::Raise));
        assert!(TableAction::Bet.requires_amount());
        assert!(!TableAction::Fold.requires_amount());
    }

    #[test]
    fn client_message_carries_table_id() {
        let msg = ClientMessage::ChatSend {
            table_id: "T1".into(),
            message: "hi".into(),
        };
        assert_eq!(msg.table_id(), Some("T1"));
        let auth = ClientMessage::Authenticate { token: "x".into() };
        assert_eq!(auth.table_id(), None);
    }

    #[test]
    fn channel_names_use_colon_prefixes() {
        assert_eq!(table_channel("T1"), "table:T1");
        assert_eq!(chat_channel("T1"), "chat:T1");
        assert_eq!(LOBBY_CHANNEL, "lobby");
    }

    #[test]
    fn server_message_serializes_with_tag() {
        let msg = ServerMessage::Welcome {
            user_id: "u1".into(),
            connection_id: "c1".into(),
        };
        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json["type"], "Welcome");
        assert_eq!(json["userId"], "u1");
    }
}
