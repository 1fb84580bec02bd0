//! Game server wire messages.
//!
//! All raw-format parsing for the upstream connection lives here, behind one
//! tagged-message boundary. The server speaks JSON text frames tagged by a
//! `type` field; anything the tags don't cover surfaces as a parse error the
//! caller can log and skip.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::engine::Selection;

/// Inbound frames consumed from the game server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake accepted; the connection is live.
    Welcome {
        #[serde(default)]
        table_id: Option<String>,
    },
    /// Betting opened for a new round.
    RoundOpen { round_id: String },
    /// Betting closed; the wheel is spinning.
    RoundClosed { round_id: String },
    /// Server instructs a migration to a different endpoint.
    Redirect { endpoint: String },
    /// The session token pair is no longer accepted.
    SessionInvalid {
        #[serde(default)]
        reason: Option<String>,
    },
    /// Heartbeat reply.
    Pong,
    /// Bet accepted for the round.
    BetAck { round_id: String },
    /// Bet refused.
    BetReject {
        round_id: String,
        #[serde(default)]
        code: Option<String>,
    },
}

/// Outbound frames sent to the game server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Handshake carrying the credential pair.
    Hello {
        session_token: String,
        auth_token: String,
        user_id: String,
    },
    /// Heartbeat probe.
    Ping,
    /// Bet submission. Exactly one of these goes out per submit call.
    Bet {
        round_id: String,
        selection_code: u8,
        amount: f64,
        idempotency_key: String,
    },
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("unparseable frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl ClientMessage {
    pub fn bet(round_id: &str, selection: Selection, amount: f64) -> Self {
        ClientMessage::Bet {
            round_id: round_id.to_string(),
            selection_code: selection.wire_code(),
            amount,
            idempotency_key: Uuid::new_v4().to_string(),
        }
    }

    pub fn to_frame(&self) -> String {
        // The enum serializes infallibly: no non-string map keys, no
        // serializer-failing types.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_open_deserialization() {
        let msg = ServerMessage::parse(r#"{"type":"round_open","round_id":"rnd-8812"}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::RoundOpen {
                round_id: "rnd-8812".to_string()
            }
        );
    }

    #[test]
    fn test_redirect_and_session_invalid() {
        let msg =
            ServerMessage::parse(r#"{"type":"redirect","endpoint":"wss://game-7.example.com/ws"}"#)
                .unwrap();
        assert_eq!(
            msg,
            ServerMessage::Redirect {
                endpoint: "wss://game-7.example.com/ws".to_string()
            }
        );

        let msg = ServerMessage::parse(r#"{"type":"session_invalid"}"#).unwrap();
        assert_eq!(msg, ServerMessage::SessionInvalid { reason: None });
    }

    #[test]
    fn test_bet_reject_with_and_without_code() {
        let msg = ServerMessage::parse(
            r#"{"type":"bet_reject","round_id":"rnd-1","code":"ROUND_CLOSED"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ServerMessage::BetReject {
                round_id: "rnd-1".to_string(),
                code: Some("ROUND_CLOSED".to_string())
            }
        );

        let msg = ServerMessage::parse(r#"{"type":"bet_reject","round_id":"rnd-1"}"#).unwrap();
        assert!(matches!(msg, ServerMessage::BetReject { code: None, .. }));
    }

    #[test]
    fn test_unknown_tag_is_an_error() {
        assert!(ServerMessage::parse(r#"{"type":"jackpot_tease"}"#).is_err());
        assert!(ServerMessage::parse("not json").is_err());
    }

    #[test]
    fn test_bet_frame_serialization() {
        let frame = ClientMessage::bet("rnd-42", Selection::Red, 4.0).to_frame();
        assert!(frame.contains(r#""type":"bet""#));
        assert!(frame.contains(r#""round_id":"rnd-42""#));
        assert!(frame.contains(r#""selection_code":1"#));
        assert!(frame.contains(r#""amount":4.0"#));
        assert!(frame.contains("idempotency_key"));
    }

    #[test]
    fn test_bet_idempotency_keys_are_unique() {
        let a = ClientMessage::bet("rnd-1", Selection::Even, 1.0).to_frame();
        let b = ClientMessage::bet("rnd-1", Selection::Even, 1.0).to_frame();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hello_frame_carries_pair() {
        let frame = ClientMessage::Hello {
            session_token: "st".into(),
            auth_token: "at".into(),
            user_id: "u-9".into(),
        }
        .to_frame();
        assert!(frame.contains(r#""type":"hello""#));
        assert!(frame.contains(r#""session_token":"st""#));
    }
}
