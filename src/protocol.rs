// SPDX-FileCopyrightText: 2026 Orgchat Relay Developers
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Wire Protocol Frames
//!
//! Frames are JSON objects sent as WebSocket text messages, discriminated by
//! a `type` tag. Incoming frames are decoded once at this boundary; an
//! unknown tag or a shape mismatch is a decode error and the frame is
//! dropped by the caller, never forwarded.
//!
//! `payload` and `iv` are opaque to the relay: clients encrypt end-to-end
//! and the relay only moves the ciphertext.

use serde::{Deserialize, Serialize};

/// Frames a client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// First frame on a fresh connection: the bearer token to verify.
    Auth { token: String },
    /// An end-to-end-encrypted message for the sender's room.
    Message {
        payload: String,
        /// Initialization vector; clients without authenticated encryption
        /// send the literal `"none"`.
        #[serde(default = "default_iv")]
        iv: String,
    },
}

fn default_iv() -> String {
    "none".to_string()
}

/// Frames the server sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    AuthSuccess,
    AuthError {
        message: String,
    },
    /// Full presence snapshot, sent once right after `auth_success`.
    UserList {
        users: Vec<UserEntry>,
    },
    UserJoined {
        email: String,
        #[serde(rename = "displayName")]
        display_name: String,
    },
    UserLeft {
        email: String,
    },
    /// A relayed envelope. `from` and `timestamp` are stamped by the server
    /// from its own state, never taken from the sender's frame.
    Message {
        from: String,
        payload: String,
        iv: String,
        timestamp: String,
    },
}

/// One presence entry, deduplicated by email within a `user_list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    pub email: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
}

/// Decodes a client frame from a text message. Errors mean the frame is
/// malformed and must be dropped.
pub fn decode_client_frame(text: &str) -> Result<ClientFrame, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_auth_frame() {
        let frame = decode_client_frame(r#"{"type":"auth","token":"abc.def.ghi"}"#).unwrap();
        match frame {
            ClientFrame::Auth { token } => assert_eq!(token, "abc.def.ghi"),
            other => panic!("expected auth frame, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_message_frame() {
        let frame =
            decode_client_frame(r#"{"type":"message","payload":"b64data","iv":"b64iv"}"#).unwrap();
        match frame {
            ClientFrame::Message { payload, iv } => {
                assert_eq!(payload, "b64data");
                assert_eq!(iv, "b64iv");
            }
            other => panic!("expected message frame, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_iv_defaults_to_none() {
        let frame = decode_client_frame(r#"{"type":"message","payload":"b64data"}"#).unwrap();
        match frame {
            ClientFrame::Message { iv, .. } => assert_eq!(iv, "none"),
            other => panic!("expected message frame, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        assert!(decode_client_frame(r#"{"type":"shutdown"}"#).is_err());
        assert!(decode_client_frame(r#"{"type":"user_left","email":"a@b"}"#).is_err());
    }

    #[test]
    fn test_invalid_json_is_rejected() {
        assert!(decode_client_frame("not json at all").is_err());
        assert!(decode_client_frame(r#"{"token":"no tag"}"#).is_err());
    }

    #[test]
    fn test_server_frame_tags_and_field_names() {
        let joined = serde_json::to_value(ServerFrame::UserJoined {
            email: "a@x.com".to_string(),
            display_name: "A".to_string(),
        })
        .unwrap();
        assert_eq!(
            joined,
            json!({"type": "user_joined", "email": "a@x.com", "displayName": "A"})
        );

        let ok = serde_json::to_value(ServerFrame::AuthSuccess).unwrap();
        assert_eq!(ok, json!({"type": "auth_success"}));

        let msg = serde_json::to_value(ServerFrame::Message {
            from: "a@x.com".to_string(),
            payload: "p".to_string(),
            iv: "none".to_string(),
            timestamp: "2026-01-01T00:00:00.000Z".to_string(),
        })
        .unwrap();
        assert_eq!(msg["type"], "message");
        assert_eq!(msg["from"], "a@x.com");
    }

    #[test]
    fn test_user_list_serialization() {
        let frame = ServerFrame::UserList {
            users: vec![UserEntry {
                email: "a@x.com".to_string(),
                display_name: "A".to_string(),
            }],
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "user_list");
        assert_eq!(value["users"][0]["displayName"], "A");
    }
}
