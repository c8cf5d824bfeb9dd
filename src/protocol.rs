//! Wire types shared with the chat server.
//!
//! Two frame kinds flow over the connection: text frames carrying a JSON
//! envelope, and binary frames carrying one file chunk framed as
//! `[4-byte LE header length][JSON header][raw chunk bytes]`.

use serde::{Deserialize, Serialize};

use crate::SessionContext;
use crate::error::ClientError;
use crate::ident;

/// Fixed chunk size for file uploads (15 MiB).
pub const CHUNK_SIZE: u64 = 15 * 1024 * 1024;

/// Correlation identifiers attached to every outbound request.
#[derive(Debug, Clone, Serialize)]
pub struct Correlation {
    pub sessionid: String,
    #[serde(rename = "batchId")]
    pub batch_id: String,
    #[serde(rename = "requestId")]
    pub request_id: String,
}

impl Correlation {
    /// Fresh batch/request identifiers for an existing session.
    pub fn fresh(session_id: &str) -> Self {
        Self {
            sessionid: session_id.to_string(),
            batch_id: ident::batch_id(),
            request_id: ident::request_id(),
        }
    }
}

/// Outbound control actions, serialized as `{"action": "...", ...}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientRequest {
    Login {
        username: String,
        deviceip: String,
        #[serde(flatten)]
        ids: Correlation,
    },
    Logout {
        username: String,
        deviceip: String,
        #[serde(flatten)]
        ids: Correlation,
    },
    GetChats {
        username: String,
        #[serde(flatten)]
        ids: Correlation,
    },
    GetMessages {
        username: String,
        roomid: String,
        #[serde(flatten)]
        ids: Correlation,
    },
    SendMessage {
        username: String,
        roomid: String,
        message: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        files: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        size: Option<u64>,
        #[serde(flatten)]
        ids: Correlation,
    },
}

/// Top-level inbound reply shape. `phpOutput` nests one result object per
/// action key present in the reply; a single frame may carry several.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerEnvelope {
    #[serde(rename = "phpOutput")]
    pub output: Option<serde_json::Value>,
    #[serde(rename = "originalData", default)]
    pub original: Option<serde_json::Value>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Generic `{status, message}` result (login, logout).
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResult {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl StatusResult {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// One entry in the chat list.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatSummary {
    #[serde(rename = "RoomId")]
    pub room_id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "MsgTxt", default)]
    pub preview: String,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "Unread", default)]
    pub unread: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatsResult {
    pub status: String,
    #[serde(default)]
    pub chats: Vec<ChatSummary>,
}

/// One message in a room.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "User")]
    pub user: String,
    #[serde(rename = "Name", default)]
    pub display_name: Option<String>,
    #[serde(rename = "MsgTxt")]
    pub text: String,
    #[serde(rename = "Sent_At", default)]
    pub sent_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesResult {
    pub status: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

/// A file the server accepted for upload in a send_message reply.
#[derive(Debug, Clone, Deserialize)]
pub struct AcceptedFile {
    #[serde(rename = "FileName")]
    pub file_name: String,
    #[serde(rename = "FileId")]
    pub file_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageResult {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub files: Vec<AcceptedFile>,
}

/// Per-chunk acknowledgement from the server.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkAck {
    pub status: String,
    #[serde(rename = "FileId")]
    pub file_id: u64,
    #[serde(rename = "ChunkIndex")]
    pub chunk_index: u32,
    #[serde(default)]
    pub message: Option<String>,
}

impl ChunkAck {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Incoming-message notification for a receiving session.
#[derive(Debug, Clone, Deserialize)]
pub struct ReceiverSession {
    #[serde(rename = "RoomId")]
    pub room_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiverSessionsResult {
    #[serde(default)]
    pub receiver_sessions: Vec<ReceiverSession>,
}

/// Metadata header carried in front of every chunk payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkHeader {
    pub action: String,
    pub username: String,
    pub sessionid: String,
    pub fileid: u64,
    pub filename: String,
    pub roomid: String,
    pub chunkindex: u32,
    pub totalchunks: u32,
    #[serde(rename = "batchId")]
    pub batch_id: String,
    #[serde(rename = "requestId")]
    pub request_id: String,
}

impl ChunkHeader {
    pub fn new(
        session: &SessionContext,
        file_id: u64,
        file_name: &str,
        room_id: &str,
        chunk_index: u32,
        total_chunks: u32,
    ) -> Self {
        Self {
            action: "chunk_upload".to_string(),
            username: session.username.clone(),
            sessionid: session.session_id.clone(),
            fileid: file_id,
            filename: file_name.to_string(),
            roomid: room_id.to_string(),
            chunkindex: chunk_index,
            totalchunks: total_chunks,
            batch_id: ident::batch_id(),
            request_id: ident::request_id(),
        }
    }
}

/// Build one binary chunk frame: length-prefixed JSON header, then payload.
pub fn encode_chunk_frame(header: &ChunkHeader, payload: &[u8]) -> Result<Vec<u8>, ClientError> {
    let header_json = serde_json::to_vec(header)?;
    let mut frame = Vec::with_capacity(4 + header_json.len() + payload.len());
    frame.extend_from_slice(&(header_json.len() as u32).to_le_bytes());
    frame.extend_from_slice(&header_json);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Split a binary chunk frame back into header and payload.
pub fn decode_chunk_frame(frame: &[u8]) -> Result<(ChunkHeader, &[u8]), ClientError> {
    if frame.len() < 4 {
        return Err(ClientError::BadFrame(
            "frame shorter than length prefix".to_string(),
        ));
    }
    let header_len =
        u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    let rest = &frame[4..];
    if rest.len() < header_len {
        return Err(ClientError::BadFrame(format!(
            "header length {} exceeds frame size {}",
            header_len,
            rest.len()
        )));
    }
    let header: ChunkHeader = serde_json::from_slice(&rest[..header_len])?;
    Ok((header, &rest[header_len..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session() -> SessionContext {
        SessionContext {
            username: "alice".to_string(),
            session_id: "sess_1_abc".to_string(),
            device_ip: "127.0.0.1".to_string(),
        }
    }

    #[test]
    fn test_request_serializes_action_tag() {
        let req = ClientRequest::Login {
            username: "alice".to_string(),
            deviceip: "127.0.0.1".to_string(),
            ids: Correlation::fresh("sess_1_abc"),
        };
        let value: serde_json::Value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["action"], "login");
        assert_eq!(value["username"], "alice");
        assert_eq!(value["sessionid"], "sess_1_abc");
        assert!(value["batchId"].is_string());
        assert!(value["requestId"].is_string());
    }

    #[test]
    fn test_send_message_omits_empty_files() {
        let req = ClientRequest::SendMessage {
            username: "alice".to_string(),
            roomid: "room1".to_string(),
            message: "hi".to_string(),
            files: Vec::new(),
            size: None,
            ids: Correlation::fresh("sess_1_abc"),
        };
        let value: serde_json::Value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["action"], "send_message");
        assert!(value.get("files").is_none());
        assert!(value.get("size").is_none());
    }

    #[test]
    fn test_chunk_frame_round_trip() {
        let header = ChunkHeader::new(&test_session(), 42, "a.bin", "room1", 1, 3);
        let payload = vec![0xABu8; 1024];
        let frame = encode_chunk_frame(&header, &payload).unwrap();

        let (decoded, body) = decode_chunk_frame(&frame).unwrap();
        assert_eq!(decoded.action, "chunk_upload");
        assert_eq!(decoded.fileid, 42);
        assert_eq!(decoded.filename, "a.bin");
        assert_eq!(decoded.chunkindex, 1);
        assert_eq!(decoded.totalchunks, 3);
        assert_eq!(body, &payload[..]);
    }

    #[test]
    fn test_chunk_frame_prefix_is_little_endian() {
        let header = ChunkHeader::new(&test_session(), 1, "f", "r", 0, 1);
        let frame = encode_chunk_frame(&header, b"xy").unwrap();
        let header_len = serde_json::to_vec(&header).unwrap().len();
        assert_eq!(
            u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize,
            header_len,
        );
        assert_eq!(frame.len(), 4 + header_len + 2);
    }

    #[test]
    fn test_decode_rejects_truncated_frames() {
        assert!(decode_chunk_frame(&[1, 0]).is_err());
        // prefix claims 100 header bytes, only 2 present
        let mut frame = 100u32.to_le_bytes().to_vec();
        frame.extend_from_slice(b"{}");
        assert!(decode_chunk_frame(&frame).is_err());
    }

    #[test]
    fn test_envelope_with_multiple_results() {
        let raw = r#"{
            "phpOutput": {
                "login": {"status": "success"},
                "get_chats": {"status": "success", "chats": [
                    {"RoomId": "r1", "Name": "General", "MsgTxt": "hey", "Status": "now", "Unread": 2}
                ]}
            },
            "originalData": {"action": "login"}
        }"#;
        let envelope: ServerEnvelope = serde_json::from_str(raw).unwrap();
        let output = envelope.output.unwrap();
        assert!(output.get("login").is_some());
        assert!(output.get("get_chats").is_some());

        let chats: ChatsResult =
            serde_json::from_value(output["get_chats"].clone()).unwrap();
        assert_eq!(chats.chats.len(), 1);
        assert_eq!(chats.chats[0].room_id, "r1");
        assert_eq!(chats.chats[0].unread, 2);
    }
}
