use std::path::PathBuf;
use std::time::Duration;

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod ident;
pub mod protocol;
pub mod session;
pub mod upload;

pub use error::ClientError;
pub use protocol::{ChatMessage, ChatSummary, CHUNK_SIZE};
pub use session::{ClientConfig, run_client};

/// Identity of one logged-in session. A fresh session id is minted at every
/// login; the server scopes replies and chunk acks to it.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub username: String,
    pub session_id: String,
    pub device_ip: String,
}

impl SessionContext {
    pub fn new(username: &str, device_ip: &str) -> Self {
        Self {
            username: username.to_string(),
            session_id: ident::session_id(),
            device_ip: device_ip.to_string(),
        }
    }
}

//Struct command from frontend to client core
#[derive(Debug, Clone)]
pub enum ClientCommand {
    Login {
        username: String,
    },
    Logout,
    LoadChats,
    LoadMessages {
        room_id: String,
    },
    ///Send a message, optionally with attachments to upload afterwards
    SendMessage {
        room_id: String,
        text: String,
        attachments: Vec<PathBuf>,
    },
}

//Struct event from client core to frontend
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connected,
    Disconnected {
        reason: String,
    },
    Reconnecting {
        attempt: u32,
        max: u32,
        delay: Duration,
    },
    ReconnectsExhausted,
    LoginSucceeded {
        username: String,
    },
    LoginFailed {
        message: String,
    },
    LoggedOut,
    ChatList(Vec<ChatSummary>),
    Messages {
        room_id: String,
        messages: Vec<ChatMessage>,
    },
    MessageSent,
    ///Another session posted into a room we can see
    IncomingActivity {
        room_id: String,
    },
    UploadStarted {
        file_id: u64,
        file_name: String,
        total_chunks: u32,
    },
    UploadProgress {
        file_id: u64,
        file_name: String,
        percent: u8,
    },
    UploadCompleted {
        file_id: u64,
        file_name: String,
    },
    UploadFailed {
        file_id: u64,
        message: String,
    },
    Error(String),
}
