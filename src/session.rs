//! Client actor: owns the connection, the dispatcher and the upload engine,
//! and turns [`ClientCommand`]s plus transport traffic into [`ClientEvent`]s.
//!
//! Run [`run_client`] on a tokio runtime; the frontend talks to it purely
//! over the two channels.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::connection::{ConnState, ConnectionManager, TransportEvent};
use crate::dispatch::{ActionKey, Dispatcher};
use crate::error::ClientError;
use crate::protocol::{
    CHUNK_SIZE, ChatsResult, ChunkAck, ClientRequest, Correlation, MessagesResult,
    ReceiverSessionsResult, SendMessageResult, StatusResult,
};
use crate::upload::{AckOutcome, StartOutcome, UploadEngine};
use crate::{ClientCommand, ClientEvent, SessionContext};

/// How long a finished upload stays visible before its task is dropped.
const COMPLETED_LINGER: Duration = Duration::from_secs(2);

/// Static settings for one client instance.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    pub device_ip: String,
    pub chunk_size: u64,
}

impl ClientConfig {
    pub fn new(endpoint: &str) -> Result<Self, ClientError> {
        url::Url::parse(endpoint)?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            device_ip: "127.0.0.1".to_string(),
            chunk_size: CHUNK_SIZE,
        })
    }

    pub fn with_device_ip(mut self, device_ip: &str) -> Self {
        self.device_ip = device_ip.to_string();
        self
    }

    /// Override the upload chunk size. Meant for tests; production traffic
    /// uses the default.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

/// Typed results routed out of the dispatcher closures.
enum Routed {
    Login(StatusResult),
    Chats(ChatsResult),
    Messages(MessagesResult),
    SendMessage(SendMessageResult),
    ChunkAck(ChunkAck),
    Receiver(ReceiverSessionsResult),
}

enum TimerEvent {
    Reconnect,
    DropUpload(u64),
}

fn route<T, F>(tx: &mpsc::UnboundedSender<Routed>, value: &Value, wrap: F)
where
    T: serde::de::DeserializeOwned,
    F: Fn(T) -> Routed,
{
    match serde_json::from_value(value.clone()) {
        Ok(parsed) => {
            let _ = tx.send(wrap(parsed));
        }
        Err(e) => tracing::warn!("unusable result payload: {}", e),
    }
}

/// Drive one client until the command channel closes.
pub async fn run_client(
    config: ClientConfig,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
    event_tx: mpsc::Sender<ClientEvent>,
) {
    let (transport_tx, mut transport_rx) = mpsc::channel(64);
    let (routed_tx, mut routed_rx) = mpsc::unbounded_channel();
    let (timer_tx, mut timer_rx) = mpsc::unbounded_channel();

    let mut client = ChatClient::new(config, transport_tx, &routed_tx, timer_tx, event_tx);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => client.handle_command(cmd).await,
                None => break,
            },
            Some(event) = transport_rx.recv() => client.handle_transport(event).await,
            Some(routed) = routed_rx.recv() => client.handle_routed(routed).await,
            Some(timer) = timer_rx.recv() => client.handle_timer(timer).await,
        }
    }

    client.shutdown().await;
}

struct ChatClient {
    conn: ConnectionManager,
    uploads: UploadEngine,
    dispatcher: Dispatcher,
    session: Option<SessionContext>,
    /// True between a successful login and logout/exhausted reconnects.
    /// Automatic reconnects only run while the session is active.
    active: bool,
    current_room: Option<String>,
    /// Attachment paths keyed by file name, waiting for the server to hand
    /// back file ids in the send_message reply.
    pending_attachments: HashMap<String, (PathBuf, String)>,
    device_ip: String,
    event_tx: mpsc::Sender<ClientEvent>,
    timer_tx: mpsc::UnboundedSender<TimerEvent>,
}

impl ChatClient {
    fn new(
        config: ClientConfig,
        transport_tx: mpsc::Sender<TransportEvent>,
        routed_tx: &mpsc::UnboundedSender<Routed>,
        timer_tx: mpsc::UnboundedSender<TimerEvent>,
        event_tx: mpsc::Sender<ClientEvent>,
    ) -> Self {
        let mut dispatcher = Dispatcher::new();
        let tx = routed_tx.clone();
        dispatcher.bind(ActionKey::Login, move |v| route(&tx, v, Routed::Login));
        let tx = routed_tx.clone();
        dispatcher.bind(ActionKey::GetChats, move |v| route(&tx, v, Routed::Chats));
        let tx = routed_tx.clone();
        dispatcher.bind(ActionKey::GetMessages, move |v| {
            route(&tx, v, Routed::Messages)
        });
        let tx = routed_tx.clone();
        dispatcher.bind(ActionKey::SendMessage, move |v| {
            route(&tx, v, Routed::SendMessage)
        });
        let tx = routed_tx.clone();
        dispatcher.bind(ActionKey::ChunkUpload, move |v| {
            route(&tx, v, Routed::ChunkAck)
        });
        let tx = routed_tx.clone();
        dispatcher.bind(ActionKey::ReceiverSessions, move |v| {
            route(&tx, v, Routed::Receiver)
        });

        Self {
            conn: ConnectionManager::new(config.endpoint, transport_tx),
            uploads: UploadEngine::with_chunk_size(config.chunk_size),
            dispatcher,
            session: None,
            active: false,
            current_room: None,
            pending_attachments: HashMap::new(),
            device_ip: config.device_ip,
            event_tx,
            timer_tx,
        }
    }

    async fn emit(&self, event: ClientEvent) {
        let _ = self.event_tx.send(event).await;
    }

    async fn handle_command(&mut self, cmd: ClientCommand) {
        match cmd {
            ClientCommand::Login { username } => {
                self.session = Some(SessionContext::new(&username, &self.device_ip));
                self.active = false;
                self.conn.reset_backoff();
                if self.conn.state() == ConnState::Open {
                    // the socket survives a rejected login; handshake again
                    // in place rather than reconnecting
                    self.send_login().await;
                } else if let Err(e) = self.conn.connect().await {
                    self.emit(ClientEvent::LoginFailed {
                        message: e.to_string(),
                    })
                    .await;
                }
                // otherwise the handshake happens on Opened
            }
            ClientCommand::Logout => {
                if let Some(session) = self.session.clone() {
                    if self.conn.state() == ConnState::Open {
                        let req = ClientRequest::Logout {
                            username: session.username.clone(),
                            deviceip: session.device_ip.clone(),
                            ids: Correlation::fresh(&session.session_id),
                        };
                        self.send_request(&req).await;
                    }
                }
                self.active = false;
                self.session = None;
                self.current_room = None;
                self.pending_attachments.clear();
                self.uploads.abandon_all();
                self.conn.close().await;
                self.emit(ClientEvent::LoggedOut).await;
            }
            ClientCommand::LoadChats => {
                let Some(session) = self.session.clone() else {
                    self.emit(ClientEvent::Error("not logged in".to_string())).await;
                    return;
                };
                let req = ClientRequest::GetChats {
                    username: session.username.clone(),
                    ids: Correlation::fresh(&session.session_id),
                };
                self.send_request(&req).await;
            }
            ClientCommand::LoadMessages { room_id } => {
                self.current_room = Some(room_id.clone());
                self.request_messages(&room_id).await;
            }
            ClientCommand::SendMessage {
                room_id,
                text,
                attachments,
            } => {
                self.send_message(room_id, text, attachments).await;
            }
        }
    }

    async fn send_message(&mut self, room_id: String, text: String, attachments: Vec<PathBuf>) {
        let Some(session) = self.session.clone() else {
            self.emit(ClientEvent::Error("not logged in".to_string())).await;
            return;
        };
        self.current_room = Some(room_id.clone());

        let mut file_names = Vec::new();
        let mut total_size: u64 = 0;
        for path in attachments {
            let name = match path.file_name() {
                Some(name) => name.to_string_lossy().to_string(),
                None => {
                    self.emit(ClientEvent::Error(format!(
                        "attachment has no file name: {}",
                        path.display()
                    )))
                    .await;
                    continue;
                }
            };
            match tokio::fs::metadata(&path).await {
                Ok(meta) => total_size += meta.len(),
                Err(e) => {
                    self.emit(ClientEvent::Error(format!(
                        "cannot read attachment {}: {}",
                        path.display(),
                        e
                    )))
                    .await;
                    continue;
                }
            }
            self.pending_attachments
                .insert(name.clone(), (path, room_id.clone()));
            file_names.push(name);
        }

        let size = if file_names.is_empty() {
            None
        } else {
            Some(total_size)
        };
        let req = ClientRequest::SendMessage {
            username: session.username.clone(),
            roomid: room_id,
            message: text,
            files: file_names,
            size,
            ids: Correlation::fresh(&session.session_id),
        };
        self.send_request(&req).await;
    }

    async fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                self.emit(ClientEvent::Connected).await;
                self.send_login().await;
            }
            TransportEvent::Text(raw) => {
                self.dispatcher.dispatch_text(&raw);
            }
            TransportEvent::Binary(data) => {
                // chunk acks may arrive as bare JSON on the binary channel
                match serde_json::from_slice::<ChunkAck>(&data) {
                    Ok(ack) => self.apply_chunk_ack(ack).await,
                    Err(e) => tracing::warn!("dropping unreadable binary frame: {}", e),
                }
            }
            TransportEvent::Closed => {
                self.connection_lost("connection closed by server".to_string())
                    .await;
            }
            TransportEvent::Failed(reason) => {
                self.connection_lost(reason).await;
            }
        }
    }

    /// Common teardown for unsolicited closes and failures. Uploads do not
    /// survive a drop; a later reconnect starts with none in flight.
    async fn connection_lost(&mut self, reason: String) {
        if self.conn.state() == ConnState::Closed && !self.active {
            return;
        }
        self.conn.mark_lost();
        self.uploads.abandon_all();
        self.pending_attachments.clear();
        if self.active {
            self.emit(ClientEvent::Disconnected { reason }).await;
            self.schedule_reconnect().await;
        }
    }

    async fn schedule_reconnect(&mut self) {
        match self.conn.next_reconnect_delay() {
            Some(delay) => {
                let attempt = self.conn.reconnect_attempts();
                let max = self.conn.reconnect_limit();
                tracing::info!(
                    "reconnect attempt {}/{} in {:?}",
                    attempt,
                    max,
                    delay
                );
                self.emit(ClientEvent::Reconnecting {
                    attempt,
                    max,
                    delay,
                })
                .await;
                let tx = self.timer_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(TimerEvent::Reconnect);
                });
            }
            None => {
                tracing::warn!("reconnect budget exhausted");
                self.active = false;
                self.emit(ClientEvent::ReconnectsExhausted).await;
            }
        }
    }

    async fn handle_timer(&mut self, timer: TimerEvent) {
        match timer {
            TimerEvent::Reconnect => {
                if !self.active || self.conn.state() == ConnState::Open {
                    return;
                }
                // a failure surfaces as TransportEvent::Failed and schedules
                // the next attempt from there
                let _ = self.conn.connect().await;
            }
            TimerEvent::DropUpload(file_id) => {
                self.uploads.remove(file_id);
            }
        }
    }

    async fn handle_routed(&mut self, routed: Routed) {
        match routed {
            Routed::Login(result) => {
                if result.is_success() {
                    self.active = true;
                    if let Some(session) = self.session.clone() {
                        self.emit(ClientEvent::LoginSucceeded {
                            username: session.username.clone(),
                        })
                        .await;
                        let req = ClientRequest::GetChats {
                            username: session.username.clone(),
                            ids: Correlation::fresh(&session.session_id),
                        };
                        self.send_request(&req).await;
                    }
                } else {
                    self.active = false;
                    self.emit(ClientEvent::LoginFailed {
                        message: result
                            .message
                            .unwrap_or_else(|| "login rejected".to_string()),
                    })
                    .await;
                }
            }
            Routed::Chats(result) => {
                self.emit(ClientEvent::ChatList(result.chats)).await;
            }
            Routed::Messages(result) => {
                let room_id = self.current_room.clone().unwrap_or_default();
                self.emit(ClientEvent::Messages {
                    room_id,
                    messages: result.messages,
                })
                .await;
            }
            Routed::SendMessage(result) => {
                if result.status == "success" {
                    self.emit(ClientEvent::MessageSent).await;
                    for file in &result.files {
                        self.start_accepted_upload(file.file_id, &file.file_name)
                            .await;
                    }
                    if let Some(room_id) = self.current_room.clone() {
                        self.request_messages(&room_id).await;
                    }
                } else {
                    self.emit(ClientEvent::Error(
                        result
                            .message
                            .unwrap_or_else(|| "send_message failed".to_string()),
                    ))
                    .await;
                }
            }
            Routed::ChunkAck(ack) => {
                self.apply_chunk_ack(ack).await;
            }
            Routed::Receiver(result) => {
                for receiver in result.receiver_sessions {
                    self.emit(ClientEvent::IncomingActivity {
                        room_id: receiver.room_id.clone(),
                    })
                    .await;
                    if self.current_room.as_deref() == Some(receiver.room_id.as_str()) {
                        self.request_messages(&receiver.room_id).await;
                    }
                }
            }
        }
    }

    async fn start_accepted_upload(&mut self, file_id: u64, file_name: &str) {
        let Some(session) = self.session.clone() else {
            return;
        };
        let Some((path, room_id)) = self.pending_attachments.remove(file_name) else {
            tracing::warn!("server accepted unknown file {:?}", file_name);
            return;
        };
        match self
            .uploads
            .start_upload(path, file_id, file_name.to_string(), room_id, &session)
            .await
        {
            Ok(StartOutcome::Chunk(frame)) => {
                let total_chunks = self
                    .uploads
                    .task(file_id)
                    .map(|t| t.total_chunks)
                    .unwrap_or_default();
                self.emit(ClientEvent::UploadStarted {
                    file_id,
                    file_name: file_name.to_string(),
                    total_chunks,
                })
                .await;
                if let Err(e) = self.conn.send_binary(frame).await {
                    self.emit(ClientEvent::UploadFailed {
                        file_id,
                        message: e.to_string(),
                    })
                    .await;
                }
            }
            Ok(StartOutcome::Empty { file_name }) => {
                self.emit(ClientEvent::UploadStarted {
                    file_id,
                    file_name: file_name.clone(),
                    total_chunks: 0,
                })
                .await;
                self.emit(ClientEvent::UploadCompleted { file_id, file_name })
                    .await;
                self.linger_then_drop(file_id);
            }
            Err(e) => {
                self.emit(ClientEvent::UploadFailed {
                    file_id,
                    message: e.to_string(),
                })
                .await;
            }
        }
    }

    async fn apply_chunk_ack(&mut self, ack: ChunkAck) {
        let Some(session) = self.session.clone() else {
            return;
        };
        let file_id = ack.file_id;
        match self.uploads.handle_ack(&ack, &session).await {
            Ok(AckOutcome::Continue {
                file_name,
                percent,
                frame,
            }) => {
                self.emit(ClientEvent::UploadProgress {
                    file_id,
                    file_name,
                    percent,
                })
                .await;
                if let Err(e) = self.conn.send_binary(frame).await {
                    self.emit(ClientEvent::UploadFailed {
                        file_id,
                        message: e.to_string(),
                    })
                    .await;
                }
            }
            Ok(AckOutcome::Complete { file_name, percent }) => {
                self.emit(ClientEvent::UploadProgress {
                    file_id,
                    file_name: file_name.clone(),
                    percent,
                })
                .await;
                self.emit(ClientEvent::UploadCompleted { file_id, file_name })
                    .await;
                self.linger_then_drop(file_id);
            }
            Ok(AckOutcome::Stalled { file_name: _, message }) => {
                self.emit(ClientEvent::UploadFailed { file_id, message })
                    .await;
            }
            Ok(AckOutcome::Ignored) => {}
            Err(e) => {
                self.emit(ClientEvent::UploadFailed {
                    file_id,
                    message: e.to_string(),
                })
                .await;
            }
        }
    }

    fn linger_then_drop(&self, file_id: u64) {
        let tx = self.timer_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(COMPLETED_LINGER).await;
            let _ = tx.send(TimerEvent::DropUpload(file_id));
        });
    }

    async fn send_login(&mut self) {
        let Some(session) = self.session.clone() else {
            return;
        };
        let req = ClientRequest::Login {
            username: session.username.clone(),
            deviceip: session.device_ip.clone(),
            ids: Correlation::fresh(&session.session_id),
        };
        self.send_request(&req).await;
    }

    async fn request_messages(&mut self, room_id: &str) {
        let Some(session) = self.session.clone() else {
            self.emit(ClientEvent::Error("not logged in".to_string())).await;
            return;
        };
        let req = ClientRequest::GetMessages {
            username: session.username.clone(),
            roomid: room_id.to_string(),
            ids: Correlation::fresh(&session.session_id),
        };
        self.send_request(&req).await;
    }

    async fn send_request(&mut self, req: &ClientRequest) {
        let json = match serde_json::to_string(req) {
            Ok(json) => json,
            Err(e) => {
                self.emit(ClientEvent::Error(e.to_string())).await;
                return;
            }
        };
        if let Err(e) = self.conn.send_text(json).await {
            self.emit(ClientEvent::Error(e.to_string())).await;
        }
    }

    async fn shutdown(&mut self) {
        self.uploads.abandon_all();
        self.conn.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // the client loop must be spawnable onto a multi-threaded runtime
    #[test]
    fn test_client_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}
        let config = ClientConfig::new("ws://localhost:3000").unwrap();
        let (_cmd_tx, cmd_rx) = mpsc::channel(1);
        let (event_tx, _event_rx) = mpsc::channel(1);
        let fut = run_client(config, cmd_rx, event_tx);
        assert_send(&fut);
    }

    #[test]
    fn test_config_rejects_bad_endpoint() {
        assert!(ClientConfig::new("not a url").is_err());
        assert!(ClientConfig::new("ws://localhost:3000").is_ok());
    }

    #[test]
    fn test_config_overrides() {
        let config = ClientConfig::new("ws://localhost:3000")
            .unwrap()
            .with_device_ip("10.0.0.5")
            .with_chunk_size(64);
        assert_eq!(config.device_ip, "10.0.0.5");
        assert_eq!(config.chunk_size, 64);
        assert_eq!(config.endpoint, "ws://localhost:3000");
    }
}
