//! Connection lifecycle for the single WebSocket transport.
//!
//! The manager owns the write half; the read half is pumped by a spawned
//! task into a [`TransportEvent`] channel so the client loop sees frames,
//! closes and failures as ordinary events.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::ClientError;

/// Timeout for the initial transport open (10 seconds).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum automatic reconnect attempts before giving up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Base delay of the exponential reconnect schedule.
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Errored,
}

/// Events delivered from the transport to the client loop.
#[derive(Debug)]
pub enum TransportEvent {
    Opened,
    Text(String),
    Binary(bytes::Bytes),
    Closed,
    Failed(String),
}

/// Exponential backoff schedule for reconnect attempts.
///
/// Attempts reset to zero on every successful open; after `max` consecutive
/// failures the schedule is exhausted and the caller must start over with an
/// explicit connect.
#[derive(Debug)]
pub struct Backoff {
    attempts: u32,
    max: u32,
    base: Duration,
}

impl Backoff {
    pub fn new(max: u32, base: Duration) -> Self {
        Self {
            attempts: 0,
            max,
            base,
        }
    }

    /// Delay before the next attempt, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max {
            return None;
        }
        self.attempts += 1;
        Some(self.base * 2u32.pow(self.attempts - 1))
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max(&self) -> u32 {
        self.max
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(MAX_RECONNECT_ATTEMPTS, RECONNECT_BASE_DELAY)
    }
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

pub struct ConnectionManager {
    endpoint: String,
    state: ConnState,
    sink: Option<WsSink>,
    reader: Option<JoinHandle<()>>,
    backoff: Backoff,
    transport_tx: mpsc::Sender<TransportEvent>,
}

impl ConnectionManager {
    pub fn new(endpoint: String, transport_tx: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            endpoint,
            state: ConnState::Idle,
            sink: None,
            reader: None,
            backoff: Backoff::default(),
            transport_tx,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn reset_backoff(&mut self) {
        self.backoff.reset();
    }

    /// Consume one reconnect slot, yielding the delay before the attempt.
    pub fn next_reconnect_delay(&mut self) -> Option<Duration> {
        self.backoff.next_delay()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.backoff.attempts()
    }

    pub fn reconnect_limit(&self) -> u32 {
        self.backoff.max()
    }

    /// Open the transport. Failure is reported on the transport channel as
    /// well as in the returned result, so the caller can schedule a retry
    /// from either side.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        if matches!(self.state, ConnState::Open | ConnState::Connecting) {
            return Ok(());
        }
        self.state = ConnState::Connecting;
        tracing::info!("connecting to {}", self.endpoint);

        let stream =
            match tokio::time::timeout(CONNECT_TIMEOUT, connect_async(self.endpoint.as_str()))
                .await
            {
                Ok(Ok((stream, _response))) => stream,
                Ok(Err(e)) => {
                    self.state = ConnState::Errored;
                    let _ = self
                        .transport_tx
                        .send(TransportEvent::Failed(e.to_string()))
                        .await;
                    return Err(ClientError::Transport(e));
                }
                Err(_) => {
                    self.state = ConnState::Errored;
                    let _ = self
                        .transport_tx
                        .send(TransportEvent::Failed("connect timed out".to_string()))
                        .await;
                    return Err(ClientError::ConnectTimeout(CONNECT_TIMEOUT));
                }
            };

        let (sink, stream) = stream.split();
        self.sink = Some(sink);
        self.state = ConnState::Open;
        self.backoff.reset();
        self.reader = Some(tokio::spawn(read_loop(stream, self.transport_tx.clone())));
        let _ = self.transport_tx.send(TransportEvent::Opened).await;
        tracing::info!("connection open");
        Ok(())
    }

    pub async fn send_text(&mut self, payload: String) -> Result<(), ClientError> {
        if self.state != ConnState::Open {
            return Err(ClientError::NotConnected);
        }
        let Some(sink) = self.sink.as_mut() else {
            return Err(ClientError::NotConnected);
        };
        if let Err(e) = sink.send(Message::Text(payload.into())).await {
            self.state = ConnState::Errored;
            return Err(ClientError::Transport(e));
        }
        Ok(())
    }

    pub async fn send_binary(&mut self, frame: Vec<u8>) -> Result<(), ClientError> {
        if self.state != ConnState::Open {
            return Err(ClientError::NotConnected);
        }
        let Some(sink) = self.sink.as_mut() else {
            return Err(ClientError::NotConnected);
        };
        if let Err(e) = sink.send(Message::Binary(frame.into())).await {
            self.state = ConnState::Errored;
            return Err(ClientError::Transport(e));
        }
        Ok(())
    }

    /// Graceful close; idempotent.
    pub async fn close(&mut self) {
        if self.state == ConnState::Closed {
            return;
        }
        self.state = ConnState::Closing;
        if let Some(mut sink) = self.sink.take() {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.state = ConnState::Closed;
        tracing::info!("connection closed");
    }

    /// Tear down local state after an unsolicited close or error.
    pub fn mark_lost(&mut self) {
        self.sink = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.state = ConnState::Closed;
    }
}

async fn read_loop(mut stream: WsStream, tx: mpsc::Sender<TransportEvent>) {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let _ = tx.send(TransportEvent::Text(text.to_string())).await;
            }
            Ok(Message::Binary(data)) => {
                let _ = tx.send(TransportEvent::Binary(data)).await;
            }
            Ok(Message::Close(_)) => {
                let _ = tx.send(TransportEvent::Closed).await;
                return;
            }
            // ping/pong are answered by tungstenite itself
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("websocket read error: {}", e);
                let _ = tx.send(TransportEvent::Failed(e.to_string())).await;
                return;
            }
        }
    }
    let _ = tx.send(TransportEvent::Closed).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let mut backoff = Backoff::default();
        let expected = [1u64, 2, 4, 8, 16];
        for secs in expected {
            assert_eq!(backoff.next_delay(), Some(Duration::from_secs(secs)));
        }
        // no sixth automatic attempt
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn test_backoff_reset_restarts_schedule() {
        let mut backoff = Backoff::default();
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(2)));
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_send_requires_open_connection() {
        let (tx, _rx) = mpsc::channel(4);
        let mut conn = ConnectionManager::new("ws://127.0.0.1:9".to_string(), tx);
        assert_eq!(conn.state(), ConnState::Idle);
        assert!(matches!(
            conn.send_text("{}".to_string()).await,
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(
            conn.send_binary(vec![0u8; 4]).await,
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (tx, _rx) = mpsc::channel(4);
        let mut conn = ConnectionManager::new("ws://127.0.0.1:9".to_string(), tx);
        conn.close().await;
        assert_eq!(conn.state(), ConnState::Closed);
        conn.close().await;
        assert_eq!(conn.state(), ConnState::Closed);
    }
}
