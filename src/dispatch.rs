//! Action-keyed routing of inbound text frames.
//!
//! A reply's `phpOutput` may carry several result objects at once (the
//! server batches concerns, e.g. login plus chat list in one frame). The
//! dispatcher therefore evaluates every binding independently against the
//! parsed envelope: each binding whose key is present fires, none is
//! exclusive. Unrecognized keys are ignored without error.

use serde_json::Value;

use crate::protocol::ServerEnvelope;

/// Result keys the client knows how to consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKey {
    Login,
    GetChats,
    GetMessages,
    SendMessage,
    ChunkUpload,
    ReceiverSessions,
}

impl ActionKey {
    pub fn field(self) -> &'static str {
        match self {
            ActionKey::Login => "login",
            ActionKey::GetChats => "get_chats",
            ActionKey::GetMessages => "get_messages",
            ActionKey::SendMessage => "send_message",
            ActionKey::ChunkUpload => "chunk_upload",
            ActionKey::ReceiverSessions => "get_receiver_sessions",
        }
    }
}

type Handler = Box<dyn FnMut(&Value) + Send + Sync>;

#[derive(Default)]
pub struct Dispatcher {
    bindings: Vec<(ActionKey, Handler)>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one result key. Binding order is firing order
    /// within a frame.
    pub fn bind<F>(&mut self, key: ActionKey, handler: F)
    where
        F: FnMut(&Value) + Send + Sync + 'static,
    {
        self.bindings.push((key, Box::new(handler)));
    }

    /// Parse one text frame and fire every matching binding. Unparseable
    /// frames are logged and dropped, never propagated.
    pub fn dispatch_text(&mut self, raw: &str) {
        let envelope: ServerEnvelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("dropping unparseable frame: {}", e);
                return;
            }
        };
        self.dispatch(&envelope);
    }

    pub fn dispatch(&mut self, envelope: &ServerEnvelope) {
        let Some(output) = envelope.output.as_ref() else {
            return;
        };
        for (key, handler) in &mut self.bindings {
            if let Some(result) = output.get(key.field()) {
                handler(result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_dispatcher() -> (Dispatcher, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let mut dispatcher = Dispatcher::new();
        let logins = Arc::new(AtomicUsize::new(0));
        let chats = Arc::new(AtomicUsize::new(0));

        let c = logins.clone();
        dispatcher.bind(ActionKey::Login, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let c = chats.clone();
        dispatcher.bind(ActionKey::GetChats, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (dispatcher, logins, chats)
    }

    #[test]
    fn test_multiple_keys_fire_multiple_handlers() {
        let (mut dispatcher, logins, chats) = counting_dispatcher();
        dispatcher.dispatch_text(
            r#"{"phpOutput":{"login":{"status":"success"},"get_chats":{"status":"success","chats":[]}}}"#,
        );
        assert_eq!(logins.load(Ordering::SeqCst), 1);
        assert_eq!(chats.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_absent_keys_do_not_fire() {
        let (mut dispatcher, logins, chats) = counting_dispatcher();
        dispatcher.dispatch_text(r#"{"phpOutput":{"login":{"status":"success"}}}"#);
        assert_eq!(logins.load(Ordering::SeqCst), 1);
        assert_eq!(chats.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unrecognized_keys_ignored() {
        let (mut dispatcher, logins, chats) = counting_dispatcher();
        dispatcher.dispatch_text(r#"{"phpOutput":{"something_else":{"status":"success"}}}"#);
        assert_eq!(logins.load(Ordering::SeqCst), 0);
        assert_eq!(chats.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_malformed_frame_dropped_silently() {
        let (mut dispatcher, logins, _chats) = counting_dispatcher();
        dispatcher.dispatch_text("not json at all");
        dispatcher.dispatch_text(r#"{"status":"error"}"#);
        assert_eq!(logins.load(Ordering::SeqCst), 0);
    }
}
