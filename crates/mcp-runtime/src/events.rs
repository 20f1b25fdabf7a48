//! Server lifecycle events.
//!
//! The [`EventBus`] carries [`ServerEvent`] values over a
//! `tokio::sync::broadcast` channel. Consumers either subscribe to the whole
//! stream or register a callback for one [`EventKind`]. With no subscribers
//! and no listeners, emitting is a no-op.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::types::Implementation;

/// Everything a server reports about its sessions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// The handshake finished and the session accepts regular requests.
    Initialized {
        session: String,
        client: Option<Implementation>,
    },
    /// A `tools/call` was dispatched to a registered tool.
    ToolCalled {
        session: String,
        name: String,
        arguments: Map<String, Value>,
    },
    /// A `resources/read` was dispatched to a registered resource.
    ResourceRead { session: String, uri: String },
    /// A `prompts/get` was dispatched to a registered prompt.
    PromptRequested {
        session: String,
        name: String,
        arguments: Map<String, Value>,
    },
    /// A failure with no requester to answer.
    Error {
        session: String,
        code: i32,
        message: String,
    },
    /// The session was torn down.
    Disconnected { session: String },
}

/// Discriminant of [`ServerEvent`], used to key listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Initialized,
    ToolCalled,
    ResourceRead,
    PromptRequested,
    Error,
    Disconnected,
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::Initialized { .. } => EventKind::Initialized,
            ServerEvent::ToolCalled { .. } => EventKind::ToolCalled,
            ServerEvent::ResourceRead { .. } => EventKind::ResourceRead,
            ServerEvent::PromptRequested { .. } => EventKind::PromptRequested,
            ServerEvent::Error { .. } => EventKind::Error,
            ServerEvent::Disconnected { .. } => EventKind::Disconnected,
        }
    }

    /// The session the event belongs to.
    pub fn session(&self) -> &str {
        match self {
            ServerEvent::Initialized { session, .. }
            | ServerEvent::ToolCalled { session, .. }
            | ServerEvent::ResourceRead { session, .. }
            | ServerEvent::PromptRequested { session, .. }
            | ServerEvent::Error { session, .. }
            | ServerEvent::Disconnected { session } => session,
        }
    }
}

type Listener = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

/// Fan-out point for lifecycle events.
pub struct EventBus {
    sender: broadcast::Sender<ServerEvent>,
    listeners: RwLock<Vec<(EventKind, Listener)>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    /// Create a bus whose subscribers may lag by up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a callback for one kind of event.
    ///
    /// Listeners run synchronously on the emitting task, in registration
    /// order, and must not block.
    pub fn on(&self, kind: EventKind, listener: impl Fn(&ServerEvent) + Send + Sync + 'static) {
        let mut listeners = self.listeners.write().unwrap_or_else(|p| p.into_inner());
        listeners.push((kind, Arc::new(listener)));
    }

    pub fn emit(&self, event: ServerEvent) {
        let matching: Vec<Listener> = {
            let listeners = self.listeners.read().unwrap_or_else(|p| p.into_inner());
            listeners
                .iter()
                .filter(|(kind, _)| *kind == event.kind())
                .map(|(_, l)| Arc::clone(l))
                .collect()
        };
        for listener in matching {
            listener(&event);
        }
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn disconnected(session: &str) -> ServerEvent {
        ServerEvent::Disconnected {
            session: session.to_string(),
        }
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.emit(disconnected("s1"));
    }

    #[test]
    fn listeners_only_see_their_kind() {
        let bus = EventBus::new(4);
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&errors);
        bus.on(EventKind::Error, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(disconnected("s1"));
        bus.emit(ServerEvent::Error {
            session: "s1".to_string(),
            code: -32700,
            message: "Parse error".to_string(),
        });
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.emit(ServerEvent::ResourceRead {
            session: "s1".to_string(),
            uri: "runtime://info".to_string(),
        });
        bus.emit(disconnected("s1"));

        assert_eq!(rx.recv().await.unwrap().kind(), EventKind::ResourceRead);
        let last = rx.recv().await.unwrap();
        assert_eq!(last.kind(), EventKind::Disconnected);
        assert_eq!(last.session(), "s1");
    }

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_value(disconnected("abc")).unwrap();
        assert_eq!(json["type"], "disconnected");
        assert_eq!(json["session"], "abc");
    }
}
