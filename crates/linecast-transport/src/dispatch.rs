//! Event dispatch — background loops to one consumer.
//!
//! Producers (the accept loop and every session's receive loop) push into
//! an unbounded queue and never wait. The queue has exactly one receiving
//! end, handed to the host when the server is built; whatever task drains
//! it is the consumer context.

use linecast_protocol::ServerEvent;
use tokio::sync::mpsc;
use tracing::trace;

/// Producer side, cloned into each background loop.
#[derive(Debug, Clone)]
pub(crate) struct EventDispatcher {
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl EventDispatcher {
    pub(crate) fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, EventReceiver { rx })
    }

    /// Enqueue an event. A consumer that has gone away is not an error.
    pub(crate) fn emit(&self, event: ServerEvent) {
        if let Err(e) = self.tx.send(event) {
            trace!("Event dropped, consumer gone: {:?}", e.0);
        }
    }
}

/// Consumer side of the event queue.
///
/// Events for one session arrive in the order they happened. `recv`
/// returns `None` once the server and all of its loops have been dropped.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl EventReceiver {
    /// Wait for the next event.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.rx.recv().await
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<ServerEvent> {
        self.rx.try_recv().ok()
    }

    /// Number of events waiting to be consumed.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linecast_protocol::{DisconnectReason, SessionId};

    #[tokio::test]
    async fn events_arrive_in_emit_order() {
        let (dispatcher, mut events) = EventDispatcher::channel();
        let id = SessionId::new();
        dispatcher.emit(ServerEvent::SessionConnected {
            session_id: id,
            peer: "127.0.0.1:1".parse().unwrap(),
        });
        dispatcher.emit(ServerEvent::MessageReceived {
            session_id: id,
            text: "a".into(),
        });
        dispatcher.emit(ServerEvent::SessionDisconnected {
            session_id: id,
            reason: DisconnectReason::PeerClosed,
        });

        assert_eq!(events.len(), 3);
        assert!(matches!(events.recv().await, Some(ServerEvent::SessionConnected { .. })));
        assert!(matches!(events.recv().await, Some(ServerEvent::MessageReceived { .. })));
        assert!(matches!(events.recv().await, Some(ServerEvent::SessionDisconnected { .. })));
        assert!(events.try_recv().is_none());
    }

    #[tokio::test]
    async fn emit_after_consumer_dropped_is_silent() {
        let (dispatcher, events) = EventDispatcher::channel();
        drop(events);
        dispatcher.emit(ServerEvent::MessageReceived {
            session_id: SessionId::new(),
            text: "nobody listening".into(),
        });
    }

    #[tokio::test]
    async fn recv_ends_when_producers_are_gone() {
        let (dispatcher, mut events) = EventDispatcher::channel();
        let producer = dispatcher.clone();
        drop(dispatcher);
        producer.emit(ServerEvent::MessageReceived {
            session_id: SessionId::new(),
            text: "last".into(),
        });
        drop(producer);
        assert!(events.recv().await.is_some());
        assert!(events.recv().await.is_none());
    }
}
