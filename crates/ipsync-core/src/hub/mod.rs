//! Event hub
//!
//! Pushes JSON events to every connected observer. A single dispatch loop
//! owns the subscriber registry; registration, removal and broadcasts all
//! arrive through one command queue, so nothing else touches the registry.
//!
//! ## Backpressure
//!
//! - `broadcast` never waits: if the command queue is full the event is
//!   dropped and logged.
//! - Each subscriber has its own bounded queue. A subscriber whose queue is
//!   full is kicked and removed; other subscribers are unaffected.

mod connection;

pub use connection::{InboundFrame, serve_connection};

use crate::config::HubConfig;
use crate::error::{Error, Result};
use crate::sync::SyncSummary;
use serde::Serialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Event type for an observed address change
pub const EVENT_IP_CHANGE: &str = "ip_change";

/// Event type for the summary after a reconciliation
pub const EVENT_DNS_SYNC: &str = "dns_sync";

/// Subscriber identifier, unique per hub
pub type SubscriberId = u64;

/// Wire envelope: `{"type": ..., "data": ...}`
#[derive(Debug, Serialize)]
pub struct HubMessage<'a, T: Serialize> {
    #[serde(rename = "type")]
    pub event_type: &'a str,
    pub data: &'a T,
}

/// Payload of [`EVENT_IP_CHANGE`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpChangePayload {
    pub ip: IpAddr,
    pub source: String,
}

enum Command {
    Register {
        id: SubscriberId,
        queue: mpsc::Sender<String>,
        kick: oneshot::Sender<()>,
    },
    Unregister(SubscriberId),
    Broadcast(String),
    Count(oneshot::Sender<usize>),
}

/// Receiving side handed to a newly registered subscriber
pub struct Subscription {
    pub id: SubscriberId,
    /// Serialized events, in broadcast order
    pub messages: mpsc::Receiver<String>,
    /// Fires when the hub drops this subscriber
    pub kicked: oneshot::Receiver<()>,
}

/// Cloneable handle used to broadcast and to manage subscribers
#[derive(Clone)]
pub struct EventHub {
    commands: mpsc::Sender<Command>,
    next_id: Arc<AtomicU64>,
    subscriber_queue: usize,
}

impl EventHub {
    /// Create a hub and the dispatch loop that serves it
    ///
    /// The caller must spawn [`HubDispatcher::run`].
    pub fn new(config: &HubConfig) -> (Self, HubDispatcher) {
        let (commands, rx) = mpsc::channel(config.dispatch_capacity.max(1));
        let hub = Self {
            commands,
            next_id: Arc::new(AtomicU64::new(1)),
            subscriber_queue: config.subscriber_queue.max(1),
        };
        let dispatcher = HubDispatcher {
            commands: rx,
            subscribers: HashMap::new(),
        };
        (hub, dispatcher)
    }

    /// Broadcast an event to every subscriber
    ///
    /// Serializes once and never waits. Returns `false` if the event was
    /// dropped.
    pub fn broadcast<T: Serialize>(&self, event_type: &str, data: &T) -> bool {
        let message = HubMessage { event_type, data };
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to serialize {} event: {}", event_type, e);
                return false;
            }
        };

        match self.commands.try_send(Command::Broadcast(text)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Event hub queue full, dropping {} event", event_type);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Event hub stopped, dropping {} event", event_type);
                false
            }
        }
    }

    /// Broadcast an address change
    pub fn broadcast_change(&self, address: IpAddr, source: &str) -> bool {
        let payload = IpChangePayload {
            ip: address,
            source: source.to_string(),
        };
        self.broadcast(EVENT_IP_CHANGE, &payload)
    }

    /// Broadcast a reconciliation summary
    pub fn broadcast_sync(&self, summary: &SyncSummary) -> bool {
        self.broadcast(EVENT_DNS_SYNC, summary)
    }

    /// Add a subscriber
    pub async fn register(&self) -> Result<Subscription> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (queue, messages) = mpsc::channel(self.subscriber_queue);
        let (kick, kicked) = oneshot::channel();

        self.commands
            .send(Command::Register { id, queue, kick })
            .await
            .map_err(|_| Error::Other("event hub is not running".to_string()))?;

        Ok(Subscription {
            id,
            messages,
            kicked,
        })
    }

    /// Remove a subscriber; a no-op if it is already gone
    pub async fn unregister(&self, id: SubscriberId) {
        if self.commands.send(Command::Unregister(id)).await.is_err() {
            debug!("Event hub stopped before subscriber {} unregistered", id);
        }
    }

    /// Number of live subscribers, as seen by the dispatch loop
    pub async fn subscriber_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Count(tx)).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

struct Subscriber {
    queue: mpsc::Sender<String>,
    kick: oneshot::Sender<()>,
}

/// The dispatch loop; sole owner of the subscriber registry
pub struct HubDispatcher {
    commands: mpsc::Receiver<Command>,
    subscribers: HashMap<SubscriberId, Subscriber>,
}

impl HubDispatcher {
    /// Run until every [`EventHub`] handle is dropped
    pub async fn run(self) {
        self.run_with_shutdown(None).await;
    }

    /// Run until every handle is dropped or `shutdown_rx` fires
    pub async fn run_with_shutdown(mut self, shutdown_rx: Option<oneshot::Receiver<()>>) {
        let shutdown = async {
            match shutdown_rx {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = &mut shutdown => {
                    info!("Event hub shutting down");
                    break;
                }
            }
        }

        debug!("Event hub stopped with {} subscriber(s)", self.subscribers.len());
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register { id, queue, kick } => {
                self.subscribers.insert(id, Subscriber { queue, kick });
                info!("Subscriber {} connected, {} active", id, self.subscribers.len());
            }
            Command::Unregister(id) => {
                if self.subscribers.remove(&id).is_some() {
                    info!("Subscriber {} disconnected, {} active", id, self.subscribers.len());
                }
            }
            Command::Broadcast(text) => self.dispatch(text),
            Command::Count(reply) => {
                let _ = reply.send(self.subscribers.len());
            }
        }
    }

    fn dispatch(&mut self, text: String) {
        let mut dropped = Vec::new();

        for (id, subscriber) in &self.subscribers {
            match subscriber.queue.try_send(text.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Subscriber {} is not keeping up, disconnecting", id);
                    dropped.push(*id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => dropped.push(*id),
            }
        }

        for id in dropped {
            if let Some(subscriber) = self.subscribers.remove(&id) {
                let _ = subscriber.kick.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub_config(subscriber_queue: usize) -> HubConfig {
        HubConfig {
            dispatch_capacity: 16,
            subscriber_queue,
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let (hub, dispatcher) = EventHub::new(&hub_config(4));
        tokio::spawn(dispatcher.run());

        let mut a = hub.register().await.unwrap();
        let mut b = hub.register().await.unwrap();
        assert_eq!(hub.subscriber_count().await, 2);

        assert!(hub.broadcast_change("198.51.100.7".parse().unwrap(), "STUN"));

        let expected = r#"{"type":"ip_change","data":{"ip":"198.51.100.7","source":"STUN"}}"#;
        assert_eq!(a.messages.recv().await.unwrap(), expected);
        assert_eq!(b.messages.recv().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn full_subscriber_is_kicked() {
        let (hub, dispatcher) = EventHub::new(&hub_config(1));
        tokio::spawn(dispatcher.run());

        let slow = hub.register().await.unwrap();
        hub.broadcast(EVENT_DNS_SYNC, &"first");
        hub.broadcast(EVENT_DNS_SYNC, &"second");

        slow.kicked.await.unwrap();
        assert_eq!(hub.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let (hub, dispatcher) = EventHub::new(&hub_config(4));
        tokio::spawn(dispatcher.run());

        let sub = hub.register().await.unwrap();
        hub.unregister(sub.id).await;
        hub.unregister(sub.id).await;
        assert_eq!(hub.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let (hub, dispatcher) = EventHub::new(&hub_config(4));
        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(dispatcher.run_with_shutdown(Some(rx)));

        tx.send(()).unwrap();
        handle.await.unwrap();

        assert!(hub.register().await.is_err());
        assert_eq!(hub.subscriber_count().await, 0);
    }
}
