//! Event Bus implementation.
//!
//! Synchronous handlers run on the publishing thread; async consumers can
//! take a broadcast receiver instead.

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::OnceLock;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::events::{AppEvent, EventCategory};

/// Subscription handle for unsubscribing from events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", &self.0.to_string()[..8])
    }
}

/// Filter to receive only specific event types
#[derive(Debug, Clone, Default)]
pub enum EventFilter {
    /// Receive all events.
    #[default]
    All,
    /// Receive events matching any of these categories.
    Categories(Vec<EventCategory>),
}

impl EventFilter {
    /// Check if an event matches this filter
    pub fn matches(&self, event: &AppEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Categories(categories) => categories.contains(&event.category()),
        }
    }
}

type EventHandler = Box<dyn Fn(&AppEvent) + Send + Sync>;

/// Configuration for the event bus
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Channel capacity for broadcast.
    pub channel_capacity: usize,
    /// Maximum number of events retained for `recent()`. Zero disables history.
    pub history_size: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            history_size: 0,
        }
    }
}

/// Central event bus for lifecycle notices
pub struct EventBus {
    sender: broadcast::Sender<AppEvent>,
    handlers: RwLock<HashMap<SubscriptionId, (EventFilter, EventHandler)>>,
    history: RwLock<VecDeque<AppEvent>>,
    config: EventBusConfig,
}

impl EventBus {
    /// Create a new event bus with default configuration
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Create a new event bus with custom configuration
    pub fn with_config(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sender,
            handlers: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::new()),
            config,
        }
    }

    /// Publish an event to every matching handler and broadcast receiver
    ///
    /// Returns the number of handlers and receivers reached. Publishing with
    /// nobody listening is not an error.
    pub fn publish(&self, event: AppEvent) -> usize {
        tracing::trace!("event: {}", event.description());

        if self.config.history_size > 0 {
            let mut history = self.history.write();
            history.push_back(event.clone());
            while history.len() > self.config.history_size {
                history.pop_front();
            }
        }

        let mut reached = 0;
        {
            let handlers = self.handlers.read();
            for (filter, handler) in handlers.values() {
                if filter.matches(&event) {
                    handler(&event);
                    reached += 1;
                }
            }
        }

        reached + self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe with a synchronous handler
    ///
    /// The handler runs on the publishing thread and must return quickly.
    pub fn subscribe<F>(&self, filter: EventFilter, handler: F) -> SubscriptionId
    where
        F: Fn(&AppEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        self.handlers.write().insert(id, (filter, Box::new(handler)));
        tracing::debug!("Subscription {} added", id);
        id
    }

    /// Get a receiver for async consumption
    pub fn receiver(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    /// Unsubscribe; returns true if the subscription existed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.handlers.write().remove(&id).is_some();
        if removed {
            tracing::debug!("Subscription {} removed", id);
        }
        removed
    }

    /// Number of synchronous subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Recently published events, oldest first
    pub fn recent(&self) -> Vec<AppEvent> {
        self.history.read().iter().cloned().collect()
    }

    /// Clear event history
    pub fn clear_history(&self) {
        self.history.write().clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("config", &self.config)
            .finish()
    }
}

static EVENT_BUS: OnceLock<EventBus> = OnceLock::new();

/// Get or initialize the global event bus
pub fn event_bus() -> &'static EventBus {
    EVENT_BUS.get_or_init(EventBus::new)
}

/// Initialize the global event bus with custom configuration
///
/// Must be called before the first `event_bus()` call. Returns the rejected
/// configuration if the bus already exists.
pub fn init_event_bus(config: EventBusConfig) -> Result<(), EventBusConfig> {
    EVENT_BUS
        .set(EventBus::with_config(config))
        .map_err(|bus| bus.config.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MachineState;
    use crate::event_bus::events::{CommunicationEvent, ConnectionEvent, MachineEvent};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn sent(data: &str) -> AppEvent {
        AppEvent::Communication(CommunicationEvent::DataSent {
            data: data.to_string(),
        })
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let bus = EventBus::new();

        let id = bus.subscribe(EventFilter::All, |_| {});
        assert_eq!(bus.subscriber_count(), 1);

        assert!(bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count(), 0);
        assert!(!bus.unsubscribe(id));
    }

    #[test]
    fn test_publish_without_listeners() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(sent("G0 X0\n")), 0);
    }

    #[test]
    fn test_event_filtering() {
        let bus = EventBus::new();
        let comm_count = Arc::new(AtomicUsize::new(0));
        let machine_count = Arc::new(AtomicUsize::new(0));

        let cc = comm_count.clone();
        bus.subscribe(
            EventFilter::Categories(vec![EventCategory::Communication]),
            move |_| {
                cc.fetch_add(1, Ordering::SeqCst);
            },
        );

        let mc = machine_count.clone();
        bus.subscribe(
            EventFilter::Categories(vec![EventCategory::Machine]),
            move |_| {
                mc.fetch_add(1, Ordering::SeqCst);
            },
        );

        bus.publish(sent("?"));
        bus.publish(AppEvent::Machine(MachineEvent::StateChanged {
            old: MachineState::Unknown,
            new: MachineState::Idle,
        }));
        bus.publish(AppEvent::Connection(ConnectionEvent::Started));

        assert_eq!(comm_count.load(Ordering::SeqCst), 1);
        assert_eq!(machine_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let bus = EventBus::with_config(EventBusConfig {
            history_size: 3,
            ..Default::default()
        });

        for i in 0..5 {
            bus.publish(sent(&format!("G0 X{}", i)));
        }

        let recent = bus.recent();
        assert_eq!(recent.len(), 3);
        match &recent[0] {
            AppEvent::Communication(CommunicationEvent::DataSent { data }) => {
                assert_eq!(data, "G0 X2")
            }
            other => panic!("unexpected event {:?}", other),
        }

        bus.clear_history();
        assert!(bus.recent().is_empty());
    }

    #[tokio::test]
    async fn test_async_receiver() {
        let bus = EventBus::new();
        let mut receiver = bus.receiver();

        assert_eq!(bus.publish(AppEvent::Connection(ConnectionEvent::Started)), 1);

        match receiver.try_recv() {
            Ok(AppEvent::Connection(ConnectionEvent::Started)) => {}
            other => panic!("Wrong event received: {:?}", other),
        }
    }
}
