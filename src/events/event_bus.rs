use super::types::{BusEvent, Event, EventPriority};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tracing::trace;

/// Error returned when a subscriber can no longer receive
#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    #[error("event bus closed")]
    Closed,
    #[error("subscriber lagged behind by {0} events")]
    Lagged(u64),
}

/// Subscription handle; dropping it unsubscribes
pub struct EventSubscriber<E: BusEvent> {
    receiver: broadcast::Receiver<Event<E>>,
    filter: Option<EventFilter>,
}

impl<E: BusEvent> EventSubscriber<E> {
    pub fn new(receiver: broadcast::Receiver<Event<E>>, filter: Option<EventFilter>) -> Self {
        Self { receiver, filter }
    }

    fn accepts(&self, event: &Event<E>) -> bool {
        self.filter.as_ref().is_none_or(|f| f.matches(event))
    }

    /// Receive the next event matching the filter
    pub async fn recv(&mut self) -> Result<Event<E>, SubscriberError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.accepts(&event) => return Ok(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Closed) => return Err(SubscriberError::Closed),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    return Err(SubscriberError::Lagged(n));
                }
            }
        }
    }

    /// Try to receive without waiting
    pub fn try_recv(&mut self) -> Result<Option<Event<E>>, SubscriberError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Ok(Some(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(SubscriberError::Closed);
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Err(SubscriberError::Lagged(n));
                }
            }
        }
    }

    /// Drain everything currently queued
    pub fn drain(&mut self) -> Vec<Event<E>> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = self.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Event filter for selective subscription
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    kinds: Option<Vec<&'static str>>,
    kind_prefix: Option<String>,
    min_priority: Option<EventPriority>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kinds(mut self, kinds: Vec<&'static str>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.kind_prefix = Some(prefix.into());
        self
    }

    pub fn with_min_priority(mut self, priority: EventPriority) -> Self {
        self.min_priority = Some(priority);
        self
    }

    pub fn matches<E: BusEvent>(&self, event: &Event<E>) -> bool {
        let kind = event.kind();

        if let Some(ref kinds) = self.kinds
            && !kinds.contains(&kind)
        {
            return false;
        }

        if let Some(ref prefix) = self.kind_prefix
            && !kind.starts_with(prefix.as_str())
        {
            return false;
        }

        if let Some(min_priority) = self.min_priority
            && event.priority < min_priority
        {
            return false;
        }

        true
    }
}

/// Typed broadcast bus; subscribers see events in emission order
#[derive(Debug)]
pub struct EventBus<E: BusEvent> {
    sender: broadcast::Sender<Event<E>>,
    stats: Arc<RwLock<EventBusStats>>,
    event_history: Arc<RwLock<Vec<Event<E>>>>,
    max_history_size: usize,
}

#[derive(Debug, Default, Clone)]
pub struct EventBusStats {
    pub total_events: u64,
    pub events_by_kind: HashMap<String, u64>,
    pub subscriber_count: usize,
    pub dropped_events: u64,
}

impl<E: BusEvent> EventBus<E> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));

        Self {
            sender,
            stats: Arc::new(RwLock::new(EventBusStats::default())),
            event_history: Arc::new(RwLock::new(Vec::new())),
            max_history_size: 100,
        }
    }

    pub async fn publish(&self, payload: E) {
        self.publish_event(Event::new(payload)).await;
    }

    pub async fn publish_event(&self, event: Event<E>) {
        trace!(
            "Publishing event: {} with priority {:?}",
            event.kind(),
            event.priority
        );

        {
            let mut stats = self.stats.write().await;
            stats.total_events += 1;
            *stats
                .events_by_kind
                .entry(event.kind().to_string())
                .or_insert(0) += 1;
        }

        {
            let mut history = self.event_history.write().await;
            history.push(event.clone());
            if history.len() > self.max_history_size {
                let excess = history.len() - self.max_history_size;
                history.drain(0..excess);
            }
        }

        if self.sender.send(event).is_err() {
            // no subscribers is normal
            self.stats.write().await.dropped_events += 1;
        }
    }

    pub fn subscribe(&self) -> EventSubscriber<E> {
        EventSubscriber::new(self.sender.subscribe(), None)
    }

    pub fn subscribe_filtered(&self, filter: EventFilter) -> EventSubscriber<E> {
        EventSubscriber::new(self.sender.subscribe(), Some(filter))
    }

    pub fn subscribe_to_kinds(&self, kinds: Vec<&'static str>) -> EventSubscriber<E> {
        self.subscribe_filtered(EventFilter::new().with_kinds(kinds))
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub async fn get_stats(&self) -> EventBusStats {
        let stats = self.stats.read().await;
        EventBusStats {
            subscriber_count: self.subscriber_count(),
            ..stats.clone()
        }
    }

    /// Recent events, oldest first
    pub async fn get_history(&self) -> Vec<Event<E>> {
        self.event_history.read().await.clone()
    }

    pub async fn clear_history(&self) {
        self.event_history.write().await.clear();
    }
}
