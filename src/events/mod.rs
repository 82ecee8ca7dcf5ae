pub mod callbacks;
pub mod event_bus;
pub mod types;

pub use callbacks::{CallbackGuard, CallbackSet};
pub use event_bus::{EventBus, EventBusStats, EventFilter, EventSubscriber, SubscriberError};
pub use types::{BusEvent, Event, EventPriority, HealthEvent, LoaderEvent, RecoveryEvent};
