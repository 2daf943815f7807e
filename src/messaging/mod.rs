pub mod alert_events;
pub mod amqp;
pub mod broker;
pub mod event;
pub mod push;

pub use alert_events::AlertEvents;
pub use broker::{EventBroker, EventCallback, MessageBrokerTrait};
pub use event::{EventMessage, EventType};
pub use push::{push_channel, PushEvent, PushListener, PushSource};
