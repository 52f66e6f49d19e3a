//! Events: the typed event contract, its explicit JSON codec, and delivery
//! mechanics (envelopes, subscribers, broadcast bus).

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod subscriber;
pub mod tenant;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::{Event, EventCodec, EventCodecError, decode_body, encode_payload, payload_version};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use subscriber::{EventSubscriber, SubscriberError};
pub use tenant::TenantScoped;
