//! Push-channel layer: transport abstraction, wire message shapes, and the
//! subscription manager that guarantees one underlying channel per key.

pub mod message;
pub mod subscriptions;
pub mod transport;

pub use message::{ChangeEventType, JobChangeEvent, JobLogLine, ProgressPayload, PushMessage};
pub use subscriptions::{StoreWatch, Subscription, SubscriptionManager};
pub use transport::{ChannelKey, ChannelKind, PushTransport, TransportError};
