//! # dipeo-events - event bus, router, observers
//!
//! The fan-out path of the runtime. The scheduler publishes
//! [`dipeo_domain::ExecutionEvent`]s to the [`EventBus`]; observers and the
//! [`MessageRouter`] deliver them to state persistence, GraphQL-style
//! subscriptions, and CLI displays. Publishers never block; slow
//! subscribers lose their oldest events.

pub mod bus;
pub mod error;
pub mod observers;
pub mod router;

pub use bus::{
    EventBus, EventFilter, Subscription, DEFAULT_QUEUE_CAPACITY, DEFAULT_REPLAY_CAPACITY,
};
pub use error::{EventError, Result};
pub use observers::{StateStoreObserver, StreamingObserver};
pub use router::{CliSession, MessageRouter, SubscriptionFrame};
