//! Standing observers on the event bus.
//!
//! `StateStoreObserver` keeps the persisted state in agreement with the
//! event stream; `StreamingObserver` turns events into subscription frames
//! and pushes them through the message router. Both run as bus-owned
//! workers and never block the scheduler.

use crate::bus::{EventBus, EventFilter};
use crate::router::{MessageRouter, SubscriptionFrame};
use dipeo_state::StateService;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub struct StateStoreObserver;

impl StateStoreObserver {
    /// Subscribe to all events, forwarding node/execution status changes
    /// into the state service.
    pub fn spawn(bus: &Arc<EventBus>, state: Arc<StateService>) -> JoinHandle<()> {
        bus.subscribe_handler(EventFilter::all(), move |event| {
            let state = state.clone();
            Box::pin(async move {
                state.apply_event(&event).await?;
                Ok(())
            })
        })
    }
}

pub struct StreamingObserver;

impl StreamingObserver {
    /// Subscribe to all events and broadcast the corresponding frames to
    /// each execution's subscriber set.
    pub fn spawn(bus: &Arc<EventBus>, router: Arc<MessageRouter>) -> JoinHandle<()> {
        bus.subscribe_handler(EventFilter::all(), move |event| {
            let router = router.clone();
            Box::pin(async move {
                router.broadcast_to_execution(SubscriptionFrame::from_event(&event));
                Ok(())
            })
        })
    }
}
