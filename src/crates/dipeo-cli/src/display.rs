//! Live event display for `dipeo run`.
//!
//! Registers a connection on the message router and prints each
//! subscription frame as it arrives. The display is a subscriber like any
//! other: if it falls behind, frames are dropped rather than slowing the
//! engine.

use dipeo_domain::ExecutionId;
use dipeo_engine::Runtime;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub struct EventDisplay {
    runtime: Arc<Runtime>,
    connection_id: String,
    worker: JoinHandle<()>,
}

pub fn spawn_event_display(runtime: &Arc<Runtime>, execution_id: &ExecutionId) -> EventDisplay {
    let connection_id = format!("cli-{execution_id}");
    let mut receiver = runtime.router.register_connection(connection_id.clone());
    runtime
        .router
        .subscribe_connection_to_execution(&connection_id, execution_id.clone())
        .expect("connection registered above");

    let worker = tokio::spawn(async move {
        while let Some(frame) = receiver.recv().await {
            let node = frame
                .data
                .get("node_id")
                .and_then(Value::as_str)
                .unwrap_or("-");
            let detail = frame
                .data
                .get("error")
                .and_then(Value::as_str)
                .map(|e| format!("  ({e})"))
                .unwrap_or_default();
            println!("[{:>4}] {:<20} {}{}", frame.sequence, frame.event_type, node, detail);
        }
    });

    EventDisplay {
        runtime: runtime.clone(),
        connection_id,
        worker,
    }
}

impl EventDisplay {
    /// Give the stream a moment to drain, then tear the connection down.
    pub async fn finish(self) {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        self.runtime.router.unregister_connection(&self.connection_id);
        self.worker.abort();
    }
}
