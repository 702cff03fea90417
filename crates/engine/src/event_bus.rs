// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process pub/sub for server lifecycle events.

use serde_json::Value;
use tokio::sync::broadcast;

use iolink_core::ServerEvent;

const BUS_CAPACITY: usize = 256;

/// Fan-out bus. Publication never blocks; subscribers that fall behind
/// lose the oldest events (there is no replay for late subscribers).
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ServerEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        EventBus { tx }
    }

    pub fn publish(&self, event_type: &str, data: Value) {
        self.publish_event(ServerEvent::new(event_type, data));
    }

    pub fn publish_event(&self, event: ServerEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
