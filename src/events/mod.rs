// events/mod.rs
//! In-process topic bus standing in for the broker between publishers and the bridge.

use crate::models::StatusReport;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, error};

type Callback = Box<dyn Fn(serde_json::Value) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    subscribers: DashMap<String, Vec<Callback>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `data` to every subscriber of `topic`. Messages on topics
    /// nobody listens to are dropped.
    pub fn publish(&self, topic: &str, data: serde_json::Value) {
        match self.subscribers.get(topic) {
            Some(subscribers) => {
                for callback in subscribers.iter() {
                    (callback)(data.clone());
                }
            }
            None => debug!(%topic, "No subscribers, message dropped"),
        }
    }

    pub fn subscribe<F: Fn(serde_json::Value) + Send + Sync + 'static>(
        &self,
        topic: &str,
        callback: F,
    ) {
        self.subscribers
            .entry(topic.to_string())
            .or_default()
            .push(Box::new(callback));
    }
}

/// Publishes status reports on a fixed topic.
#[derive(Clone)]
pub struct StatusPublisher {
    bus: Arc<EventBus>,
    topic: String,
}

impl StatusPublisher {
    pub fn new(bus: Arc<EventBus>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
        }
    }

    pub fn publish(&self, report: &StatusReport) {
        match serde_json::to_value(report) {
            Ok(value) => {
                debug!(topic = %self.topic, device_id = %report.device_id(), %value, "Publishing status");
                self.bus.publish(&self.topic, value);
            }
            Err(e) => error!(error = %e, "Failed to serialize status report"),
        }
    }
}
