// dispatch.rs
use crate::{
    config::BridgeSettings,
    engine::{ConversationEngine, TurnOutcome},
    events::EventBus,
    metrics::{MALFORMED_REQUESTS, QUEUE_DEPTH},
    models::DeviceRequest,
    queue::CommandQueue,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What a single iteration of the loop did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    Idle,
    Retired(String),
    Requeued(String),
    Dropped(String),
}

/// Feeds inbound requests to the queue and services one device per tick.
/// Conversations never overlap: one physical connection at a time.
pub struct Dispatcher {
    queue: CommandQueue,
    inbound: mpsc::UnboundedReceiver<DeviceRequest>,
    engine: ConversationEngine,
    retry_backoff: Duration,
}

impl Dispatcher {
    pub fn new(
        engine: ConversationEngine,
        inbound: mpsc::UnboundedReceiver<DeviceRequest>,
        settings: &BridgeSettings,
    ) -> Self {
        Self {
            queue: CommandQueue::new(settings.max_attempts),
            inbound,
            engine,
            retry_backoff: settings.retry_backoff(),
        }
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Moves every request delivered since the last tick into the queue.
    fn pump(&mut self) {
        while let Ok(request) = self.inbound.try_recv() {
            debug!(device_id = %request.device_id, "Request queued");
            self.queue.submit(request);
        }
    }

    /// One iteration: drain deliveries, then run at most one conversation.
    pub async fn tick(&mut self) -> Tick {
        self.pump();
        ::metrics::gauge!(QUEUE_DEPTH).set(self.queue.len() as f64);

        let Some(entry) = self.queue.take_one() else {
            return Tick::Idle;
        };
        let device_id = entry.device_id().to_owned();
        match self.engine.run_turn(entry).await {
            TurnOutcome::Retired => Tick::Retired(device_id),
            TurnOutcome::Dropped => Tick::Dropped(device_id),
            TurnOutcome::Requeued(entry) => {
                self.queue.requeue(entry);
                Tick::Requeued(device_id)
            }
        }
    }

    /// Runs until the inbound channel closes and the queue is drained.
    pub async fn run(mut self) {
        info!("Dispatch loop started");
        loop {
            if self.queue.is_empty() {
                match self.inbound.recv().await {
                    Some(request) => self.queue.submit(request),
                    None => break,
                }
            }
            if let Tick::Requeued(_) = self.tick().await {
                if !self.retry_backoff.is_zero() {
                    tokio::time::sleep(self.retry_backoff).await;
                }
            }
        }
        info!("Inbound channel closed, dispatch loop stopped");
    }
}

/// Parses every message on `topic` into a device request for the dispatcher.
/// Bad payloads are logged and dropped; publishers get no reply.
pub fn subscribe_control(bus: &EventBus, topic: &str, requests: mpsc::UnboundedSender<DeviceRequest>) {
    bus.subscribe(topic, move |payload| match DeviceRequest::from_value(payload) {
        Ok(request) => {
            if requests.send(request).is_err() {
                warn!("Dispatcher stopped, request discarded");
            }
        }
        Err(e) => {
            ::metrics::counter!(MALFORMED_REQUESTS).increment(1);
            warn!(error = %e, "Ignoring malformed control message");
        }
    });
}
