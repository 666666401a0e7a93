// engine.rs
//! One conversation with one device: connect, write the pending frames,
//! optionally read back the status, disconnect.
//!
//! Connection and write failures are ordinary for these controllers. They
//! cost the request one attempt and send it back to the queue until the
//! budget runs out.

use crate::{
    commands::plan_frames,
    config::BridgeSettings,
    error::LinkError,
    events::StatusPublisher,
    link::{Link, Transport},
    metrics::{CONNECT_FAILURES, CONVERSATIONS, REQUESTS_DROPPED, STATUS_PUBLISHED, WRITE_FAILURES},
    models::{DeviceStatus, StatusReport},
    protocol::{self, Frame},
    queue::QueuedRequest,
};
use chrono::Utc;
use std::{future::Future, sync::Arc, time::Duration};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConversationState {
    Idle,
    Connecting,
    Connected,
    Applying,
    AwaitingReply,
    Disconnecting,
}

/// How a turn ended.
#[derive(Debug)]
pub enum TurnOutcome {
    /// Every frame was written; the request is done.
    Retired,
    /// The device failed us but the request has attempts left.
    Requeued(QueuedRequest),
    /// Out of attempts; the request is abandoned.
    Dropped,
}

#[derive(Debug, Clone, Copy)]
pub struct EngineTimeouts {
    pub connect: Duration,
    pub write: Duration,
    pub reply: Duration,
}

impl From<&BridgeSettings> for EngineTimeouts {
    fn from(settings: &BridgeSettings) -> Self {
        Self {
            connect: settings.connect_timeout(),
            write: settings.write_timeout(),
            reply: settings.reply_timeout(),
        }
    }
}

pub struct ConversationEngine {
    transport: Arc<dyn Transport>,
    publisher: StatusPublisher,
    timeouts: EngineTimeouts,
}

impl ConversationEngine {
    pub fn new(transport: Arc<dyn Transport>, publisher: StatusPublisher, timeouts: EngineTimeouts) -> Self {
        Self {
            transport,
            publisher,
            timeouts,
        }
    }

    /// Runs one full conversation for `entry`. Never fails: every error ends
    /// up in the returned outcome.
    pub async fn run_turn(&self, entry: QueuedRequest) -> TurnOutcome {
        let span = info_span!(
            "conversation",
            device_id = %entry.device_id(),
            id = %Uuid::new_v4(),
            attempts = entry.attempts_remaining,
        );
        self.converse(entry).instrument(span).await
    }

    async fn converse(&self, mut entry: QueuedRequest) -> TurnOutcome {
        let mut state = ConversationState::Idle;
        if entry.attempts_remaining == 0 {
            return self.abandon(entry);
        }

        advance(&mut state, ConversationState::Connecting);
        let device_id = entry.device_id().to_owned();
        let connect = self.transport.connect(&device_id);
        let mut link = match bounded("connect", self.timeouts.connect, connect).await {
            Ok(link) => link,
            Err(e) => {
                ::metrics::counter!(CONNECT_FAILURES).increment(1);
                warn!(error = %e, "Connection failed");
                if !entry.connect_failure_reported {
                    self.publisher.publish(&StatusReport::connect_failed(&device_id));
                    entry.connect_failure_reported = true;
                }
                return self.consume_attempt(entry);
            }
        };
        advance(&mut state, ConversationState::Connected);

        advance(&mut state, ConversationState::Applying);
        let frames = plan_frames(&entry.request);
        let applied = match self.apply(link.as_mut(), &frames).await {
            Ok(()) => {
                if entry.request.want_status {
                    advance(&mut state, ConversationState::AwaitingReply);
                    self.read_status(link.as_mut(), &device_id).await;
                }
                true
            }
            Err(e) => {
                ::metrics::counter!(WRITE_FAILURES).increment(1);
                warn!(error = %e, "Write failed, remaining frames abandoned");
                false
            }
        };

        advance(&mut state, ConversationState::Disconnecting);
        if let Err(e) = bounded("disconnect", self.timeouts.write, link.disconnect()).await {
            warn!(error = %e, "Disconnect failed, treating link as closed");
        }

        if applied {
            self.retire(entry, frames.len())
        } else {
            self.consume_attempt(entry)
        }
    }

    async fn apply(&self, link: &mut dyn Link, frames: &[Frame]) -> Result<(), LinkError> {
        for frame in frames {
            let bytes = frame.to_bytes();
            debug!(opcode = frame.opcode(), bytes = ?bytes, "Writing frame");
            bounded("write", self.timeouts.write, link.write(&bytes)).await?;
        }
        Ok(())
    }

    /// Best effort: a missing or unreadable reply only means nothing is published.
    async fn read_status(&self, link: &mut dyn Link, device_id: &str) {
        match link.await_notification(self.timeouts.reply).await {
            Ok(Some(bytes)) => match protocol::decode_status_notification(&bytes) {
                Ok(state) => {
                    let status = DeviceStatus::new(device_id, &state);
                    info!(power = status.power, mode = status.mode, "Status received");
                    self.publisher.publish(&StatusReport::Status(status));
                    ::metrics::counter!(STATUS_PUBLISHED).increment(1);
                }
                Err(e) => warn!(error = %e, "Didn't understand the status reply"),
            },
            Ok(None) => info!(timeout = ?self.timeouts.reply, "No status reply"),
            Err(e) => warn!(error = %e, "Status read failed"),
        }
    }

    fn consume_attempt(&self, mut entry: QueuedRequest) -> TurnOutcome {
        entry.attempts_remaining = entry.attempts_remaining.saturating_sub(1);
        if entry.attempts_remaining == 0 {
            return self.abandon(entry);
        }
        info!(attempts_left = entry.attempts_remaining, "Requeueing");
        ::metrics::counter!(CONVERSATIONS, "outcome" => "requeued").increment(1);
        TurnOutcome::Requeued(entry)
    }

    fn retire(&self, entry: QueuedRequest, frames: usize) -> TurnOutcome {
        let waited = Utc::now() - entry.first_queued_at;
        info!(frames, waited_ms = waited.num_milliseconds(), "Request completed");
        ::metrics::counter!(CONVERSATIONS, "outcome" => "retired").increment(1);
        TurnOutcome::Retired
    }

    fn abandon(&self, entry: QueuedRequest) -> TurnOutcome {
        let waited = Utc::now() - entry.first_queued_at;
        warn!(waited_ms = waited.num_milliseconds(), "Out of attempts, dropping request");
        ::metrics::counter!(CONVERSATIONS, "outcome" => "dropped").increment(1);
        ::metrics::counter!(REQUESTS_DROPPED).increment(1);
        TurnOutcome::Dropped
    }
}

fn advance(state: &mut ConversationState, next: ConversationState) {
    debug!(from = ?state, to = ?next, "Conversation state");
    *state = next;
}

async fn bounded<T>(
    operation: &'static str,
    limit: Duration,
    call: impl Future<Output = Result<T, LinkError>>,
) -> Result<T, LinkError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or_else(|_| {
            Err(LinkError::Timeout {
                operation,
                millis: limit.as_millis() as u64,
            })
        })
}
