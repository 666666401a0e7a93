// queue.rs
use crate::models::DeviceRequest;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// A device request owned by the queue, with its retry bookkeeping.
#[derive(Debug, Clone)]
pub struct QueuedRequest {
    pub request: DeviceRequest,
    pub attempts_remaining: u8,
    /// Set once the `connect: false` notice went out for this request.
    pub connect_failure_reported: bool,
    pub first_queued_at: DateTime<Utc>,
}

impl QueuedRequest {
    pub fn device_id(&self) -> &str {
        &self.request.device_id
    }
}

/// Pending work keyed by device, at most one entry per device, served oldest first.
#[derive(Debug)]
pub struct CommandQueue {
    entries: HashMap<String, QueuedRequest>,
    order: VecDeque<String>,
    max_attempts: u8,
}

impl CommandQueue {
    pub fn new(max_attempts: u8) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            max_attempts,
        }
    }

    /// Inserts an externally delivered request, coalescing with any entry
    /// already pending for the same device.
    pub fn submit(&mut self, request: DeviceRequest) {
        let explicit_attempts = request.attempts_remaining;
        if let Some(existing) = self.entries.get_mut(&request.device_id) {
            debug!(device_id = %request.device_id, "Coalescing with pending request");
            existing.request.merge(request);
            if let Some(attempts) = explicit_attempts {
                existing.attempts_remaining = attempts;
                existing.request.attempts_remaining = Some(attempts);
            }
            return;
        }

        let device_id = request.device_id.clone();
        self.entries.insert(
            device_id.clone(),
            QueuedRequest {
                request,
                attempts_remaining: explicit_attempts.unwrap_or(self.max_attempts),
                connect_failure_reported: false,
                first_queued_at: Utc::now(),
            },
        );
        self.order.push_back(device_id);
    }

    pub fn take_one(&mut self) -> Option<QueuedRequest> {
        while let Some(device_id) = self.order.pop_front() {
            if let Some(entry) = self.entries.remove(&device_id) {
                return Some(entry);
            }
        }
        None
    }

    /// Puts a failed entry back at the end of the line. If a newer request for
    /// the device arrived meanwhile, its fields win but the retry state of the
    /// failed entry is kept.
    pub fn requeue(&mut self, mut entry: QueuedRequest) {
        let device_id = entry.device_id().to_owned();
        if let Some(newer) = self.entries.remove(&device_id) {
            let explicit_attempts = newer.request.attempts_remaining;
            entry.request.merge(newer.request);
            if let Some(attempts) = explicit_attempts {
                entry.attempts_remaining = attempts;
            }
            self.order.retain(|id| id != &device_id);
        }
        self.entries.insert(device_id.clone(), entry);
        self.order.push_back(device_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, device_id: &str) -> Option<&QueuedRequest> {
        self.entries.get(device_id)
    }
}
