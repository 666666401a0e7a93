// simulated.rs
//! In-memory Triones controllers for running the bridge without a radio.

use super::{Link, Transport};
use crate::{
    config::SimulatedSettings,
    error::LinkError,
    protocol::{self, Frame, LampState},
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};
use tracing::debug;

/// Mode byte the controller reports while showing a static colour.
const STATIC_COLOUR_MODE: u8 = 0x41;

pub struct SimulatedTransport {
    lamps: Arc<DashMap<String, LampState>>,
    connect_attempts: DashMap<String, u32>,
    flaky_connects: u32,
    unreachable: HashSet<String>,
}

impl SimulatedTransport {
    pub fn new(settings: &SimulatedSettings) -> Self {
        Self {
            lamps: Arc::new(DashMap::new()),
            connect_attempts: DashMap::new(),
            flaky_connects: settings.flaky_connects,
            unreachable: settings.unreachable.iter().cloned().collect(),
        }
    }

    /// Current state of a lamp that has been connected to at least once.
    pub fn lamp(&self, device_id: &str) -> Option<LampState> {
        self.lamps.get(device_id).map(|state| *state)
    }

    pub fn connect_attempts(&self, device_id: &str) -> u32 {
        self.connect_attempts.get(device_id).map_or(0, |count| *count)
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn connect(&self, device_id: &str) -> Result<Box<dyn Link>, LinkError> {
        let attempt = {
            let mut count = self.connect_attempts.entry(device_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        if self.unreachable.contains(device_id) || attempt <= self.flaky_connects {
            return Err(LinkError::Connect {
                device_id: device_id.to_string(),
                reason: format!("simulated failure on attempt {attempt}"),
            });
        }

        self.lamps
            .entry(device_id.to_string())
            .or_insert(LampState {
                power: false,
                mode: STATIC_COLOUR_MODE,
                speed: 1,
                rgb: [255, 255, 255],
            });

        Ok(Box::new(SimulatedLamp {
            device_id: device_id.to_string(),
            lamps: Arc::clone(&self.lamps),
            notifications: VecDeque::new(),
        }))
    }
}

struct SimulatedLamp {
    device_id: String,
    lamps: Arc<DashMap<String, LampState>>,
    notifications: VecDeque<Vec<u8>>,
}

#[async_trait]
impl Link for SimulatedLamp {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let frame = Frame::parse(bytes).map_err(|e| LinkError::Write {
            device_id: self.device_id.clone(),
            reason: e.to_string(),
        })?;
        let mut state = self
            .lamps
            .get_mut(&self.device_id)
            .ok_or_else(|| LinkError::Write {
                device_id: self.device_id.clone(),
                reason: "lamp vanished".into(),
            })?;

        match frame {
            Frame::StatusQuery => {
                let reply = protocol::encode_status_notification(&state);
                self.notifications.push_back(reply.to_vec());
            }
            Frame::PowerOn => state.power = true,
            Frame::PowerOff => state.power = false,
            Frame::Color { r, g, b } => {
                state.rgb = [r, g, b];
                state.mode = STATIC_COLOUR_MODE;
            }
            Frame::Mode { mode, speed } => {
                state.mode = mode;
                state.speed = speed;
            }
        }
        debug!(device_id = %self.device_id, ?frame, "Simulated lamp applied frame");
        Ok(())
    }

    async fn await_notification(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, LinkError> {
        if let Some(reply) = self.notifications.pop_front() {
            return Ok(Some(reply));
        }
        tokio::time::sleep(timeout).await;
        Ok(None)
    }

    async fn disconnect(self: Box<Self>) -> Result<(), LinkError> {
        Ok(())
    }
}
