use crate::error::RequestError;
use crate::events::EventBus;
use crate::protocol::LampState;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use tokio::sync::{Semaphore, broadcast};
use utoipa::ToSchema;
use validator::Validate;

/// Control message as published on the control topic.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct ControlRequest {
    /// Bluetooth address of the controller.
    #[serde(alias = "deviceId")]
    #[validate(length(min = 1))]
    pub mac: String,
    /// Present when a status read-back is wanted; the value is ignored.
    #[serde(default, deserialize_with = "key_present")]
    #[schema(value_type = Option<Object>)]
    pub status: bool,
    pub power: Option<bool>,
    #[schema(value_type = Option<Vec<u8>>)]
    pub rgb_colour: Option<[u8; 3]>,
    /// Scales `rgb_colour` before it is sent, 0..=100.
    pub percentage: Option<u8>,
    /// Animation mode, 37..=56.
    pub mode: Option<u8>,
    /// Animation speed, higher is slower.
    pub speed: Option<u8>,
    /// Overrides the retry budget of the queued request.
    pub attempts: Option<u8>,
}

fn key_present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    serde::de::IgnoredAny::deserialize(deserializer)?;
    Ok(true)
}

/// Pending work for one device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceRequest {
    pub device_id: String,
    pub power: Option<bool>,
    pub rgb: Option<[u8; 3]>,
    pub brightness_percent: Option<u8>,
    pub mode: Option<u8>,
    pub speed: Option<u8>,
    pub want_status: bool,
    /// Explicit retry budget; `None` takes the configured maximum.
    pub attempts_remaining: Option<u8>,
}

impl DeviceRequest {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Default::default()
        }
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, RequestError> {
        let request: ControlRequest = serde_json::from_value(value)?;
        request.validate()?;
        Ok(request.into())
    }

    /// Overlays every command field present in `newer` onto this request.
    /// The retry budget is left to the queue.
    pub fn merge(&mut self, newer: DeviceRequest) {
        if newer.power.is_some() {
            self.power = newer.power;
        }
        if newer.rgb.is_some() {
            self.rgb = newer.rgb;
        }
        if newer.brightness_percent.is_some() {
            self.brightness_percent = newer.brightness_percent;
        }
        if newer.mode.is_some() {
            self.mode = newer.mode;
        }
        if newer.speed.is_some() {
            self.speed = newer.speed;
        }
        self.want_status |= newer.want_status;
    }
}

impl From<ControlRequest> for DeviceRequest {
    fn from(request: ControlRequest) -> Self {
        Self {
            device_id: request.mac,
            power: request.power,
            rgb: request.rgb_colour,
            brightness_percent: request.percentage,
            mode: request.mode,
            speed: request.speed,
            want_status: request.status,
            attempts_remaining: request.attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DeviceStatus {
    #[serde(rename = "mac")]
    pub device_id: String,
    pub power: bool,
    #[schema(value_type = Vec<u8>)]
    pub rgb: [u8; 3],
    pub speed: u8,
    pub mode: u8,
}

impl DeviceStatus {
    pub fn new(device_id: impl Into<String>, state: &LampState) -> Self {
        Self {
            device_id: device_id.into(),
            power: state.power,
            rgb: state.rgb,
            speed: state.speed,
            mode: state.mode,
        }
    }
}

/// Message published on the status topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum StatusReport {
    Status(DeviceStatus),
    ConnectFailed { mac: String, connect: bool },
}

impl StatusReport {
    pub fn connect_failed(device_id: impl Into<String>) -> Self {
        StatusReport::ConnectFailed {
            mac: device_id.into(),
            connect: false,
        }
    }

    pub fn device_id(&self) -> &str {
        match self {
            StatusReport::Status(status) => &status.device_id,
            StatusReport::ConnectFailed { mac, .. } => mac,
        }
    }
}

/// Shared state of the gateway.
pub struct AppState {
    pub bus: Arc<EventBus>,
    pub control_topic: String,
    /// Status-topic traffic fanned out to connected clients.
    pub statuses: broadcast::Sender<serde_json::Value>,
    pub client_slots: Arc<Semaphore>,
}

impl AppState {
    pub fn new(bus: Arc<EventBus>, control_topic: &str, status_topic: &str, max_clients: usize) -> Self {
        let (statuses, _) = broadcast::channel(100);
        let forward = statuses.clone();
        bus.subscribe(status_topic, move |value| {
            // No receivers just means no client is listening right now.
            let _ = forward.send(value);
        });
        Self {
            bus,
            control_topic: control_topic.to_string(),
            statuses,
            client_slots: Arc::new(Semaphore::new(max_clients)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_full_request() {
        let request = DeviceRequest::from_value(json!({
            "mac": "AA:BB",
            "status": null,
            "power": true,
            "rgb_colour": [255, 0, 0],
            "percentage": 50,
            "mode": 37,
            "speed": 10
        }))
        .unwrap();
        assert_eq!(request.device_id, "AA:BB");
        assert!(request.want_status);
        assert_eq!(request.power, Some(true));
        assert_eq!(request.rgb, Some([255, 0, 0]));
        assert_eq!(request.brightness_percent, Some(50));
        assert_eq!(request.mode, Some(37));
        assert_eq!(request.speed, Some(10));
        assert_eq!(request.attempts_remaining, None);
    }

    #[test]
    fn accepts_device_id_alias() {
        let request = DeviceRequest::from_value(json!({"deviceId": "CC:DD", "power": false})).unwrap();
        assert_eq!(request.device_id, "CC:DD");
        assert!(!request.want_status);
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(matches!(
            DeviceRequest::from_value(json!("not an object")),
            Err(RequestError::Malformed(_))
        ));
        assert!(matches!(
            DeviceRequest::from_value(json!({"power": true})),
            Err(RequestError::Malformed(_))
        ));
        assert!(matches!(
            DeviceRequest::from_value(json!({"mac": "", "power": true})),
            Err(RequestError::Invalid(_))
        ));
    }

    #[test]
    fn out_of_range_fields_do_not_reject_the_request() {
        let request = DeviceRequest::from_value(json!({"mac": "AA", "power": true, "speed": 0})).unwrap();
        assert_eq!(request.power, Some(true));
        assert_eq!(request.speed, Some(0));

        let request = DeviceRequest::from_value(
            json!({"mac": "AA", "power": true, "rgb_colour": [1, 2, 3], "percentage": 101}),
        )
        .unwrap();
        assert_eq!(request.brightness_percent, Some(101));
        assert_eq!(request.power, Some(true));
    }

    #[test]
    fn out_of_range_mode_is_still_accepted() {
        let request = DeviceRequest::from_value(json!({"mac": "AA:BB", "mode": 99, "speed": 10})).unwrap();
        assert_eq!(request.mode, Some(99));
    }

    #[test]
    fn merge_keeps_absent_fields() {
        let mut queued = DeviceRequest {
            power: Some(true),
            want_status: true,
            attempts_remaining: Some(4),
            ..DeviceRequest::new("A")
        };
        queued.merge(DeviceRequest {
            power: Some(false),
            rgb: Some([1, 2, 3]),
            ..DeviceRequest::new("A")
        });
        assert_eq!(queued.power, Some(false));
        assert_eq!(queued.rgb, Some([1, 2, 3]));
        assert!(queued.want_status);
        assert_eq!(queued.attempts_remaining, Some(4));
    }

    #[test]
    fn status_reports_serialize_to_wire_shape() {
        let status = StatusReport::Status(DeviceStatus {
            device_id: "AA:BB".into(),
            power: true,
            rgb: [1, 2, 3],
            speed: 5,
            mode: 37,
        });
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({"mac": "AA:BB", "power": true, "rgb": [1, 2, 3], "speed": 5, "mode": 37})
        );
        assert_eq!(
            serde_json::to_value(StatusReport::connect_failed("AA:BB")).unwrap(),
            json!({"mac": "AA:BB", "connect": false})
        );
    }
}
