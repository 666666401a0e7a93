// ble.rs
//! Bluetooth LE transport for Triones controllers, built on btleplug.
//!
//! Every command goes to one characteristic (0xFFD9) of service 0xFFD5 and
//! every reply comes back as a notification on 0xFFD4.

use super::{CleanupGuard, Link, Transport};
use crate::error::LinkError;
use async_trait::async_trait;
use btleplug::{
    api::{
        BDAddr, Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
        ValueNotification, WriteType, bleuuid::uuid_from_u16,
    },
    platform::{Adapter, Manager, Peripheral},
};
use futures_util::{Stream, StreamExt};
use std::{pin::Pin, str::FromStr, time::Duration};
use tracing::{debug, info};
use uuid::Uuid;

const MAIN_SERVICE: u16 = 0xFFD5;
const COMMAND_CHARACTERISTIC: u16 = 0xFFD9;
const RESPONSE_CHARACTERISTIC: u16 = 0xFFD4;

type Notifications = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

pub struct BleTransport {
    adapter: Adapter,
    scan_timeout: Duration,
}

impl BleTransport {
    pub async fn new(scan_timeout: Duration) -> Result<Self, LinkError> {
        let manager = Manager::new().await.map_err(unavailable)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(unavailable)?
            .into_iter()
            .next()
            .ok_or_else(|| LinkError::Unavailable("no bluetooth adapter found".into()))?;
        info!(
            adapter = %adapter.adapter_info().await.unwrap_or_default(),
            "Bluetooth adapter ready"
        );
        Ok(Self { adapter, scan_timeout })
    }

    async fn find(&self, address: BDAddr) -> Result<Option<Peripheral>, btleplug::Error> {
        if let Some(peripheral) = self.known(address).await? {
            return Ok(Some(peripheral));
        }

        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;
        let adapter = self.adapter.clone();
        let scanning = CleanupGuard::new(async move {
            if let Err(e) = adapter.stop_scan().await {
                debug!(error = %e, "Failed to stop scan");
            }
        });
        let found = tokio::time::timeout(self.scan_timeout, async {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDiscovered(id) = event {
                    let peripheral = self.adapter.peripheral(&id).await?;
                    debug!(address = %peripheral.address(), "Discovered device");
                    if peripheral.address() == address {
                        return Ok(Some(peripheral));
                    }
                }
            }
            Ok::<_, btleplug::Error>(None)
        })
        .await;
        scanning.disarm();
        self.adapter.stop_scan().await?;

        match found {
            Ok(result) => result,
            Err(_) => self.known(address).await,
        }
    }

    async fn known(&self, address: BDAddr) -> Result<Option<Peripheral>, btleplug::Error> {
        Ok(self
            .adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|peripheral| peripheral.address() == address))
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn connect(&self, device_id: &str) -> Result<Box<dyn Link>, LinkError> {
        let connect_error = |reason: String| LinkError::Connect {
            device_id: device_id.to_string(),
            reason,
        };

        let address = BDAddr::from_str(device_id).map_err(|e| connect_error(e.to_string()))?;
        let peripheral = self
            .find(address)
            .await
            .map_err(|e| connect_error(e.to_string()))?
            .ok_or_else(|| connect_error("device not found while scanning".into()))?;

        let connected = {
            let peripheral = peripheral.clone();
            CleanupGuard::new(async move {
                let _ = peripheral.disconnect().await;
            })
        };
        if let Err(e) = peripheral.connect().await {
            connected.run().await;
            return Err(connect_error(e.to_string()));
        }
        let prepared = async {
            peripheral.discover_services().await?;
            let notifications = peripheral.notifications().await?;
            Ok::<_, btleplug::Error>(notifications)
        }
        .await;
        let notifications = match prepared {
            Ok(notifications) => notifications,
            Err(e) => {
                connected.run().await;
                return Err(connect_error(e.to_string()));
            }
        };

        let command = characteristic(&peripheral, COMMAND_CHARACTERISTIC);
        let response = characteristic(&peripheral, RESPONSE_CHARACTERISTIC);
        let Some(command) = command else {
            connected.run().await;
            return Err(connect_error("command characteristic missing".into()));
        };
        if let Some(response) = &response {
            if let Err(e) = peripheral.subscribe(response).await {
                connected.run().await;
                return Err(connect_error(e.to_string()));
            }
        }
        connected.disarm();

        Ok(Box::new(BleLink {
            device_id: device_id.to_string(),
            peripheral,
            command,
            response: response.map(|c| c.uuid),
            notifications,
        }))
    }
}

fn characteristic(peripheral: &Peripheral, short_uuid: u16) -> Option<Characteristic> {
    let service: Uuid = uuid_from_u16(MAIN_SERVICE);
    let uuid = uuid_from_u16(short_uuid);
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid && c.service_uuid == service)
}

fn unavailable(e: btleplug::Error) -> LinkError {
    LinkError::Unavailable(e.to_string())
}

struct BleLink {
    device_id: String,
    peripheral: Peripheral,
    command: Characteristic,
    response: Option<Uuid>,
    notifications: Notifications,
}

#[async_trait]
impl Link for BleLink {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.peripheral
            .write(&self.command, bytes, WriteType::WithoutResponse)
            .await
            .map_err(|e| LinkError::Write {
                device_id: self.device_id.clone(),
                reason: e.to_string(),
            })
    }

    async fn await_notification(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, LinkError> {
        let Some(response) = self.response else {
            return Ok(None);
        };
        let notifications = &mut self.notifications;
        let next = tokio::time::timeout(timeout, async {
            while let Some(notification) = notifications.next().await {
                if notification.uuid == response {
                    return Some(notification.value);
                }
                debug!(uuid = %notification.uuid, "Ignoring notification from other characteristic");
            }
            None
        })
        .await;
        Ok(next.unwrap_or(None))
    }

    async fn disconnect(self: Box<Self>) -> Result<(), LinkError> {
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| LinkError::Disconnect {
                device_id: self.device_id.clone(),
                reason: e.to_string(),
            })
    }
}
