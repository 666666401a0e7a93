use async_trait::async_trait;
use serde_json::{Value, json};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::mpsc;
use triones_bridge::{
    config::BridgeSettings,
    dispatch::{self, Dispatcher, Tick},
    engine::{ConversationEngine, EngineTimeouts},
    error::LinkError,
    events::{EventBus, StatusPublisher},
    link::{Link, Transport},
};

#[derive(Default)]
struct Script {
    /// Connects to fail before one succeeds.
    connect_failures: u32,
    /// Which write of a conversation fails, and for how many conversations.
    failing_write: Option<(usize, u32)>,
    reply: Option<Vec<u8>>,
    fail_disconnect: bool,
}

#[derive(Default)]
struct Log {
    connects: u32,
    writes: Vec<Vec<u8>>,
    disconnects: u32,
}

struct ScriptedTransport {
    script: Mutex<Script>,
    log: Arc<Mutex<Log>>,
}

struct ScriptedLink {
    log: Arc<Mutex<Log>>,
    fail_at: Option<usize>,
    written: usize,
    reply: Option<Vec<u8>>,
    fail_disconnect: bool,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, device_id: &str) -> Result<Box<dyn Link>, LinkError> {
        self.log.lock().unwrap().connects += 1;
        let mut script = self.script.lock().unwrap();
        if script.connect_failures > 0 {
            script.connect_failures -= 1;
            return Err(LinkError::Connect {
                device_id: device_id.to_string(),
                reason: "out of range".into(),
            });
        }
        let fail_at = match &mut script.failing_write {
            Some((index, remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Some(*index)
            }
            _ => None,
        };
        Ok(Box::new(ScriptedLink {
            log: Arc::clone(&self.log),
            fail_at,
            written: 0,
            reply: script.reply.clone(),
            fail_disconnect: script.fail_disconnect,
        }))
    }
}

#[async_trait]
impl Link for ScriptedLink {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let index = self.written;
        self.written += 1;
        if self.fail_at == Some(index) {
            return Err(LinkError::Write {
                device_id: "scripted".into(),
                reason: "link dropped".into(),
            });
        }
        self.log.lock().unwrap().writes.push(bytes.to_vec());
        Ok(())
    }

    async fn await_notification(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, LinkError> {
        match self.reply.take() {
            Some(reply) => Ok(Some(reply)),
            None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }

    async fn disconnect(self: Box<Self>) -> Result<(), LinkError> {
        self.log.lock().unwrap().disconnects += 1;
        if self.fail_disconnect {
            return Err(LinkError::Disconnect {
                device_id: "scripted".into(),
                reason: "already gone".into(),
            });
        }
        Ok(())
    }
}

struct Bridge {
    bus: Arc<EventBus>,
    dispatcher: Dispatcher,
    log: Arc<Mutex<Log>>,
    published: Arc<Mutex<Vec<Value>>>,
}

impl Bridge {
    fn new(script: Script) -> Self {
        let settings = BridgeSettings {
            retry_backoff_ms: 0,
            ..BridgeSettings::default()
        };
        let log = Arc::new(Mutex::new(Log::default()));
        let transport = Arc::new(ScriptedTransport {
            script: Mutex::new(script),
            log: Arc::clone(&log),
        });

        let bus = Arc::new(EventBus::new());
        let published = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&published);
        bus.subscribe(&settings.status_topic, move |value| sink.lock().unwrap().push(value));

        let (requests, inbound) = mpsc::unbounded_channel();
        dispatch::subscribe_control(&bus, &settings.control_topic, requests);
        let engine = ConversationEngine::new(
            transport,
            StatusPublisher::new(Arc::clone(&bus), settings.status_topic.clone()),
            EngineTimeouts::from(&settings),
        );

        Self {
            bus,
            dispatcher: Dispatcher::new(engine, inbound, &settings),
            log,
            published,
        }
    }

    fn send(&self, payload: Value) {
        self.bus.publish("triones/control", payload);
    }

    fn writes(&self) -> Vec<Vec<u8>> {
        self.log.lock().unwrap().writes.clone()
    }

    fn published(&self) -> Vec<Value> {
        self.published.lock().unwrap().clone()
    }
}

#[tokio::test]
async fn half_brightness_red_is_scaled() {
    let mut bridge = Bridge::new(Script::default());
    bridge.send(json!({"mac": "AA:BB", "rgb_colour": [255, 0, 0], "percentage": 50}));

    assert_eq!(bridge.dispatcher.tick().await, Tick::Retired("AA:BB".into()));
    assert_eq!(bridge.writes(), vec![vec![0x56, 127, 0, 0, 0x00, 0xF0, 0xAA]]);
}

#[tokio::test]
async fn overbright_percentage_still_applies_power() {
    let mut bridge = Bridge::new(Script::default());
    bridge.send(json!({"mac": "AA:BB", "power": true, "rgb_colour": [1, 2, 3], "percentage": 101}));

    assert_eq!(bridge.dispatcher.tick().await, Tick::Retired("AA:BB".into()));
    assert_eq!(bridge.writes(), vec![vec![0xCC, 0x23, 0x33]]);
}

#[tokio::test]
async fn zero_speed_is_passed_through_to_the_lamp() {
    let mut bridge = Bridge::new(Script::default());
    bridge.send(json!({"mac": "AA:BB", "power": true, "mode": 37, "speed": 0}));

    assert_eq!(bridge.dispatcher.tick().await, Tick::Retired("AA:BB".into()));
    assert_eq!(bridge.writes(), vec![vec![0xCC, 0x23, 0x33], vec![0xBB, 37, 0, 0x44]]);
}

#[tokio::test]
async fn out_of_range_mode_sends_nothing_and_completes() {
    let mut bridge = Bridge::new(Script::default());
    bridge.send(json!({"mac": "AA:BB", "mode": 99, "speed": 10}));

    assert_eq!(bridge.dispatcher.tick().await, Tick::Retired("AA:BB".into()));
    assert!(bridge.writes().is_empty());
    assert_eq!(bridge.log.lock().unwrap().disconnects, 1);
}

#[tokio::test]
async fn coalesced_requests_share_one_conversation() {
    let mut bridge = Bridge::new(Script::default());
    bridge.send(json!({"mac": "A", "power": true}));
    bridge.send(json!({"mac": "A", "rgb_colour": [1, 2, 3]}));

    assert_eq!(bridge.dispatcher.tick().await, Tick::Retired("A".into()));
    assert_eq!(bridge.dispatcher.tick().await, Tick::Idle);
    assert_eq!(bridge.log.lock().unwrap().connects, 1);
    assert_eq!(
        bridge.writes(),
        vec![vec![0xCC, 0x23, 0x33], vec![0x56, 1, 2, 3, 0x00, 0xF0, 0xAA]]
    );
}

#[tokio::test]
async fn unreachable_device_is_tried_exactly_budget_times() {
    let mut bridge = Bridge::new(Script {
        connect_failures: u32::MAX,
        ..Script::default()
    });
    bridge.send(json!({"mac": "AA:BB", "power": true}));

    let mut ticks = Vec::new();
    loop {
        match bridge.dispatcher.tick().await {
            Tick::Idle => break,
            tick => ticks.push(tick),
        }
    }

    assert_eq!(ticks.len(), 10);
    assert!(ticks[..9].iter().all(|tick| *tick == Tick::Requeued("AA:BB".into())));
    assert_eq!(ticks[9], Tick::Dropped("AA:BB".into()));
    assert_eq!(bridge.log.lock().unwrap().connects, 10);
    assert_eq!(bridge.published(), vec![json!({"mac": "AA:BB", "connect": false})]);
}

#[tokio::test]
async fn write_failure_retries_without_connect_notice() {
    let mut bridge = Bridge::new(Script {
        failing_write: Some((1, 1)),
        ..Script::default()
    });
    bridge.send(json!({"mac": "AA:BB", "power": false, "rgb_colour": [9, 9, 9], "mode": 38, "speed": 4}));

    assert_eq!(bridge.dispatcher.tick().await, Tick::Requeued("AA:BB".into()));
    assert_eq!(bridge.writes(), vec![vec![0xCC, 0x24, 0x33]]);
    assert_eq!(bridge.log.lock().unwrap().disconnects, 1);

    assert_eq!(bridge.dispatcher.tick().await, Tick::Retired("AA:BB".into()));
    assert_eq!(bridge.writes().len(), 4);
    assert_eq!(bridge.writes()[3], vec![0xBB, 38, 4, 0x44]);
    assert!(bridge.published().is_empty());
}

#[tokio::test]
async fn status_reply_is_published() {
    let mut bridge = Bridge::new(Script {
        reply: Some(vec![0x66, 0x04, 0x23, 0x41, 0x20, 0x01, 0x00, 0xFF, 0x00, 0x00, 0x03, 0x99]),
        ..Script::default()
    });
    bridge.send(json!({"mac": "AA:BB", "status": true}));

    assert_eq!(bridge.dispatcher.tick().await, Tick::Retired("AA:BB".into()));
    assert_eq!(bridge.writes(), vec![vec![0xEF, 0x01, 0x77]]);
    assert_eq!(
        bridge.published(),
        vec![json!({"mac": "AA:BB", "power": true, "rgb": [0, 255, 0], "speed": 1, "mode": 0x41})]
    );
}

#[tokio::test]
async fn unreadable_reply_is_not_published() {
    let mut bridge = Bridge::new(Script {
        reply: Some(vec![0x66, 0x04, 0x23]),
        ..Script::default()
    });
    bridge.send(json!({"mac": "AA:BB", "status": 1, "power": true}));

    assert_eq!(bridge.dispatcher.tick().await, Tick::Retired("AA:BB".into()));
    assert!(bridge.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn missing_reply_times_out_quietly() {
    let mut bridge = Bridge::new(Script::default());
    bridge.send(json!({"mac": "AA:BB", "status": null}));

    assert_eq!(bridge.dispatcher.tick().await, Tick::Retired("AA:BB".into()));
    assert!(bridge.published().is_empty());
}

#[tokio::test]
async fn failed_disconnect_does_not_fail_turn() {
    let mut bridge = Bridge::new(Script {
        fail_disconnect: true,
        ..Script::default()
    });
    bridge.send(json!({"mac": "AA:BB", "power": true}));

    assert_eq!(bridge.dispatcher.tick().await, Tick::Retired("AA:BB".into()));
}

#[tokio::test]
async fn malformed_payloads_are_dropped() {
    let mut bridge = Bridge::new(Script::default());
    bridge.send(json!({"power": true}));
    bridge.send(json!([1, 2, 3]));

    assert_eq!(bridge.dispatcher.tick().await, Tick::Idle);
    assert_eq!(bridge.log.lock().unwrap().connects, 0);
}
