//! Bridge between a topic bus and Triones Bluetooth LED controllers.
//!
//! Control messages become queued [`models::DeviceRequest`]s, one per device.
//! The [`dispatch::Dispatcher`] talks to one device at a time through a
//! [`link::Transport`], retrying flaky connections a bounded number of times,
//! and publishes decoded status replies back on the bus.

pub mod commands;
pub mod config;
pub mod dispatch;
pub mod docs;
pub mod engine;
pub mod error;
pub mod events;
pub mod handlers;
pub mod link;
pub mod metrics;
pub mod models;
pub mod protocol;
pub mod queue;
