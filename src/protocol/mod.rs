// protocol/mod.rs
//! Triones LED controller wire protocol.
//!
//! Every command is a short fixed-length frame written to the controller's
//! command characteristic. The only frame the controller sends back is the
//! 12-byte status notification:
//!
//! ```text
//! 66 04 PP MM 20 SS RR GG BB WW 03 99
//!        |  |     |  |  |  |  +-- white channel (ignored)
//!        |  |     |  +--+--+----- colour
//!        |  |     +-------------- speed
//!        |  +-------------------- mode
//!        +----------------------- power (0x23 on, 0x24 off)
//! ```

use crate::error::CodecError;
use std::ops::RangeInclusive;

pub const STATUS_QUERY: [u8; 3] = [0xEF, 0x01, 0x77];
pub const POWER_ON: [u8; 3] = [0xCC, 0x23, 0x33];
pub const POWER_OFF: [u8; 3] = [0xCC, 0x24, 0x33];

const COLOR_OPCODE: u8 = 0x56;
const COLOR_TRAILER: [u8; 3] = [0x00, 0xF0, 0xAA];
const MODE_OPCODE: u8 = 0xBB;
const MODE_TRAILER: u8 = 0x44;

const NOTIFICATION_LEN: usize = 12;
const NOTIFICATION_HEADER: [u8; 2] = [0x66, 0x04];
const NOTIFICATION_TRAILER: u8 = 0x99;
const POWERED_ON: u8 = 0x23;
const POWERED_OFF: u8 = 0x24;

/// Animation modes the controller accepts.
pub const MODE_RANGE: RangeInclusive<u8> = 0x25..=0x38;

const MODE_NAMES: [&str; 20] = [
    "Seven color cross fade",
    "Red gradual change",
    "Green gradual change",
    "Blue gradual change",
    "Yellow gradual change",
    "Cyan gradual change",
    "Purple gradual change",
    "White gradual change",
    "Red, Green cross fade",
    "Red blue cross fade",
    "Green blue cross fade",
    "Seven color strobe flash",
    "Red strobe flash",
    "Green strobe flash",
    "Blue strobe flash",
    "Yellow strobe flash",
    "Cyan strobe flash",
    "Purple strobe flash",
    "White strobe flash",
    "Seven color jumping change",
];

/// A single command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    StatusQuery,
    PowerOn,
    PowerOff,
    Color { r: u8, g: u8, b: u8 },
    Mode { mode: u8, speed: u8 },
}

impl Frame {
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            Frame::StatusQuery => STATUS_QUERY.to_vec(),
            Frame::PowerOn => POWER_ON.to_vec(),
            Frame::PowerOff => POWER_OFF.to_vec(),
            Frame::Color { r, g, b } => {
                let mut bytes = vec![COLOR_OPCODE, r, g, b];
                bytes.extend_from_slice(&COLOR_TRAILER);
                bytes
            }
            Frame::Mode { mode, speed } => vec![MODE_OPCODE, mode, speed, MODE_TRAILER],
        }
    }

    pub fn opcode(&self) -> u8 {
        match self {
            Frame::StatusQuery => STATUS_QUERY[0],
            Frame::PowerOn | Frame::PowerOff => POWER_ON[0],
            Frame::Color { .. } => COLOR_OPCODE,
            Frame::Mode { .. } => MODE_OPCODE,
        }
    }

    /// Reads a frame the way a controller would on receipt.
    pub fn parse(bytes: &[u8]) -> Result<Frame, CodecError> {
        match bytes {
            b if b == STATUS_QUERY => Ok(Frame::StatusQuery),
            b if b == POWER_ON => Ok(Frame::PowerOn),
            b if b == POWER_OFF => Ok(Frame::PowerOff),
            [COLOR_OPCODE, r, g, b, trailer @ ..] if trailer == COLOR_TRAILER => Ok(Frame::Color {
                r: *r,
                g: *g,
                b: *b,
            }),
            [MODE_OPCODE, mode, speed, MODE_TRAILER] => encode_mode(*mode, *speed),
            other => Err(CodecError::Parse(format!("unknown command frame {:02X?}", other))),
        }
    }
}

/// Decoded contents of a status notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LampState {
    pub power: bool,
    pub mode: u8,
    pub speed: u8,
    pub rgb: [u8; 3],
}

pub fn encode_status_query() -> Frame {
    Frame::StatusQuery
}

pub fn encode_power(on: bool) -> Frame {
    if on { Frame::PowerOn } else { Frame::PowerOff }
}

/// Builds a colour frame, each channel scaled by `scale` to emulate brightness.
pub fn encode_color(r: u8, g: u8, b: u8, scale: f64) -> Result<Frame, CodecError> {
    if !(0.0..=1.0).contains(&scale) {
        return Err(CodecError::InvalidArgument(format!(
            "colour scale {scale} outside [0, 1]"
        )));
    }
    let channel = |value: u8| (f64::from(value) * scale).trunc().clamp(0.0, 255.0) as u8;
    Ok(Frame::Color {
        r: channel(r),
        g: channel(g),
        b: channel(b),
    })
}

/// Builds a mode frame. Speed is device specific: higher is slower.
pub fn encode_mode(mode: u8, speed: u8) -> Result<Frame, CodecError> {
    if !MODE_RANGE.contains(&mode) {
        return Err(CodecError::InvalidArgument(format!(
            "mode {mode} outside {}..={}",
            MODE_RANGE.start(),
            MODE_RANGE.end()
        )));
    }
    Ok(Frame::Mode { mode, speed })
}

pub fn decode_status_notification(bytes: &[u8]) -> Result<LampState, CodecError> {
    if bytes.len() != NOTIFICATION_LEN {
        return Err(CodecError::Parse(format!(
            "status notification is {} bytes, expected {NOTIFICATION_LEN}",
            bytes.len()
        )));
    }
    if bytes[..2] != NOTIFICATION_HEADER || bytes[11] != NOTIFICATION_TRAILER {
        return Err(CodecError::Parse(format!(
            "status notification markers invalid: {:02X?}",
            bytes
        )));
    }
    Ok(LampState {
        power: bytes[2] == POWERED_ON,
        mode: bytes[3],
        speed: bytes[5],
        rgb: [bytes[6], bytes[7], bytes[8]],
    })
}

/// The notification a controller emits in answer to a status query.
pub fn encode_status_notification(state: &LampState) -> [u8; NOTIFICATION_LEN] {
    let [r, g, b] = state.rgb;
    [
        NOTIFICATION_HEADER[0],
        NOTIFICATION_HEADER[1],
        if state.power { POWERED_ON } else { POWERED_OFF },
        state.mode,
        0x20,
        state.speed,
        r,
        g,
        b,
        0x00,
        0x03,
        NOTIFICATION_TRAILER,
    ]
}

pub fn mode_name(mode: u8) -> Option<&'static str> {
    MODE_RANGE
        .contains(&mode)
        .then(|| MODE_NAMES[usize::from(mode - MODE_RANGE.start())])
}
