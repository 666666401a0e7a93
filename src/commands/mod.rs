// commands/mod.rs
//! Translation of a device request into the frames sent during one conversation.

use crate::{
    models::DeviceRequest,
    protocol::{self, Frame},
};
use tracing::{debug, warn};

/// Frames for `request`, in the order the controller needs them: status
/// query, power, colour, then mode. Colour and mode override each other on the
/// device and a mode change only sticks once power and colour have settled.
///
/// Commands the codec rejects are left out rather than failing the request.
pub fn plan_frames(request: &DeviceRequest) -> Vec<Frame> {
    let device_id = request.device_id.as_str();
    let mut frames = Vec::with_capacity(4);

    if request.want_status {
        frames.push(protocol::encode_status_query());
    }

    if let Some(on) = request.power {
        frames.push(protocol::encode_power(on));
    }

    if let Some([r, g, b]) = request.rgb {
        let scale = request
            .brightness_percent
            .map_or(1.0, |percent| f64::from(percent) / 100.0);
        match protocol::encode_color(r, g, b, scale) {
            Ok(frame) => frames.push(frame),
            Err(e) => warn!(%device_id, error = %e, "Skipping colour command"),
        }
    } else if request.brightness_percent.is_some() {
        debug!(%device_id, "Brightness without a colour has nothing to scale");
    }

    match (request.mode, request.speed) {
        (Some(mode), Some(speed)) => match protocol::encode_mode(mode, speed) {
            Ok(frame) => {
                debug!(%device_id, mode, name = protocol::mode_name(mode), "Mode selected");
                frames.push(frame);
            }
            Err(e) => warn!(%device_id, error = %e, "Skipping mode command"),
        },
        (Some(mode), None) => warn!(%device_id, mode, "Skipping mode command without a speed"),
        (None, Some(_)) => debug!(%device_id, "Speed without a mode is ignored"),
        (None, None) => {}
    }

    frames
}
