// Default-device switching with playback-stream relocation
//
// Switching an output is a multi-step operation: set the default by code,
// re-resolve the code's numeric index (the cached one may be stale), then
// move every active playback stream across, each move awaited. The primary
// step landing with incomplete relocation is reported as a partial failure,
// not silently dropped. Switching an input sets the default source only;
// capture streams are left where they are.

use tracing::{info, warn};

use crate::bridge::Bridge;
use crate::catalog::DeviceRecord;
use crate::error::{ControlError, Result};
use crate::server::{DeviceKind, ServerLink};

/// Make `outputs[index]` the system default and relocate active playback
/// streams to it. Updates `default_output` once the primary step lands.
pub(crate) fn switch_default_output<L: ServerLink>(
    bridge: &Bridge<L>,
    outputs: &[DeviceRecord],
    default_output: &mut Option<String>,
    index: usize,
) -> Result<()> {
    let record = outputs.get(index).ok_or(ControlError::DeviceNotFound {
        kind: DeviceKind::Output,
        index,
    })?;
    let code = record.code.clone();

    bridge.run_and_wait(|link, reply| link.set_default_device(DeviceKind::Output, &code, reply))?;
    *default_output = Some(code.clone());
    info!(code = %code, "default output changed");

    let fresh_index = bridge
        .run_and_wait(|link, reply| link.device_index_by_code(DeviceKind::Output, &code, reply))?
        .ok_or_else(|| ControlError::CodeNotFound(code.clone()))?;

    let streams = bridge.run_and_wait(|link, reply| link.list_playback_streams(reply))?;
    relocate(bridge, streams.iter().map(|s| s.index), fresh_index)
}

/// Make `inputs[index]` the system default capture device.
pub(crate) fn switch_default_input<L: ServerLink>(
    bridge: &Bridge<L>,
    inputs: &[DeviceRecord],
    default_input: &mut Option<String>,
    index: usize,
) -> Result<()> {
    let record = inputs.get(index).ok_or(ControlError::DeviceNotFound {
        kind: DeviceKind::Input,
        index,
    })?;
    let code = record.code.clone();

    bridge.run_and_wait(|link, reply| link.set_default_device(DeviceKind::Input, &code, reply))?;
    *default_input = Some(code);
    info!(code = %record.code, "default input changed");
    Ok(())
}

/// Move every playback stream currently on `outputs[from]` to `outputs[to]`.
pub(crate) fn move_playback_streams<L: ServerLink>(
    bridge: &Bridge<L>,
    outputs: &[DeviceRecord],
    from: usize,
    to: usize,
) -> Result<()> {
    let from_device = outputs
        .get(from)
        .ok_or(ControlError::DeviceNotFound {
            kind: DeviceKind::Output,
            index: from,
        })?
        .index;
    let to_device = outputs
        .get(to)
        .ok_or(ControlError::DeviceNotFound {
            kind: DeviceKind::Output,
            index: to,
        })?
        .index;

    let streams = bridge.run_and_wait(|link, reply| link.list_playback_streams(reply))?;
    relocate(
        bridge,
        streams
            .iter()
            .filter(|s| s.device == from_device)
            .map(|s| s.index),
        to_device,
    )
}

/// Move each stream with an awaited round-trip, aggregating failures.
fn relocate<L: ServerLink>(
    bridge: &Bridge<L>,
    streams: impl Iterator<Item = u32>,
    device: u32,
) -> Result<()> {
    let mut total = 0usize;
    let mut moved = 0usize;
    for stream in streams {
        total += 1;
        match bridge.run_and_wait(|link, reply| link.move_playback_stream(stream, device, reply)) {
            Ok(()) => moved += 1,
            Err(err) => warn!(stream, device, %err, "failed to move playback stream"),
        }
    }
    if moved < total {
        return Err(ControlError::PartialMove { moved, total });
    }
    Ok(())
}
