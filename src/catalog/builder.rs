// Catalog construction: one list round-trip, then per-device enrichment
//
// The build either returns a fully populated collection or fails whole; a
// partially filled catalog is never handed to a caller. Device counts are
// small, so the sequential O(devices x round-trips) cost is acceptable.

use tracing::debug;

use crate::bridge::Bridge;
use crate::error::{ControlError, Result};
use crate::hardware::CapabilityResolver;
use crate::server::{DeviceKind, ServerLink};

use super::types::DeviceRecord;

/// Build the ordered device collection for one kind.
pub fn build<L: ServerLink>(
    bridge: &Bridge<L>,
    kind: DeviceKind,
    resolver: &dyn CapabilityResolver,
) -> Result<Vec<DeviceRecord>> {
    let raw = bridge
        .run_and_wait(|link, reply| link.list_devices(kind, reply))
        .map_err(|err| ControlError::BuildFailed(format!("listing {kind} devices: {err}")))?;

    let mut records = Vec::with_capacity(raw.len());
    for device in raw {
        let channel_names = bridge
            .run_and_wait(|link, reply| link.channel_names(kind, device.index, reply))
            .map_err(|err| {
                ControlError::BuildFailed(format!(
                    "resolving channel names for {kind} device '{}': {err}",
                    device.code
                ))
            })?;

        let caps = resolver.resolve(&device.code);
        if caps.is_none() {
            debug!(
                code = %device.code,
                "hardware capabilities unavailable, keeping server-reported values"
            );
        }

        records.push(DeviceRecord {
            index: device.index,
            code: device.code,
            label: device.label,
            volume: device.volume,
            mute: device.mute,
            channel_names,
            min_channels: caps.map(|c| c.min_channels),
            max_channels: caps.map(|c| c.max_channels),
            sample_rate: caps.map_or(device.sample_rate, |c| c.sample_rate),
            profiles: device.profiles,
        });
    }

    debug!(%kind, count = records.len(), "device catalog built");
    Ok(records)
}
