// Volume / mute control against cached catalog records
//
// Percentages map linearly onto the server's native fixed-point volume unit.
// Writes clamp to one unit below full scale so a rounding overshoot can never
// produce an out-of-range value on the wire. After every successful write the
// device is re-fetched and the cached record overwritten, so the catalog
// stays consistent with what was actually applied.

use tracing::debug;

use crate::bridge::Bridge;
use crate::catalog::DeviceRecord;
use crate::error::{ControlError, Result};
use crate::server::{DeviceKind, ServerLink, VOLUME_MUTED, VOLUME_NORM};

/// Map a percentage in [0, 100] onto the native volume unit.
pub(crate) fn percent_to_raw(percent: u32) -> u32 {
    let raw = (u64::from(percent) * u64::from(VOLUME_NORM) / 100) as u32;
    raw.min(VOLUME_NORM - 1)
}

/// Map a native volume value back to the nearest percentage.
pub(crate) fn raw_to_percent(raw: u32) -> u32 {
    ((u64::from(raw) * 100 + u64::from(VOLUME_NORM) / 2) / u64::from(VOLUME_NORM)) as u32
}

/// Master volume of a cached vector: the channel average, as a percentage.
pub(crate) fn master_percent(volume: &[u32]) -> u32 {
    if volume.is_empty() {
        return 0;
    }
    let sum: u64 = volume.iter().map(|&v| u64::from(v)).sum();
    raw_to_percent((sum / volume.len() as u64) as u32)
}

fn record<'a>(
    records: &'a [DeviceRecord],
    kind: DeviceKind,
    index: usize,
) -> Result<&'a DeviceRecord> {
    records
        .get(index)
        .ok_or(ControlError::DeviceNotFound { kind, index })
}

fn record_mut(
    records: &mut [DeviceRecord],
    kind: DeviceKind,
    index: usize,
) -> Result<&mut DeviceRecord> {
    records
        .get_mut(index)
        .ok_or(ControlError::DeviceNotFound { kind, index })
}

/// Re-fetch one device and overwrite the cached volume vector and mute flag.
fn refresh<L: ServerLink>(
    bridge: &Bridge<L>,
    kind: DeviceKind,
    cached: &mut DeviceRecord,
) -> Result<()> {
    let fresh = bridge
        .run_and_wait(|link, reply| link.device_by_index(kind, cached.index, reply))?
        .ok_or_else(|| ControlError::CodeNotFound(cached.code.clone()))?;
    cached.volume = fresh.volume;
    cached.mute = fresh.mute;
    Ok(())
}

/// Current master volume percentage, from the cached record.
pub(crate) fn get_master_volume(
    records: &[DeviceRecord],
    kind: DeviceKind,
    index: usize,
) -> Result<u32> {
    Ok(master_percent(&record(records, kind, index)?.volume))
}

/// Set every channel of a device to the same percentage.
///
/// Out-of-range input is rejected before any server round-trip.
pub(crate) fn set_master_volume<L: ServerLink>(
    bridge: &Bridge<L>,
    records: &mut [DeviceRecord],
    kind: DeviceKind,
    index: usize,
    percent: u32,
) -> Result<()> {
    if percent > 100 {
        return Err(ControlError::VolumeOutOfRange(percent));
    }
    let cached = record_mut(records, kind, index)?;

    let raw = percent_to_raw(percent);
    let volume = vec![raw; cached.channels()];
    let device = cached.index;
    bridge.run_and_wait(|link, reply| link.set_device_volume(kind, device, volume, reply))?;
    debug!(%kind, device, percent, "master volume written");

    refresh(bridge, kind, cached)
}

/// Mute or unmute a single channel via read-modify-write.
///
/// The server has no single-channel mute primitive: the current vector is
/// fetched, the target entry set to the muted sentinel (or restored to the
/// vector's maximum on unmute), and the whole vector written back. Not atomic
/// with respect to concurrent external volume changes.
pub(crate) fn set_channel_mute<L: ServerLink>(
    bridge: &Bridge<L>,
    records: &mut [DeviceRecord],
    kind: DeviceKind,
    index: usize,
    channel: usize,
    mute: bool,
) -> Result<()> {
    let cached = record_mut(records, kind, index)?;
    if channel >= cached.channels() {
        return Err(ControlError::ChannelOutOfRange {
            channel,
            channels: cached.channels(),
        });
    }

    let device = cached.index;
    let fresh = bridge
        .run_and_wait(|link, reply| link.device_by_index(kind, device, reply))?
        .ok_or_else(|| ControlError::CodeNotFound(cached.code.clone()))?;

    let mut volume = fresh.volume;
    if channel >= volume.len() {
        return Err(ControlError::ChannelOutOfRange {
            channel,
            channels: volume.len(),
        });
    }
    volume[channel] = if mute {
        VOLUME_MUTED
    } else {
        volume.iter().copied().max().unwrap_or(VOLUME_NORM - 1)
    };

    bridge.run_and_wait(|link, reply| link.set_device_volume(kind, device, volume, reply))?;
    debug!(%kind, device, channel, mute, "channel mute state written");

    refresh(bridge, kind, cached)
}

/// Set the device-level mute flag, distinct from per-channel muting.
pub(crate) fn set_device_mute<L: ServerLink>(
    bridge: &Bridge<L>,
    records: &mut [DeviceRecord],
    kind: DeviceKind,
    index: usize,
    mute: bool,
) -> Result<()> {
    let cached = record_mut(records, kind, index)?;
    let device = cached.index;
    bridge.run_and_wait(|link, reply| link.set_device_mute(kind, device, mute, reply))?;
    cached.mute = mute;
    debug!(%kind, device, mute, "device mute state written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_round_trips_within_unit_granularity() {
        for percent in 0..=100 {
            assert_eq!(raw_to_percent(percent_to_raw(percent)), percent);
        }
    }

    #[test]
    fn test_full_scale_write_clamps_below_norm() {
        assert_eq!(percent_to_raw(100), VOLUME_NORM - 1);
        assert_eq!(percent_to_raw(0), VOLUME_MUTED);
    }

    #[test]
    fn test_master_percent_averages_channels() {
        let volume = vec![percent_to_raw(40), percent_to_raw(60)];
        assert_eq!(master_percent(&volume), 50);
        assert_eq!(master_percent(&[]), 0);
    }
}
