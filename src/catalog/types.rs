// Owned device records materialized from server data
//
// Every string and vector in a record is an owned copy made at the
// server/client boundary; nothing in here aliases server memory.

use crate::server::DeviceProfile;

/// One fully-resolved device in a catalog snapshot.
///
/// Records are created only during catalog build and are immutable afterward,
/// except that a successful volume or mute write re-fetches the device and
/// overwrites the cached `volume`/`mute` fields. The numeric `index` is only
/// valid for the lifetime of the snapshot; `code` is the stable in-session
/// identifier used for every subsequent lookup.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DeviceRecord {
    /// Server-assigned numeric id, unstable across rebuilds.
    pub index: u32,
    /// Machine name of the device.
    pub code: String,
    /// Human-readable description.
    pub label: String,
    /// Per-channel volume in native units, sized to the channel map.
    pub volume: Vec<u32>,
    /// Device-level mute flag.
    pub mute: bool,
    /// Printable channel names, one per channel-map entry.
    pub channel_names: Vec<String>,
    /// Hardware channel bound, when the capability resolver answered.
    pub min_channels: Option<u32>,
    /// Hardware channel bound, when the capability resolver answered.
    pub max_channels: Option<u32>,
    /// Resolved sample rate: hardware-reported when available, otherwise the
    /// server's value.
    pub sample_rate: u32,
    /// Card profiles the server exposes for this device, possibly empty.
    pub profiles: Vec<DeviceProfile>,
}

impl DeviceRecord {
    /// Size of the device's channel map.
    pub fn channels(&self) -> usize {
        self.volume.len()
    }
}
