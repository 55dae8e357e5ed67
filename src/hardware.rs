// Hardware-capability resolver seam
//
// During catalog build each device gets one chance at refinement from the
// low-level driver layer: channel-count bounds and the hardware's true sample
// rate. Resolution failure is never an error; the catalog falls back to the
// values the server itself reported.

/// Channel bounds and sample rate as reported by the hardware driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HardwareCaps {
    pub min_channels: u32,
    pub max_channels: u32,
    pub sample_rate: u32,
}

/// Supplies per-device hardware capabilities, queried once per device during
/// catalog build.
pub trait CapabilityResolver {
    /// Resolve capabilities for the device with this code, or `None` when the
    /// hardware cannot be queried.
    fn resolve(&self, code: &str) -> Option<HardwareCaps>;
}

/// Resolver that never answers; every device keeps its server-reported values.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHardwareInfo;

impl CapabilityResolver for NoHardwareInfo {
    fn resolve(&self, _code: &str) -> Option<HardwareCaps> {
        None
    }
}
