// High-level manager: the boundary consumed by CLI front ends
//
// A manager owns exactly one bridge plus the output and input catalog
// snapshots built through it. Construction is all-or-nothing: if the
// connection or either catalog build fails, no manager is handed out.
// Teardown order matters and is fixed by field declaration order: catalog
// memory drops before the bridge disconnects.

use tracing::info;

use crate::bridge::{Bridge, WaitPolicy};
use crate::catalog::{self, DeviceRecord};
use crate::error::{ControlError, Result};
use crate::hardware::{CapabilityResolver, NoHardwareInfo};
use crate::server::{DeviceKind, ServerLink};
use crate::{switcher, volume};

/// Construction options for a [`Manager`].
pub struct ManagerConfig {
    /// Bounded-wait policy applied to every blocking call.
    pub wait_policy: WaitPolicy,
    /// Hardware-capability source consumed during catalog build.
    pub resolver: Box<dyn CapabilityResolver>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            wait_policy: WaitPolicy::default(),
            resolver: Box::new(NoHardwareInfo),
        }
    }
}

/// Synchronous control handle over one sound-server connection.
///
/// Catalog snapshots are immutable once built (volume/mute operations
/// re-fetch and overwrite only the affected record's volume state); device
/// indices passed to operations are positions in the snapshot, not server
/// ids. The manager assumes single-writer discipline: it is not designed for
/// concurrent mutation from multiple application threads.
pub struct Manager<L: ServerLink> {
    outputs: Vec<DeviceRecord>,
    inputs: Vec<DeviceRecord>,
    default_output: Option<String>,
    default_input: Option<String>,
    // Declared last so every record drops before the connection goes away.
    bridge: Bridge<L>,
}

impl<L: ServerLink> Manager<L> {
    /// Connect and build both catalogs with default options.
    pub fn create(link: L) -> Result<Self> {
        Self::create_with(link, ManagerConfig::default())
    }

    /// Connect and build both catalogs.
    pub fn create_with(link: L, config: ManagerConfig) -> Result<Self> {
        let bridge = Bridge::connect(link, config.wait_policy)?;

        let outputs = catalog::build(&bridge, DeviceKind::Output, config.resolver.as_ref())?;
        let inputs = catalog::build(&bridge, DeviceKind::Input, config.resolver.as_ref())?;

        let defaults = bridge
            .run_and_wait(|link, reply| link.server_defaults(reply))
            .map_err(|err| ControlError::BuildFailed(format!("querying default devices: {err}")))?;

        info!(
            outputs = outputs.len(),
            inputs = inputs.len(),
            "manager ready"
        );
        Ok(Self {
            outputs,
            inputs,
            default_output: defaults.output,
            default_input: defaults.input,
            bridge,
        })
    }

    // -- snapshot accessors ------------------------------------------------

    /// The output catalog snapshot, in server-reported order.
    pub fn outputs(&self) -> &[DeviceRecord] {
        &self.outputs
    }

    /// The input catalog snapshot, in server-reported order.
    pub fn inputs(&self) -> &[DeviceRecord] {
        &self.inputs
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Code of the current default output, when the server reported one.
    pub fn default_output_code(&self) -> Option<&str> {
        self.default_output.as_deref()
    }

    /// Code of the current default input, when the server reported one.
    pub fn default_input_code(&self) -> Option<&str> {
        self.default_input.as_deref()
    }

    // -- volume / mute -----------------------------------------------------

    /// Master volume percentage of one output, from the cached snapshot.
    pub fn get_master_volume(&self, device: usize) -> Result<u32> {
        volume::get_master_volume(&self.outputs, DeviceKind::Output, device)
    }

    /// Set every channel of one output to the same percentage.
    pub fn set_master_volume(&mut self, device: usize, percent: u32) -> Result<()> {
        volume::set_master_volume(
            &self.bridge,
            &mut self.outputs,
            DeviceKind::Output,
            device,
            percent,
        )
    }

    /// Set the device-level mute flag of one output.
    pub fn toggle_output_mute(&mut self, device: usize, mute: bool) -> Result<()> {
        volume::set_device_mute(
            &self.bridge,
            &mut self.outputs,
            DeviceKind::Output,
            device,
            mute,
        )
    }

    /// Set the device-level mute flag of one input.
    pub fn toggle_input_mute(&mut self, device: usize, mute: bool) -> Result<()> {
        volume::set_device_mute(
            &self.bridge,
            &mut self.inputs,
            DeviceKind::Input,
            device,
            mute,
        )
    }

    /// Mute or unmute a single channel of one output.
    pub fn set_output_mute_state(&mut self, device: usize, channel: usize, mute: bool) -> Result<()> {
        volume::set_channel_mute(
            &self.bridge,
            &mut self.outputs,
            DeviceKind::Output,
            device,
            channel,
            mute,
        )
    }

    /// Mute or unmute a single channel of one input.
    pub fn set_input_mute_state(&mut self, device: usize, channel: usize, mute: bool) -> Result<()> {
        volume::set_channel_mute(
            &self.bridge,
            &mut self.inputs,
            DeviceKind::Input,
            device,
            channel,
            mute,
        )
    }

    // -- default switching -------------------------------------------------

    /// Make `outputs()[device]` the system default and relocate active
    /// playback streams to it.
    pub fn switch_default_output(&mut self, device: usize) -> Result<()> {
        switcher::switch_default_output(
            &self.bridge,
            &self.outputs,
            &mut self.default_output,
            device,
        )
    }

    /// Make `inputs()[device]` the system default capture device.
    pub fn switch_default_input(&mut self, device: usize) -> Result<()> {
        switcher::switch_default_input(&self.bridge, &self.inputs, &mut self.default_input, device)
    }

    /// Move every playback stream on one output to another.
    pub fn move_playback_streams(&self, from: usize, to: usize) -> Result<()> {
        switcher::move_playback_streams(&self.bridge, &self.outputs, from, to)
    }
}
