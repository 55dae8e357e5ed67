//! Synchronous control client for PulseAudio-style sound servers.
//!
//! The server's protocol is asynchronous and callback-driven; this crate
//! bridges it to a blocking call model so small front ends (device pickers,
//! volume sliders, mute togglers) can stay simple. A [`Manager`] connects,
//! builds an owned catalog of output and input devices, and then serves
//! volume/mute and default-device operations against cached device indices,
//! each as one or more bounded-wait round-trips.
//!
//! ```no_run
//! use pulse_control::{Manager, MockServer};
//!
//! # fn main() -> pulse_control::Result<()> {
//! let mut manager = Manager::create(MockServer::new())?;
//! for (i, device) in manager.outputs().iter().enumerate() {
//!     println!("{i}: {} ({})", device.label, device.code);
//! }
//! manager.set_master_volume(0, 35)?;
//! manager.switch_default_output(1)?;
//! # Ok(())
//! # }
//! ```
//!
//! The real backend over libpulse is behind the `pulseaudio` cargo feature;
//! [`MockServer`] is the in-crate test double.

pub mod bridge;
pub mod catalog;
pub mod config;
pub mod error;
pub mod hardware;
pub mod manager;
pub mod server;

mod switcher;
mod volume;

// Re-export the main public API
pub use bridge::{Bridge, ConnectionState, WaitPolicy};
pub use catalog::DeviceRecord;
pub use error::{ControlError, Result};
pub use hardware::{CapabilityResolver, HardwareCaps, NoHardwareInfo};
pub use manager::{Manager, ManagerConfig};
pub use server::{
    DeviceKind, DeviceProfile, MockServer, RawDevice, ServerDefaults, ServerLink, StreamHandle,
    VOLUME_MUTED, VOLUME_NORM,
};

#[cfg(feature = "pulseaudio")]
pub use server::PulseLink;
