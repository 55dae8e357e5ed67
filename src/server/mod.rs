// Sound-server protocol seam
//
// `ServerLink` is the boundary between the synchronous control layer and a
// concrete server transport. Every method submits one asynchronous request;
// the backend's event-loop thread fulfils the request by firing the
// `Completion` exactly once, handing over data it has already copied out of
// server-owned buffers. One real implementation exists (`pulse`, behind the
// `pulseaudio` feature); `mock` is the in-crate test double.

pub mod mock;
#[cfg(feature = "pulseaudio")]
pub mod pulse;

use crate::bridge::{Completion, StateTx};
use crate::error::Result;

pub use mock::MockServer;
#[cfg(feature = "pulseaudio")]
pub use pulse::PulseLink;

/// Full scale of the server's native fixed-point volume unit (100%).
pub const VOLUME_NORM: u32 = 0x10000;

/// Native volume value representing a muted channel.
pub const VOLUME_MUTED: u32 = 0;

/// Playback or capture side of the device namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DeviceKind {
    /// Sink: a playback endpoint.
    Output,
    /// Source: a capture endpoint.
    Input,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Output => write!(f, "output"),
            DeviceKind::Input => write!(f, "input"),
        }
    }
}

/// A hardware configuration mode exposed by the server for a card.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeviceProfile {
    pub name: String,
    pub description: String,
}

/// One device as reported by the server, every field an owned copy.
///
/// Backends copy these out inside their list callbacks because the server's
/// buffers are invalidated as soon as each callback returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDevice {
    /// Server-assigned numeric id; stable only within one catalog snapshot.
    pub index: u32,
    /// Machine name, the stable in-session identifier.
    pub code: String,
    /// Human-readable description.
    pub label: String,
    /// Per-channel volume in native units, sized to the channel map.
    pub volume: Vec<u32>,
    /// Device-level mute flag.
    pub mute: bool,
    /// Sample rate the server reports for the device.
    pub sample_rate: u32,
    /// Available card profiles, when the server exposes them.
    pub profiles: Vec<DeviceProfile>,
}

/// An active playback stream: queried during a switch, never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHandle {
    /// Server-assigned stream id.
    pub index: u32,
    /// Index of the device the stream is currently routed through.
    pub device: u32,
}

/// The server's current default device codes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerDefaults {
    pub output: Option<String>,
    pub input: Option<String>,
}

/// Callback-driven transport to one sound server.
///
/// Submission methods may be called from any thread; implementations fulfil
/// them on their event-loop thread. Requests that reference an entity the
/// server does not know resolve with `None` rather than failing, so callers
/// can distinguish "gone" from "broken".
pub trait ServerLink: Send + Sync + 'static {
    /// Open the connection and spawn (or attach to) the event-loop thread.
    /// State transitions are published through `states`.
    fn start(&self, states: StateTx) -> Result<()>;

    /// Disconnect and stop the event-loop thread. Idempotent.
    fn shutdown(&self);

    /// Whether the calling thread is the link's event-loop thread.
    fn in_loop_thread(&self) -> bool;

    /// List every device of one kind, fully copied.
    fn list_devices(&self, kind: DeviceKind, reply: Completion<Vec<RawDevice>>);

    /// Fetch one device's current info by server index.
    fn device_by_index(&self, kind: DeviceKind, index: u32, reply: Completion<Option<RawDevice>>);

    /// Resolve the server index currently assigned to a device code.
    fn device_index_by_code(&self, kind: DeviceKind, code: &str, reply: Completion<Option<u32>>);

    /// Printable channel names for a device's channel map.
    fn channel_names(&self, kind: DeviceKind, index: u32, reply: Completion<Vec<String>>);

    /// The server's current default output/input codes.
    fn server_defaults(&self, reply: Completion<ServerDefaults>);

    /// Write a device's full per-channel volume vector.
    fn set_device_volume(
        &self,
        kind: DeviceKind,
        index: u32,
        volume: Vec<u32>,
        reply: Completion<()>,
    );

    /// Set a device's device-level mute flag.
    fn set_device_mute(&self, kind: DeviceKind, index: u32, mute: bool, reply: Completion<()>);

    /// Make the device with this code the system default for its kind.
    fn set_default_device(&self, kind: DeviceKind, code: &str, reply: Completion<()>);

    /// List the currently active playback streams.
    fn list_playback_streams(&self, reply: Completion<Vec<StreamHandle>>);

    /// Move one playback stream to another output device.
    fn move_playback_stream(&self, stream: u32, device: u32, reply: Completion<()>);
}
