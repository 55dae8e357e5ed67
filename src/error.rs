// Error taxonomy for sound-server control operations
//
// Validation failures are raised locally before any server round-trip;
// everything the server reports comes back as an explicit error value with
// the server's diagnostic text. The library never terminates the hosting
// process.

use crate::server::DeviceKind;

/// Errors that can occur while controlling the sound server
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// The connection never reached the ready state.
    #[error("connection to the sound server failed: {0}")]
    ConnectionFailed(String),

    /// A bounded wait on an in-flight operation ran out of cycles.
    #[error("operation timed out after {cycles} wait cycles")]
    OperationTimeout { cycles: u32 },

    /// Volume percentage outside 0-100.
    #[error("volume percentage {0} is out of range (0-100)")]
    VolumeOutOfRange(u32),

    /// Channel index outside the device's channel map.
    #[error("channel {channel} is out of range for a device with {channels} channels")]
    ChannelOutOfRange { channel: usize, channels: usize },

    /// Catalog index with no matching device.
    #[error("no {kind} device at index {index}")]
    DeviceNotFound { kind: DeviceKind, index: usize },

    /// Device code that the server no longer knows about.
    #[error("no device with code '{0}' on the server")]
    CodeNotFound(String),

    /// The server reported a failure for an otherwise well-formed request.
    #[error("sound server reported failure: {0}")]
    ServerError(String),

    /// The completion side of a request was dropped without firing.
    #[error("operation aborted before completion")]
    Aborted,

    /// Catalog construction could not produce a fully-populated snapshot.
    #[error("device catalog build failed: {0}")]
    BuildFailed(String),

    /// A default-device switch landed but not every stream followed.
    #[error("only {moved} of {total} playback streams moved to the new default device")]
    PartialMove { moved: usize, total: usize },
}

pub type Result<T> = std::result::Result<T, ControlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_diagnostics() {
        let err = ControlError::VolumeOutOfRange(250);
        assert_eq!(err.to_string(), "volume percentage 250 is out of range (0-100)");

        let err = ControlError::PartialMove { moved: 2, total: 3 };
        assert!(err.to_string().contains("2 of 3"));

        let err = ControlError::DeviceNotFound {
            kind: DeviceKind::Output,
            index: 7,
        };
        assert!(err.to_string().contains("output"));
        assert!(err.to_string().contains('7'));
    }
}
