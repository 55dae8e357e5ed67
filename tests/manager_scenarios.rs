// End-to-end manager scenarios against the scriptable mock server

use pulse_control::server::mock::MockDevice;
use pulse_control::{
    ControlError, DeviceKind, DeviceProfile, Manager, ManagerConfig, MockServer, WaitPolicy,
    VOLUME_NORM,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Two outputs with three active playback streams, two of them on the first
/// output and one already on the second.
fn desktop_scenario() -> MockServer {
    let server = MockServer::new();
    server
        .add_output(MockDevice::new(10, "out.0", "Speakers"))
        .add_output(MockDevice::new(20, "out.1", "Headphones"))
        .add_stream(100, 10)
        .add_stream(101, 10)
        .add_stream(102, 20)
        .set_defaults(Some("out.0"), None);
    server
}

fn quick_config() -> ManagerConfig {
    ManagerConfig {
        wait_policy: WaitPolicy {
            cycles: 5,
            cycle: Duration::from_millis(10),
        },
        ..ManagerConfig::default()
    }
}

#[cfg(test)]
mod catalog_tests {
    use super::*;

    /// Test that construction builds both catalogs and captures the defaults
    #[test]
    fn test_create_builds_catalogs_and_defaults() {
        let server = desktop_scenario();
        let analog_stereo = DeviceProfile {
            name: "analog-stereo".to_string(),
            description: "Analog Stereo".to_string(),
        };
        let mut microphone = MockDevice::new(30, "in.0", "Microphone");
        microphone.profiles = vec![analog_stereo.clone()];
        server.add_input(microphone);
        server.set_defaults(Some("out.0"), Some("in.0"));

        let manager = Manager::create(server.clone()).unwrap();

        assert_eq!(manager.output_count(), 2);
        assert_eq!(manager.input_count(), 1);
        assert_eq!(manager.outputs()[0].code, "out.0");
        assert_eq!(manager.outputs()[0].label, "Speakers");
        assert_eq!(manager.outputs()[1].code, "out.1");
        assert_eq!(manager.default_output_code(), Some("out.0"));
        assert_eq!(manager.default_input_code(), Some("in.0"));

        let speakers = &manager.outputs()[0];
        assert_eq!(speakers.channels(), 2);
        assert_eq!(speakers.channel_names, vec!["front-left", "front-right"]);
        assert_eq!(speakers.sample_rate, 44100);
        assert!(!speakers.mute);
        assert!(speakers.profiles.is_empty());

        assert_eq!(manager.inputs()[0].profiles, vec![analog_stereo]);
    }

    /// Test that rebuilding from unchanged server state yields the same catalog
    #[test]
    fn test_rebuild_from_unchanged_state_is_stable() {
        let server = desktop_scenario();

        let first = Manager::create(server.clone()).unwrap().outputs().to_vec();
        let second = Manager::create(server.clone()).unwrap().outputs().to_vec();

        assert_eq!(first, second);
    }

    /// Test that a refused connection fails construction outright
    #[test]
    fn test_refused_connection_fails_create() {
        let server = MockServer::new();
        server.refuse_connection();

        match Manager::create_with(server.clone(), quick_config()).err() {
            Some(ControlError::ConnectionFailed(_)) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(server.total_calls(), 0);
    }

    /// Test that a failing device enumeration fails the whole build
    #[test]
    fn test_enumeration_failure_fails_whole_build() {
        let server = desktop_scenario();
        server.fail_on("channel_names");

        match Manager::create(server.clone()).err() {
            Some(ControlError::BuildFailed(message)) => {
                assert!(message.contains("channel names"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}

#[cfg(test)]
mod volume_tests {
    use super::*;

    /// Test that a master volume write lands on every channel and reads back
    #[test]
    fn test_master_volume_set_and_read_back() {
        let server = desktop_scenario();
        let mut manager = Manager::create(server.clone()).unwrap();

        manager.set_master_volume(0, 65).unwrap();

        let raw = (65u64 * u64::from(VOLUME_NORM) / 100) as u32;
        assert_eq!(
            server.device_volume(DeviceKind::Output, 10),
            Some(vec![raw, raw])
        );
        assert_eq!(manager.get_master_volume(0).unwrap(), 65);
    }

    /// Test that invalid volume input is rejected without any server round-trip
    #[test]
    fn test_invalid_volume_costs_no_round_trips() {
        let server = desktop_scenario();
        let mut manager = Manager::create(server.clone()).unwrap();
        let baseline = server.total_calls();

        match manager.set_master_volume(0, 150) {
            Err(ControlError::VolumeOutOfRange(150)) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
        match manager.set_master_volume(7, 50) {
            Err(ControlError::DeviceNotFound {
                kind: DeviceKind::Output,
                index: 7,
            }) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
        match manager.get_master_volume(7) {
            Err(ControlError::DeviceNotFound { .. }) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
        match manager.set_output_mute_state(0, 5, true) {
            Err(ControlError::ChannelOutOfRange {
                channel: 5,
                channels: 2,
            }) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }

        assert_eq!(server.total_calls(), baseline);
    }

    /// Test that muting one channel zeroes it and unmuting restores full level
    #[test]
    fn test_channel_mute_and_restore() {
        let server = desktop_scenario();
        let mut manager = Manager::create(server.clone()).unwrap();
        let half = VOLUME_NORM / 2;

        manager.set_output_mute_state(0, 0, true).unwrap();
        assert_eq!(
            server.device_volume(DeviceKind::Output, 10),
            Some(vec![0, half])
        );
        assert_eq!(manager.get_master_volume(0).unwrap(), 25);

        manager.set_output_mute_state(0, 0, false).unwrap();
        assert_eq!(
            server.device_volume(DeviceKind::Output, 10),
            Some(vec![half, half])
        );
        assert_eq!(manager.get_master_volume(0).unwrap(), 50);
    }

    /// Test that per-channel mute and restore works on inputs as well
    #[test]
    fn test_input_channel_mute_and_restore() {
        let server = desktop_scenario();
        server.add_input(MockDevice::new(30, "in.0", "Microphone"));
        let mut manager = Manager::create(server.clone()).unwrap();
        let half = VOLUME_NORM / 2;

        manager.set_input_mute_state(0, 1, true).unwrap();
        assert_eq!(
            server.device_volume(DeviceKind::Input, 30),
            Some(vec![half, 0])
        );

        manager.set_input_mute_state(0, 1, false).unwrap();
        assert_eq!(
            server.device_volume(DeviceKind::Input, 30),
            Some(vec![half, half])
        );
    }

    /// Test that the device-level mute flag is written and cached
    #[test]
    fn test_device_mute_flag_round_trip() {
        let server = desktop_scenario();
        server.add_input(MockDevice::new(30, "in.0", "Microphone"));
        let mut manager = Manager::create(server.clone()).unwrap();

        manager.toggle_output_mute(1, true).unwrap();
        assert_eq!(server.device_mute(DeviceKind::Output, 20), Some(true));
        assert!(manager.outputs()[1].mute);

        manager.toggle_input_mute(0, true).unwrap();
        assert_eq!(server.device_mute(DeviceKind::Input, 30), Some(true));

        manager.toggle_output_mute(1, false).unwrap();
        assert_eq!(server.device_mute(DeviceKind::Output, 20), Some(false));
        assert!(!manager.outputs()[1].mute);
    }

    /// Test that a server-reported write failure surfaces its diagnostic
    #[test]
    fn test_server_failure_surfaces_diagnostic() {
        let server = desktop_scenario();
        let mut manager = Manager::create(server.clone()).unwrap();
        server.fail_on("set_device_mute");

        match manager.toggle_output_mute(0, true) {
            Err(ControlError::ServerError(message)) => {
                assert!(message.contains("set_device_mute"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(server.device_mute(DeviceKind::Output, 10), Some(false));
    }
}

#[cfg(test)]
mod switch_tests {
    use super::*;

    /// Test that switching the default output relocates every playback stream
    #[test]
    fn test_switch_default_output_relocates_streams() {
        let server = desktop_scenario();
        let mut manager = Manager::create(server.clone()).unwrap();

        manager.switch_default_output(1).unwrap();

        assert_eq!(manager.default_output_code(), Some("out.1"));
        assert_eq!(
            server.default_code(DeviceKind::Output),
            Some("out.1".to_string())
        );
        assert_eq!(server.moves(), vec![(100, 20), (101, 20), (102, 20)]);
    }

    /// Test that switching the default input leaves capture streams alone
    #[test]
    fn test_switch_default_input_moves_no_streams() {
        let server = desktop_scenario();
        server
            .add_input(MockDevice::new(30, "in.0", "Microphone"))
            .add_input(MockDevice::new(31, "in.1", "Headset"));
        let mut manager = Manager::create(server.clone()).unwrap();

        manager.switch_default_input(1).unwrap();

        assert_eq!(manager.default_input_code(), Some("in.1"));
        assert_eq!(
            server.default_code(DeviceKind::Input),
            Some("in.1".to_string())
        );
        assert!(server.moves().is_empty());
        assert_eq!(server.calls("list_playback_streams"), 0);
    }

    /// Test that moving streams between outputs only touches the source device
    #[test]
    fn test_move_playback_streams_filters_by_source() {
        let server = desktop_scenario();
        let manager = Manager::create(server.clone()).unwrap();

        manager.move_playback_streams(0, 1).unwrap();

        assert_eq!(server.moves(), vec![(100, 20), (101, 20)]);
    }

    /// Test that an out-of-range switch index is rejected with no round-trips
    #[test]
    fn test_switch_unknown_index_costs_no_round_trips() {
        let server = desktop_scenario();
        let mut manager = Manager::create(server.clone()).unwrap();
        let baseline = server.total_calls();

        match manager.switch_default_output(9) {
            Err(ControlError::DeviceNotFound {
                kind: DeviceKind::Output,
                index: 9,
            }) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(server.total_calls(), baseline);
        assert_eq!(manager.default_output_code(), Some("out.0"));
    }

    /// Test that failed stream moves are reported as a partial switch
    #[test]
    fn test_failed_moves_reported_as_partial() {
        let server = desktop_scenario();
        let mut manager = Manager::create(server.clone()).unwrap();
        server.fail_on("move_playback_stream");

        match manager.switch_default_output(1) {
            Err(ControlError::PartialMove { moved: 0, total: 3 }) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
        // The primary step landed even though relocation did not.
        assert_eq!(manager.default_output_code(), Some("out.1"));
        assert_eq!(
            server.default_code(DeviceKind::Output),
            Some("out.1".to_string())
        );
    }
}

#[cfg(test)]
mod wait_tests {
    use super::*;

    /// Test that a stalled operation times out within the wait budget
    #[test]
    fn test_stalled_operation_times_out_within_budget() {
        let server = desktop_scenario();
        let mut manager = Manager::create_with(server.clone(), quick_config()).unwrap();
        server.stall_on("set_device_volume");

        let start = Instant::now();
        match manager.set_master_volume(0, 30) {
            Err(ControlError::OperationTimeout { cycles: 5 }) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_secs(2));

        // The bridge stays usable for the next operation.
        assert_eq!(manager.get_master_volume(0).unwrap(), 50);
    }

    /// Test that re-entering from the event-loop thread fails bounded instead
    /// of deadlocking
    #[test]
    fn test_reentrant_call_fails_bounded() {
        let server = desktop_scenario();
        let manager = Arc::new(Manager::create_with(server.clone(), quick_config()).unwrap());

        let nested_outcome = Arc::new(Mutex::new(None));
        let hook_manager = Arc::clone(&manager);
        let hook_outcome = Arc::clone(&nested_outcome);
        server.hook_on("list_playback_streams", move || {
            let result = hook_manager.move_playback_streams(1, 0);
            *hook_outcome.lock().unwrap() = Some(result);
        });

        let start = Instant::now();
        let outer = manager.move_playback_streams(0, 1);
        assert!(start.elapsed() < Duration::from_secs(2));
        // The nested call blocks the loop thread past the outer call's own
        // wait budget, so the outer call may itself time out; what matters is
        // that neither call deadlocks.
        assert!(matches!(
            outer,
            Ok(()) | Err(ControlError::OperationTimeout { .. })
        ));

        // The outer call can return while the hook is still unwinding on the
        // worker thread, so wait for the nested result instead of reading it
        // immediately.
        let deadline = Instant::now() + Duration::from_secs(2);
        let nested = loop {
            let stored = nested_outcome.lock().unwrap().take();
            if let Some(result) = stored {
                break result;
            }
            assert!(
                Instant::now() < deadline,
                "nested call never produced an outcome"
            );
            std::thread::sleep(Duration::from_millis(5));
        };
        match nested {
            Err(ControlError::OperationTimeout { .. }) => {}
            other => panic!("unexpected nested outcome: {other:?}"),
        }
    }
}
