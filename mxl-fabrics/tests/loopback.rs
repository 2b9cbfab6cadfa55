// SPDX-FileCopyrightText: 2025-2026 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Initiator/target round trip over the TCP provider on loopback: two
//! domains on one host stand in for two hosts, and a grain produced on the
//! initiator side must come out of the target side's flow byte-identical.

use std::time::Duration;

use mxl::MxlInstance;
use mxl_fabrics::{
    FabricsInstance, Initiator, InitiatorConfig, Progress, Provider, Regions, Target,
    TargetConfig, TargetInfo,
};

static LOG_ONCE: std::sync::Once = std::sync::Once::new();

fn setup_domain() -> (tempfile::TempDir, MxlInstance) {
    LOG_ONCE.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::builder()
                    .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .init();
    });
    let dir = tempfile::tempdir().unwrap();
    let instance = MxlInstance::new(dir.path(), "").unwrap();
    (dir, instance)
}

/// A tiny video flow so frames stay cheap: 64x4 pixels, 8-bit single
/// component, 64-byte scan lines, 256-byte grains.
fn small_video_def(id: &str) -> String {
    format!(
        r#"{{
            "id": "{id}",
            "format": "urn:x-nmos:format:video",
            "label": "loopback video",
            "media_type": "video/raw",
            "grain_rate": {{"numerator": 50, "denominator": 1}},
            "frame_width": 64,
            "frame_height": 4,
            "interlace_mode": "progressive",
            "colorspace": "BT709",
            "components": [
                {{"name": "Y", "width": 64, "height": 4, "bit_depth": 8}}
            ]
        }}"#
    )
}

const FLOW_ID: &str = "7a0e8f42-33c1-4f88-9b6e-09d1f5a6c202";

fn pump_until_complete(initiator: &mut Initiator) {
    for _ in 0..1000 {
        if initiator.make_progress_non_blocking().unwrap() == Progress::Complete {
            return;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    panic!("initiator never went idle");
}

#[test]
fn grain_round_trip_over_tcp_loopback() {
    // Target side: a flow whose writer the target owns.
    let (_target_dir, target_instance) = setup_domain();
    let (writer, _, _) = target_instance
        .create_flow_writer(&small_video_def(FLOW_ID), None)
        .unwrap();
    let target_writer = writer.to_grain_writer().unwrap();

    let fabrics = FabricsInstance::new(&target_instance).unwrap();
    let mut target = fabrics.create_target();
    let regions = Regions::for_flow_writer(&target_writer).unwrap();
    let info = target
        .setup(TargetConfig {
            provider: Provider::Tcp,
            bind_address: "127.0.0.1:0".into(),
            regions,
            writer: target_writer,
        })
        .unwrap();

    // The descriptor travels out of band as text and must round-trip.
    let descriptor = info.to_string();
    let parsed: TargetInfo = descriptor.parse().unwrap();
    assert_eq!(parsed, info);
    assert_eq!(parsed.geometry.grain_count, 16);
    assert_eq!(parsed.geometry.grain_size, 256);
    assert_eq!(parsed.geometry.total_slices, 4);

    // Initiator side: an independent domain with the same flow shape.
    let (_initiator_dir, initiator_instance) = setup_domain();
    let (writer, _, _) = initiator_instance
        .create_flow_writer(&small_video_def(FLOW_ID), None)
        .unwrap();
    let mut local_writer = writer.to_grain_writer().unwrap();
    let local_reader = initiator_instance
        .create_flow_reader(FLOW_ID)
        .unwrap()
        .to_grain_reader()
        .unwrap();

    // Produce grain 5 locally; local readers see it before any transfer.
    let grain_index = 5u64;
    let mut access = local_writer.open_grain(grain_index).unwrap();
    let payload = access.payload_mut();
    payload[..8].copy_from_slice(&grain_index.to_le_bytes());
    for (offset, byte) in payload[8..].iter_mut().enumerate() {
        *byte = (offset % 251) as u8;
    }
    access.commit(4).unwrap();
    let local_grain = local_reader
        .get_grain(grain_index, 4, Duration::from_millis(100))
        .unwrap()
        .to_owned();

    let initiator_fabrics = FabricsInstance::new(&initiator_instance).unwrap();
    let mut initiator = initiator_fabrics.create_initiator();
    initiator
        .setup(InitiatorConfig {
            provider: Provider::Tcp,
            regions: Regions::for_flow_reader(&local_reader).unwrap(),
        })
        .unwrap();

    initiator.add_target(&parsed).unwrap();
    // Duplicate adds collapse into one logical connection.
    initiator.add_target(&parsed).unwrap();
    pump_until_complete(&mut initiator);
    assert!(initiator.is_connected(&parsed));

    initiator.transfer_grain(grain_index).unwrap();
    pump_until_complete(&mut initiator);

    // The target observes the grain and re-commits it locally.
    let received = target.wait_for_new_grain(2_000).unwrap();
    assert_eq!(received, grain_index);

    // A plain local reader of the target's flow sees the same bytes.
    let target_reader = target_instance
        .create_flow_reader(FLOW_ID)
        .unwrap()
        .to_grain_reader()
        .unwrap();
    let remote_grain = target_reader
        .get_grain(grain_index, 4, Duration::from_secs(1))
        .unwrap();
    assert_eq!(remote_grain.payload, local_grain.payload.as_slice());
    assert_eq!(&remote_grain.payload[..8], &grain_index.to_le_bytes());
}

#[test]
fn transfers_in_order_and_removal_stops_traffic() {
    let (_target_dir, target_instance) = setup_domain();
    let (writer, _, _) = target_instance
        .create_flow_writer(&small_video_def(FLOW_ID), None)
        .unwrap();
    let target_writer = writer.to_grain_writer().unwrap();
    let mut target = Target::new();
    let regions = Regions::for_flow_writer(&target_writer).unwrap();
    let info = target
        .setup(TargetConfig {
            provider: Provider::Tcp,
            bind_address: "127.0.0.1:0".into(),
            regions,
            writer: target_writer,
        })
        .unwrap();

    let (_initiator_dir, initiator_instance) = setup_domain();
    let (writer, _, _) = initiator_instance
        .create_flow_writer(&small_video_def(FLOW_ID), None)
        .unwrap();
    let mut local_writer = writer.to_grain_writer().unwrap();
    let local_reader = initiator_instance
        .create_flow_reader(FLOW_ID)
        .unwrap()
        .to_grain_reader()
        .unwrap();

    let mut initiator = Initiator::new();
    initiator
        .setup(InitiatorConfig {
            provider: Provider::Tcp,
            regions: Regions::for_flow_reader(&local_reader).unwrap(),
        })
        .unwrap();
    initiator.add_target(&info).unwrap();
    pump_until_complete(&mut initiator);

    // Three grains, transferred in issue order.
    for grain_index in 10..13u64 {
        let mut access = local_writer.open_grain(grain_index).unwrap();
        access.payload_mut()[..8].copy_from_slice(&grain_index.to_le_bytes());
        access.commit(4).unwrap();
        initiator.transfer_grain(grain_index).unwrap();
    }
    pump_until_complete(&mut initiator);

    for expected in 10..13u64 {
        assert_eq!(target.wait_for_new_grain(2_000).unwrap(), expected);
    }

    // After removal no further transfers are queued for the target.
    initiator.remove_target(&info).unwrap();
    pump_until_complete(&mut initiator);
    assert!(!initiator.is_connected(&info));
    initiator.transfer_grain(11).unwrap();
    pump_until_complete(&mut initiator);
    assert!(matches!(
        target.wait_for_new_grain(50),
        Err(mxl_fabrics::Error::NotReady)
    ));
}

#[test]
fn setup_rejects_unavailable_providers_and_double_setup() {
    let (_dir, instance) = setup_domain();
    let (writer, _, _) = instance
        .create_flow_writer(&small_video_def(FLOW_ID), None)
        .unwrap();
    let grain_writer = writer.to_grain_writer().unwrap();
    let regions = Regions::for_flow_writer(&grain_writer).unwrap();

    let mut target = Target::new();
    let err = target
        .setup(TargetConfig {
            provider: Provider::Verbs,
            bind_address: "127.0.0.1:0".into(),
            regions: regions.clone(),
            writer: grain_writer,
        })
        .unwrap_err();
    assert!(matches!(err, mxl_fabrics::Error::NoFabric(_)));
    assert_eq!(err.status(), 1026);

    let mut initiator = Initiator::new();
    initiator
        .setup(InitiatorConfig {
            provider: Provider::Tcp,
            regions: regions.clone(),
        })
        .unwrap();
    assert!(matches!(
        initiator.setup(InitiatorConfig {
            provider: Provider::Tcp,
            regions,
        }),
        Err(mxl_fabrics::Error::InvalidState(_))
    ));

    // Operations before setup are state errors.
    let mut fresh = Target::new();
    assert!(matches!(
        fresh.try_new_grain(),
        Err(mxl_fabrics::Error::InvalidState(_))
    ));
}
