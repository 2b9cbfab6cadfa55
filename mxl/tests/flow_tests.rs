// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end flow tests: writer/reader pairs over a real tmpfs-style
//! domain, slice streaming, ring wrap-around, synchronization groups,
//! garbage collection and stale-mapping detection.

use std::time::Duration;

use mxl::{Error, FlowOptions, FlowSynchronizationGroup, MxlInstance, Rational};

static LOG_ONCE: std::sync::Once = std::sync::Once::new();

fn setup() -> (tempfile::TempDir, MxlInstance) {
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

/// 1080p video at 29.97 fps; one 32-bit component so a scan line is 7680
/// bytes and a full frame is 8 294 400 bytes.
fn video_def(id: &str, rate_num: i32, rate_den: i32) -> String {
    format!(
        r#"{{
            "id": "{id}",
            "format": "urn:x-nmos:format:video",
            "label": "test video",
            "media_type": "video/raw",
            "grain_rate": {{"numerator": {rate_num}, "denominator": {rate_den}}},
            "frame_width": 1920,
            "frame_height": 1080,
            "interlace_mode": "progressive",
            "colorspace": "BT709",
            "components": [
                {{"name": "Y", "width": 1920, "height": 1080, "bit_depth": 32}}
            ]
        }}"#
    )
}

fn audio_def(id: &str) -> String {
    format!(
        r#"{{
            "id": "{id}",
            "format": "urn:x-nmos:format:audio",
            "label": "test audio",
            "media_type": "audio/float32",
            "sample_rate": {{"numerator": 48000}},
            "channel_count": 2,
            "bit_depth": 32
        }}"#
    )
}

const VIDEO_ID: &str = "5fbec3b1-1b0f-417d-9059-8b94a47197ed";
const AUDIO_ID: &str = "1c956ba4-e437-4d2a-a2a1-a8cbca3ddbf1";

#[test]
fn discrete_late_commit_propagates_to_blocked_reader() {
    let (_dir, instance) = setup();
    let rate = Rational::new(30000, 1001);

    let (writer, info, created) = instance
        .create_flow_writer(&video_def(VIDEO_ID, 30000, 1001), None)
        .unwrap();
    assert!(created);
    assert_eq!(info.discrete().unwrap().grain_count, 16);
    let mut grain_writer = writer.to_grain_writer().unwrap();

    let reader = instance
        .create_flow_reader(VIDEO_ID)
        .unwrap()
        .to_grain_reader()
        .unwrap();

    // The writer runs three frames behind and catches up one frame per
    // grain period while the reader blocks on the newest index.
    let newest = instance.get_current_index(&rate);
    let writer_thread = std::thread::spawn(move || {
        for index in (newest - 3)..=newest {
            let mut access = grain_writer.open_grain(index).unwrap();
            access.payload_mut()[..8].copy_from_slice(&index.to_le_bytes());
            access.commit(1080).unwrap();
            std::thread::sleep(Duration::from_micros(33_367));
        }
        grain_writer
    });

    let grain = reader
        .get_grain(newest, 1080, Duration::from_secs(1))
        .unwrap();
    assert_eq!(grain.total_size, 8_294_400);
    assert_eq!(grain.payload.len(), 8_294_400);
    assert_eq!(&grain.payload[..8], &newest.to_le_bytes());

    writer_thread.join().unwrap();
}

#[test]
fn discrete_partial_slices_gate_readers() {
    let (_dir, instance) = setup();
    let rate = Rational::new(30000, 1001);

    let (writer, _, _) = instance
        .create_flow_writer(&video_def(VIDEO_ID, 30000, 1001), None)
        .unwrap();
    let mut grain_writer = writer.to_grain_writer().unwrap();
    let reader = instance
        .create_flow_reader(VIDEO_ID)
        .unwrap()
        .to_grain_reader()
        .unwrap();

    let index = instance.get_current_index(&rate);
    let mut access = grain_writer.open_grain(index).unwrap();
    access.payload_mut().fill(0x55);
    access.commit_slices(540).unwrap();

    // The top half of the frame is readable...
    let partial = reader
        .get_grain(index, 540, Duration::from_millis(100))
        .unwrap();
    assert_eq!(partial.valid_slices, 540);
    assert_eq!(partial.payload.len(), 540 * 7680);

    // ...one more slice is not.
    let too_early = reader.get_grain(index, 541, Duration::from_millis(100));
    assert!(matches!(too_early, Err(Error::OutOfRangeTooEarly)));

    // Slice counts must not go backwards within one session.
    assert!(matches!(
        access.commit_slices(100),
        Err(Error::InvalidArg(_))
    ));
    access.commit(1080).unwrap();
    let full = reader
        .get_grain(index, 1080, Duration::from_millis(100))
        .unwrap();
    assert!(full.is_complete());
}

#[test]
fn discrete_window_errors() {
    let (_dir, instance) = setup();
    let rate = Rational::new(30000, 1001);

    let (writer, _, _) = instance
        .create_flow_writer(&video_def(VIDEO_ID, 30000, 1001), None)
        .unwrap();
    let mut grain_writer = writer.to_grain_writer().unwrap();
    let reader = instance
        .create_flow_reader(VIDEO_ID)
        .unwrap()
        .to_grain_reader()
        .unwrap();

    let base = instance.get_current_index(&rate);
    for index in base..base + 20 {
        let mut access = grain_writer.open_grain(index).unwrap();
        access.payload_mut()[..8].copy_from_slice(&index.to_le_bytes());
        access.commit(1080).unwrap();
    }

    // The ring keeps 16 grains: base..base+3 were overwritten.
    assert!(matches!(
        reader.get_grain_non_blocking(base),
        Err(Error::OutOfRangeTooLate)
    ));
    assert!(matches!(
        reader.get_grain_non_blocking(base + 25),
        Err(Error::OutOfRangeTooEarly)
    ));
    let newest = reader.get_grain_non_blocking(base + 19).unwrap();
    assert_eq!(&newest.payload[..8], &(base + 19).to_le_bytes());
    assert_eq!(reader.grain_range().unwrap(), (base + 4, base + 19));
}

#[test]
fn continuous_ring_wraps_into_two_fragments() {
    let (_dir, instance) = setup();

    let options = FlowOptions {
        buffer_length: Some(48_000),
        max_commit_batch_size_hint: 1920,
        max_sync_batch_size_hint: 1920,
        ..FlowOptions::default()
    };
    let (writer, info, _) = instance
        .create_flow_writer(&audio_def(AUDIO_ID), Some(&options))
        .unwrap();
    assert_eq!(info.continuous().unwrap().buffer_length, 48_000);
    let mut samples_writer = writer.to_samples_writer().unwrap();

    let reader = instance
        .create_flow_reader(AUDIO_ID)
        .unwrap()
        .to_samples_reader()
        .unwrap();

    // Commit 26 batches of 1920 samples; every sample word holds its own
    // absolute index so fragment placement is observable.
    for batch in 0..26u64 {
        let newest = batch * 1920 + 1919;
        let mut access = samples_writer.open_samples(newest, 1920).unwrap();
        for ch in 0..access.channels() {
            let (frag1, frag2) = access.channel_data_mut(ch).unwrap();
            let mut sample = newest + 1 - 1920;
            for word in frag1.chunks_exact_mut(4).chain(frag2.chunks_exact_mut(4)) {
                word.copy_from_slice(&(sample as u32).to_le_bytes());
                sample += 1;
            }
        }
        access.commit().unwrap();
    }
    assert_eq!(samples_writer.get_runtime_info().unwrap().head_index(), 49_919);

    // A window of 1000 samples ending at 48499 wraps: 500 samples at the
    // tail of the ring, 500 at the start.
    let samples = reader
        .get_samples(48_499, 1000, Duration::from_millis(100))
        .unwrap();
    assert_eq!(samples.num_of_channels(), 2);
    for ch in 0..2 {
        let (frag1, frag2) = samples.channel_data(ch).unwrap();
        assert_eq!(frag1.len(), 500 * 4);
        assert_eq!(frag2.len(), 500 * 4);
        assert_eq!(u32::from_le_bytes(frag1[..4].try_into().unwrap()), 47_500);
        assert_eq!(u32::from_le_bytes(frag2[..4].try_into().unwrap()), 48_000);
    }

    // Samples older than half a buffer behind the head are gone.
    assert!(matches!(
        reader.get_samples_non_blocking(20_000, 1000),
        Err(Error::OutOfRangeTooLate)
    ));
    // Samples past the head are not there yet.
    assert!(matches!(
        reader.get_samples_non_blocking(60_000, 1000),
        Err(Error::OutOfRangeTooEarly)
    ));
}

#[test]
fn continuous_reader_wakes_on_batch_boundary() {
    let (_dir, instance) = setup();

    let options = FlowOptions {
        buffer_length: Some(48_000),
        max_commit_batch_size_hint: 480,
        max_sync_batch_size_hint: 1920,
        ..FlowOptions::default()
    };
    let (writer, _, _) = instance
        .create_flow_writer(&audio_def(AUDIO_ID), Some(&options))
        .unwrap();
    let mut samples_writer = writer.to_samples_writer().unwrap();
    let reader = instance
        .create_flow_reader(AUDIO_ID)
        .unwrap()
        .to_samples_reader()
        .unwrap();

    let writer_thread = std::thread::spawn(move || {
        for batch in 0..8u64 {
            let newest = batch * 480 + 479;
            let mut access = samples_writer.open_samples(newest, 480).unwrap();
            for ch in 0..access.channels() {
                let (frag1, frag2) = access.channel_data_mut(ch).unwrap();
                frag1.fill(0x11);
                frag2.fill(0x11);
            }
            access.commit().unwrap();
            std::thread::sleep(Duration::from_millis(2));
        }
        samples_writer
    });

    // 3839 completes the second sync batch; the blocked reader must be
    // woken by the batched signal.
    let samples = reader
        .get_samples(3_839, 1920, Duration::from_secs(2))
        .unwrap();
    let (frag1, _) = samples.channel_data(0).unwrap();
    assert_eq!(frag1[0], 0x11);
    writer_thread.join().unwrap();
}

#[test]
fn batch_hint_constraint_is_enforced_at_creation() {
    let (_dir, instance) = setup();
    let options = FlowOptions {
        max_commit_batch_size_hint: 480,
        max_sync_batch_size_hint: 1000,
        ..FlowOptions::default()
    };
    let result = instance.create_flow_writer(&audio_def(AUDIO_ID), Some(&options));
    assert!(matches!(result, Err(Error::InvalidArg(_))));
}

#[test]
fn sync_group_reorders_to_slowest_first() {
    let (_dir, instance) = setup();
    let video_rate = Rational::new(24000, 1001);
    let audio_rate = Rational::new(48000, 1);

    let (writer_a, _, _) = instance
        .create_flow_writer(&video_def(VIDEO_ID, 24000, 1001), None)
        .unwrap();
    let mut writer_a = writer_a.to_grain_writer().unwrap();
    let (writer_b, _, _) = instance
        .create_flow_writer(&audio_def(AUDIO_ID), None)
        .unwrap();
    let mut writer_b = writer_b.to_samples_writer().unwrap();

    let reader_a = instance
        .create_flow_reader(VIDEO_ID)
        .unwrap()
        .to_grain_reader()
        .unwrap();
    let reader_b = instance
        .create_flow_reader(AUDIO_ID)
        .unwrap()
        .to_samples_reader()
        .unwrap();

    // B first, so the adaptive reorder has something to do.
    let mut group = FlowSynchronizationGroup::new();
    group.add_continuous(&reader_b);
    group.add_discrete(&reader_a, 1080);
    assert_eq!(group.visiting_order()[0], reader_b.flow_id());

    // Two rounds where A arrives visibly later than B.
    for _ in 0..2 {
        let origin = instance.get_time();
        let index_a = instance.timestamp_to_index(origin, &video_rate).unwrap();
        let index_b = instance.timestamp_to_index(origin, &audio_rate).unwrap();

        let mut access = writer_b.open_samples(index_b, 480).unwrap();
        for ch in 0..access.channels() {
            let (frag1, frag2) = access.channel_data_mut(ch).unwrap();
            frag1.fill(0);
            frag2.fill(0);
        }
        access.commit().unwrap();

        let late_writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(25));
            let mut access = writer_a.open_grain(index_a).unwrap();
            access.payload_mut()[0] = 1;
            access.commit(1080).unwrap();
            writer_a
        });

        group
            .wait_for_data_at(origin, Duration::from_millis(500))
            .unwrap();
        writer_a = late_writer.join().unwrap();
    }

    // The historically slow flow is now visited first.
    assert_eq!(group.visiting_order()[0], reader_a.flow_id());
}

#[test]
fn garbage_collection_spares_locked_flows() {
    let (dir, instance) = setup();
    let instance2 = MxlInstance::new(dir.path(), "").unwrap();

    let def = video_def(VIDEO_ID, 30000, 1001);
    let (writer1, _, created1) = instance.create_flow_writer(&def, None).unwrap();
    let (writer2, _, created2) = instance2.create_flow_writer(&def, None).unwrap();
    assert!(created1);
    assert!(!created2);

    let flow_dir = dir
        .path()
        .join(format!("{VIDEO_ID}.mxl-flow"));

    // One writer gone: the other still pins the flow.
    drop(writer1);
    assert!(instance.garbage_collect().unwrap().is_empty());
    assert!(flow_dir.is_dir());

    // Both gone: the flow is collectable.
    drop(writer2);
    let collected = instance.garbage_collect().unwrap();
    assert_eq!(collected.len(), 1);
    assert_eq!(collected[0].to_string(), VIDEO_ID);
    assert!(!flow_dir.exists());
}

#[test]
fn recreated_flow_invalidates_old_readers() {
    let (_dir, instance) = setup();
    let rate = Rational::new(30000, 1001);
    let def = video_def(VIDEO_ID, 30000, 1001);

    let (writer, _, _) = instance.create_flow_writer(&def, None).unwrap();
    let mut grain_writer = writer.to_grain_writer().unwrap();
    let index = instance.get_current_index(&rate);
    let mut access = grain_writer.open_grain(index).unwrap();
    access.payload_mut().fill(7);
    access.commit(1080).unwrap();

    let reader = instance
        .create_flow_reader(VIDEO_ID)
        .unwrap()
        .to_grain_reader()
        .unwrap();
    assert!(reader.get_grain_non_blocking(index).is_ok());

    // Delete and recreate: the reader's mapping now refers to a dead inode
    // and must fail loudly instead of serving stale bytes.
    drop(grain_writer);
    instance.delete_flow(VIDEO_ID).unwrap();
    let (_writer2, _, created) = instance.create_flow_writer(&def, None).unwrap();
    assert!(created);

    assert!(matches!(
        reader.get_grain_non_blocking(index),
        Err(Error::FlowInvalid)
    ));
    assert!(matches!(
        reader.get_grain(index + 100, 1080, Duration::from_millis(20)),
        Err(Error::FlowInvalid)
    ));
}

#[test]
fn flow_definition_round_trips_and_lists() {
    let (_dir, instance) = setup();
    let def = video_def(VIDEO_ID, 30000, 1001);
    let (_writer, _, _) = instance.create_flow_writer(&def, None).unwrap();

    assert_eq!(instance.get_flow_def(VIDEO_ID).unwrap(), def);
    let flows = instance.list_flows().unwrap();
    assert_eq!(flows.len(), 1);
    assert_eq!(flows[0].to_string(), VIDEO_ID);

    assert!(matches!(
        instance.get_flow_def(AUDIO_ID),
        Err(Error::FlowNotFound)
    ));
    assert!(matches!(
        instance.create_flow_reader("not-a-uuid"),
        Err(Error::InvalidArg(_))
    ));
}

#[test]
fn head_index_is_monotone_across_commits() {
    let (_dir, instance) = setup();
    let rate = Rational::new(30000, 1001);
    let (writer, _, _) = instance
        .create_flow_writer(&video_def(VIDEO_ID, 30000, 1001), None)
        .unwrap();
    let mut grain_writer = writer.to_grain_writer().unwrap();

    let base = instance.get_current_index(&rate);
    let mut last_head = 0;
    for offset in [0u64, 3, 1, 5, 2, 9] {
        let mut access = grain_writer.open_grain(base + offset).unwrap();
        access.payload_mut()[0] = offset as u8;
        access.commit(1080).unwrap();
        let head = grain_writer.get_runtime_info().unwrap().head_index();
        assert!(head >= last_head, "head index went backwards");
        last_head = head;
    }
    assert_eq!(last_head, base + 9);
}
