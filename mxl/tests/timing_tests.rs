// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Timing laws: rational index conversion round-trips and instance-level
//! pacing helpers.

use mxl::{MxlInstance, Rational};

fn instance() -> (tempfile::TempDir, MxlInstance) {
    let dir = tempfile::tempdir().unwrap();
    let instance = MxlInstance::new(dir.path(), "").unwrap();
    (dir, instance)
}

#[test]
fn index_timestamp_round_trip_stays_within_one_period() {
    let (_dir, instance) = instance();
    for rate in [
        Rational::new(24000, 1001),
        Rational::new(30000, 1001),
        Rational::new(60, 1),
        Rational::new(48000, 1),
    ] {
        let period = rate.period_ns();
        let now = instance.get_time();
        for t in [0u64, 1_000_000_000, now, now + 3_600_000_000_000] {
            let index = instance.timestamp_to_index(t, &rate).unwrap();
            let back = instance.index_to_timestamp(index, &rate).unwrap();
            assert!(
                t.abs_diff(back) <= period,
                "rate {rate}: t={t} -> index={index} -> {back}"
            );
        }
    }
}

#[test]
fn invalid_rates_are_rejected() {
    let (_dir, instance) = instance();
    let broken = Rational::new(0, 1);
    assert!(instance.timestamp_to_index(0, &broken).is_err());
    assert!(instance.index_to_timestamp(0, &broken).is_err());
    assert!(instance.get_duration_until_index(0, &broken).is_err());
}

#[test]
fn current_index_tracks_the_clock() {
    let (_dir, instance) = instance();
    let rate = Rational::new(48000, 1);
    let before = instance.timestamp_to_index(instance.get_time(), &rate).unwrap();
    let current = instance.get_current_index(&rate);
    let after = instance.timestamp_to_index(instance.get_time(), &rate).unwrap();
    assert!(before <= current && current <= after);
}

#[test]
fn duration_until_future_index_is_bounded() {
    let (_dir, instance) = instance();
    let rate = Rational::new(60, 1);
    let target = instance.get_current_index(&rate) + 60;
    let wait = instance.get_duration_until_index(target, &rate).unwrap();
    // One second of frames ahead, allow generous slack for scheduling.
    assert!(wait <= std::time::Duration::from_secs(2));
    // Past indices report zero wait.
    let past = instance.get_current_index(&rate).saturating_sub(120);
    assert_eq!(
        instance.get_duration_until_index(past, &rate).unwrap(),
        std::time::Duration::ZERO
    );
}
