// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Timing primitives: the TAI media clock and rational index conversion.
//!
//! MXL timestamps media in TAI nanoseconds since the SMPTE ST 2059 epoch
//! (1970-01-01 00:00:00 TAI). Edit rates are kept as exact rationals so that
//! NTSC rates (`30000/1001` and friends) never accumulate rounding error;
//! conversions between indices and timestamps run through 128-bit
//! intermediates to avoid overflow.

use std::time::Duration;

/// Sentinel value for an index that could not be computed (invalid rate).
pub const UNDEFINED_INDEX: u64 = u64::MAX;

/// TAI-UTC offset applied when the system has no native TAI clock.
///
/// 37 seconds is the accumulated leap-second count as of 2017; no leap second
/// has been scheduled since. Emulated TAI is consistent between hosts that
/// apply the same rule but is wrong for historical timestamps.
const TAI_EMULATION_OFFSET_NS: u64 = 37 * 1_000_000_000;

/// An exact rational edit rate: frames per second for discrete flows,
/// samples per second for continuous flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Rational {
    pub numerator: i64,
    pub denominator: i64,
}

impl Rational {
    /// Creates a new rate. No validation is performed here; conversion
    /// functions reject zero numerators or denominators.
    pub const fn new(numerator: i64, denominator: i64) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Returns `true` if both terms are non-zero.
    pub const fn is_valid(&self) -> bool {
        self.numerator != 0 && self.denominator != 0
    }

    /// Duration of one grain (or sample) at this rate, in nanoseconds.
    pub const fn period_ns(&self) -> u64 {
        if !self.is_valid() {
            return 0;
        }
        ((self.denominator as i128 * 1_000_000_000) / self.numerator as i128) as u64
    }
}

impl std::fmt::Display for Rational {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Reads a clock via `clock_gettime`, returning nanoseconds since its epoch.
fn clock_ns(clock: libc::clockid_t) -> Option<u64> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let rc = unsafe { libc::clock_gettime(clock, &mut ts) };
    if rc != 0 {
        return None;
    }
    Some(ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64)
}

/// Returns the current TAI time in nanoseconds since the SMPTE ST 2059 epoch.
///
/// Uses the kernel TAI clock where available and falls back to wall-clock
/// time plus the fixed 37-second leap-second offset. The fallback is an
/// approximation: it is consistent across hosts that apply the same offset,
/// which is sufficient for live synchronization, but must not be used to
/// interpret historical timestamps.
pub fn current_tai_time() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Some(ns) = clock_ns(libc::CLOCK_TAI) {
            return ns;
        }
    }
    clock_ns(libc::CLOCK_REALTIME).unwrap_or(0) + TAI_EMULATION_OFFSET_NS
}

/// Returns the current wall-clock time in nanoseconds since the Unix epoch.
///
/// Used for futex deadlines; the waits in [`crate::sync`] pass
/// `FUTEX_CLOCK_REALTIME` so the kernel compares these values against the
/// matching clock.
pub(crate) fn current_realtime() -> u64 {
    clock_ns(libc::CLOCK_REALTIME).unwrap_or(0)
}

/// An absolute wall-clock deadline for blocking operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Deadline(pub(crate) u64);

impl Deadline {
    /// A deadline `timeout` from now.
    pub(crate) fn after(timeout: Duration) -> Self {
        let now = current_realtime();
        Deadline(now.saturating_add(timeout.as_nanos().min(u64::MAX as u128) as u64))
    }

    pub(crate) fn expired(&self) -> bool {
        current_realtime() >= self.0
    }
}

/// Converts a TAI timestamp to a media index at the given edit rate.
///
/// `index = round(timestamp * numerator / (1e9 * denominator))`, computed with
/// 128-bit intermediates. Returns [`UNDEFINED_INDEX`] for an invalid rate.
pub fn timestamp_to_index(rate: &Rational, timestamp: u64) -> u64 {
    if !rate.is_valid() {
        return UNDEFINED_INDEX;
    }
    let num = rate.numerator as i128;
    let den = rate.denominator as i128;
    ((timestamp as i128 * num + 500_000_000 * den) / (1_000_000_000 * den)) as u64
}

/// Converts a media index to its TAI timestamp at the given edit rate.
///
/// `timestamp = round(index * denominator * 1e9 / numerator)`, computed with
/// 128-bit intermediates. Returns [`UNDEFINED_INDEX`] for an invalid rate.
pub fn index_to_timestamp(rate: &Rational, index: u64) -> u64 {
    if !rate.is_valid() {
        return UNDEFINED_INDEX;
    }
    let num = rate.numerator as i128;
    let den = rate.denominator as i128;
    ((index as i128 * den * 1_000_000_000 + num / 2) / num) as u64
}

/// Returns the index current at this instant for the given rate.
pub fn current_index(rate: &Rational) -> u64 {
    timestamp_to_index(rate, current_tai_time())
}

/// Returns the nanoseconds remaining until `index` becomes current.
///
/// Zero if the index is already in the past; [`UNDEFINED_INDEX`] for an
/// invalid rate.
pub fn ns_until_index(index: u64, rate: &Rational) -> u64 {
    let target = index_to_timestamp(rate, index);
    if target == UNDEFINED_INDEX {
        return UNDEFINED_INDEX;
    }
    target.saturating_sub(current_tai_time())
}

/// Sleeps for the given duration using `clock_nanosleep` on the monotonic
/// clock, resuming across signal interruptions.
pub fn sleep_for(duration: Duration) {
    let mut ts = libc::timespec {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_nsec: duration.subsec_nanos() as libc::c_long,
    };
    loop {
        let mut remaining = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        let rc = unsafe {
            libc::clock_nanosleep(libc::CLOCK_MONOTONIC, 0, &ts, &mut remaining)
        };
        if rc != libc::EINTR {
            break;
        }
        ts = remaining;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_conversion_ntsc() {
        let rate = Rational::new(30000, 1001);
        assert_eq!(index_to_timestamp(&rate, 0), 0);
        assert_eq!(index_to_timestamp(&rate, 1), 33_366_667);
        assert_eq!(timestamp_to_index(&rate, 33_366_667), 1);
        // Halfway into frame 1 still rounds to frame 1.
        assert_eq!(timestamp_to_index(&rate, 33_366_667 + 16_000_000), 1);
    }

    #[test]
    fn index_conversion_audio() {
        let rate = Rational::new(48000, 1);
        assert_eq!(index_to_timestamp(&rate, 48000), 1_000_000_000);
        assert_eq!(timestamp_to_index(&rate, 1_000_000_000), 48000);
    }

    #[test]
    fn invalid_rate_is_rejected() {
        let rate = Rational::new(0, 1);
        assert_eq!(timestamp_to_index(&rate, 1), UNDEFINED_INDEX);
        assert_eq!(index_to_timestamp(&rate, 1), UNDEFINED_INDEX);
    }

    #[test]
    fn round_trip_is_within_one_period() {
        let rate = Rational::new(24000, 1001);
        let period = rate.period_ns();
        for t in [0u64, 1_000_000_000, 86_400_000_000_000, 1 << 60] {
            let back = index_to_timestamp(&rate, timestamp_to_index(&rate, t));
            let diff = t.abs_diff(back);
            assert!(diff <= period, "t={t} back={back} diff={diff}");
        }
    }

    #[test]
    fn tai_clock_is_monotonic_enough() {
        let a = current_tai_time();
        let b = current_tai_time();
        assert!(b >= a);
    }
}
