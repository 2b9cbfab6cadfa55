// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Futex-based cross-process wait and wake on a 32-bit word in shared memory.
//!
//! The flow header carries a sync counter that writers bump after every
//! commit. Readers park on that word with `FUTEX_WAIT_BITSET` and writers
//! wake them with `FUTEX_WAKE`. A futex only reads the word in the kernel,
//! so parking works on read-only mappings; this is what lets readers hold
//! `PROT_READ` maps while still sleeping efficiently.
//!
//! The lost-wake race is avoided by protocol, not by this module: callers
//! load the counter (acquire) *before* re-checking their predicate and pass
//! that stale value as `expected`. If the writer bumped the counter in
//! between, the wait returns immediately.

use std::sync::atomic::AtomicU32;

use crate::time::Deadline;

/// Waits until the value at `word` differs from `expected`, or until the
/// deadline elapses.
///
/// Returns `true` if the word changed or the thread was woken (including
/// spurious wakeups; callers re-check their predicate in a loop), `false` on
/// timeout. The deadline is an absolute `CLOCK_REALTIME` timespec; the wait
/// passes `FUTEX_CLOCK_REALTIME` so the kernel measures it against that
/// clock (without the flag a `FUTEX_WAIT_BITSET` absolute timeout is
/// `CLOCK_MONOTONIC` and a wall-clock deadline would never fire).
pub(crate) fn wait_until_changed(word: &AtomicU32, expected: u32, deadline: Deadline) -> bool {
    // "Match any waiter" bitset.
    const MATCH_ANY_BITSET: u32 = u32::MAX;

    let ts = libc::timespec {
        tv_sec: (deadline.0 / 1_000_000_000) as libc::time_t,
        tv_nsec: (deadline.0 % 1_000_000_000) as libc::c_long,
    };
    loop {
        let rc = unsafe {
            libc::syscall(
                libc::SYS_futex,
                word.as_ptr(),
                libc::FUTEX_WAIT_BITSET | libc::FUTEX_CLOCK_REALTIME,
                expected,
                &ts,
                std::ptr::null::<u32>(),
                MATCH_ANY_BITSET,
            )
        };
        if rc == 0 {
            return true;
        }
        match std::io::Error::last_os_error().raw_os_error() {
            // Word no longer holds the expected value.
            Some(libc::EAGAIN) => return true,
            Some(libc::ETIMEDOUT) => return false,
            Some(libc::EINTR) => continue,
            _ => return true,
        }
    }
}

/// Wakes every thread parked on `word`. No-op when there are none.
pub(crate) fn wake_all(word: &AtomicU32) {
    unsafe {
        libc::syscall(libc::SYS_futex, word.as_ptr(), libc::FUTEX_WAKE, i32::MAX);
    }
}

/// Wakes at most one thread parked on `word`.
#[allow(dead_code)]
pub(crate) fn wake_one(word: &AtomicU32) {
    unsafe {
        libc::syscall(libc::SYS_futex, word.as_ptr(), libc::FUTEX_WAKE, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[test]
    fn wait_returns_immediately_on_changed_value() {
        let word = AtomicU32::new(5);
        // Expected value differs from the stored one, so the kernel reports
        // EAGAIN without parking.
        assert!(wait_until_changed(
            &word,
            4,
            Deadline::after(Duration::from_secs(1))
        ));
    }

    #[test]
    fn wait_times_out() {
        let word = AtomicU32::new(0);
        let woken = wait_until_changed(&word, 0, Deadline::after(Duration::from_millis(50)));
        assert!(!woken);
    }

    #[test]
    fn wake_reaches_parked_thread() {
        let word = Arc::new(AtomicU32::new(0));
        let waiter = {
            let word = word.clone();
            std::thread::spawn(move || {
                wait_until_changed(&word, 0, Deadline::after(Duration::from_secs(5)))
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        word.fetch_add(1, Ordering::Release);
        wake_all(&word);
        assert!(waiter.join().unwrap());
    }
}
