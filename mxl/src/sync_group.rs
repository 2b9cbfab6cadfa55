// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Synchronized reading from multiple flows with different arrival times.
//!
//! In multi-flow setups (video + audio + ancillary data) the flows arrive
//! with different source delays. Waiting for them in a fixed order would
//! block once per flow in the worst case; this group instead remembers the
//! largest delay observed per flow and visits the historically slowest flow
//! first, so by the time it is ready the others usually are too.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::grain::reader::GrainReader;
use crate::samples::reader::SamplesReader;
use crate::time::{
    current_tai_time, index_to_timestamp, timestamp_to_index, Deadline, Rational, UNDEFINED_INDEX,
};

enum Member<'a> {
    Discrete {
        reader: &'a GrainReader,
        min_valid_slices: u16,
    },
    Continuous {
        reader: &'a SamplesReader,
    },
}

impl Member<'_> {
    fn head_index(&self) -> u64 {
        match self {
            Member::Discrete { reader, .. } => reader.head_index(),
            Member::Continuous { reader } => reader.head_index(),
        }
    }

    fn wait_until(&self, index: u64, deadline: Deadline) -> Result<()> {
        match self {
            Member::Discrete {
                reader,
                min_valid_slices,
            } => reader.wait_slot(index, Some(*min_valid_slices), deadline).map(|_| ()),
            Member::Continuous { reader } => reader.wait_window_at(index, deadline),
        }
    }
}

struct Entry<'a> {
    member: Member<'a>,
    rate: Rational,
    max_observed_source_delay: u64,
}

/// An adaptive barrier over a set of flow readers.
///
/// [`Self::wait_for_data_at`] blocks until every member flow has data for a
/// given origin timestamp. The wait list reorders itself by observed source
/// delay: whenever a flow turns out to be the slowest seen so far, it moves
/// to the front so subsequent calls visit it first.
///
/// The group borrows its readers; each reader stays usable directly.
///
/// # Examples
///
/// ```no_run
/// # use std::time::Duration;
/// # fn example(
/// #     instance: mxl::MxlInstance,
/// #     video: mxl::GrainReader,
/// #     audio: mxl::SamplesReader,
/// # ) -> Result<(), mxl::Error> {
/// let mut group = mxl::FlowSynchronizationGroup::new();
/// group.add_discrete(&video, 1080);
/// group.add_continuous(&audio);
///
/// let origin = instance.get_time();
/// group.wait_for_data_at(origin, Duration::from_millis(100))?;
/// // Both flows now have data for `origin`.
/// # Ok(())
/// # }
/// ```
pub struct FlowSynchronizationGroup<'a> {
    entries: Vec<Entry<'a>>,
}

impl<'a> FlowSynchronizationGroup<'a> {
    /// Creates an empty group.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Number of member flows.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if the group has no members.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds a discrete reader; a grain counts as ready once
    /// `min_valid_slices` of it are committed.
    ///
    /// Idempotent on the reader identity: adding a reader that is already a
    /// member only updates its `min_valid_slices`.
    pub fn add_discrete(&mut self, reader: &'a GrainReader, min_valid_slices: u16) {
        for entry in &mut self.entries {
            if let Member::Discrete {
                reader: existing,
                min_valid_slices: existing_min,
            } = &mut entry.member
            {
                if std::ptr::eq(*existing, reader) {
                    *existing_min = min_valid_slices;
                    return;
                }
            }
        }
        let rate = rate_of_discrete(reader);
        self.entries.push(Entry {
            member: Member::Discrete {
                reader,
                min_valid_slices,
            },
            rate,
            max_observed_source_delay: 0,
        });
    }

    /// Adds a continuous reader. Idempotent on the reader identity.
    pub fn add_continuous(&mut self, reader: &'a SamplesReader) {
        for entry in &self.entries {
            if let Member::Continuous { reader: existing } = &entry.member {
                if std::ptr::eq(*existing, reader) {
                    return;
                }
            }
        }
        let rate = rate_of_continuous(reader);
        self.entries.push(Entry {
            member: Member::Continuous { reader },
            rate,
            max_observed_source_delay: 0,
        });
    }

    /// Removes a discrete reader. Idempotent.
    pub fn remove_discrete(&mut self, reader: &GrainReader) {
        self.entries.retain(|entry| {
            !matches!(&entry.member, Member::Discrete { reader: existing, .. }
                if std::ptr::eq(*existing, reader))
        });
    }

    /// Removes a continuous reader. Idempotent.
    pub fn remove_continuous(&mut self, reader: &SamplesReader) {
        self.entries.retain(|entry| {
            !matches!(&entry.member, Member::Continuous { reader: existing }
                if std::ptr::eq(*existing, reader))
        });
    }

    /// Waits until every member flow has data for the media timestamp
    /// `origin_time` (TAI nanoseconds), or until the timeout elapses.
    ///
    /// Flows are visited in the group's adaptive order. A flow that has to
    /// block and turns out slower than everything seen before moves to the
    /// front of the list for the next call.
    ///
    /// # Errors
    ///
    /// The first per-flow failure is returned immediately, including
    /// [`Error::OutOfRangeTooEarly`] when a flow misses the deadline and
    /// [`Error::FlowInvalid`] when one was recreated mid-wait.
    pub fn wait_for_data_at(&mut self, origin_time: u64, timeout: Duration) -> Result<()> {
        let deadline = Deadline::after(timeout);
        let mut position = 0;
        while position < self.entries.len() {
            let (expected_index, rate) = {
                let entry = &self.entries[position];
                let expected = timestamp_to_index(&entry.rate, origin_time);
                if expected == UNDEFINED_INDEX {
                    return Err(Error::InvalidArg(format!(
                        "member flow has invalid rate {}",
                        entry.rate
                    )));
                }
                (expected, entry.rate)
            };

            if expected_index > self.entries[position].member.head_index() {
                self.entries[position]
                    .member
                    .wait_until(expected_index, deadline)?;

                // The flow was late; if it is now the slowest ever observed
                // in this group, promote it to the front so future calls
                // spend their blocking time on it first.
                let expected_arrival = index_to_timestamp(&rate, expected_index);
                let now = current_tai_time();
                if now > expected_arrival {
                    let source_delay = now - expected_arrival;
                    let entry = &mut self.entries[position];
                    if source_delay > entry.max_observed_source_delay {
                        entry.max_observed_source_delay = source_delay;
                        if position > 0
                            && source_delay > self.entries[0].max_observed_source_delay
                        {
                            let entry = self.entries.remove(position);
                            self.entries.insert(0, entry);
                        }
                    }
                }
            }
            position += 1;
        }
        Ok(())
    }

    /// The flow IDs in the group's current visiting order; the adaptive
    /// reordering makes this "slowest first" over time.
    pub fn visiting_order(&self) -> Vec<uuid::Uuid> {
        self.entries
            .iter()
            .map(|entry| match &entry.member {
                Member::Discrete { reader, .. } => reader.flow_id(),
                Member::Continuous { reader } => reader.flow_id(),
            })
            .collect()
    }
}

impl Default for FlowSynchronizationGroup<'_> {
    fn default() -> Self {
        Self::new()
    }
}

fn rate_of_discrete(reader: &GrainReader) -> Rational {
    reader.rate()
}

fn rate_of_continuous(reader: &SamplesReader) -> Rational {
    reader.rate()
}
