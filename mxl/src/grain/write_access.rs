// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! RAII grain write access for safe zero-copy writing.

use std::sync::atomic::Ordering;

use crate::error::{Error, Result};
use crate::grain::writer::GrainWriter;

/// RAII-protected grain writing session.
///
/// Provides mutable access to one grain slot's payload for zero-copy writing.
/// The grain is discarded if the session drops without a commit, so the flow
/// stays consistent across early returns and panics.
///
/// Slice streaming: [`Self::commit_slices`] publishes a growing prefix of the
/// payload while the session stays open, letting readers consume scan lines
/// before the frame is finished. The consuming [`Self::commit`] closes the
/// session.
///
/// # Examples
///
/// ```no_run
/// # fn example(mut writer: mxl::GrainWriter) -> Result<(), mxl::Error> {
/// let mut access = writer.open_grain(100)?;
///
/// access.payload_mut().fill(42);
///
/// // Publish the top half early, then finish the frame.
/// let total = access.total_slices();
/// access.commit_slices(total / 2)?;
/// access.commit(total)?;
/// # Ok(())
/// # }
/// ```
pub struct GrainWriteAccess<'a> {
    writer: &'a mut GrainWriter,
    finished: bool,
}

impl<'a> GrainWriteAccess<'a> {
    pub(crate) fn new(writer: &'a mut GrainWriter) -> Self {
        Self {
            writer,
            finished: false,
        }
    }

    fn slot(&self) -> usize {
        self.writer.current.as_ref().expect("open grain").slot
    }

    /// Returns mutable access to the grain's payload buffer.
    ///
    /// This writes straight into the shared memory ring. The bytes become
    /// visible to readers slice by slice as they are committed.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let slot = self.slot();
        let len = self.writer.data.grain_payload_size();
        // Safety: the slot mapping holds `len` payload bytes after the
        // header, and this session has exclusive write access to the slot.
        unsafe { std::slice::from_raw_parts_mut(self.writer.data.payload_ptr(slot), len) }
    }

    /// Maximum size of the grain payload in bytes.
    pub fn max_size(&self) -> u32 {
        self.writer.data.slot_info(self.slot()).grain_size
    }

    /// Total number of slices in this grain.
    pub fn total_slices(&self) -> u16 {
        self.writer.data.slot_info(self.slot()).total_slices
    }

    /// Slices published so far in this session.
    pub fn valid_slices(&self) -> u16 {
        self.writer
            .current
            .as_ref()
            .map(|open| open.published_slices)
            .unwrap_or(0)
    }

    /// Absolute index this session writes.
    pub fn index(&self) -> u64 {
        self.writer.current.as_ref().expect("open grain").index
    }

    /// Sets the grain's metadata flags, published with the next commit.
    pub fn set_flags(&mut self, flags: u32) {
        let slot = self.slot();
        // Safety: flags are only written by the session owner; they become
        // visible to readers through the valid_slices release store.
        unsafe {
            (*self.writer.data.slot_info_mut(slot)).flags = flags;
        }
    }

    /// Overrides the payload size recorded for this grain. Used by
    /// variable-size data grains; capped by the slot capacity.
    pub fn set_grain_size(&mut self, grain_size: u32) -> Result<()> {
        if grain_size as usize > self.writer.data.grain_payload_size() {
            return Err(Error::InvalidArg(format!(
                "grain size {grain_size} exceeds slot capacity {}",
                self.writer.data.grain_payload_size()
            )));
        }
        let slot = self.slot();
        // Safety: session-exclusive slot metadata, published via the next
        // commit's release store.
        unsafe {
            (*self.writer.data.slot_info_mut(slot)).grain_size = grain_size;
        }
        Ok(())
    }

    /// Overrides the slice count recorded for this grain.
    pub fn set_total_slices(&mut self, total_slices: u16) -> Result<()> {
        if total_slices == 0 {
            return Err(Error::InvalidArg("slice count must be non-zero".into()));
        }
        let slot = self.slot();
        // Safety: as above.
        unsafe {
            (*self.writer.data.slot_info_mut(slot)).total_slices = total_slices;
        }
        Ok(())
    }

    /// Publishes a prefix of the grain and keeps the session open.
    ///
    /// The payload bytes of the committed slices must already be written;
    /// after this call they must not change until the slot is reopened for a
    /// new index. `valid_slices` must not decrease across commits of one
    /// session.
    pub fn commit_slices(&mut self, valid_slices: u16) -> Result<()> {
        self.publish(valid_slices)
    }

    /// Publishes the grain and closes the session.
    ///
    /// Passing [`Self::total_slices`] marks the grain complete; smaller
    /// values leave a partial grain in the ring, which readers asking for
    /// more slices will skip past or time out on.
    pub fn commit(mut self, valid_slices: u16) -> Result<()> {
        self.publish(valid_slices)?;
        self.finished = true;
        self.writer.current = None;
        Ok(())
    }

    /// Discards the session without advancing the head index or waking
    /// readers. Already published slices of this session remain readable.
    pub fn cancel(mut self) {
        self.finished = true;
        self.writer.current = None;
    }

    fn publish(&mut self, valid_slices: u16) -> Result<()> {
        let data = &self.writer.data;
        let open = self
            .writer
            .current
            .as_mut()
            .ok_or(Error::InvalidFlowWriter)?;
        let info = data.slot_info(open.slot);
        if valid_slices > info.total_slices {
            return Err(Error::InvalidArg(format!(
                "valid slices {valid_slices} cannot exceed total slices {}",
                info.total_slices
            )));
        }
        if valid_slices < open.published_slices {
            return Err(Error::InvalidArg(format!(
                "valid slices must not decrease ({} -> {valid_slices})",
                open.published_slices
            )));
        }

        // Publication order: payload bytes were written by the caller, then
        // the slice counter (release), then the head index (release), then
        // the sync counter increment that wakes parked readers.
        data.slot_valid_slices_atomic(open.slot)
            .store(valid_slices, Ordering::Release);
        open.published_slices = valid_slices;
        data.header().advance_head_index(open.index);
        data.header().stamp_last_write();
        data.header().signal();
        Ok(())
    }
}

impl Drop for GrainWriteAccess<'_> {
    /// Cancels the session if it was neither committed nor canceled, so an
    /// abandoned grain never blocks the writer.
    fn drop(&mut self) {
        if !self.finished {
            self.writer.current = None;
        }
    }
}
