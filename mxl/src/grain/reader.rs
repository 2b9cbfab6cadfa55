// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Grain reader implementation for discrete media flows.

use std::fs::File;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::warn;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::flow::data::DiscreteFlowData;
use crate::flow::manager::{flow_access_file, flow_directory};
use crate::flow::{FlowConfigInfo, FlowInfo, FlowRuntimeInfo};
use crate::grain::data::GrainData;
use crate::shmem::touch_fd;
use crate::sync::wait_until_changed;
use crate::time::Deadline;

/// Reader for discrete media grains (video frames, data packets).
///
/// Provides zero-copy access to grains stored in the flow's ring buffer.
/// Grains are addressed by their absolute index; reads either return
/// immediately or park on the flow's sync counter until the writer commits.
///
/// A successful read touches the flow's `access` sentinel so the domain
/// watcher can reflect reader activity back to the writer.
///
/// # Thread Safety
///
/// `GrainReader` is `Send` but not `Sync`. Each reader should be used by only
/// one thread at a time, but can be transferred between threads.
///
/// # Examples
///
/// ```no_run
/// # use std::time::Duration;
/// # fn example(instance: mxl::MxlInstance, reader: mxl::GrainReader) -> Result<(), mxl::Error> {
/// let info = reader.get_config_info()?;
/// let rate = info.common().grain_rate()?;
/// let index = instance.get_current_index(&rate);
///
/// // Blocking read, complete grains only, 5 second budget.
/// let grain = reader.get_complete_grain(index, Duration::from_secs(5))?;
/// println!("Read {} bytes", grain.payload.len());
/// # Ok(())
/// # }
/// ```
pub struct GrainReader {
    data: DiscreteFlowData,
    flow_id: Uuid,
    access_file: Option<File>,
}

impl GrainReader {
    pub(crate) fn new(data: DiscreteFlowData, flow_id: Uuid, domain: &Path) -> Self {
        // Opening the access file may fail on a read-only volume. Reads still
        // work; lastReadTime just never updates.
        let access_path = flow_access_file(&flow_directory(domain, &flow_id));
        let access_file = File::options().write(true).open(&access_path).ok();
        Self {
            data,
            flow_id,
            access_file,
        }
    }

    /// The flow this reader is attached to.
    pub fn flow_id(&self) -> Uuid {
        self.flow_id
    }

    /// Retrieves complete flow information (config + runtime).
    pub fn get_info(&self) -> Result<FlowInfo> {
        Ok(FlowInfo {
            config: self.get_config_info()?,
            runtime: self.get_runtime_info()?,
        })
    }

    /// Retrieves flow configuration (format, rate, ring geometry).
    pub fn get_config_info(&self) -> Result<FlowConfigInfo> {
        Ok(FlowConfigInfo {
            value: self.data.header().info().config,
        })
    }

    /// Retrieves a snapshot of the flow runtime state (head index, last
    /// access times).
    pub fn get_runtime_info(&self) -> Result<FlowRuntimeInfo> {
        Ok(FlowRuntimeInfo {
            value: self.data.header().runtime_snapshot(),
        })
    }

    /// Reads the grain at `index`, blocking until at least
    /// `min_valid_slices` slices are committed or the timeout elapses.
    ///
    /// # Errors
    ///
    /// - [`Error::OutOfRangeTooEarly`] if the deadline passes before the
    ///   grain reaches the requested slice count
    /// - [`Error::OutOfRangeTooLate`] if the grain has left the ring window
    /// - [`Error::FlowInvalid`] if the flow was deleted and recreated while
    ///   waiting
    /// - [`Error::InvalidArg`] if `min_valid_slices` exceeds the grain's
    ///   slice count
    pub fn get_grain(
        &self,
        index: u64,
        min_valid_slices: u16,
        timeout: Duration,
    ) -> Result<GrainData<'_>> {
        let slot = self.wait_slot(index, Some(min_valid_slices), Deadline::after(timeout))?;
        self.touch_access();
        Ok(self.slot_data(slot, index))
    }

    /// Reads a fully committed grain, waiting until every slice is valid.
    pub fn get_complete_grain(&self, index: u64, timeout: Duration) -> Result<GrainData<'_>> {
        let slot = self.wait_slot(index, None, Deadline::after(timeout))?;
        self.touch_access();
        Ok(self.slot_data(slot, index))
    }

    /// Reads a grain without blocking; the returned view may be partial
    /// (fewer valid slices than total).
    ///
    /// # Errors
    ///
    /// - [`Error::OutOfRangeTooEarly`] if the grain has not been opened yet
    /// - [`Error::OutOfRangeTooLate`] if the grain has left the ring window
    /// - [`Error::FlowInvalid`] if the backing flow was recreated
    pub fn get_grain_non_blocking(&self, index: u64) -> Result<GrainData<'_>> {
        match self.check_slot(index, Some(0))? {
            Some(slot) => {
                self.touch_access();
                Ok(self.slot_data(slot, index))
            }
            None => Err(self.too_early_or_stale()),
        }
    }

    /// Blocks until the grain at `index` has at least `min_valid_slices`
    /// committed, without retrieving the payload.
    pub fn wait_for_grain(
        &self,
        index: u64,
        min_valid_slices: u16,
        timeout: Duration,
    ) -> Result<()> {
        self.wait_slot(index, Some(min_valid_slices), Deadline::after(timeout))
            .map(|_| ())
    }

    /// Oldest and newest committed indices currently in the ring, or `None`
    /// if nothing has been committed yet.
    pub fn grain_range(&self) -> Option<(u64, u64)> {
        let mut range: Option<(u64, u64)> = None;
        for slot in 0..self.data.grain_count() as usize {
            let index = self.data.slot_index_atomic(slot).load(Ordering::Acquire);
            if index == crate::time::UNDEFINED_INDEX {
                continue;
            }
            range = Some(match range {
                None => (index, index),
                Some((oldest, newest)) => (oldest.min(index), newest.max(index)),
            });
        }
        range
    }

    pub(crate) fn head_index(&self) -> u64 {
        self.data.header().head_index()
    }

    pub(crate) fn rate(&self) -> crate::time::Rational {
        self.data.header().info().config.common.grain_rate
    }

    pub(crate) fn data(&self) -> &DiscreteFlowData {
        &self.data
    }

    /// Number of grain slots in the ring.
    pub fn slot_count(&self) -> u32 {
        self.data.grain_count()
    }

    /// Base address and length of one slot's mapping (header + payload).
    ///
    /// Transport layers use this to register slots as memory regions; the
    /// mapping stays valid for the reader's lifetime.
    pub fn slot_mapping(&self, slot: u32) -> Result<(usize, usize)> {
        if slot >= self.data.grain_count() {
            return Err(Error::InvalidArg(format!("slot {slot} out of range")));
        }
        Ok(self.data.slot_mapping(slot as usize))
    }

    /// Snapshot of one ring slot's metadata.
    pub fn slot_grain_info(&self, slot: u32) -> Result<crate::grain::data::GrainSlotInfo> {
        if slot >= self.data.grain_count() {
            return Err(Error::InvalidArg(format!("slot {slot} out of range")));
        }
        let info = self.data.slot_info(slot as usize);
        Ok(crate::grain::data::GrainSlotInfo {
            index: self.data.slot_index_atomic(slot as usize).load(Ordering::Acquire),
            flags: info.flags,
            grain_size: info.grain_size,
            total_slices: info.total_slices,
            valid_slices: self
                .data
                .slot_valid_slices_atomic(slot as usize)
                .load(Ordering::Acquire),
        })
    }

    /// Blocking availability loop. `min_valid_slices` of `None` waits for a
    /// fully committed grain.
    pub(crate) fn wait_slot(
        &self,
        index: u64,
        min_valid_slices: Option<u16>,
        deadline: Deadline,
    ) -> Result<usize> {
        loop {
            // Remember the sync counter before checking the head index. If
            // the writer commits between the check and the wait, the counter
            // no longer matches and the wait returns immediately instead of
            // missing the wake.
            let sync = self.data.header().sync_counter().load(Ordering::Acquire);
            match self.check_slot(index, min_valid_slices)? {
                Some(slot) => return Ok(slot),
                None => {
                    if deadline.expired()
                        || !wait_until_changed(self.data.header().sync_counter(), sync, deadline)
                    {
                        return Err(self.too_early_or_stale());
                    }
                }
            }
        }
    }

    /// One pass of the availability decision: `Ok(Some(slot))` when readable,
    /// `Ok(None)` when the caller should wait, an error when it never will
    /// become readable.
    fn check_slot(&self, index: u64, min_valid_slices: Option<u16>) -> Result<Option<usize>> {
        let head = self.data.header().head_index();
        if index > head {
            return Ok(None);
        }

        let count = self.data.grain_count() as u64;
        let tail = head.saturating_sub(count - 1);
        if index < tail {
            return Err(Error::OutOfRangeTooLate);
        }

        let slot = (index % count) as usize;
        if self.data.slot_index_atomic(slot).load(Ordering::Acquire) != index {
            // The slot has not been opened for this index yet (or still
            // carries an older session); wait for the writer.
            return Ok(None);
        }
        let total = self.data.slot_info(slot).total_slices;
        let required = match min_valid_slices {
            Some(min) if min > total => {
                return Err(Error::InvalidArg(format!(
                    "requested {min} valid slices but the grain has {total}"
                )));
            }
            Some(min) => min,
            None => total,
        };
        let valid = self.data.slot_valid_slices_atomic(slot).load(Ordering::Acquire);
        if valid < required {
            return Ok(None);
        }
        // Never serve bytes from a mapping whose flow was deleted and
        // recreated underneath us.
        if self.data.header().is_stale() {
            return Err(Error::FlowInvalid);
        }
        Ok(Some(slot))
    }

    fn slot_data(&self, slot: usize, index: u64) -> GrainData<'_> {
        let info = self.data.slot_info(slot);
        let total_size = info.grain_size as usize;
        let committed = if info.valid_slices >= info.total_slices {
            total_size
        } else {
            (info.valid_slices as usize * self.data.slice_size() as usize).min(total_size)
        };
        // Safety: the slot mapping holds `grain_size` payload bytes after the
        // header; the committed prefix is stable until the slot is reused for
        // an index outside the readable window.
        let payload =
            unsafe { std::slice::from_raw_parts(self.data.payload_ptr(slot), committed) };
        GrainData {
            payload,
            total_size,
            index,
            flags: info.flags,
            valid_slices: info.valid_slices,
            total_slices: info.total_slices,
        }
    }

    fn too_early_or_stale(&self) -> Error {
        if self.data.header().is_stale() {
            Error::FlowInvalid
        } else {
            Error::OutOfRangeTooEarly
        }
    }

    fn touch_access(&self) {
        if let Some(file) = &self.access_file {
            if !touch_fd(file.as_raw_fd()) {
                warn!("failed to update access file times for flow {}", self.flow_id);
            }
        }
    }
}
