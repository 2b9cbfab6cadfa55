// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Grain writer implementation for discrete media flows.

use std::sync::atomic::Ordering;

use uuid::Uuid;

use crate::error::Result;
use crate::flow::data::DiscreteFlowData;
use crate::flow::writer::WatcherRegistration;
use crate::flow::{FlowConfigInfo, FlowInfo, FlowRuntimeInfo};
use crate::grain::write_access::GrainWriteAccess;
use crate::time::UNDEFINED_INDEX;

/// Writer for discrete media grains (video frames, data packets).
///
/// Each grain is opened at an absolute index, written through the returned
/// [`GrainWriteAccess`] session, and committed to make it visible to readers.
/// Only one grain can be open at a time; the borrow on the write session
/// enforces this statically.
///
/// # Thread Safety
///
/// `GrainWriter` is `Send` but not `Sync`. Each writer should be used by only
/// one thread at a time, but can be transferred between threads.
///
/// # Examples
///
/// ```no_run
/// # fn example(instance: mxl::MxlInstance, mut writer: mxl::GrainWriter) -> Result<(), mxl::Error> {
/// let rate = mxl::Rational::new(60, 1);
/// let index = instance.get_current_index(&rate);
///
/// let mut access = writer.open_grain(index)?;
/// access.payload_mut().fill(0xFF);
/// let total = access.total_slices();
/// access.commit(total)?;
/// # Ok(())
/// # }
/// ```
pub struct GrainWriter {
    pub(crate) data: DiscreteFlowData,
    flow_id: Uuid,
    pub(crate) current: Option<OpenGrain>,
    _registration: Option<WatcherRegistration>,
}

/// State of the one grain slot currently open for writing.
pub(crate) struct OpenGrain {
    pub(crate) index: u64,
    pub(crate) slot: usize,
    /// Slices already published for this session; commits must not go
    /// backwards.
    pub(crate) published_slices: u16,
}

impl GrainWriter {
    pub(crate) fn new(
        data: DiscreteFlowData,
        flow_id: Uuid,
        registration: Option<WatcherRegistration>,
    ) -> Self {
        Self {
            data,
            flow_id,
            current: None,
            _registration: registration,
        }
    }

    /// The flow this writer produces into.
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

    /// Retrieves a snapshot of the flow runtime state.
    pub fn get_runtime_info(&self) -> Result<FlowRuntimeInfo> {
        Ok(FlowRuntimeInfo {
            value: self.data.header().runtime_snapshot(),
        })
    }

    /// Opens the grain slot for `index` and returns a write session.
    ///
    /// The slot's metadata is reset for the new index: `validSlices` drops to
    /// zero before the index is published, so readers of the previous tenant
    /// grain never observe the new index with stale slice counts.
    ///
    /// Only one session can exist at a time; the exclusive borrow makes a
    /// second `open_grain` before commit or cancel a compile error.
    pub fn open_grain(&mut self, index: u64) -> Result<GrainWriteAccess<'_>> {
        let slot = (index % self.data.grain_count() as u64) as usize;

        // Retire the slot before republishing it under the new index.
        self.data
            .slot_index_atomic(slot)
            .store(UNDEFINED_INDEX, Ordering::Release);
        // Safety: the slot header is only mutated by this writer while the
        // slot is unpublished (index is UNDEFINED).
        unsafe {
            (*self.data.slot_info_mut(slot)).flags = 0;
        }
        self.data
            .slot_valid_slices_atomic(slot)
            .store(0, Ordering::Release);
        self.data
            .slot_index_atomic(slot)
            .store(index, Ordering::Release);

        self.current = Some(OpenGrain {
            index,
            slot,
            published_slices: 0,
        });
        Ok(GrainWriteAccess::new(self))
    }

    /// `true` while this writer's advisory lock on the flow is exclusive.
    pub fn is_exclusive(&self) -> bool {
        self.data.header().map().segment().is_exclusive()
    }

    /// Non-blocking attempt to upgrade the flow lock from shared to
    /// exclusive. Returns `false` when another reader or writer holds it.
    pub fn make_exclusive(&mut self) -> Result<bool> {
        self.data.header_mut().map_mut().segment_mut().make_exclusive()
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
    /// Transport layers use this to register slots as remotely writable
    /// memory regions; the mapping stays valid for the writer's lifetime.
    pub fn slot_mapping(&self, slot: u32) -> Result<(usize, usize)> {
        if slot >= self.data.grain_count() {
            return Err(crate::Error::InvalidArg(format!("slot {slot} out of range")));
        }
        Ok(self.data.slot_mapping(slot as usize))
    }

    /// Snapshot of one ring slot's metadata.
    pub fn slot_grain_info(&self, slot: u32) -> Result<crate::grain::data::GrainSlotInfo> {
        if slot >= self.data.grain_count() {
            return Err(crate::Error::InvalidArg(format!("slot {slot} out of range")));
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
}
