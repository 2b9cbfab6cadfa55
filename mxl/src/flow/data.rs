// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Shared-memory state of an open flow.
//!
//! [`DiscreteFlowData`] owns the header mapping plus one mapping per grain
//! slot; [`ContinuousFlowData`] owns the header plus the strided channel
//! store. Both centralize every atomic access to the mutable runtime fields
//! so the commit/observe ordering rules live in one place:
//!
//! - payload writes happen-before the `valid_slices` release store,
//! - which happens-before the `head_index` release store,
//! - which happens-before the `sync_counter` release increment paired with
//!   reader acquire loads.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, Ordering};

use crate::error::{Error, Result};
use crate::flow::layout::{self, FlowInfo, GrainInfo};
use crate::shmem::{SharedMemoryInstance, SharedMemorySegment};
use crate::time::current_tai_time;

/// Flow state shared by the discrete and continuous variants: the mapped
/// 2048-byte header and the path of its backing file.
pub(crate) struct FlowHeader {
    map: SharedMemoryInstance<FlowInfo>,
    data_path: PathBuf,
}

impl FlowHeader {
    pub(crate) fn new(map: SharedMemoryInstance<FlowInfo>, data_path: PathBuf) -> Self {
        Self { map, data_path }
    }

    pub(crate) fn map(&self) -> &SharedMemoryInstance<FlowInfo> {
        &self.map
    }

    pub(crate) fn map_mut(&mut self) -> &mut SharedMemoryInstance<FlowInfo> {
        &mut self.map
    }

    /// Immutable view of the header. The config part never changes after
    /// creation; runtime fields read through this are snapshots only.
    pub(crate) fn info(&self) -> &FlowInfo {
        // Safety: the mapping is at least FLOW_INFO_SIZE bytes and lives as
        // long as self.
        unsafe { &*self.map.get() }
    }

    fn runtime_ptr(&self) -> *mut layout::FlowRuntimeInfo {
        // Safety: in-bounds field projection of the mapped header.
        unsafe { &raw mut (*self.map.get()).runtime }
    }

    /// The futex word readers park on.
    pub(crate) fn sync_counter(&self) -> &AtomicU32 {
        // Safety: the field is 4-byte aligned inside the mapping and only
        // ever accessed atomically; AtomicU32 has the same layout as u32.
        unsafe { &*((&raw mut (*self.runtime_ptr()).sync_counter) as *const AtomicU32) }
    }

    fn head_index_atomic(&self) -> &AtomicU64 {
        // Safety: as above, for the 8-byte aligned head index.
        unsafe { &*((&raw mut (*self.runtime_ptr()).head_index) as *const AtomicU64) }
    }

    fn last_write_atomic(&self) -> &AtomicU64 {
        // Safety: as above.
        unsafe { &*((&raw mut (*self.runtime_ptr()).last_write_time) as *const AtomicU64) }
    }

    fn last_read_atomic(&self) -> &AtomicU64 {
        // Safety: as above.
        unsafe { &*((&raw mut (*self.runtime_ptr()).last_read_time) as *const AtomicU64) }
    }

    pub(crate) fn head_index(&self) -> u64 {
        self.head_index_atomic().load(Ordering::Acquire)
    }

    /// Publishes a new head index. The cursor only ever moves forward, even
    /// with multiple writer handles on the same flow.
    pub(crate) fn advance_head_index(&self, index: u64) {
        self.head_index_atomic().fetch_max(index, Ordering::AcqRel);
    }

    pub(crate) fn stamp_last_write(&self) {
        self.last_write_atomic()
            .store(current_tai_time(), Ordering::Relaxed);
    }

    pub(crate) fn set_last_read_time(&self, tai_ns: u64) {
        self.last_read_atomic().store(tai_ns, Ordering::Relaxed);
    }

    /// Bumps the sync counter and wakes every parked reader.
    pub(crate) fn signal(&self) {
        let counter = self.sync_counter();
        counter.fetch_add(1, Ordering::Release);
        crate::sync::wake_all(counter);
    }

    /// Inode recorded at creation time. Immutable afterwards.
    pub(crate) fn inode_stamp(&self) -> u64 {
        self.info().runtime.inode
    }

    /// Compares the recorded inode against the file currently at the data
    /// path. A mismatch means the flow was deleted and recreated underneath
    /// this mapping.
    pub(crate) fn is_stale(&self) -> bool {
        use std::os::unix::fs::MetadataExt;
        match std::fs::metadata(&self.data_path) {
            Ok(meta) => meta.ino() != self.inode_stamp(),
            Err(_) => true,
        }
    }

    /// Snapshot of the runtime block.
    pub(crate) fn runtime_snapshot(&self) -> layout::FlowRuntimeInfo {
        let mut runtime = self.info().runtime;
        runtime.head_index = self.head_index();
        runtime
    }
}

/// Shared-memory state of a discrete (grain ring) flow.
pub(crate) struct DiscreteFlowData {
    header: FlowHeader,
    grains: Vec<SharedMemorySegment>,
    grain_count: u32,
    grain_payload_size: usize,
}

impl DiscreteFlowData {
    pub(crate) fn new(header: FlowHeader, grains: Vec<SharedMemorySegment>) -> Result<Self> {
        let config = header.info().config;
        if layout::is_discrete_data_format(config.common.format) {
            // Safety: format tag selects the discrete union variant.
            let discrete = unsafe { config.details.discrete };
            if discrete.grain_count == 0 {
                return Err(Error::Unknown("flow declares an empty grain ring".into()));
            }
            if grains.len() != discrete.grain_count as usize {
                return Err(Error::Unknown(format!(
                    "flow declares {} grains but {} are mapped",
                    discrete.grain_count,
                    grains.len()
                )));
            }
            let grain_payload_size = grains
                .first()
                .map(|g| g.len().saturating_sub(layout::GRAIN_PAYLOAD_OFFSET))
                .unwrap_or(0);
            Ok(Self {
                header,
                grains,
                grain_count: discrete.grain_count,
                grain_payload_size,
            })
        } else {
            Err(Error::InvalidArg("not a discrete flow".into()))
        }
    }

    pub(crate) fn header(&self) -> &FlowHeader {
        &self.header
    }

    pub(crate) fn header_mut(&mut self) -> &mut FlowHeader {
        &mut self.header
    }

    pub(crate) fn grain_count(&self) -> u32 {
        self.grain_count
    }

    pub(crate) fn grain_payload_size(&self) -> usize {
        self.grain_payload_size
    }

    /// First-plane slice size in bytes; the unit partial reads are measured
    /// in.
    pub(crate) fn slice_size(&self) -> u32 {
        // Safety: construction verified the discrete variant.
        unsafe { self.header.info().config.details.discrete.slice_sizes[0] }
    }

    fn grain_info_ptr(&self, slot: usize) -> *mut GrainInfo {
        debug_assert!(slot < self.grains.len());
        self.grains[slot].base() as *mut GrainInfo
    }

    /// Plain snapshot of a slot's metadata. Use the atomic accessors below
    /// when the value participates in the commit protocol.
    pub(crate) fn slot_info(&self, slot: usize) -> GrainInfo {
        // Safety: the slot mapping holds a GrainInfo at offset 0.
        unsafe { *self.grain_info_ptr(slot) }
    }

    pub(crate) fn slot_index_atomic(&self, slot: usize) -> &AtomicU64 {
        // Safety: 8-byte aligned field inside the slot mapping, accessed
        // atomically by every party.
        unsafe { &*((&raw mut (*self.grain_info_ptr(slot)).index) as *const AtomicU64) }
    }

    pub(crate) fn slot_valid_slices_atomic(&self, slot: usize) -> &AtomicU16 {
        // Safety: 2-byte aligned field, atomic access only.
        unsafe { &*((&raw mut (*self.grain_info_ptr(slot)).valid_slices) as *const AtomicU16) }
    }

    /// Non-atomic metadata fields of a slot (flags, sizes). Only the writer
    /// mutates these, and only between `open` and the publishing store.
    pub(crate) fn slot_info_mut(&self, slot: usize) -> *mut GrainInfo {
        self.grain_info_ptr(slot)
    }

    pub(crate) fn payload_ptr(&self, slot: usize) -> *mut u8 {
        // Safety: grain files are GRAIN_PAYLOAD_OFFSET + payload bytes.
        unsafe { self.grains[slot].base().add(layout::GRAIN_PAYLOAD_OFFSET) }
    }

    /// Base address and length of a whole slot mapping (header + payload),
    /// used to register grain slots as RDMA regions.
    pub(crate) fn slot_mapping(&self, slot: usize) -> (usize, usize) {
        (self.grains[slot].base() as usize, self.grains[slot].len())
    }
}

/// Shared-memory state of a continuous (sample ring) flow.
pub(crate) struct ContinuousFlowData {
    header: FlowHeader,
    channels: SharedMemorySegment,
    channel_count: u32,
    buffer_length: u32,
    sample_word_size: usize,
}

impl ContinuousFlowData {
    pub(crate) fn new(header: FlowHeader, channels: SharedMemorySegment) -> Result<Self> {
        let config = header.info().config;
        if layout::is_discrete_data_format(config.common.format) {
            return Err(Error::InvalidArg("not a continuous flow".into()));
        }
        // Safety: format tag selects the continuous union variant.
        let continuous = unsafe { config.details.continuous };
        let samples_total = continuous.channel_count as usize * continuous.buffer_length as usize;
        if samples_total == 0 || channels.len() % samples_total != 0 {
            return Err(Error::Unknown(format!(
                "channel store of {} bytes does not divide into {} samples",
                channels.len(),
                samples_total
            )));
        }
        let sample_word_size = channels.len() / samples_total;
        Ok(Self {
            header,
            channels,
            channel_count: continuous.channel_count,
            buffer_length: continuous.buffer_length,
            sample_word_size,
        })
    }

    pub(crate) fn header(&self) -> &FlowHeader {
        &self.header
    }

    pub(crate) fn header_mut(&mut self) -> &mut FlowHeader {
        &mut self.header
    }

    pub(crate) fn channel_count(&self) -> u32 {
        self.channel_count
    }

    pub(crate) fn buffer_length(&self) -> u32 {
        self.buffer_length
    }

    pub(crate) fn sample_word_size(&self) -> usize {
        self.sample_word_size
    }

    /// Base of channel 0's ring; channel `c` starts at
    /// `base + c * buffer_length * sample_word_size`.
    pub(crate) fn channel_base(&self) -> *mut u8 {
        self.channels.base()
    }

    /// Distance between consecutive channels in bytes.
    pub(crate) fn stride(&self) -> usize {
        self.buffer_length as usize * self.sample_word_size
    }
}

/// An open flow is one of the two variants; they share no operations beyond
/// the header, so a sum type replaces the original's class hierarchy.
pub(crate) enum FlowData {
    Discrete(DiscreteFlowData),
    Continuous(ContinuousFlowData),
}

impl FlowData {
    pub(crate) fn header(&self) -> &FlowHeader {
        match self {
            FlowData::Discrete(data) => data.header(),
            FlowData::Continuous(data) => data.header(),
        }
    }
}
