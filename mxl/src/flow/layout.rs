// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Binary layout of the structures mapped into shared memory.
//!
//! These are the on-disk wire contract; sizes and field offsets are frozen.
//! Every structure starts with `{version, size}` so consumers can reject
//! unrecognized layouts without guessing, and carries explicit reserved
//! padding so future fields never change the overall size.
//!
//! Layout of a flow's `data` file (2048 bytes):
//!
//! ```text
//!   0x0000   4      version (currently 1)
//!   0x0004   4      size    (always 2048)
//!   0x0008   192    FlowConfigInfo   (common + discrete/continuous union)
//!   0x00C8   64     FlowRuntimeInfo  (headIndex, timestamps, inode, syncCounter)
//!   0x0108   1784   reserved
//! ```
//!
//! Layout of a grain file: a [`GrainInfo`] padded to [`GRAIN_PAYLOAD_OFFSET`]
//! (8192) bytes, followed by the payload. The 8192-byte offset keeps the
//! payload page-aligned and AVX-512-aligned and must be preserved exactly.

use crate::time::Rational;

/// Version of the flow header layout. Bump on any incompatible change.
pub const FLOW_INFO_VERSION: u32 = 1;

/// Version of the grain header layout. Bump on any incompatible change.
pub const GRAIN_INFO_VERSION: u32 = 1;

/// Fixed size of the flow `data` file.
pub const FLOW_INFO_SIZE: usize = 2048;

/// Fixed logical size of [`GrainInfo`] including its reserved tail.
pub const GRAIN_INFO_SIZE: usize = 4096;

/// Offset of the grain payload within a grain file. Page- and
/// AVX-512-aligned; part of the wire contract.
pub const GRAIN_PAYLOAD_OFFSET: usize = 8192;

/// Maximum number of planes a discrete grain can carry distinct slice sizes
/// for (e.g. fill and key planes).
pub const MAX_PLANES_PER_GRAIN: usize = 4;

/// Media format tags stored in the `format` field. Numeric values are stable.
pub const DATA_FORMAT_UNSPECIFIED: u32 = 0;
pub const DATA_FORMAT_VIDEO: u32 = 1;
pub const DATA_FORMAT_AUDIO: u32 = 2;
pub const DATA_FORMAT_DATA: u32 = 3;

/// Payload location tags. Numeric values are stable.
pub const PAYLOAD_LOCATION_HOST: u32 = 0;
pub const PAYLOAD_LOCATION_DEVICE: u32 = 1;

/// Configuration common to every flow variant. Immutable after creation.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct CommonFlowConfigInfo {
    /// Flow UUID, raw bytes.
    pub id: [u8; 16],
    /// One of the `DATA_FORMAT_*` tags.
    pub format: u32,
    /// Reserved; no flags are defined yet, always 0.
    pub flags: u32,
    /// Grain rate (discrete) or sample rate (continuous).
    pub grain_rate: Rational,
    /// Hint: largest sample batch a writer commits at once.
    pub max_commit_batch_size_hint: u32,
    /// Hint: largest sample batch at which availability is signalled. Must be
    /// a non-zero multiple of the commit batch hint.
    pub max_sync_batch_size_hint: u32,
    /// One of the `PAYLOAD_LOCATION_*` tags.
    pub payload_location: u32,
    /// Device ordinal for device payloads, -1 for host memory.
    pub device_index: i32,
    pub reserved: [u8; 72],
}

/// Discrete (grain ring) geometry.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DiscreteFlowConfigInfo {
    /// Bytes per slice, per plane. Unused entries are zero.
    pub slice_sizes: [u32; MAX_PLANES_PER_GRAIN],
    /// Number of grain slots in the ring.
    pub grain_count: u32,
    pub reserved: [u8; 44],
}

/// Continuous (sample ring) geometry.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ContinuousFlowConfigInfo {
    /// Number of channels, each with its own ring.
    pub channel_count: u32,
    /// Ring length per channel, in samples. The lower half is the writer's
    /// exclusion zone; readers only see `bufferLength / 2` of history.
    pub buffer_length: u32,
    pub reserved: [u8; 56],
}

/// Variant-specific half of the flow configuration.
#[repr(C)]
#[derive(Clone, Copy)]
pub union FlowConfigDetails {
    pub discrete: DiscreteFlowConfigInfo,
    pub continuous: ContinuousFlowConfigInfo,
}

/// Full flow configuration: common part plus the variant union.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FlowConfigInfo {
    pub common: CommonFlowConfigInfo,
    pub details: FlowConfigDetails,
}

/// Mutable runtime state of a flow, updated by the writer.
///
/// `inode` and `sync_counter` sit at the head of this block's reserved area:
/// `inode` is the data file's inode at creation time (stale-mapping
/// detection), `sync_counter` is the 32-bit futex word readers park on. Both
/// are accessed through atomics at runtime.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FlowRuntimeInfo {
    /// Highest committed index; the publish cursor. Monotone non-decreasing
    /// for the lifetime of a flow-file inode.
    pub head_index: u64,
    /// TAI nanoseconds of the last commit.
    pub last_write_time: u64,
    /// TAI nanoseconds of the last observed read (maintained by the domain
    /// watcher, not the reader itself).
    pub last_read_time: u64,
    /// Inode of the `data` file at creation time.
    pub inode: u64,
    /// Futex word; incremented after every commit that advances state.
    pub sync_counter: u32,
    pub reserved: [u8; 28],
}

/// The 2048-byte structure at the start of every flow's `data` file.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FlowInfo {
    /// Layout version, [`FLOW_INFO_VERSION`].
    pub version: u32,
    /// Total structure size, always [`FLOW_INFO_SIZE`].
    pub size: u32,
    pub config: FlowConfigInfo,
    pub runtime: FlowRuntimeInfo,
    pub reserved: [u8; 1784],
}

/// Metadata at the start of every grain file.
///
/// The reserved tail (and the padding up to [`GRAIN_PAYLOAD_OFFSET`]) is
/// reserved-must-be-zero; user metadata waits for a version bump.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct GrainInfo {
    /// Layout version, [`GRAIN_INFO_VERSION`].
    pub version: u32,
    /// Logical structure size, always [`GRAIN_INFO_SIZE`].
    pub size: u32,
    /// Absolute epoch-based index of the grain currently in this slot.
    pub index: u64,
    /// Bit 0 set marks the grain invalid.
    pub flags: u32,
    /// Payload size in bytes.
    pub grain_size: u32,
    /// Number of slices the grain divides into; fixed at flow creation.
    pub total_slices: u16,
    /// Slices committed so far; monotone within one open-grain session.
    pub valid_slices: u16,
    pub reserved: [u8; 4068],
}

/// Grain flag bit 0: payload is invalid and must not be interpreted.
pub const GRAIN_FLAG_INVALID: u32 = 1;

// The layout is a cross-process contract; a silent size or offset drift would
// corrupt every flow in a domain. Checked at compile time.
const _: () = {
    use std::mem::{offset_of, size_of};
    assert!(size_of::<CommonFlowConfigInfo>() == 128);
    assert!(size_of::<DiscreteFlowConfigInfo>() == 64);
    assert!(size_of::<ContinuousFlowConfigInfo>() == 64);
    assert!(size_of::<FlowConfigDetails>() == 64);
    assert!(size_of::<FlowConfigInfo>() == 192);
    assert!(size_of::<FlowRuntimeInfo>() == 64);
    assert!(size_of::<FlowInfo>() == FLOW_INFO_SIZE);
    assert!(size_of::<GrainInfo>() == GRAIN_INFO_SIZE);
    assert!(GRAIN_INFO_SIZE <= GRAIN_PAYLOAD_OFFSET);
    assert!(offset_of!(FlowInfo, config) == 8);
    assert!(offset_of!(FlowInfo, runtime) == 200);
    assert!(offset_of!(FlowRuntimeInfo, inode) == 24);
    assert!(offset_of!(FlowRuntimeInfo, sync_counter) == 32);
    assert!(offset_of!(GrainInfo, index) == 8);
    assert!(offset_of!(GrainInfo, valid_slices) == 26);
};

/// `true` for formats delivered as discrete grains (video and data).
pub const fn is_discrete_data_format(format: u32) -> bool {
    format == DATA_FORMAT_VIDEO || format == DATA_FORMAT_DATA
}
