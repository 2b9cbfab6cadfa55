// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Grain data structures for zero-copy media access.

/// Zero-copy view of a grain's payload data.
///
/// Provides read-only access to a grain stored in the shared memory ring.
/// The lifetime `'a` is tied to the [`crate::GrainReader`] that produced it.
///
/// For partial grains (not yet fully written), `payload` covers only the
/// committed slices and `payload.len()` is less than [`Self::total_size`].
pub struct GrainData<'a> {
    /// The committed prefix of the grain payload.
    ///
    /// This is a zero-copy view into shared memory. The bytes stay stable
    /// until the writer reuses the slot for a newer index, which only happens
    /// once the index leaves the readable window.
    pub payload: &'a [u8],

    /// Total size of the complete grain payload in bytes.
    pub total_size: usize,

    /// Absolute index of the grain.
    pub index: u64,

    /// Grain metadata flags ([`crate::flow::layout::GRAIN_FLAG_INVALID`]).
    pub flags: u32,

    /// Slices committed at the time of the read.
    pub valid_slices: u16,

    /// Slices in a complete grain.
    pub total_slices: u16,
}

impl<'a> GrainData<'a> {
    /// `true` once every slice has been committed.
    pub fn is_complete(&self) -> bool {
        self.valid_slices == self.total_slices
    }

    /// Creates an owned copy of this grain's committed payload.
    pub fn to_owned(&self) -> OwnedGrainData {
        self.into()
    }
}

impl<'a> AsRef<GrainData<'a>> for GrainData<'a> {
    fn as_ref(&self) -> &GrainData<'a> {
        self
    }
}

/// Compact snapshot of one ring slot's metadata.
///
/// Used by transport layers that replicate grain slots between hosts and
/// need the slot state without the full mapped header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrainSlotInfo {
    /// Absolute index of the grain currently in the slot, or
    /// [`crate::UNDEFINED_INDEX`] for a never-written slot.
    pub index: u64,
    /// Grain metadata flags.
    pub flags: u32,
    /// Payload size in bytes.
    pub grain_size: u32,
    /// Slices in a complete grain.
    pub total_slices: u16,
    /// Slices committed so far.
    pub valid_slices: u16,
}

/// Owned copy of grain payload data.
///
/// Unlike [`GrainData`], this owns its bytes and can outlive the reader.
pub struct OwnedGrainData {
    /// Owned copy of the committed payload bytes.
    pub payload: Vec<u8>,
    /// Absolute index of the grain.
    pub index: u64,
    /// Grain metadata flags.
    pub flags: u32,
}

impl<'a> From<&GrainData<'a>> for OwnedGrainData {
    fn from(value: &GrainData<'a>) -> Self {
        Self {
            payload: value.payload.to_vec(),
            index: value.index,
            flags: value.flags,
        }
    }
}

impl<'a> From<GrainData<'a>> for OwnedGrainData {
    fn from(value: GrainData<'a>) -> Self {
        value.as_ref().into()
    }
}
