// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Sample data structures for zero-copy audio access.

use std::marker::PhantomData;

use crate::error::{Error, Result};

/// Zero-copy view of multi-channel audio sample data.
///
/// Each channel occupies its own ring buffer; consecutive channels are
/// separated by a fixed stride. A requested range materializes as up to two
/// fragments per channel because of ring wrap-around; the second fragment is
/// empty when the range is contiguous.
///
/// The lifetime `'a` is tied to the [`crate::SamplesReader`] that produced
/// it.
///
/// # Examples
///
/// ```no_run
/// # fn example(samples: mxl::SamplesData) -> Result<(), mxl::Error> {
/// for ch in 0..samples.num_of_channels() {
///     let (frag1, frag2) = samples.channel_data(ch)?;
///     println!("Channel {}: {} + {} bytes", ch, frag1.len(), frag2.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct SamplesData<'a> {
    base: *const u8,
    stride: usize,
    channel_count: usize,
    frag1_offset: usize,
    frag1_len: usize,
    frag2_len: usize,
    phantom: PhantomData<&'a ()>,
}

impl<'a> SamplesData<'a> {
    pub(crate) fn new(
        base: *const u8,
        stride: usize,
        channel_count: usize,
        frag1_offset: usize,
        frag1_len: usize,
        frag2_len: usize,
    ) -> Self {
        Self {
            base,
            stride,
            channel_count,
            frag1_offset,
            frag1_len,
            frag2_len,
            phantom: PhantomData,
        }
    }

    /// Returns the number of audio channels.
    pub fn num_of_channels(&self) -> usize {
        self.channel_count
    }

    /// Returns zero-copy access to one channel's sample bytes.
    ///
    /// The first fragment starts somewhere inside the channel ring; the
    /// second fragment (empty without wrap-around) continues from the start
    /// of the ring. The slices are raw bytes; audio flows typically store
    /// 32-bit float samples.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArg`] if `channel >= num_of_channels()`.
    pub fn channel_data(&self, channel: usize) -> Result<(&[u8], &[u8])> {
        if channel >= self.channel_count {
            return Err(Error::InvalidArg(format!(
                "channel {channel} out of range ({} channels)",
                self.channel_count
            )));
        }
        // Safety: the producer sized the fragments against the mapped channel
        // store; channel * stride + fragment ranges stay within the mapping.
        unsafe {
            let channel_base = self.base.add(channel * self.stride);
            Ok((
                std::slice::from_raw_parts(channel_base.add(self.frag1_offset), self.frag1_len),
                std::slice::from_raw_parts(channel_base, self.frag2_len),
            ))
        }
    }

    /// Creates an owned copy of this sample window.
    pub fn to_owned(&self) -> OwnedSamplesData {
        self.into()
    }
}

impl<'a> AsRef<SamplesData<'a>> for SamplesData<'a> {
    fn as_ref(&self) -> &SamplesData<'a> {
        self
    }
}

/// Owned copy of multi-channel sample data.
///
/// Unlike [`SamplesData`], this owns its bytes and can outlive the reader.
/// Fragments are joined, so each channel is one contiguous buffer.
pub struct OwnedSamplesData {
    /// Per-channel sample bytes with both fragments concatenated.
    pub payload: Vec<Vec<u8>>,
}

impl<'a> From<&SamplesData<'a>> for OwnedSamplesData {
    fn from(value: &SamplesData<'a>) -> Self {
        let mut payload = Vec::with_capacity(value.channel_count);
        for channel in 0..value.channel_count {
            // Unwrap is fine: the channel index is always in range here.
            let (data_1, data_2) = value.channel_data(channel).unwrap();
            let mut joined = Vec::with_capacity(data_1.len() + data_2.len());
            joined.extend_from_slice(data_1);
            joined.extend_from_slice(data_2);
            payload.push(joined);
        }
        Self { payload }
    }
}

impl<'a> From<SamplesData<'a>> for OwnedSamplesData {
    fn from(value: SamplesData<'a>) -> Self {
        value.as_ref().into()
    }
}
