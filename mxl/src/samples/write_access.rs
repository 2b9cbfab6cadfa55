// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! RAII sample write access for safe zero-copy audio writing.

use crate::error::{Error, Result};
use crate::samples::writer::SamplesWriter;

/// RAII-protected audio sample writing session.
///
/// Provides mutable access to the open sample range in every channel. Data
/// may be split into two fragments per channel when the range wraps the ring.
/// Dropping the session without committing discards the range, so the flow
/// stays consistent across early returns and panics.
///
/// # Examples
///
/// ```no_run
/// # fn example(mut writer: mxl::SamplesWriter) -> Result<(), mxl::Error> {
/// let mut access = writer.open_samples(1919, 1920)?;
/// for ch in 0..access.channels() {
///     let (frag1, frag2) = access.channel_data_mut(ch)?;
///     frag1.fill(0x42);
///     frag2.fill(0x42);
/// }
/// access.commit()?;
/// # Ok(())
/// # }
/// ```
pub struct SamplesWriteAccess<'a> {
    writer: &'a mut SamplesWriter,
    finished: bool,
}

impl<'a> SamplesWriteAccess<'a> {
    pub(crate) fn new(writer: &'a mut SamplesWriter) -> Self {
        Self {
            writer,
            finished: false,
        }
    }

    /// Returns the number of audio channels.
    pub fn channels(&self) -> usize {
        self.writer.data.channel_count() as usize
    }

    /// Newest sample index of the open range.
    pub fn index(&self) -> u64 {
        self.writer.current.as_ref().expect("open samples").index
    }

    /// Returns mutable access to one channel's fragments of the open range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArg`] if `channel >= channels()`.
    pub fn channel_data_mut(&mut self, channel: usize) -> Result<(&mut [u8], &mut [u8])> {
        if channel >= self.channels() {
            return Err(Error::InvalidArg(format!(
                "channel {channel} out of range ({} channels)",
                self.channels()
            )));
        }
        let window = self.writer.current.as_ref().expect("open samples").window;
        let word = self.writer.data.sample_word_size();
        let stride = self.writer.data.stride();
        // Safety: the open window stays inside one channel ring and this
        // session has exclusive write access to the writer half of the ring.
        unsafe {
            let channel_base = self.writer.data.channel_base().add(channel * stride);
            Ok((
                std::slice::from_raw_parts_mut(
                    channel_base.add(window.start_offset as usize * word),
                    window.len1 as usize * word,
                ),
                std::slice::from_raw_parts_mut(channel_base, window.len2 as usize * word),
            ))
        }
    }

    /// Commits the open range, making it visible to readers.
    ///
    /// The head index always advances; parked readers are only woken when a
    /// sync batch boundary is crossed (see the flow's batch size hints).
    pub fn commit(mut self) -> Result<()> {
        let open = self
            .writer
            .current
            .take()
            .ok_or(Error::InvalidFlowWriter)?;
        self.finished = true;

        // Sample bytes were written by the caller; publish in order: head
        // index (release), then the batched sync counter wake.
        let signal = self.writer.should_signal(open.index);
        let header = self.writer.data.header();
        header.advance_head_index(open.index);
        header.stamp_last_write();
        if signal {
            header.signal();
        }
        Ok(())
    }

    /// Cancels the sample write without advancing the head index or waking
    /// readers.
    pub fn cancel(mut self) {
        self.finished = true;
        self.writer.current = None;
    }
}

impl Drop for SamplesWriteAccess<'_> {
    /// Discards the open range if the session was neither committed nor
    /// canceled.
    fn drop(&mut self) {
        if !self.finished {
            self.writer.current = None;
        }
    }
}
