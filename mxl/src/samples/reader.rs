// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Sample reader implementation for continuous media flows.

use std::fs::File;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::warn;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::flow::data::ContinuousFlowData;
use crate::flow::manager::{flow_access_file, flow_directory};
use crate::flow::{FlowConfigInfo, FlowInfo, FlowRuntimeInfo};
use crate::samples::data::SamplesData;
use crate::samples::SampleWindow;
use crate::shmem::touch_fd;
use crate::sync::wait_until_changed;
use crate::time::Deadline;

/// Reader for continuous audio sample streams.
///
/// Provides zero-copy access to multi-channel sample windows addressed by the
/// index of their newest sample. Only the upper half of each channel ring is
/// readable history; the lower half is the writer's exclusion zone.
///
/// # Thread Safety
///
/// `SamplesReader` is `Send` but not `Sync`. Each reader should be used by
/// only one thread at a time, but can be transferred between threads.
///
/// # Examples
///
/// ```no_run
/// # use std::time::Duration;
/// # fn example(reader: mxl::SamplesReader) -> Result<(), mxl::Error> {
/// let head = reader.get_runtime_info()?.head_index();
///
/// // Read 480 samples (10 ms at 48 kHz) ending at the head.
/// let samples = reader.get_samples(head, 480, Duration::from_secs(1))?;
/// println!("Read {} channels", samples.num_of_channels());
/// # Ok(())
/// # }
/// ```
pub struct SamplesReader {
    data: ContinuousFlowData,
    flow_id: Uuid,
    access_file: Option<File>,
}

impl SamplesReader {
    pub(crate) fn new(data: ContinuousFlowData, flow_id: Uuid, domain: &Path) -> Self {
        // May fail on read-only volumes; reads still work without the
        // lastReadTime feedback.
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

    /// Retrieves flow configuration (format, rate, channel geometry).
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

    /// Reads the sample range `[index - count + 1, index]`, blocking until
    /// the writer commits past `index` or the timeout elapses.
    ///
    /// # Errors
    ///
    /// - [`Error::OutOfRangeTooEarly`] if the deadline passes first
    /// - [`Error::OutOfRangeTooLate`] if part of the range left the readable
    ///   half of the ring
    /// - [`Error::FlowInvalid`] if the flow was deleted and recreated
    /// - [`Error::InvalidArg`] for a zero count or one beyond the readable
    ///   half-buffer
    pub fn get_samples(
        &self,
        index: u64,
        count: usize,
        timeout: Duration,
    ) -> Result<SamplesData<'_>> {
        let window = self.wait_window(index, count, Deadline::after(timeout))?;
        self.touch_access();
        Ok(self.window_data(window))
    }

    /// Reads a sample range without blocking.
    pub fn get_samples_non_blocking(&self, index: u64, count: usize) -> Result<SamplesData<'_>> {
        match self.check_window(index, count)? {
            Some(window) => {
                self.touch_access();
                Ok(self.window_data(window))
            }
            None => Err(self.too_early_or_stale()),
        }
    }

    /// Blocks until samples up to `index` are available, without building a
    /// data view.
    pub fn wait_for_samples(&self, index: u64, timeout: Duration) -> Result<()> {
        self.wait_window(index, 1, Deadline::after(timeout)).map(|_| ())
    }

    pub(crate) fn head_index(&self) -> u64 {
        self.data.header().head_index()
    }

    pub(crate) fn rate(&self) -> crate::time::Rational {
        self.data.header().info().config.common.grain_rate
    }

    pub(crate) fn wait_window_at(&self, index: u64, deadline: Deadline) -> Result<()> {
        self.wait_window(index, 1, deadline).map(|_| ())
    }

    fn wait_window(&self, index: u64, count: usize, deadline: Deadline) -> Result<SampleWindow> {
        loop {
            // Load the sync counter before the availability check so a
            // commit racing with the check aborts the wait instead of being
            // missed.
            let sync = self.data.header().sync_counter().load(Ordering::Acquire);
            match self.check_window(index, count)? {
                Some(window) => return Ok(window),
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

    /// One pass of the availability decision: `Ok(Some(_))` when the range is
    /// readable, `Ok(None)` when the caller should wait for the writer.
    fn check_window(&self, index: u64, count: usize) -> Result<Option<SampleWindow>> {
        let buffer_length = self.data.buffer_length() as u64;
        let count = count as u64;
        if count == 0 || count > buffer_length / 2 {
            return Err(Error::InvalidArg(format!(
                "sample count {count} must be within 1..={}",
                buffer_length / 2
            )));
        }

        let head = self.data.header().head_index();
        if index > head {
            return Ok(None);
        }

        // The readable window keeps half a buffer of history behind the
        // head; anything older is the writer's exclusion zone.
        let min_index = head.saturating_sub(buffer_length / 2);
        if index + 1 < count || index + 1 - count < min_index {
            return Err(Error::OutOfRangeTooLate);
        }

        // Never serve bytes from a mapping whose flow was deleted and
        // recreated underneath us.
        if self.data.header().is_stale() {
            return Err(Error::FlowInvalid);
        }
        Ok(Some(SampleWindow::locate(index, count, buffer_length)))
    }

    fn window_data(&self, window: SampleWindow) -> SamplesData<'_> {
        let word = self.data.sample_word_size();
        SamplesData::new(
            self.data.channel_base(),
            self.data.stride(),
            self.data.channel_count() as usize,
            window.start_offset as usize * word,
            window.len1 as usize * word,
            window.len2 as usize * word,
        )
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
