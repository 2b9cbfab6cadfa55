// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Sample writer implementation for continuous media flows.

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::flow::data::ContinuousFlowData;
use crate::flow::writer::WatcherRegistration;
use crate::flow::{FlowConfigInfo, FlowInfo, FlowRuntimeInfo};
use crate::samples::write_access::SamplesWriteAccess;
use crate::samples::SampleWindow;

/// Writer for continuous audio sample streams.
///
/// Sample windows are opened by the index of their newest sample, filled
/// through [`SamplesWriteAccess`], and committed. Commits advance the head
/// index every time but only wake readers when a sync batch boundary is
/// crossed, which keeps the futex syscall rate low for high-rate audio.
///
/// # Thread Safety
///
/// `SamplesWriter` is `Send` but not `Sync`.
///
/// # Examples
///
/// ```no_run
/// # fn example(mut writer: mxl::SamplesWriter) -> Result<(), mxl::Error> {
/// // 10 ms at 48 kHz, newest sample index 479.
/// let mut access = writer.open_samples(479, 480)?;
/// for ch in 0..access.channels() {
///     let (frag1, frag2) = access.channel_data_mut(ch)?;
///     frag1.fill(0);
///     frag2.fill(0);
/// }
/// access.commit()?;
/// # Ok(())
/// # }
/// ```
pub struct SamplesWriter {
    pub(crate) data: ContinuousFlowData,
    flow_id: Uuid,
    pub(crate) current: Option<OpenSamples>,
    sync_batch_size: u64,
    early_sync_threshold: u64,
    last_sync_batch: u64,
    _registration: Option<WatcherRegistration>,
}

/// State of the sample range currently open for writing.
pub(crate) struct OpenSamples {
    pub(crate) index: u64,
    pub(crate) window: SampleWindow,
}

impl SamplesWriter {
    pub(crate) fn new(
        data: ContinuousFlowData,
        flow_id: Uuid,
        registration: Option<WatcherRegistration>,
    ) -> Self {
        let common = data.header().info().config.common;
        let commit_batch = common.max_commit_batch_size_hint.max(1) as u64;
        let sync_batch = common.max_sync_batch_size_hint.max(1) as u64;
        // Signal slightly before the batch boundary so the next commit does
        // not overshoot a full batch without a wake.
        let early_sync_threshold = sync_batch.saturating_sub(commit_batch);
        Self {
            data,
            flow_id,
            current: None,
            sync_batch_size: sync_batch,
            early_sync_threshold,
            last_sync_batch: 0,
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

    /// Opens the sample range `[index - count + 1, index]` for writing.
    ///
    /// `count` must stay within half the ring; the other half is the
    /// readers' history window and writing into it would race them.
    pub fn open_samples(&mut self, index: u64, count: usize) -> Result<SamplesWriteAccess<'_>> {
        let buffer_length = self.data.buffer_length() as u64;
        let count = count as u64;
        if count == 0 || count > buffer_length / 2 {
            return Err(Error::InvalidArg(format!(
                "sample count {count} must be within 1..={}",
                buffer_length / 2
            )));
        }
        let window = SampleWindow::locate(index, count, buffer_length);
        self.current = Some(OpenSamples { index, window });
        Ok(SamplesWriteAccess::new(self))
    }

    /// `true` while this writer's advisory lock on the flow is exclusive.
    pub fn is_exclusive(&self) -> bool {
        self.data.header().map().segment().is_exclusive()
    }

    /// Non-blocking attempt to upgrade the flow lock from shared to
    /// exclusive.
    pub fn make_exclusive(&mut self) -> Result<bool> {
        self.data.header_mut().map_mut().segment_mut().make_exclusive()
    }

    /// Batch gating for reader wakes: signal when a sync batch boundary is
    /// crossed, or just before it when the next commit would overshoot.
    pub(crate) fn should_signal(&mut self, committed_index: u64) -> bool {
        let batch = committed_index / self.sync_batch_size;
        if batch < self.last_sync_batch {
            return false;
        }
        if batch == self.last_sync_batch {
            if committed_index % self.sync_batch_size > self.early_sync_threshold {
                self.last_sync_batch = batch + 1;
                return true;
            }
            return false;
        }
        self.last_sync_batch = batch;
        true
    }
}
