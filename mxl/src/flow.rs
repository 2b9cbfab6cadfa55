// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Flow types and metadata structures.
//!
//! This module defines data types for working with MXL flows, including:
//! - Flow readers and writers ([`reader`], [`writer`])
//! - Flow definitions and schema ([`flowdef`])
//! - The shared-memory layout ([`layout`]) and its safe wrappers
//!   ([`FlowConfigInfo`], [`FlowRuntimeInfo`])
//! - Media format classification ([`DataFormat`])

pub(crate) mod data;
pub mod flowdef;
pub mod layout;
pub(crate) mod manager;
pub mod reader;
pub mod writer;

use uuid::Uuid;

use crate::time::Rational;
use crate::{Error, Result};

/// Media data format classification for MXL flows.
///
/// Flows are classified as either discrete (grain-based) or continuous
/// (sample-based) depending on the data format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    /// Format not specified or unknown.
    Unspecified,
    /// Video data (discrete, grain-based).
    Video,
    /// Audio data (continuous, sample-based).
    Audio,
    /// Generic data packets such as ancillary data (discrete, grain-based).
    Data,
}

impl From<u32> for DataFormat {
    /// Converts a raw format tag to a [`DataFormat`] enum.
    fn from(value: u32) -> Self {
        match value {
            layout::DATA_FORMAT_VIDEO => DataFormat::Video,
            layout::DATA_FORMAT_AUDIO => DataFormat::Audio,
            layout::DATA_FORMAT_DATA => DataFormat::Data,
            _ => DataFormat::Unspecified,
        }
    }
}

impl DataFormat {
    /// Numeric tag as stored in the flow header.
    pub fn tag(&self) -> u32 {
        match self {
            DataFormat::Unspecified => layout::DATA_FORMAT_UNSPECIFIED,
            DataFormat::Video => layout::DATA_FORMAT_VIDEO,
            DataFormat::Audio => layout::DATA_FORMAT_AUDIO,
            DataFormat::Data => layout::DATA_FORMAT_DATA,
        }
    }

    /// `true` for formats delivered as discrete grains.
    pub fn is_discrete(&self) -> bool {
        layout::is_discrete_data_format(self.tag())
    }
}

/// Complete flow information including configuration and runtime state.
pub struct FlowInfo {
    /// Static flow configuration.
    pub config: FlowConfigInfo,
    /// Dynamic runtime state.
    pub runtime: FlowRuntimeInfo,
}

/// Flow configuration metadata.
///
/// Contains static information about a flow's format, rate, and buffer
/// configuration. This is set when the flow is created and does not change.
pub struct FlowConfigInfo {
    pub(crate) value: layout::FlowConfigInfo,
}

impl FlowConfigInfo {
    /// Returns discrete flow configuration (for video and data flows).
    ///
    /// # Errors
    ///
    /// Returns an error if this flow is continuous (audio).
    pub fn discrete(&self) -> Result<&layout::DiscreteFlowConfigInfo> {
        if !layout::is_discrete_data_format(self.value.common.format) {
            return Err(Error::InvalidArg(format!(
                "flow format is {}, video or data required",
                self.value.common.format
            )));
        }
        // Safety: the format tag selects which union variant the creator
        // initialized; checked just above.
        Ok(unsafe { &self.value.details.discrete })
    }

    /// Returns continuous flow configuration (for audio flows).
    ///
    /// # Errors
    ///
    /// Returns an error if this flow is discrete (video/data).
    pub fn continuous(&self) -> Result<&layout::ContinuousFlowConfigInfo> {
        if layout::is_discrete_data_format(self.value.common.format) {
            return Err(Error::InvalidArg(format!(
                "flow format is {}, audio required",
                self.value.common.format
            )));
        }
        // Safety: format tag checked above.
        Ok(unsafe { &self.value.details.continuous })
    }

    /// Returns the common configuration fields shared by all flow types.
    pub fn common(&self) -> CommonFlowConfigInfo<'_> {
        CommonFlowConfigInfo(&self.value.common)
    }

    /// Returns `true` if this is a discrete (grain-based) flow.
    pub fn is_discrete_flow(&self) -> bool {
        layout::is_discrete_data_format(self.value.common.format)
    }
}

/// Common flow configuration fields shared across all flow types.
pub struct CommonFlowConfigInfo<'a>(&'a layout::CommonFlowConfigInfo);

impl CommonFlowConfigInfo<'_> {
    /// Returns the flow's unique identifier (UUID).
    pub fn id(&self) -> Uuid {
        Uuid::from_bytes(self.0.id)
    }

    /// Returns the media data format of this flow.
    pub fn data_format(&self) -> DataFormat {
        DataFormat::from(self.0.format)
    }

    /// Returns `true` if this is a discrete (grain-based) flow.
    pub fn is_discrete_flow(&self) -> bool {
        layout::is_discrete_data_format(self.0.format)
    }

    /// Returns the rate as a rational number (grain rate or sample rate).
    ///
    /// Use [`Self::grain_rate`] or [`Self::sample_rate`] for type-checked
    /// access.
    pub fn grain_or_sample_rate(&self) -> Rational {
        self.0.grain_rate
    }

    /// Returns the grain rate for discrete flows (video/data).
    ///
    /// # Errors
    ///
    /// Returns an error if this flow is continuous (audio).
    pub fn grain_rate(&self) -> Result<Rational> {
        if !self.is_discrete_flow() {
            return Err(Error::InvalidArg(format!(
                "flow format is {:?}, grain rate is only relevant for discrete flows",
                self.data_format()
            )));
        }
        Ok(self.0.grain_rate)
    }

    /// Returns the sample rate for continuous flows (audio).
    ///
    /// # Errors
    ///
    /// Returns an error if this flow is discrete (video/data).
    pub fn sample_rate(&self) -> Result<Rational> {
        if self.data_format() != DataFormat::Audio {
            return Err(Error::InvalidArg(format!(
                "flow format is {:?}, sample rate is only relevant for continuous flows",
                self.data_format()
            )));
        }
        Ok(self.0.grain_rate)
    }

    /// Returns the maximum commit batch size hint from the writer.
    ///
    /// For continuous flows, writers indicate their preferred batch size so
    /// readers can match the writer's pacing.
    pub fn max_commit_batch_size_hint(&self) -> u32 {
        self.0.max_commit_batch_size_hint
    }

    /// Returns the maximum synchronization batch size hint.
    pub fn max_sync_batch_size_hint(&self) -> u32 {
        self.0.max_sync_batch_size_hint
    }

    /// Returns the payload storage location tag (host or device memory).
    pub fn payload_location(&self) -> u32 {
        self.0.payload_location
    }

    /// Returns the device index for device-backed flows, -1 for host memory.
    pub fn device_index(&self) -> i32 {
        self.0.device_index
    }
}

/// Dynamic runtime information about a flow.
///
/// A snapshot of the state that changes as data is written and read.
pub struct FlowRuntimeInfo {
    pub(crate) value: layout::FlowRuntimeInfo,
}

impl FlowRuntimeInfo {
    /// Returns the current head index of the flow: the highest index for
    /// which a commit has completed.
    pub fn head_index(&self) -> u64 {
        self.value.head_index
    }

    /// Returns the TAI timestamp of the last write operation (nanoseconds).
    pub fn last_write_time(&self) -> u64 {
        self.value.last_write_time
    }

    /// Returns the TAI timestamp of the last read operation (nanoseconds).
    pub fn last_read_time(&self) -> u64 {
        self.value.last_read_time
    }
}
