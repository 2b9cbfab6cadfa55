// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Generic flow reader implementation.
//!
//! Provides [`FlowReader`], a type-erased reader that is converted to either
//! [`crate::GrainReader`] or [`crate::SamplesReader`] based on the flow
//! format.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::flow::data::FlowData;
use crate::flow::{FlowConfigInfo, FlowInfo, FlowRuntimeInfo};
use crate::grain::reader::GrainReader;
use crate::instance::InstanceContext;
use crate::samples::reader::SamplesReader;

/// Generic flow reader handle.
///
/// This is the initial reader type returned by
/// [`crate::MxlInstance::create_flow_reader`]. It must be converted to a
/// typed reader ([`GrainReader`] or [`SamplesReader`]) matching the flow's
/// data format.
///
/// The handle holds a shared advisory lock on the flow, keeping it safe from
/// garbage collection while open.
///
/// # Examples
///
/// ```no_run
/// # fn example(instance: mxl::MxlInstance) -> Result<(), mxl::Error> {
/// let reader = instance.create_flow_reader("5fbec3b1-1b0f-417d-9059-8b94a47197ed")?;
///
/// if reader.get_info()?.config.is_discrete_flow() {
///     let grain_reader = reader.to_grain_reader()?;
///     // Use grain_reader for video/data.
/// } else {
///     let samples_reader = reader.to_samples_reader()?;
///     // Use samples_reader for audio.
/// }
/// # Ok(())
/// # }
/// ```
pub struct FlowReader {
    context: Arc<InstanceContext>,
    flow_id: Uuid,
    inner: FlowData,
}

impl FlowReader {
    pub(crate) fn new(context: Arc<InstanceContext>, flow_id: Uuid, inner: FlowData) -> Self {
        Self {
            context,
            flow_id,
            inner,
        }
    }

    /// The flow this reader is attached to.
    pub fn flow_id(&self) -> Uuid {
        self.flow_id
    }

    /// Retrieves complete flow information (config + runtime).
    pub fn get_info(&self) -> Result<FlowInfo> {
        let header = self.inner.header();
        Ok(FlowInfo {
            config: FlowConfigInfo {
                value: header.info().config,
            },
            runtime: FlowRuntimeInfo {
                value: header.runtime_snapshot(),
            },
        })
    }

    /// Converts this generic reader into a [`GrainReader`] for discrete
    /// flows.
    ///
    /// # Errors
    ///
    /// Returns an error if the flow is continuous (audio).
    pub fn to_grain_reader(self) -> Result<GrainReader> {
        match self.inner {
            FlowData::Discrete(data) => Ok(GrainReader::new(
                data,
                self.flow_id,
                self.context.domain(),
            )),
            FlowData::Continuous(_) => Err(Error::InvalidArg(
                "cannot convert a continuous flow reader to a grain reader".into(),
            )),
        }
    }

    /// Converts this generic reader into a [`SamplesReader`] for continuous
    /// flows.
    ///
    /// # Errors
    ///
    /// Returns an error if the flow is discrete (video/data).
    pub fn to_samples_reader(self) -> Result<SamplesReader> {
        match self.inner {
            FlowData::Continuous(data) => Ok(SamplesReader::new(
                data,
                self.flow_id,
                self.context.domain(),
            )),
            FlowData::Discrete(_) => Err(Error::InvalidArg(
                "cannot convert a discrete flow reader to a samples reader".into(),
            )),
        }
    }
}
