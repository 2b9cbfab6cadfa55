// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Generic flow writer implementation.
//!
//! Provides [`FlowWriter`], a type-erased writer converted to either
//! [`crate::GrainWriter`] or [`crate::SamplesWriter`] based on the flow
//! format, and [`FlowOptions`], the creation parameters the NMOS definition
//! does not carry.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::flow::data::FlowData;
use crate::grain::writer::GrainWriter;
use crate::instance::InstanceContext;
use crate::samples::writer::SamplesWriter;

/// Ring sizing and signalling parameters for flow creation.
///
/// The NMOS flow definition describes the media; these options describe the
/// transport ring built for it. Defaults match a low-latency video setup and
/// a per-commit wake for audio.
#[derive(Debug, Clone)]
pub struct FlowOptions {
    /// Number of grain slots in a discrete ring.
    pub grain_count: u32,
    /// Per-channel ring length in samples for continuous flows. Defaults to
    /// one second at the flow's sample rate.
    pub buffer_length: Option<u32>,
    /// Largest sample batch the writer commits at once.
    pub max_commit_batch_size_hint: u32,
    /// Largest sample batch at which readers are woken. Must be a non-zero
    /// multiple of the commit batch hint.
    pub max_sync_batch_size_hint: u32,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            grain_count: 16,
            buffer_length: None,
            max_commit_batch_size_hint: 1,
            max_sync_batch_size_hint: 1,
        }
    }
}

/// Keeps a flow registered with the domain watcher for as long as some
/// writer handle is alive; deregisters on drop.
pub(crate) struct WatcherRegistration {
    context: Arc<InstanceContext>,
    flow_id: Uuid,
}

impl WatcherRegistration {
    pub(crate) fn new(context: Arc<InstanceContext>, flow_id: Uuid) -> Option<Self> {
        match context.add_watch(&flow_id) {
            Ok(()) => Some(Self { context, flow_id }),
            Err(e) => {
                debug!("flow {} not registered with domain watcher: {e}", flow_id);
                None
            }
        }
    }
}

impl Drop for WatcherRegistration {
    fn drop(&mut self) {
        self.context.remove_watch(&self.flow_id);
    }
}

/// Generic flow writer handle.
///
/// Returned by [`crate::MxlInstance::create_flow_writer`]; convert it into a
/// [`GrainWriter`] or [`SamplesWriter`] matching the flow's format.
///
/// The writer holds a shared advisory lock on the flow (upgradable to
/// exclusive through the typed writers) and keeps the flow registered with
/// the domain watcher so `lastReadTime` reflects reader activity.
///
/// # Examples
///
/// ```no_run
/// # fn example(instance: mxl::MxlInstance, flow_def: &str) -> Result<(), mxl::Error> {
/// let (writer, info, was_created) = instance.create_flow_writer(flow_def, None)?;
/// if was_created {
///     println!("created new flow");
/// }
///
/// if info.is_discrete_flow() {
///     let grain_writer = writer.to_grain_writer()?;
///     // Produce grains.
/// } else {
///     let samples_writer = writer.to_samples_writer()?;
///     // Produce samples.
/// }
/// # Ok(())
/// # }
/// ```
pub struct FlowWriter {
    flow_id: Uuid,
    inner: FlowData,
    was_created: bool,
    registration: Option<WatcherRegistration>,
}

impl FlowWriter {
    pub(crate) fn new(
        flow_id: Uuid,
        inner: FlowData,
        was_created: bool,
        registration: Option<WatcherRegistration>,
    ) -> Self {
        Self {
            flow_id,
            inner,
            was_created,
            registration,
        }
    }

    /// The flow this writer produces into.
    pub fn flow_id(&self) -> Uuid {
        self.flow_id
    }

    /// `true` if creating this writer created the flow, `false` if an
    /// existing flow was opened.
    pub fn was_created(&self) -> bool {
        self.was_created
    }

    /// Converts this generic writer into a [`GrainWriter`] for discrete
    /// flows.
    ///
    /// # Errors
    ///
    /// Returns an error if the flow is continuous (audio).
    pub fn to_grain_writer(self) -> Result<GrainWriter> {
        match self.inner {
            FlowData::Discrete(data) => {
                Ok(GrainWriter::new(data, self.flow_id, self.registration))
            }
            FlowData::Continuous(_) => Err(Error::InvalidArg(
                "cannot convert a continuous flow writer to a grain writer".into(),
            )),
        }
    }

    /// Converts this generic writer into a [`SamplesWriter`] for continuous
    /// flows.
    ///
    /// # Errors
    ///
    /// Returns an error if the flow is discrete (video/data).
    pub fn to_samples_writer(self) -> Result<SamplesWriter> {
        match self.inner {
            FlowData::Continuous(data) => {
                Ok(SamplesWriter::new(data, self.flow_id, self.registration))
            }
            FlowData::Discrete(_) => Err(Error::InvalidArg(
                "cannot convert a discrete flow writer to a samples writer".into(),
            )),
        }
    }
}
