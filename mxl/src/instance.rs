// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! MXL instance management and core domain operations.
//!
//! This module provides [`MxlInstance`], the main entry point for
//! interacting with an MXL domain: a tmpfs directory holding the shared
//! memory of a set of flows. An instance creates readers and writers,
//! answers timing queries, and garbage-collects abandoned flows.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::flow::data::FlowData;
use crate::flow::flowdef::{FlowDef, FlowDefAudio, FlowDefData, FlowDefDetails, FlowDefVideo};
use crate::flow::layout::{self, MAX_PLANES_PER_GRAIN};
use crate::flow::manager::{ContinuousCreateParams, DiscreteCreateParams, FlowManager};
use crate::flow::reader::FlowReader;
use crate::flow::writer::{FlowOptions, FlowWriter, WatcherRegistration};
use crate::flow::FlowConfigInfo;
use crate::shmem::AccessMode;
use crate::time::{self, Rational, UNDEFINED_INDEX};
use crate::watcher::DomainWatcher;

/// Audio samples are stored as 32-bit float words.
const SAMPLE_WORD_SIZE: usize = 4;

/// Internal shared context for an MXL instance.
///
/// Separated from [`MxlInstance`] so readers and writers can keep the domain
/// services (flow manager, domain watcher) alive independently of the
/// user-facing handle.
pub(crate) struct InstanceContext {
    domain: PathBuf,
    manager: FlowManager,
    watcher: Option<DomainWatcher>,
}

impl InstanceContext {
    pub(crate) fn domain(&self) -> &Path {
        &self.domain
    }

    pub(crate) fn manager(&self) -> &FlowManager {
        &self.manager
    }

    pub(crate) fn add_watch(&self, flow_id: &Uuid) -> Result<()> {
        match &self.watcher {
            Some(watcher) => watcher.add_flow(&self.domain, flow_id),
            None => Err(Error::Unknown("domain watcher unavailable".into())),
        }
    }

    pub(crate) fn remove_watch(&self, flow_id: &Uuid) {
        if let Some(watcher) = &self.watcher {
            watcher.remove_flow(flow_id);
        }
    }
}

/// Main entry point for interacting with an MXL domain.
///
/// An `MxlInstance` binds to a domain directory (typically on tmpfs, e.g.
/// `/dev/shm/mxl_domain`) and provides:
///
/// - Flow reader and writer factories
/// - TAI timing and index conversion
/// - Flow enumeration, deletion and garbage collection
///
/// The instance is cheaply cloneable and thread-safe (`Send + Sync`); the
/// readers and writers it creates are single-threaded handles.
///
/// Creating an instance garbage-collects flows left behind by crashed
/// processes, so a domain heals on the next attach.
///
/// # Examples
///
/// ```no_run
/// # fn main() -> Result<(), mxl::Error> {
/// let instance = mxl::MxlInstance::new("/dev/shm/my_domain", "")?;
/// let tai_ns = instance.get_time();
/// println!("Current TAI: {tai_ns}");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MxlInstance {
    context: Arc<InstanceContext>,
}

impl MxlInstance {
    /// Creates a new MXL instance bound to the specified domain.
    ///
    /// The domain directory must already exist; it is created by deployment
    /// tooling, not by the library. The `options` string is reserved for
    /// domain-level configuration and is currently not interpreted.
    ///
    /// # Errors
    ///
    /// Returns an error if the domain path does not exist or is not a
    /// directory.
    pub fn new(domain: impl AsRef<Path>, options: &str) -> Result<Self> {
        let domain = domain.as_ref();
        let manager = FlowManager::new(domain)?;
        if !options.is_empty() {
            debug!("ignoring unrecognized instance options: {options}");
        }

        let watcher = match DomainWatcher::new() {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("domain watcher disabled: {e}");
                None
            }
        };

        // Collect whatever previous tenants left behind before handing out
        // handles into the domain.
        match manager.garbage_collect() {
            Ok(collected) if !collected.is_empty() => {
                debug!("collected {} stale flows on startup", collected.len());
            }
            Ok(_) => {}
            Err(e) => warn!("startup garbage collection failed: {e}"),
        }

        Ok(Self {
            context: Arc::new(InstanceContext {
                domain: domain.to_path_buf(),
                manager,
                watcher,
            }),
        })
    }

    /// The domain directory this instance is bound to.
    pub fn domain(&self) -> &Path {
        self.context.domain()
    }

    /// Creates a flow reader for an existing flow in the domain.
    ///
    /// The returned [`FlowReader`] is generic; convert it with
    /// [`FlowReader::to_grain_reader`] or [`FlowReader::to_samples_reader`].
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArg`] if `flow_id` is not a UUID
    /// - [`Error::FlowNotFound`] if no such flow exists
    /// - [`Error::FlowInvalid`] if the flow's header does not match the file
    ///   backing it (deleted and recreated)
    pub fn create_flow_reader(&self, flow_id: &str) -> Result<FlowReader> {
        let id = parse_flow_id(flow_id)?;
        let data = self.context.manager().open_flow(&id, AccessMode::ReadOnly)?;
        Ok(FlowReader::new(self.context.clone(), id, data))
    }

    /// Creates a flow writer from a JSON flow definition, creating the flow
    /// if it does not exist yet.
    ///
    /// The definition is stored verbatim alongside the flow; only the `id`,
    /// `format`, rate and geometry fields are interpreted. `options` sizes
    /// the ring ([`FlowOptions`]); `None` uses the defaults.
    ///
    /// # Returns
    ///
    /// The generic writer, the flow configuration, and whether this call
    /// created the flow (`false` means an existing flow was attached to).
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArg`] if the definition does not parse or violates a
    ///   geometry constraint
    /// - [`Error::Conflict`] if the flow exists with a different variant
    pub fn create_flow_writer(
        &self,
        flow_def: &str,
        options: Option<&FlowOptions>,
    ) -> Result<(FlowWriter, FlowConfigInfo, bool)> {
        let def: FlowDef = serde_json::from_str(flow_def)
            .map_err(|e| Error::InvalidArg(format!("unreadable flow definition: {e}")))?;
        let defaults = FlowOptions::default();
        let options = options.unwrap_or(&defaults);

        let manager = self.context.manager();
        let (was_created, data) = match &def.details {
            FlowDefDetails::Video(video) => {
                let params = video_create_params(&def, video, options)?;
                let (created, data) =
                    manager.create_or_open_discrete(&def.id, flow_def, &params)?;
                (created, FlowData::Discrete(data))
            }
            FlowDefDetails::Data(packet) => {
                let params = data_create_params(&def, packet, options)?;
                let (created, data) =
                    manager.create_or_open_discrete(&def.id, flow_def, &params)?;
                (created, FlowData::Discrete(data))
            }
            FlowDefDetails::Audio(audio) => {
                let params = audio_create_params(&def, audio, options)?;
                let (created, data) =
                    manager.create_or_open_continuous(&def.id, flow_def, &params)?;
                (created, FlowData::Continuous(data))
            }
        };

        let config = FlowConfigInfo {
            value: data.header().info().config,
        };
        let registration = WatcherRegistration::new(self.context.clone(), def.id);
        Ok((
            FlowWriter::new(def.id, data, was_created, registration),
            config,
            was_created,
        ))
    }

    /// Retrieves the stored JSON flow definition for an existing flow.
    pub fn get_flow_def(&self, flow_id: &str) -> Result<String> {
        let id = parse_flow_id(flow_id)?;
        self.context.manager().flow_def(&id)
    }

    /// Enumerates the flows currently present in the domain.
    pub fn list_flows(&self) -> Result<Vec<Uuid>> {
        self.context.manager().list_flows()
    }

    /// Deletes a flow directory regardless of lock holders. Live readers of
    /// the deleted flow observe [`Error::FlowInvalid`] once the flow is
    /// recreated.
    pub fn delete_flow(&self, flow_id: &str) -> Result<()> {
        let id = parse_flow_id(flow_id)?;
        self.context.manager().delete_flow(&id)
    }

    /// Removes every flow no process holds open and returns their IDs.
    pub fn garbage_collect(&self) -> Result<Vec<Uuid>> {
        self.context.manager().garbage_collect()
    }

    /// Returns the current TAI time in nanoseconds since the SMPTE ST 2059
    /// epoch. See [`time::current_tai_time`] for the emulation caveat on
    /// systems without a TAI clock.
    pub fn get_time(&self) -> u64 {
        time::current_tai_time()
    }

    /// Returns the media index current at this instant for the given rate.
    pub fn get_current_index(&self, rate: &Rational) -> u64 {
        time::current_index(rate)
    }

    /// Converts a TAI timestamp to a media index.
    ///
    /// # Errors
    ///
    /// Returns an error for a rate with zero terms.
    pub fn timestamp_to_index(&self, timestamp: u64, rate: &Rational) -> Result<u64> {
        let index = time::timestamp_to_index(rate, timestamp);
        if index == UNDEFINED_INDEX {
            return Err(Error::InvalidArg(format!("invalid rate {rate}")));
        }
        Ok(index)
    }

    /// Converts a media index to a TAI timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error for a rate with zero terms.
    pub fn index_to_timestamp(&self, index: u64, rate: &Rational) -> Result<u64> {
        let timestamp = time::index_to_timestamp(rate, index);
        if timestamp == UNDEFINED_INDEX {
            return Err(Error::InvalidArg(format!("invalid rate {rate}")));
        }
        Ok(timestamp)
    }

    /// Calculates the duration until `index` becomes current, for pacing
    /// writers.
    pub fn get_duration_until_index(
        &self,
        index: u64,
        rate: &Rational,
    ) -> Result<std::time::Duration> {
        let ns = time::ns_until_index(index, rate);
        if ns == UNDEFINED_INDEX {
            return Err(Error::InvalidArg(format!("invalid rate {rate}")));
        }
        Ok(std::time::Duration::from_nanos(ns))
    }

    /// Sleeps for the specified duration on the monotonic clock.
    pub fn sleep_for(&self, duration: std::time::Duration) {
        time::sleep_for(duration);
    }
}

fn parse_flow_id(flow_id: &str) -> Result<Uuid> {
    Uuid::parse_str(flow_id)
        .map_err(|_| Error::InvalidArg(format!("flow id {flow_id:?} is not a UUID")))
}

fn video_create_params(
    def: &FlowDef,
    video: &FlowDefVideo,
    options: &FlowOptions,
) -> Result<DiscreteCreateParams> {
    if video.frame_width <= 0 || video.frame_height <= 0 {
        return Err(Error::InvalidArg(format!(
            "invalid frame geometry {}x{}",
            video.frame_width, video.frame_height
        )));
    }
    if video.components.is_empty() {
        return Err(Error::InvalidArg(
            "video flow definition carries no components".into(),
        ));
    }
    if video.components.len() > MAX_PLANES_PER_GRAIN {
        return Err(Error::InvalidArg(format!(
            "{} components exceed the limit of {MAX_PLANES_PER_GRAIN} planes",
            video.components.len()
        )));
    }
    let total_slices = u16::try_from(video.frame_height)
        .map_err(|_| Error::InvalidArg("frame height exceeds the slice counter range".into()))?;

    // One slice is one scan line; each plane contributes its own line size.
    let mut slice_sizes = [0u32; MAX_PLANES_PER_GRAIN];
    let mut payload = 0usize;
    for (plane, component) in video.components.iter().enumerate() {
        if component.width <= 0 || component.height <= 0 || component.bit_depth == 0 {
            return Err(Error::InvalidArg(format!(
                "invalid component {:?}",
                component.name
            )));
        }
        let line_bytes = (component.width as usize * component.bit_depth as usize).div_ceil(8);
        slice_sizes[plane] = line_bytes as u32;
        payload += line_bytes * component.height as usize;
    }

    Ok(DiscreteCreateParams {
        format: layout::DATA_FORMAT_VIDEO,
        grain_rate: def.rate(),
        grain_count: options.grain_count,
        grain_payload_size: payload,
        total_slices,
        slice_sizes,
        max_commit_batch_size_hint: options.max_commit_batch_size_hint,
        max_sync_batch_size_hint: options.max_sync_batch_size_hint,
    })
}

fn data_create_params(
    def: &FlowDef,
    packet: &FlowDefData,
    options: &FlowOptions,
) -> Result<DiscreteCreateParams> {
    // Data grains publish slice-per-byte, so the payload is capped by the
    // 16-bit slice counter.
    let total_slices = u16::try_from(packet.max_payload_size).map_err(|_| {
        Error::InvalidArg(format!(
            "data payload size {} exceeds the slice counter range",
            packet.max_payload_size
        ))
    })?;
    if total_slices == 0 {
        return Err(Error::InvalidArg("data payload size must be non-zero".into()));
    }
    let mut slice_sizes = [0u32; MAX_PLANES_PER_GRAIN];
    slice_sizes[0] = 1;

    Ok(DiscreteCreateParams {
        format: layout::DATA_FORMAT_DATA,
        grain_rate: def.rate(),
        grain_count: options.grain_count,
        grain_payload_size: packet.max_payload_size as usize,
        total_slices,
        slice_sizes,
        max_commit_batch_size_hint: options.max_commit_batch_size_hint,
        max_sync_batch_size_hint: options.max_sync_batch_size_hint,
    })
}

fn audio_create_params(
    def: &FlowDef,
    audio: &FlowDefAudio,
    options: &FlowOptions,
) -> Result<ContinuousCreateParams> {
    if audio.channel_count <= 0 {
        return Err(Error::InvalidArg(format!(
            "invalid channel count {}",
            audio.channel_count
        )));
    }
    let rate = def.rate();
    if !rate.is_valid() {
        return Err(Error::InvalidArg(format!("invalid sample rate {rate}")));
    }
    // Default ring: one second of samples per channel.
    let buffer_length = options.buffer_length.unwrap_or_else(|| {
        ((rate.numerator + rate.denominator - 1) / rate.denominator) as u32
    });

    Ok(ContinuousCreateParams {
        sample_rate: rate,
        channel_count: audio.channel_count as u32,
        sample_word_size: SAMPLE_WORD_SIZE,
        buffer_length,
        max_commit_batch_size_hint: options.max_commit_batch_size_hint,
        max_sync_batch_size_hint: options.max_sync_batch_size_hint,
    })
}
