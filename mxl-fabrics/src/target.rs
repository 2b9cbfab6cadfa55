// SPDX-FileCopyrightText: 2025-2026 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! The fabric target: the receiving end of grain transfers.
//!
//! A target owns a local flow writer. Its registered regions are the flow's
//! grain slot mappings, so a remote write lands bytes exactly where a local
//! writer would have put them; the target then replays the commit through
//! the writer path, which advances the head index and wakes local readers of
//! the flow as if the grain had been produced on this host.

use tracing::debug;

use mxl::GrainWriter;

use crate::error::{Error, Result};
use crate::imm_data::ImmDataLayout;
use crate::provider::Provider;
use crate::regions::{Region, Regions};
use crate::target_info::{GrainGeometry, RemoteRegion, TargetInfo};
use crate::transport::IngressEndpoint;

/// Base value for the pseudo remote keys handed out by the TCP provider.
const RKEY_BASE: u64 = 0x524B_0000;

/// Configuration for setting up a target.
pub struct TargetConfig {
    /// The transport provider. The TCP provider is fully functional;
    /// hardware providers report [`Error::NoFabric`].
    pub provider: Provider,
    /// Address to bind the listening endpoint on, e.g. `"127.0.0.1:0"`.
    pub bind_address: String,
    /// Regions to register for remote writes, normally
    /// [`Regions::for_flow_writer`] over `writer`.
    pub regions: Regions,
    /// The local flow writer that owns the destination ring.
    pub writer: GrainWriter,
}

enum State {
    Created,
    Ready(Box<ReadyTarget>),
    Closed,
}

struct ReadyTarget {
    endpoint: IngressEndpoint,
    regions: Vec<Region>,
    writer: GrainWriter,
    imm_layout: ImmDataLayout,
    grain_count: u32,
}

/// The receiving endpoint of grain transfers.
///
/// Lifecycle: `Created` → (setup) → `Ready` → (close/drop) → `Closed`.
/// All network I/O happens inside [`Self::try_new_grain`] /
/// [`Self::wait_for_new_grain`].
///
/// # Examples
///
/// ```no_run
/// # use mxl_fabrics::{Provider, Regions, Target, TargetConfig};
/// # fn example(writer: mxl::GrainWriter) -> Result<(), mxl_fabrics::Error> {
/// let regions = Regions::for_flow_writer(&writer)?;
/// let mut target = Target::new();
/// let info = target.setup(TargetConfig {
///     provider: Provider::Tcp,
///     bind_address: "0.0.0.0:0".into(),
///     regions,
///     writer,
/// })?;
/// // Hand `info.to_string()` to the initiator out of band, then poll:
/// loop {
///     if let Some(index) = target.try_new_grain()? {
///         println!("received grain {index}");
///     }
/// }
/// # }
/// ```
pub struct Target {
    state: State,
}

impl Target {
    /// Creates a target in the `Created` state.
    pub fn new() -> Self {
        Self {
            state: State::Created,
        }
    }

    /// Opens the listening endpoint, registers the regions for remote write
    /// access and exports the descriptor initiators connect with.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if the target was already set up
    /// - [`Error::NoFabric`] for providers without a usable transport here
    pub fn setup(&mut self, config: TargetConfig) -> Result<TargetInfo> {
        if !matches!(self.state, State::Created) {
            return Err(Error::InvalidState("target is already set up".into()));
        }
        match config.provider {
            Provider::Tcp | Provider::Auto => {}
            other => {
                return Err(Error::NoFabric(format!(
                    "provider {other} is not available in this build"
                )));
            }
        }

        let (endpoint, address) = IngressEndpoint::bind(&config.bind_address)?;
        let regions = config.regions.into_vec();
        let writer = config.writer;

        let grain_count = writer.slot_count();
        let slot0 = writer.slot_grain_info(0)?;
        let geometry = GrainGeometry {
            grain_count,
            grain_size: slot0.grain_size,
            total_slices: slot0.total_slices,
        };
        let imm_layout = ImmDataLayout::for_grain_count(grain_count);

        // Offset addressing: every remote address is zero-based within its
        // region, and the pseudo rkey encodes the region ordinal.
        let remote_regions = regions
            .iter()
            .enumerate()
            .map(|(ordinal, region)| RemoteRegion {
                rkey: RKEY_BASE + ordinal as u64,
                addr: 0,
                len: region.len as u64,
                location: region.location,
            })
            .collect();

        let info = TargetInfo {
            provider: Provider::Tcp,
            address,
            regions: remote_regions,
            geometry,
            imm_layout,
        };
        debug!("target listening on {}", info.address);

        self.state = State::Ready(Box::new(ReadyTarget {
            endpoint,
            regions,
            writer,
            imm_layout,
            grain_count,
        }));
        Ok(info)
    }

    /// Non-blocking poll of the completion queue.
    ///
    /// Returns `Ok(Some(index))` when a grain finished arriving: the slot
    /// named by the completion's immediate data has been re-committed
    /// through the local flow writer and local readers are awake.
    /// `Ok(None)` means no completion was pending.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] before setup, or for a completion without
    ///   immediate data
    /// - [`Error::Internal`] for a corrupt immediate word
    pub fn try_new_grain(&mut self) -> Result<Option<u64>> {
        let ready = match &mut self.state {
            State::Ready(ready) => ready,
            State::Created => {
                return Err(Error::InvalidState("target is not set up".into()));
            }
            State::Closed => {
                return Err(Error::InvalidState("target is closed".into()));
            }
        };

        ready.endpoint.poll(&ready.regions)?;
        let Some(completion) = ready.endpoint.next_completion() else {
            return Ok(None);
        };
        let Some(imm) = completion.imm else {
            return Err(Error::InvalidState(
                "received a completion without immediate data".into(),
            ));
        };

        let (slot, _slice) = ready.imm_layout.unpack(imm);
        if slot >= ready.grain_count {
            return Err(Error::Internal(format!(
                "immediate data names slot {slot} outside the {}-slot ring",
                ready.grain_count
            )));
        }

        // The initiator's write delivered the slot verbatim, grain header
        // included; read the DMA'd metadata, then replay the commit through
        // the writer path so the head index and futex word advance normally.
        let dma = ready.writer.slot_grain_info(slot)?;
        let mut access = ready.writer.open_grain(dma.index)?;
        access.set_flags(dma.flags);
        access.set_grain_size(dma.grain_size)?;
        access.set_total_slices(dma.total_slices)?;
        access.commit(dma.valid_slices)?;
        debug!("target committed grain {} from slot {slot}", dma.index);
        Ok(Some(dma.index))
    }

    /// Blocking variant of [`Self::try_new_grain`] with a millisecond
    /// timeout.
    ///
    /// # Errors
    ///
    /// [`Error::NotReady`] when the timeout elapses without a completion.
    pub fn wait_for_new_grain(&mut self, timeout_ms: u64) -> Result<u64> {
        let deadline = std::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
        loop {
            if let Some(index) = self.try_new_grain()? {
                return Ok(index);
            }
            if std::time::Instant::now() >= deadline {
                return Err(Error::NotReady);
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    /// Releases the endpoint and the owned flow writer.
    pub fn close(&mut self) {
        self.state = State::Closed;
    }
}

impl Default for Target {
    fn default() -> Self {
        Self::new()
    }
}
