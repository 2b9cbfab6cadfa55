// SPDX-FileCopyrightText: 2025-2026 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! The fabric initiator: the sending end of grain transfers.
//!
//! Every mutating call ([`Initiator::add_target`],
//! [`Initiator::remove_target`], [`Initiator::transfer_grain`]) is a pure
//! state update; connection handshakes, writes and shutdowns only happen
//! inside [`Initiator::make_progress_non_blocking`] and its blocking
//! variant. This keeps network scheduling entirely in the caller's hands.

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::provider::Provider;
use crate::regions::{Region, Regions};
use crate::target_info::TargetInfo;
use crate::transport::EgressConnection;

/// Configuration for setting up an initiator.
pub struct InitiatorConfig {
    /// The transport provider. The TCP provider is fully functional;
    /// hardware providers report [`Error::NoFabric`].
    pub provider: Provider,
    /// Local source regions, normally [`Regions::for_flow_reader`] over the
    /// reader whose grains will be transferred. The backing flow handle must
    /// outlive the initiator.
    pub regions: Regions,
}

/// Result of one progress cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Nothing is pending: all connections are settled and all queued
    /// writes have drained.
    Complete,
    /// There is still work to be done; call progress again.
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Added,
    Connecting,
    Connected,
    Removing,
    Removed,
}

struct TargetEntry {
    info: TargetInfo,
    state: ConnState,
    conn: Option<EgressConnection>,
}

struct Inner {
    regions: Vec<Region>,
    targets: Vec<TargetEntry>,
}

/// The sending endpoint of grain transfers.
///
/// Per-target lifecycle: `Added` → `Connecting` → `Connected` → `Removing`
/// → `Removed`, driven exclusively by progress calls.
///
/// # Examples
///
/// ```no_run
/// # use mxl_fabrics::{Initiator, InitiatorConfig, Progress, Provider, Regions, TargetInfo};
/// # fn example(reader: mxl::GrainReader, descriptor: &str) -> Result<(), mxl_fabrics::Error> {
/// let mut initiator = Initiator::new();
/// initiator.setup(InitiatorConfig {
///     provider: Provider::Tcp,
///     regions: Regions::for_flow_reader(&reader)?,
/// })?;
///
/// let info: TargetInfo = descriptor.parse()?;
/// initiator.add_target(&info)?;
/// while initiator.make_progress_non_blocking()? == Progress::Pending {}
///
/// initiator.transfer_grain(42)?;
/// initiator.make_progress_blocking(100)?;
/// # Ok(())
/// # }
/// ```
pub struct Initiator {
    inner: Option<Inner>,
}

impl Initiator {
    /// Creates an initiator; [`Self::setup`] must run before anything else.
    pub fn new() -> Self {
        Self { inner: None }
    }

    /// Registers the local source regions and selects the provider. No
    /// connections are made here.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if already set up
    /// - [`Error::NoFabric`] for providers without a usable transport here
    pub fn setup(&mut self, config: InitiatorConfig) -> Result<()> {
        if self.inner.is_some() {
            return Err(Error::InvalidState("initiator is already set up".into()));
        }
        match config.provider {
            Provider::Tcp | Provider::Auto => {}
            other => {
                return Err(Error::NoFabric(format!(
                    "provider {other} is not available in this build"
                )));
            }
        }
        self.inner = Some(Inner {
            regions: config.regions.into_vec(),
            targets: Vec::new(),
        });
        Ok(())
    }

    /// Registers a target for future transfers. Always non-blocking; the
    /// connection is established during subsequent progress calls.
    ///
    /// Duplicate adds of the same target address are permitted and collapse
    /// into one logical connection.
    pub fn add_target(&mut self, info: &TargetInfo) -> Result<()> {
        let inner = self.inner_mut()?;
        if let Some(entry) = inner
            .targets
            .iter_mut()
            .find(|entry| entry.info.address == info.address)
        {
            if entry.state == ConnState::Removed {
                // A previously removed target may be re-added.
                entry.info = info.clone();
                entry.state = ConnState::Added;
                entry.conn = None;
            }
            return Ok(());
        }
        inner.targets.push(TargetEntry {
            info: info.clone(),
            state: ConnState::Added,
            conn: None,
        });
        Ok(())
    }

    /// Schedules a graceful disconnect. After this returns no further grain
    /// transfers are queued for the target; the connection is fully torn
    /// down once progress stops reporting [`Progress::Pending`].
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the target was never added.
    pub fn remove_target(&mut self, info: &TargetInfo) -> Result<()> {
        let inner = self.inner_mut()?;
        let entry = inner
            .targets
            .iter_mut()
            .find(|entry| entry.info.address == info.address)
            .ok_or(Error::NotFound)?;
        if entry.state != ConnState::Removed {
            entry.state = ConnState::Removing;
        }
        Ok(())
    }

    /// `true` once the target's connection is established.
    pub fn is_connected(&self, info: &TargetInfo) -> bool {
        self.inner
            .as_ref()
            .map(|inner| {
                inner.targets.iter().any(|entry| {
                    entry.info.address == info.address && entry.state == ConnState::Connected
                })
            })
            .unwrap_or(false)
    }

    /// Queues one grain transfer to every connected target.
    ///
    /// The grain's ring slot is replicated verbatim (header and payload) to
    /// the matching remote region, with the slot number packed into the
    /// immediate word. Targets that are not yet connected are skipped, not
    /// queued for.
    pub fn transfer_grain(&mut self, grain_index: u64) -> Result<()> {
        let inner = self.inner_mut()?;
        for entry in &mut inner.targets {
            if entry.state != ConnState::Connected {
                continue;
            }
            let geometry = entry.info.geometry;
            let slot = (grain_index % geometry.grain_count as u64) as u32;
            let local = inner.regions.get(slot as usize).ok_or_else(|| {
                Error::Internal(format!(
                    "no local region for slot {slot} ({} regions registered)",
                    inner.regions.len()
                ))
            })?;
            let remote = entry.info.regions.get(slot as usize).ok_or_else(|| {
                Error::Internal(format!("target advertises no region for slot {slot}"))
            })?;

            let len = (local.len as u64).min(remote.len);
            let imm = entry.info.imm_layout.pack(slot, 0);
            let conn = entry
                .conn
                .as_mut()
                .ok_or_else(|| Error::Internal("connected target without connection".into()))?;
            conn.enqueue_write(slot, remote.addr, local.addr, len as usize, Some(imm));
            debug!(
                "queued grain {grain_index} ({len} bytes) for {}",
                conn.peer()
            );
        }
        Ok(())
    }

    /// Drives all queued work: connection establishment, writes, removals.
    ///
    /// Returns [`Progress::Complete`] when nothing is pending. Transport
    /// failures identify the offending target so the caller can remove it.
    pub fn make_progress_non_blocking(&mut self) -> Result<Progress> {
        let inner = self.inner_mut()?;
        let mut pending = false;

        for entry in &mut inner.targets {
            match entry.state {
                ConnState::Added | ConnState::Connecting => {
                    entry.state = ConnState::Connecting;
                    let peer = entry.info.address.to_socket_addr()?;
                    match EgressConnection::connect(peer) {
                        Ok(conn) => {
                            debug!("connected to target {peer}");
                            entry.conn = Some(conn);
                            entry.state = ConnState::Connected;
                        }
                        Err(e) => {
                            // Keep retrying on subsequent progress calls.
                            warn!("connection to target {peer} not yet up: {e}");
                            pending = true;
                        }
                    }
                }
                ConnState::Connected => {
                    if let Some(conn) = entry.conn.as_mut() {
                        if !conn.progress()? {
                            pending = true;
                        }
                    }
                }
                ConnState::Removing => {
                    let drained = match entry.conn.as_mut() {
                        Some(conn) => {
                            let drained = conn.progress()?;
                            if drained {
                                conn.shutdown();
                            }
                            drained
                        }
                        None => true,
                    };
                    if drained {
                        entry.conn = None;
                        entry.state = ConnState::Removed;
                    } else {
                        pending = true;
                    }
                }
                ConnState::Removed => {}
            }
        }

        Ok(if pending {
            Progress::Pending
        } else {
            Progress::Complete
        })
    }

    /// Blocking variant of [`Self::make_progress_non_blocking`]: drives work
    /// until nothing is pending or the timeout elapses.
    ///
    /// Returns [`Progress::Pending`] if work remains when the timeout hits.
    pub fn make_progress_blocking(&mut self, timeout_ms: u64) -> Result<Progress> {
        let deadline = std::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
        loop {
            match self.make_progress_non_blocking()? {
                Progress::Complete => return Ok(Progress::Complete),
                Progress::Pending => {
                    if std::time::Instant::now() >= deadline {
                        return Ok(Progress::Pending);
                    }
                    std::thread::sleep(std::time::Duration::from_millis(1));
                }
            }
        }
    }

    fn inner_mut(&mut self) -> Result<&mut Inner> {
        self.inner
            .as_mut()
            .ok_or_else(|| Error::InvalidState("initiator is not set up".into()))
    }
}

impl Default for Initiator {
    fn default() -> Self {
        Self::new()
    }
}
