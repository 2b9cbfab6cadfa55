// SPDX-FileCopyrightText: 2025-2026 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! # MXL Fabrics - remote memory access for media exchange
//!
//! Extends the MXL shared-memory flow abstraction across hosts: an
//! *initiator* replicates locally readable grains into the flow ring of one
//! or more remote *targets* with RDMA-style one-sided writes, each completed
//! write carrying the destination ring slot as immediate data. On the
//! target, a received grain is re-committed through the ordinary flow writer
//! path, so local readers of the target's flow cannot tell remote grains
//! from local ones.
//!
//! ## Roles
//!
//! 1. **Target** (receiver): owns a local flow writer, registers the flow's
//!    grain slots as remotely writable regions, exports a [`TargetInfo`]
//!    descriptor, and surfaces arriving grains via
//!    [`Target::try_new_grain`] / [`Target::wait_for_new_grain`].
//! 2. **Initiator** (sender): registers a local flow reader's grain slots as
//!    source regions, connects to targets from their descriptors, and queues
//!    one write per grain and target with [`Initiator::transfer_grain`].
//!    All network I/O happens in [`Initiator::make_progress_non_blocking`] /
//!    [`Initiator::make_progress_blocking`], giving the caller explicit
//!    scheduling control.
//!
//! The [`TargetInfo`] descriptor travels out of band (a control channel, a
//! config file) as base64 text and round-trips losslessly.
//!
//! ## Providers
//!
//! Transport selection is by [`Provider`]. This build ships the `tcp`
//! provider (RDMA-write emulation over sockets, offset addressing), which is
//! also the loopback test vehicle; `verbs`, `efa` and `shm` parse and
//! serialize but report [`Error::NoFabric`] at setup.

mod address;
mod error;
mod imm_data;
mod initiator;
mod instance;
mod provider;
mod regions;
mod target;
mod target_info;
mod transport;

pub use address::EndpointAddress;
pub use error::{Error, Result, Status};
pub use imm_data::ImmDataLayout;
pub use initiator::{Initiator, InitiatorConfig, Progress};
pub use instance::FabricsInstance;
pub use provider::Provider;
pub use regions::{MemoryLocation, Region, Regions};
pub use target::{Target, TargetConfig};
pub use target_info::{GrainGeometry, RemoteRegion, TargetInfo};
