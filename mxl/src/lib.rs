// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! # MXL - Media eXchange Layer
//!
//! Zero-copy inter-process media exchange for broadcast and live production:
//! video frames, audio samples and ancillary data move between processes
//! through memory-mapped ring buffers on a shared tmpfs directory.
//!
//! ## Overview
//!
//! Producers ("writers") and consumers ("readers") on the same host attach
//! to a *domain*, a directory holding one subdirectory per *flow*. A flow is
//! either discrete (a ring of grain slots for video frames or data packets)
//! or continuous (per-channel sample rings for audio). Writers publish by
//! advancing a monotonic head index and bumping a futex word; readers park
//! on that word, so waiting costs nothing until data actually arrives.
//!
//! ### Key Concepts
//!
//! - **Domain**: a tmpfs directory containing the shared memory of a set of
//!   flows
//! - **Instance**: a connection to a domain ([`MxlInstance`])
//! - **Flow**: a unidirectional media ring, discrete or continuous
//! - **Grain**: a discrete media unit (frame, packet) accessed via
//!   [`GrainReader`] / [`GrainWriter`]
//! - **Slice**: the smallest independently publishable part of a grain (a
//!   scan line for video); readers can consume a frame before it is complete
//! - **Samples**: continuous audio accessed via [`SamplesReader`] /
//!   [`SamplesWriter`]
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐
//! │ MxlInstance │  (bound to a domain)
//! └──────┬──────┘
//!        │
//!        ├─► FlowWriter ──► GrainWriter    (video/data)
//!        │              └─► SamplesWriter  (audio)
//!        │
//!        └─► FlowReader ──► GrainReader    (video/data)
//!                       └─► SamplesReader  (audio)
//! ```
//!
//! ## Examples
//!
//! ### Writing video grains
//!
//! ```no_run
//! use mxl::MxlInstance;
//!
//! # fn main() -> Result<(), mxl::Error> {
//! let instance = MxlInstance::new("/dev/shm/my_domain", "")?;
//!
//! let flow_def = std::fs::read_to_string("flow.json").unwrap();
//! let (writer, info, _) = instance.create_flow_writer(&flow_def, None)?;
//! let mut grain_writer = writer.to_grain_writer()?;
//!
//! let rate = info.common().grain_rate()?;
//! let index = instance.get_current_index(&rate);
//! let mut access = grain_writer.open_grain(index)?;
//! access.payload_mut().fill(42);
//! let total = access.total_slices();
//! access.commit(total)?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Reading audio samples
//!
//! ```no_run
//! use mxl::MxlInstance;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), mxl::Error> {
//! let instance = MxlInstance::new("/dev/shm/my_domain", "")?;
//!
//! let reader = instance.create_flow_reader("1c956ba4-e437-4d2a-a2a1-a8cbca3ddbf1")?;
//! let samples_reader = reader.to_samples_reader()?;
//!
//! // Read 480 samples (10 ms at 48 kHz) with a 5 second budget.
//! let head = samples_reader.get_runtime_info()?.head_index();
//! let samples = samples_reader.get_samples(head, 480, Duration::from_secs(5))?;
//!
//! for ch in 0..samples.num_of_channels() {
//!     let (fragment1, fragment2) = samples.channel_data(ch)?;
//!     println!("Channel {}: {} + {} bytes", ch, fragment1.len(), fragment2.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Timing and Synchronization
//!
//! MXL timestamps media in TAI nanoseconds since the SMPTE ST 2059 epoch:
//!
//! - [`MxlInstance::get_time`] returns the current TAI time
//! - [`MxlInstance::index_to_timestamp`] / [`MxlInstance::timestamp_to_index`]
//!   convert between indices and timestamps exactly (rational edit rates)
//! - [`FlowSynchronizationGroup`] joins multiple flows on a common origin
//!   timestamp, adaptively visiting the slowest flow first
//!
//! ## Thread Safety
//!
//! - [`MxlInstance`] is `Send + Sync` and can be shared across threads
//! - Readers and writers are `Send` but not `Sync`; give each thread its own
//!   handle (multiple handles on the same flow are fine, also across
//!   processes)

mod error;
pub mod flow;
pub mod grain;
mod instance;
pub mod samples;
mod shmem;
mod sync;
mod sync_group;
pub mod time;
mod watcher;

pub use error::{Error, Result, Status};
pub use flow::{reader::FlowReader, writer::FlowOptions, writer::FlowWriter, *};
pub use grain::{
    data::*, reader::GrainReader, write_access::GrainWriteAccess, writer::GrainWriter,
};
pub use instance::MxlInstance;
pub use samples::{
    data::*, reader::SamplesReader, write_access::SamplesWriteAccess, writer::SamplesWriter,
};
pub use sync_group::FlowSynchronizationGroup;
pub use time::{Rational, UNDEFINED_INDEX};
