// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Grain-based access to discrete media flows (video frames, data packets).
//!
//! - [`reader::GrainReader`] reads committed grains, optionally blocking
//!   until enough slices are valid.
//! - [`writer::GrainWriter`] opens one grain slot at a time for zero-copy
//!   writing through [`write_access::GrainWriteAccess`].

pub mod data;
pub mod reader;
pub mod write_access;
pub mod writer;
