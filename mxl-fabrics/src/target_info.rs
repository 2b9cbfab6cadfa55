// SPDX-FileCopyrightText: 2025-2026 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! The serialized descriptor an initiator needs to address a target.
//!
//! A [`TargetInfo`] bundles the target's fabric address, one remote key and
//! remote address per registered region, the grain geometry (so the
//! initiator can slice its writes), the immediate-data bit partition, and
//! the provider tag. It round-trips through a length-prefixed little-endian
//! binary form wrapped in base64 for out-of-band exchange.

use std::str::FromStr;

use base64::Engine as _;

use crate::address::EndpointAddress;
use crate::error::{Error, Result};
use crate::imm_data::ImmDataLayout;
use crate::provider::Provider;
use crate::regions::MemoryLocation;

const TARGET_INFO_MAGIC: u32 = 0x4D58_5449; // "MXTI"
const TARGET_INFO_VERSION: u32 = 1;

/// A remote memory region an initiator may write to.
///
/// `addr` is either the target's virtual address (virtual addressing mode)
/// or a zero-based offset into the region (offset mode); which one is in
/// force is a property of the provider and fixed at setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteRegion {
    /// Remote protection key granting write access to the region.
    pub rkey: u64,
    /// Remote virtual address or zero-based offset.
    pub addr: u64,
    /// Region length in bytes.
    pub len: u64,
    /// Physical location of the memory on the target.
    pub location: MemoryLocation,
}

/// Grain ring geometry of the target's flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrainGeometry {
    pub grain_count: u32,
    pub grain_size: u32,
    pub total_slices: u16,
}

/// Everything an initiator needs to contact one target.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetInfo {
    pub provider: Provider,
    pub address: EndpointAddress,
    pub regions: Vec<RemoteRegion>,
    pub geometry: GrainGeometry,
    pub imm_layout: ImmDataLayout,
}

impl TargetInfo {
    /// Serializes into the canonical binary form.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.regions.len() * 32);
        out.extend_from_slice(&TARGET_INFO_MAGIC.to_le_bytes());
        out.extend_from_slice(&TARGET_INFO_VERSION.to_le_bytes());
        out.extend_from_slice(&self.provider.tag().to_le_bytes());
        let address = self.address.as_bytes();
        out.extend_from_slice(&(address.len() as u16).to_le_bytes());
        out.extend_from_slice(address);
        out.extend_from_slice(&(self.regions.len() as u32).to_le_bytes());
        for region in &self.regions {
            out.extend_from_slice(&region.rkey.to_le_bytes());
            out.extend_from_slice(&region.addr.to_le_bytes());
            out.extend_from_slice(&region.len.to_le_bytes());
            out.extend_from_slice(&region.location.tag().to_le_bytes());
            out.extend_from_slice(&region.location.device_index().to_le_bytes());
        }
        out.extend_from_slice(&self.geometry.grain_count.to_le_bytes());
        out.extend_from_slice(&self.geometry.grain_size.to_le_bytes());
        out.extend_from_slice(&self.geometry.total_slices.to_le_bytes());
        out.push(self.imm_layout.slot_bits());
        out
    }

    /// Parses the canonical binary form.
    ///
    /// # Errors
    ///
    /// [`Error::StrLen`] for truncated input, [`Error::Internal`] for an
    /// unrecognized magic, version or provider tag.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        if cursor.take_u32()? != TARGET_INFO_MAGIC {
            return Err(Error::Internal("not a target descriptor".into()));
        }
        let version = cursor.take_u32()?;
        if version != TARGET_INFO_VERSION {
            return Err(Error::Internal(format!(
                "unsupported target descriptor version {version}"
            )));
        }
        let provider_tag = cursor.take_u32()?;
        let provider = Provider::from_tag(provider_tag)
            .ok_or_else(|| Error::Internal(format!("unknown provider tag {provider_tag}")))?;
        let address_len = cursor.take_u16()? as usize;
        let address = EndpointAddress::from_bytes(cursor.take_bytes(address_len)?.to_vec());
        let region_count = cursor.take_u32()? as usize;
        let mut regions = Vec::with_capacity(region_count);
        for _ in 0..region_count {
            let rkey = cursor.take_u64()?;
            let addr = cursor.take_u64()?;
            let len = cursor.take_u64()?;
            let tag = cursor.take_u32()?;
            let device_index = cursor.take_i32()?;
            regions.push(RemoteRegion {
                rkey,
                addr,
                len,
                location: MemoryLocation::from_tag(tag, device_index),
            });
        }
        let geometry = GrainGeometry {
            grain_count: cursor.take_u32()?,
            grain_size: cursor.take_u32()?,
            total_slices: cursor.take_u16()?,
        };
        let imm_layout = ImmDataLayout::from_slot_bits(cursor.take_u8()?);
        Ok(Self {
            provider,
            address,
            regions,
            geometry,
            imm_layout,
        })
    }
}

impl std::fmt::Display for TargetInfo {
    /// The out-of-band text form: base64 over [`Self::serialize`].
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&base64::engine::general_purpose::STANDARD.encode(self.serialize()))
    }
}

impl FromStr for TargetInfo {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s.trim())
            .map_err(|_| Error::StrLen)?;
        Self::deserialize(&bytes)
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(Error::StrLen)?;
        if end > self.data.len() {
            return Err(Error::StrLen);
        }
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take_bytes(1)?[0])
    }

    fn take_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take_bytes(2)?.try_into().unwrap()))
    }

    fn take_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_bytes(4)?.try_into().unwrap()))
    }

    fn take_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take_bytes(4)?.try_into().unwrap()))
    }

    fn take_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take_bytes(8)?.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TargetInfo {
        TargetInfo {
            provider: Provider::Tcp,
            address: EndpointAddress::from_bytes(b"127.0.0.1:41000".to_vec()),
            regions: vec![
                RemoteRegion {
                    rkey: 0x524B_0000,
                    addr: 0,
                    len: 8192 + 256,
                    location: MemoryLocation::Host,
                },
                RemoteRegion {
                    rkey: 0x524B_0001,
                    addr: 0,
                    len: 8192 + 256,
                    location: MemoryLocation::Device { device_index: 2 },
                },
            ],
            geometry: GrainGeometry {
                grain_count: 16,
                grain_size: 256,
                total_slices: 4,
            },
            imm_layout: ImmDataLayout::for_grain_count(16),
        }
    }

    #[test]
    fn text_round_trip_is_identity() {
        let info = sample();
        let text = info.to_string();
        let parsed: TargetInfo = text.parse().unwrap();
        assert_eq!(parsed, info);
    }

    #[test]
    fn truncated_input_is_rejected() {
        let mut bytes = sample().serialize();
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(TargetInfo::deserialize(&bytes), Err(Error::StrLen)));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut bytes = sample().serialize();
        bytes[0] ^= 0xFF;
        assert!(matches!(
            TargetInfo::deserialize(&bytes),
            Err(Error::Internal(_))
        ));
    }
}
