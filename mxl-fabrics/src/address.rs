// SPDX-FileCopyrightText: 2025-2026 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Endpoint addressing.
//!
//! An endpoint address is an opaque byte blob produced by the transport when
//! an endpoint binds; its interpretation is provider-specific. Base64 is the
//! canonical text form for out-of-band exchange.

use base64::Engine as _;

use crate::error::{Error, Result};

/// Opaque transport endpoint address.
///
/// For the TCP provider the bytes are a UTF-8 socket address
/// (`"127.0.0.1:45123"`); other providers may store arbitrary binary names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointAddress {
    bytes: Vec<u8>,
}

impl EndpointAddress {
    /// Wraps raw transport address bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// The raw transport address bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Encodes the address for out-of-band exchange.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    /// Decodes an address previously produced by [`Self::to_base64`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::StrLen`] if the input is not valid base64.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| Error::StrLen)?;
        Ok(Self { bytes })
    }

    /// Interprets the address as a socket address (TCP provider).
    pub(crate) fn to_socket_addr(&self) -> Result<std::net::SocketAddr> {
        let text = std::str::from_utf8(&self.bytes)
            .map_err(|_| Error::Internal("endpoint address is not UTF-8".into()))?;
        text.parse()
            .map_err(|_| Error::Internal(format!("endpoint address {text:?} is not host:port")))
    }
}

impl std::fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_base64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_round_trip_is_identity() {
        let address = EndpointAddress::from_bytes(b"127.0.0.1:9000".to_vec());
        let text = address.to_base64();
        assert_eq!(EndpointAddress::from_base64(&text).unwrap(), address);
    }

    #[test]
    fn malformed_base64_is_rejected() {
        assert!(matches!(
            EndpointAddress::from_base64("!!not base64!!"),
            Err(Error::StrLen)
        ));
    }
}
