// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! JSON flow definition schema types.
//!
//! Flow definitions follow the NMOS IS-04 flow schema. The core stores the
//! JSON blob verbatim in `flow_def.json` and only interprets the handful of
//! fields it needs to size the shared memory: the flow `id`, the `format`
//! URN, the rate, and the video/audio geometry.

use std::{collections::HashMap, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::flow::DataFormat;
use crate::time::Rational;

/// Flow definition structure following the NMOS IS-04 flow schema.
///
/// This is the parsed form of the JSON passed to
/// [`crate::MxlInstance::create_flow_writer`].
///
/// # Examples
///
/// ```no_run
/// use mxl::flowdef::FlowDef;
///
/// let json = r#"{
///     "id": "12345678-1234-1234-1234-123456789abc",
///     "format": "urn:x-nmos:format:video",
///     "label": "My Video Flow",
///     "description": "1080p60 video",
///     "tags": {},
///     "parents": [],
///     "media_type": "video/raw",
///     "grain_rate": {"numerator": 60, "denominator": 1},
///     "frame_width": 1920,
///     "frame_height": 1080,
///     "interlace_mode": "progressive",
///     "colorspace": "BT709",
///     "components": []
/// }"#;
///
/// let flow_def: FlowDef = serde_json::from_str(json).unwrap();
/// ```
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FlowDef {
    /// Unique identifier for this flow (UUID).
    pub id: uuid::Uuid,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Arbitrary key-value tags for organization.
    #[serde(default)]
    pub tags: HashMap<String, Vec<String>>,
    /// Short human-readable label.
    #[serde(default)]
    pub label: String,
    /// List of parent flow IDs (for derived flows).
    #[serde(default)]
    pub parents: Vec<String>,
    /// MIME media type (e.g. "video/raw").
    #[serde(default)]
    pub media_type: String,
    /// Format-specific details, selected by the `format` URN. The URN is
    /// the serde tag of this flattened enum, so it is not mirrored as a
    /// plain string field (a sibling field of the same name would swallow
    /// the key before the tag dispatch sees it).
    #[serde(flatten)]
    pub details: FlowDefDetails,
}

impl FlowDef {
    /// The media format this definition describes.
    pub fn data_format(&self) -> DataFormat {
        match self.details {
            FlowDefDetails::Video(_) => DataFormat::Video,
            FlowDefDetails::Audio(_) => DataFormat::Audio,
            FlowDefDetails::Data(_) => DataFormat::Data,
        }
    }

    /// The NMOS format URN.
    pub fn format_urn(&self) -> &'static str {
        match self.details {
            FlowDefDetails::Video(_) => "urn:x-nmos:format:video",
            FlowDefDetails::Audio(_) => "urn:x-nmos:format:audio",
            FlowDefDetails::Data(_) => "urn:x-nmos:format:data",
        }
    }

    /// Grain or sample rate as an exact rational.
    pub fn rate(&self) -> Rational {
        let rate = match &self.details {
            FlowDefDetails::Video(v) => &v.grain_rate,
            FlowDefDetails::Audio(a) => &a.sample_rate,
            FlowDefDetails::Data(d) => &d.grain_rate,
        };
        Rational::new(rate.numerator as i64, rate.denominator as i64)
    }
}

/// Format-specific flow definition details, selected by the `format` URN.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "format")]
pub enum FlowDefDetails {
    /// Video flow definition.
    #[serde(rename = "urn:x-nmos:format:video")]
    Video(FlowDefVideo),
    /// Audio flow definition.
    #[serde(rename = "urn:x-nmos:format:audio")]
    Audio(FlowDefAudio),
    /// Generic data flow definition (e.g. ST 291 ancillary data).
    #[serde(rename = "urn:x-nmos:format:data")]
    Data(FlowDefData),
}

/// Video flow definition details.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FlowDefVideo {
    /// Frame rate as a rational number (e.g. 30000/1001 for 29.97 fps).
    pub grain_rate: Rate,
    /// Frame width in pixels.
    pub frame_width: i32,
    /// Frame height in pixels (or field height for interlaced).
    pub frame_height: i32,
    /// Interlacing mode.
    pub interlace_mode: InterlaceMode,
    /// Colorspace identifier (e.g. "BT709", "BT2020").
    #[serde(default)]
    pub colorspace: String,
    /// Video component descriptions (Y, Cb, Cr, etc.).
    #[serde(default)]
    pub components: Vec<Component>,
}

/// Video interlacing mode.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum InterlaceMode {
    /// Progressive scan (non-interlaced).
    #[serde(rename = "progressive")]
    Progressive,
    /// Interlaced with top field first.
    #[serde(rename = "interlaced_tff")]
    InterlacedTff,
    /// Interlaced with bottom field first.
    #[serde(rename = "interlaced_bff")]
    InterlacedBff,
}

impl FromStr for InterlaceMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "progressive" => Ok(Self::Progressive),
            "interlaced_tff" => Ok(Self::InterlacedTff),
            "interlaced_bff" => Ok(Self::InterlacedBff),
            _ => Err(()),
        }
    }
}

/// Audio flow definition details.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FlowDefAudio {
    /// Sample rate as a rational number (typically 48000/1 Hz).
    pub sample_rate: Rate,
    /// Number of audio channels.
    pub channel_count: i32,
    /// Bit depth per sample.
    #[serde(default)]
    pub bit_depth: u8,
}

/// Data flow definition details (ancillary data packets).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FlowDefData {
    /// Packet rate as a rational number.
    pub grain_rate: Rate,
    /// Largest packet payload in bytes. Data grains publish slice-per-byte,
    /// so this is capped by the slice counter width (65535).
    #[serde(default = "default_data_payload_size")]
    pub max_payload_size: u32,
}

fn default_data_payload_size() -> u32 {
    4096
}

/// Rational number representation for rates in flow definitions.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Rate {
    /// Numerator of the rate.
    pub numerator: i32,
    /// Denominator of the rate (defaults to 1 if omitted in JSON).
    #[serde(default = "default_denominator")]
    pub denominator: i32,
}

fn default_denominator() -> i32 {
    1
}

/// Video component description (Y, Cb, Cr, alpha, etc.).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Component {
    /// Component name (e.g. "Y", "Cb", "Cr", "A").
    pub name: String,
    /// Component width in pixels.
    pub width: i32,
    /// Component height in pixels.
    pub height: i32,
    /// Bit depth of this component.
    pub bit_depth: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_video_definition() {
        let json = r#"{
            "id": "5fbec3b1-1b0f-417d-9059-8b94a47197ed",
            "format": "urn:x-nmos:format:video",
            "grain_rate": {"numerator": 30000, "denominator": 1001},
            "frame_width": 1920,
            "frame_height": 1080,
            "interlace_mode": "progressive",
            "media_type": "video/raw"
        }"#;
        let def: FlowDef = serde_json::from_str(json).unwrap();
        assert_eq!(def.data_format(), DataFormat::Video);
        assert_eq!(def.rate(), Rational::new(30000, 1001));
    }

    #[test]
    fn parses_audio_definition_with_default_denominator() {
        let json = r#"{
            "id": "1c956ba4-e437-4d2a-a2a1-a8cbca3ddbf1",
            "format": "urn:x-nmos:format:audio",
            "sample_rate": {"numerator": 48000},
            "channel_count": 2,
            "bit_depth": 32
        }"#;
        let def: FlowDef = serde_json::from_str(json).unwrap();
        assert_eq!(def.data_format(), DataFormat::Audio);
        assert_eq!(def.rate(), Rational::new(48000, 1));
    }
}
