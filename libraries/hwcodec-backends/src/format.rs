//! Bitstream formats with a hardware codec family behind them

use hwcodec_core::CodecClass;
use serde::{Deserialize, Serialize};

/// Compressed video format handled by one backend family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecFormat {
    /// H.264/AVC, Annex B byte stream
    H264,
    /// MPEG-4 Part 2 visual
    Mpeg4,
    /// H.263 baseline
    H263,
    /// VC-1 advanced profile, start-code delimited
    Vc1,
    /// WMV (VC-1 simple/main), one frame per host buffer
    Wmv,
}

impl CodecFormat {
    pub const ALL: [CodecFormat; 5] = [
        CodecFormat::H264,
        CodecFormat::Mpeg4,
        CodecFormat::H263,
        CodecFormat::Vc1,
        CodecFormat::Wmv,
    ];

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::Mpeg4 => "mpeg4",
            Self::H263 => "h263",
            Self::Vc1 => "vc1",
            Self::Wmv => "wmv",
        }
    }

    /// Parse from string
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "h264" => Some(Self::H264),
            "mpeg4" => Some(Self::Mpeg4),
            "h263" => Some(Self::H263),
            "vc1" => Some(Self::Vc1),
            "wmv" => Some(Self::Wmv),
            _ => None,
        }
    }

    /// Whether the hardware family offers this direction
    ///
    /// VC-1 and WMV are decode-only.
    pub fn supports(&self, class: CodecClass) -> bool {
        match class {
            CodecClass::Decode => true,
            CodecClass::Encode => matches!(self, Self::H264 | Self::Mpeg4 | Self::H263),
        }
    }
}

impl std::fmt::Display for CodecFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
