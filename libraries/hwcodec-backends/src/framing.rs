//! Frame boundary detection for start-code delimited bitstreams
//!
//! A unit ends right before the marker that opens the next picture. The
//! framer keeps no state between calls: the bytes already assembled and the
//! bytes that just arrived are all it looks at.
//!
//! Markers whose prefix straddles two host buffers are not recognised; the
//! two pictures then reach the codec as one unit.

use crate::format::CodecFormat;
use hwcodec_core::FrameBoundary;

/// H.264 NAL unit types that matter for access unit boundaries
mod nal_type {
    pub const SLICE_FIRST: u8 = 1;
    pub const IDR_SLICE: u8 = 5;
    pub const SEI: u8 = 6;
    pub const AUD: u8 = 9;
    pub const PREFIX_FIRST: u8 = 14;
    pub const PREFIX_LAST: u8 = 18;
}

/// MPEG-4 Part 2 start code values
mod mpeg4_code {
    pub const VOL_LAST: u8 = 0x2F;
    pub const VOS: u8 = 0xB0;
    pub const GOV: u8 = 0xB3;
    pub const VISUAL_OBJECT: u8 = 0xB5;
    pub const VOP: u8 = 0xB6;
}

/// VC-1 advanced profile start code suffixes
mod vc1_code {
    pub const SLICE: u8 = 0x0B;
    pub const FIELD: u8 = 0x0C;
    pub const FRAME: u8 = 0x0D;
    pub const ENTRY_POINT: u8 = 0x0E;
    pub const SEQUENCE: u8 = 0x0F;
}

/// Find the next Annex B start code at or after `from`
///
/// Returns the position and length of the start code (4 for
/// `00 00 00 01`, 3 for `00 00 01`).
pub fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if i + 4 <= data.len() && data[i..i + 4] == [0, 0, 0, 1] {
            return Some((i, 4));
        }
        if data[i..i + 3] == [0, 0, 1] {
            return Some((i, 3));
        }
        i += 1;
    }
    None
}

/// Find the next H.263 picture start code (22 bits: `0000 0000 0000 0000 1000 00`)
fn find_picture_start(data: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] & 0xFC == 0x80 {
            return Some(i);
        }
        i += 1;
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    /// First slice (or the only header) of a picture
    PictureStart,

    /// Later slice or field of the picture already started
    PictureSlice,

    /// Parameter set, sequence or entry-point header ahead of a picture
    Header,

    Other,
}

impl Marker {
    fn opens_unit(self) -> bool {
        matches!(self, Marker::PictureStart | Marker::Header)
    }

    fn is_picture(self) -> bool {
        matches!(self, Marker::PictureStart | Marker::PictureSlice)
    }
}

/// Classify the marker whose payload starts at `header`
///
/// `None` when the bytes needed to decide are not in this buffer.
fn classify(format: CodecFormat, header: &[u8]) -> Option<Marker> {
    let code = *header.first()?;
    let marker = match format {
        CodecFormat::H264 => match code & 0x1F {
            nal_type::SLICE_FIRST..=nal_type::IDR_SLICE => {
                // first_mb_in_slice is ue(v); a leading 1 bit means zero
                if header.get(1)? & 0x80 != 0 {
                    Marker::PictureStart
                } else {
                    Marker::PictureSlice
                }
            }
            nal_type::SEI..=nal_type::AUD | nal_type::PREFIX_FIRST..=nal_type::PREFIX_LAST => {
                Marker::Header
            }
            _ => Marker::Other,
        },
        CodecFormat::Mpeg4 => match code {
            mpeg4_code::VOP => Marker::PictureStart,
            0..=mpeg4_code::VOL_LAST
            | mpeg4_code::VOS
            | mpeg4_code::GOV
            | mpeg4_code::VISUAL_OBJECT => Marker::Header,
            _ => Marker::Other,
        },
        CodecFormat::Vc1 => match code {
            vc1_code::FRAME => Marker::PictureStart,
            vc1_code::SLICE | vc1_code::FIELD => Marker::PictureSlice,
            vc1_code::ENTRY_POINT | vc1_code::SEQUENCE => Marker::Header,
            _ => Marker::Other,
        },
        CodecFormat::H263 => Marker::PictureStart,
        CodecFormat::Wmv => Marker::Other,
    };
    Some(marker)
}

/// Iterator over classified markers in a byte slice
struct Markers<'a> {
    format: CodecFormat,
    data: &'a [u8],
    cursor: usize,
}

impl Iterator for Markers<'_> {
    type Item = (usize, Marker);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (pos, prefix) = match self.format {
                CodecFormat::H263 => (find_picture_start(self.data, self.cursor)?, 2),
                _ => find_start_code(self.data, self.cursor)?,
            };
            self.cursor = pos + prefix;
            if let Some(marker) = classify(self.format, &self.data[pos + prefix..]) {
                return Some((pos, marker));
            }
        }
    }
}

/// Stateless frame boundary detector for one format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framer {
    format: CodecFormat,
}

impl Framer {
    pub fn new(format: CodecFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> CodecFormat {
        self.format
    }

    fn markers<'a>(&self, data: &'a [u8]) -> Markers<'a> {
        Markers {
            format: self.format,
            data,
            cursor: 0,
        }
    }

    /// Find where the unit made of `pending` ends within `incoming`
    ///
    /// Never answers `EndsAt(0)` while `pending` is empty.
    pub fn check(&self, pending: &[u8], incoming: &[u8]) -> FrameBoundary {
        if incoming.is_empty() {
            return FrameBoundary::Continue;
        }
        if self.format == CodecFormat::Wmv {
            return FrameBoundary::EndsAt(incoming.len());
        }

        let mut picture = self.markers(pending).any(|(_, marker)| marker.is_picture());
        for (pos, marker) in self.markers(incoming) {
            if picture && marker.opens_unit() {
                return FrameBoundary::EndsAt(pos);
            }
            picture |= marker.is_picture();
        }
        FrameBoundary::Continue
    }

    /// Cut a complete in-memory stream into units
    pub fn split<'a>(&self, stream: &'a [u8]) -> Vec<&'a [u8]> {
        let mut units = Vec::new();
        let mut rest = stream;
        while !rest.is_empty() {
            let end = match self.check(&[], rest) {
                FrameBoundary::EndsAt(end) if end > 0 => end,
                _ => rest.len(),
            };
            let (unit, tail) = rest.split_at(end);
            units.push(unit);
            rest = tail;
        }
        units
    }
}
