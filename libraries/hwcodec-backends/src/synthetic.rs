//! Synthetic bitstreams for driving the framers end to end
//!
//! Pictures carry the markers a framer looks for and a filler payload that
//! never contains a zero byte, so no start code is emulated by accident.

use crate::format::CodecFormat;

fn filler(index: usize, n: usize) -> u8 {
    0x10 + ((index * 7 + n) % 0x60) as u8
}

/// Picture `index` of a stream, with sequence headers in front of the first
pub fn picture(format: CodecFormat, index: usize, payload_len: usize) -> Vec<u8> {
    let first = index == 0;
    let mut out = Vec::with_capacity(payload_len + 32);
    match format {
        CodecFormat::H264 => {
            if first {
                out.extend_from_slice(&[0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1E]);
                out.extend_from_slice(&[0, 0, 0, 1, 0x68, 0xCE, 0x38, 0x80]);
            }
            let nal = if first { 0x65 } else { 0x41 };
            out.extend_from_slice(&[0, 0, 1, nal, 0x88]);
        }
        CodecFormat::Mpeg4 => {
            if first {
                out.extend_from_slice(&[0, 0, 1, 0xB0, 0x01, 0, 0, 1, 0xB5, 0x09]);
                out.extend_from_slice(&[0, 0, 1, 0x20, 0x08]);
            }
            let coding_type = if first { 0x10 } else { 0x50 };
            out.extend_from_slice(&[0, 0, 1, 0xB6, coding_type]);
        }
        CodecFormat::H263 => {
            out.extend_from_slice(&[0, 0, 0x80 | (index as u8 & 0x03), 0x02]);
        }
        CodecFormat::Vc1 => {
            if first {
                out.extend_from_slice(&[0, 0, 1, 0x0F, 0xCA, 0, 0, 1, 0x0E, 0x48]);
            }
            out.extend_from_slice(&[0, 0, 1, 0x0D]);
        }
        CodecFormat::Wmv => {}
    }
    out.extend((0..payload_len).map(|n| filler(index, n)));
    out
}

/// `count` consecutive pictures
pub fn pictures(format: CodecFormat, count: usize, payload_len: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|index| picture(format, index, payload_len))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::Framer;

    #[test]
    fn test_framer_recovers_every_picture() {
        for format in CodecFormat::ALL {
            if format == CodecFormat::Wmv {
                continue;
            }
            let expected = pictures(format, 5, 24);
            let stream = expected.concat();
            let units: Vec<Vec<u8>> = Framer::new(format)
                .split(&stream)
                .into_iter()
                .map(<[u8]>::to_vec)
                .collect();
            assert_eq!(units, expected, "{format}");
        }
    }

    #[test]
    fn test_filler_has_no_zero_bytes() {
        let picture = picture(CodecFormat::Wmv, 3, 500);
        assert!(picture.iter().all(|b| *b != 0));
    }
}
