//! LZSS dictionary codec.
//!
//! Stream layout: a LEB128 varint carrying the uncompressed length,
//! then groups of one control byte followed by up to eight items. A set
//! control bit means a two-byte back-reference (12-bit distance, 4-bit
//! length biased by `MIN_MATCH`), a clear bit a literal byte. The
//! leading length makes truncation detectable before any output is
//! handed to the caller.

use super::{CodecError, MAX_DECOMPRESSED_LEN};
use crate::net::protocol::{read_varint, write_varint};

/// Largest back-reference distance the 12-bit field can carry.
const MAX_DISTANCE: usize = 4095;
const MIN_MATCH: usize = 3;
const MAX_MATCH: usize = 18;

pub fn compress(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() / 2 + 8);
    write_varint(&mut out, input.len() as u32);

    let mut pos = 0;
    while pos < input.len() {
        let control_at = out.len();
        out.push(0);
        let mut control = 0u8;

        for bit in 0..8 {
            if pos >= input.len() {
                break;
            }
            match find_match(input, pos) {
                Some((distance, length)) => {
                    control |= 1 << bit;
                    out.push((distance & 0xFF) as u8);
                    out.push((((distance >> 8) as u8) << 4) | ((length - MIN_MATCH) as u8));
                    pos += length;
                }
                None => {
                    out.push(input[pos]);
                    pos += 1;
                }
            }
        }
        out[control_at] = control;
    }
    out
}

fn find_match(input: &[u8], pos: usize) -> Option<(usize, usize)> {
    if pos + MIN_MATCH > input.len() {
        return None;
    }
    let window_start = pos.saturating_sub(MAX_DISTANCE);
    let max_len = MAX_MATCH.min(input.len() - pos);

    let mut best: Option<(usize, usize)> = None;
    for start in window_start..pos {
        let mut len = 0;
        while len < max_len && input[start + len] == input[pos + len] {
            len += 1;
        }
        if len >= MIN_MATCH && best.is_none_or(|(_, b)| len > b) {
            best = Some((pos - start, len));
            if len == max_len {
                break;
            }
        }
    }
    best
}

pub fn decompress(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut pos = 0;
    let expected = read_varint(input, &mut pos).ok_or(CodecError::Truncated)? as usize;
    if expected > MAX_DECOMPRESSED_LEN {
        return Err(CodecError::OversizedPayload {
            declared: expected,
            limit: MAX_DECOMPRESSED_LEN,
        });
    }

    let mut out = Vec::with_capacity(expected);
    'groups: while out.len() < expected {
        let control = *input.get(pos).ok_or(CodecError::Truncated)?;
        pos += 1;

        for bit in 0..8 {
            if out.len() == expected {
                break 'groups;
            }
            if control & (1 << bit) != 0 {
                let lo = *input.get(pos).ok_or(CodecError::Truncated)?;
                let hi = *input.get(pos + 1).ok_or(CodecError::Truncated)?;
                pos += 2;

                let distance = usize::from(lo) | (usize::from(hi >> 4) << 8);
                let length = usize::from(hi & 0x0F) + MIN_MATCH;
                if distance == 0 || distance > out.len() {
                    return Err(CodecError::BadBackref {
                        distance,
                        produced: out.len(),
                    });
                }
                if out.len() + length > expected {
                    return Err(CodecError::LengthMismatch {
                        expected,
                        produced: out.len() + length,
                    });
                }
                for _ in 0..length {
                    let byte = out[out.len() - distance];
                    out.push(byte);
                }
            } else {
                let byte = *input.get(pos).ok_or(CodecError::Truncated)?;
                pos += 1;
                out.push(byte);
            }
        }
    }

    if pos != input.len() {
        return Err(CodecError::TrailingData {
            leftover: input.len() - pos,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_repetitive() {
        let input: Vec<u8> = b"the quick brown fox jumps over the quick brown fox"
            .repeat(8)
            .to_vec();
        let compressed = compress(&input);
        assert!(compressed.len() < input.len());
        assert_eq!(decompress(&compressed).unwrap(), input);
    }

    #[test]
    fn roundtrip_empty_and_short() {
        for input in [&b""[..], b"a", b"abc"] {
            let compressed = compress(input);
            assert_eq!(decompress(&compressed).unwrap(), input);
        }
    }

    #[test]
    fn roundtrip_across_window_boundary() {
        // Long enough that matches sit right at the maximum encodable
        // distance.
        let input = vec![b'a'; 4123];
        let compressed = compress(&input);
        assert_eq!(decompress(&compressed).unwrap(), input);

        let mut mixed: Vec<u8> = (0u32..4500)
            .flat_map(|i| [(i % 7) as u8, b'x', b'y'])
            .collect();
        mixed.extend_from_slice(&mixed.clone()[..256]);
        let compressed = compress(&mixed);
        assert_eq!(decompress(&compressed).unwrap(), mixed);
    }

    #[test]
    fn truncated_stream_is_error() {
        let input: Vec<u8> = b"abcabcabcabcabcabcabcabc".to_vec();
        let compressed = compress(&input);
        for cut in 1..compressed.len() {
            assert!(
                decompress(&compressed[..cut]).is_err(),
                "cut at {cut} must not produce output"
            );
        }
    }

    #[test]
    fn bad_backref_rejected() {
        let mut stream = Vec::new();
        write_varint(&mut stream, 4);
        // Control byte claims a match before any output exists.
        stream.extend_from_slice(&[0b0000_0001, 0x05, 0x00]);
        assert!(matches!(
            decompress(&stream),
            Err(CodecError::BadBackref { .. })
        ));
    }

    #[test]
    fn oversized_declaration_rejected() {
        let mut stream = Vec::new();
        write_varint(&mut stream, (MAX_DECOMPRESSED_LEN + 1) as u32);
        assert!(matches!(
            decompress(&stream),
            Err(CodecError::OversizedPayload { .. })
        ));
    }

    #[test]
    fn trailing_garbage_rejected() {
        let mut compressed = compress(b"abcdef");
        compressed.push(0xAA);
        assert!(matches!(
            decompress(&compressed),
            Err(CodecError::TrailingData { .. })
        ));
    }
}
