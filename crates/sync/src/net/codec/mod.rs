//! Interchangeable body codecs, selected per datagram by flag bits.

mod huffman;
mod lz;

pub use huffman::AdaptiveCoder;

use std::borrow::Cow;

use crate::net::protocol::DatagramFlags;

/// Upper bound on any decompressed body; a datagram body never legally
/// expands past this.
pub const MAX_DECOMPRESSED_LEN: usize = 64 * 1024;

/// Bodies smaller than this are never worth compressing.
pub const MIN_COMPRESS_LEN: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("compressed stream truncated")]
    Truncated,
    #[error("declared length {declared} exceeds limit {limit}")]
    OversizedPayload { declared: usize, limit: usize },
    #[error("back-reference distance {distance} exceeds {produced} produced bytes")]
    BadBackref { distance: usize, produced: usize },
    #[error("decoded length mismatch: declared {expected}, produced {produced}")]
    LengthMismatch { expected: usize, produced: usize },
    #[error("{leftover} bytes left after compressed stream")]
    TrailingData { leftover: usize },
}

/// Per-connection codec state. The dictionary codec is stateless; the
/// adaptive coder's model persists across datagrams and is reset on
/// reconnect together with the rest of the connection.
#[derive(Debug, Default)]
pub struct PayloadCodec {
    coder: AdaptiveCoder,
}

impl PayloadCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.coder.reset();
    }

    /// Expands a datagram body according to its flag bits. Corruption
    /// here is a hard protocol error; the caller must tear the
    /// connection down.
    pub fn decompress<'a>(
        &mut self,
        flags: DatagramFlags,
        body: &'a [u8],
    ) -> Result<Cow<'a, [u8]>, CodecError> {
        if !flags.contains(DatagramFlags::COMPRESSED) {
            return Ok(Cow::Borrowed(body));
        }
        let expanded = if flags.contains(DatagramFlags::CODEC_ADAPTIVE) {
            self.coder.decode(body)?
        } else {
            lz::decompress(body)?
        };
        Ok(Cow::Owned(expanded))
    }

    /// Opportunistic dictionary compression for outgoing bodies: only
    /// applied when the body is large enough and actually shrinks.
    pub fn compress<'a>(&mut self, body: &'a [u8]) -> (DatagramFlags, Cow<'a, [u8]>) {
        if body.len() >= MIN_COMPRESS_LEN {
            let compressed = lz::compress(body);
            if compressed.len() < body.len() {
                return (DatagramFlags::COMPRESSED, Cow::Owned(compressed));
            }
        }
        (DatagramFlags::empty(), Cow::Borrowed(body))
    }

    /// Entropy-codes a body with the session model; used by tests and
    /// tooling that emulate the server side of the link.
    pub fn compress_adaptive(&mut self, body: &[u8]) -> (DatagramFlags, Vec<u8>) {
        (
            DatagramFlags::COMPRESSED | DatagramFlags::CODEC_ADAPTIVE,
            self.coder.encode(body),
        )
    }
}
