//! Adaptive entropy coder.
//!
//! Order-0 Huffman with a frequency model that persists across
//! datagrams: both endpoints bump the same symbol counts as they
//! encode/decode, and both rebuild the tree on the same cadence, so the
//! models stay in lockstep as long as no datagram is lost to the dedup
//! layer above. The model must be `reset()` on reconnect.
//!
//! Stream layout: LEB128 varint of the uncompressed length, then
//! MSB-first code bits. Padding bits in the final byte are ignored.

use super::{CodecError, MAX_DECOMPRESSED_LEN};
use crate::net::protocol::{read_varint, write_varint};

const SYMBOLS: usize = 256;
/// Rebuild the code tree after this many model updates.
const REBUILD_INTERVAL: u32 = 64;
/// Halve all counts when the total reaches this, keeping code lengths
/// well under 32 bits.
const RESCALE_TOTAL: u64 = 1 << 16;

#[derive(Debug, Clone, Copy)]
struct Node {
    left: i16,
    right: i16,
    /// Leaf symbol, or -1 for internal nodes.
    symbol: i16,
}

#[derive(Debug)]
pub struct AdaptiveCoder {
    freq: [u32; SYMBOLS],
    total: u64,
    nodes: Vec<Node>,
    root: usize,
    codes: [(u32, u8); SYMBOLS],
    since_rebuild: u32,
}

impl Default for AdaptiveCoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AdaptiveCoder {
    pub fn new() -> Self {
        let mut coder = Self {
            freq: [1; SYMBOLS],
            total: SYMBOLS as u64,
            nodes: Vec::new(),
            root: 0,
            codes: [(0, 0); SYMBOLS],
            since_rebuild: 0,
        };
        coder.rebuild();
        coder
    }

    pub fn reset(&mut self) {
        self.freq = [1; SYMBOLS];
        self.total = SYMBOLS as u64;
        self.since_rebuild = 0;
        self.rebuild();
    }

    pub fn encode(&mut self, input: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(input.len() / 2 + 8);
        write_varint(&mut out, input.len() as u32);

        let mut writer = BitWriter::new(out);
        for &byte in input {
            let (bits, len) = self.codes[byte as usize];
            writer.put(bits, len);
            self.bump(byte);
        }
        writer.finish()
    }

    pub fn decode(&mut self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut pos = 0;
        let expected = read_varint(input, &mut pos).ok_or(CodecError::Truncated)? as usize;
        if expected > MAX_DECOMPRESSED_LEN {
            return Err(CodecError::OversizedPayload {
                declared: expected,
                limit: MAX_DECOMPRESSED_LEN,
            });
        }

        let mut reader = BitReader::new(&input[pos..]);
        let mut out = Vec::with_capacity(expected);
        while out.len() < expected {
            let mut node = self.root;
            loop {
                let n = self.nodes[node];
                if n.symbol >= 0 {
                    break;
                }
                node = if reader.take().ok_or(CodecError::Truncated)? {
                    n.right as usize
                } else {
                    n.left as usize
                };
            }
            let symbol = self.nodes[node].symbol as u8;
            out.push(symbol);
            self.bump(symbol);
        }
        Ok(out)
    }

    /// Model update shared by both directions; keeps encoder and
    /// decoder trees identical.
    fn bump(&mut self, symbol: u8) {
        self.freq[symbol as usize] += 1;
        self.total += 1;
        if self.total >= RESCALE_TOTAL {
            self.total = 0;
            for f in &mut self.freq {
                *f = (*f + 1) >> 1;
                self.total += u64::from(*f);
            }
        }
        self.since_rebuild += 1;
        if self.since_rebuild >= REBUILD_INTERVAL {
            self.since_rebuild = 0;
            self.rebuild();
        }
    }

    fn rebuild(&mut self) {
        use std::cmp::Reverse;
        use std::collections::BinaryHeap;

        self.nodes.clear();
        // (weight, insertion order) keys make tie-breaking
        // deterministic across endpoints.
        let mut heap: BinaryHeap<Reverse<(u64, u16)>> = BinaryHeap::with_capacity(SYMBOLS);
        for symbol in 0..SYMBOLS {
            self.nodes.push(Node {
                left: -1,
                right: -1,
                symbol: symbol as i16,
            });
            heap.push(Reverse((u64::from(self.freq[symbol]), symbol as u16)));
        }

        while heap.len() > 1 {
            let Reverse((wa, a)) = heap.pop().unwrap();
            let Reverse((wb, b)) = heap.pop().unwrap();
            self.nodes.push(Node {
                left: a as i16,
                right: b as i16,
                symbol: -1,
            });
            // Merged nodes are pushed sequentially, so the arena index
            // doubles as the deterministic tie-break key.
            let merged = (self.nodes.len() - 1) as u16;
            heap.push(Reverse((wa + wb, merged)));
        }
        self.root = self.nodes.len() - 1;

        self.codes = [(0, 0); SYMBOLS];
        let mut stack = vec![(self.root, 0u32, 0u8)];
        while let Some((index, bits, len)) = stack.pop() {
            let node = self.nodes[index];
            if node.symbol >= 0 {
                self.codes[node.symbol as usize] = (bits, len);
            } else {
                stack.push((node.left as usize, bits << 1, len + 1));
                stack.push((node.right as usize, (bits << 1) | 1, len + 1));
            }
        }
    }
}

struct BitWriter {
    out: Vec<u8>,
    current: u8,
    filled: u8,
}

impl BitWriter {
    fn new(out: Vec<u8>) -> Self {
        Self {
            out,
            current: 0,
            filled: 0,
        }
    }

    fn put(&mut self, bits: u32, len: u8) {
        for i in (0..len).rev() {
            let bit = (bits >> i) & 1;
            self.current = (self.current << 1) | bit as u8;
            self.filled += 1;
            if self.filled == 8 {
                self.out.push(self.current);
                self.current = 0;
                self.filled = 0;
            }
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.filled > 0 {
            self.current <<= 8 - self.filled;
            self.out.push(self.current);
        }
        self.out
    }
}

struct BitReader<'a> {
    input: &'a [u8],
    pos: usize,
    bit: u8,
}

impl<'a> BitReader<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0, bit: 0 }
    }

    fn take(&mut self) -> Option<bool> {
        let byte = *self.input.get(self.pos)?;
        let bit = (byte >> (7 - self.bit)) & 1;
        self.bit += 1;
        if self.bit == 8 {
            self.bit = 0;
            self.pos += 1;
        }
        Some(bit == 1)
    }
}
