//! Fast packet transport.
//!
//! Payloads larger than a CAN frame are carried as a numbered frame sequence:
//! - first frame: `[seq|0, total_len, d0..d5]`
//! - following frames: `[seq|index, d.., d..]` with seven payload bytes each
//!
//! The upper three bits of byte 0 hold a rolling sequence counter shared by all
//! frames of one message; unused trailing bytes are padded with `0xFF`.

use nmea2000::FastPacket;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use crate::can_id::CanId;

/// Largest payload a fast packet sequence can carry (6 + 31 * 7).
pub const MAX_FAST_PACKET_PAYLOAD: usize = 223;

/// PGNs commonly sent as fast packets on a marine network.
pub const DEFAULT_FAST_PACKET_PGNS: &[u32] = &[
    126464, 126720, 126996, 126998, 127233, 127237, 127489, 127493, 127505, 128275, 129029,
    129038, 129039, 129040, 129284, 129285, 129540, 129794, 129809, 129810, 130074,
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SplitError {
    #[error("payload is empty")]
    Empty,
    #[error("payload of {0} bytes exceeds the fast packet limit of {MAX_FAST_PACKET_PAYLOAD}")]
    TooLarge(usize),
}

/// Number of frames needed for a payload of `total_len` bytes.
pub fn frame_count(total_len: usize) -> usize {
    // First frame has 6 bytes of data (2 bytes overhead)
    // Subsequent frames have 7 bytes of data (1 byte overhead)
    if total_len <= 6 {
        1
    } else {
        1 + (total_len - 6).div_ceil(7)
    }
}

/// Splits outbound payloads into fast packet frames.
///
/// Owns the sequence counter, so keep one splitter per transmitting node.
#[derive(Debug, Default)]
pub struct FastPacketSplitter {
    sequence: u8,
}

impl FastPacketSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits `payload` into ordered 8-byte frames.
    pub fn split(&mut self, payload: &[u8]) -> Result<Vec<[u8; 8]>, SplitError> {
        if payload.is_empty() {
            return Err(SplitError::Empty);
        }
        if payload.len() > MAX_FAST_PACKET_PAYLOAD {
            return Err(SplitError::TooLarge(payload.len()));
        }

        let sequence = (self.sequence & 0x07) << 5;
        self.sequence = (self.sequence + 1) & 0x07;

        let mut frames = Vec::with_capacity(frame_count(payload.len()));

        let head = payload.len().min(6);
        let mut first = [0xFF; 8];
        first[0] = sequence;
        first[1] = payload.len() as u8;
        first[2..2 + head].copy_from_slice(&payload[..head]);
        frames.push(first);

        for (index, chunk) in payload[head..].chunks(7).enumerate() {
            let mut frame = [0xFF; 8];
            frame[0] = sequence | ((index as u8 + 1) & 0x1F);
            frame[1..1 + chunk.len()].copy_from_slice(chunk);
            frames.push(frame);
        }

        Ok(frames)
    }
}

// Key for tracking multi-frame messages: (PGN, Source)
type FastPacketKey = (u32, u8);

struct FastPacketBuffer {
    data: Vec<u8>,
    total_len: usize,
    sequence: u8,
    next_index: u8,
}

impl FastPacketBuffer {
    fn new(total_len: usize, sequence: u8) -> Self {
        Self {
            data: Vec::with_capacity(total_len + 7),
            total_len,
            sequence,
            next_index: 1,
        }
    }

    fn is_complete(&self) -> bool {
        self.data.len() >= self.total_len
    }

    fn take_complete_data(mut self) -> Vec<u8> {
        // Truncate to actual message length
        self.data.truncate(self.total_len);
        self.data
    }
}

/// Reassembles inbound fast packet frames into complete payloads.
pub struct FastPacketAssembler {
    fast_packet_pgns: Vec<u32>,
    buffers: HashMap<FastPacketKey, FastPacketBuffer>,
}

impl FastPacketAssembler {
    pub fn new(fast_packet_pgns: Vec<u32>) -> Self {
        Self {
            fast_packet_pgns,
            buffers: HashMap::new(),
        }
    }

    pub fn is_fast_packet_pgn(&self, pgn: u32) -> bool {
        self.fast_packet_pgns.contains(&pgn)
    }

    /// Processes one frame and returns a complete payload when available.
    ///
    /// Frames of single-frame PGNs are returned unchanged.
    pub fn process(&mut self, id: CanId, data: &[u8]) -> Option<Vec<u8>> {
        let pgn = id.pgn();
        if !self.is_fast_packet_pgn(pgn) || data.len() != 8 {
            return Some(data.to_vec());
        }

        let mut packet_data = [0u8; 8];
        packet_data.copy_from_slice(data);
        let fast_packet = FastPacket(packet_data);
        let key = (pgn, id.source());
        let sequence = data[0] >> 5;

        if fast_packet.is_first() {
            let total_len = fast_packet.total_len()? as usize;
            let mut buffer = FastPacketBuffer::new(total_len, sequence);
            buffer.data.extend_from_slice(&fast_packet.data());
            if buffer.is_complete() {
                self.buffers.remove(&key);
                return Some(buffer.take_complete_data());
            }
            self.buffers.insert(key, buffer);
            return None;
        }

        let index = data[0] & 0x1F;
        let buffer = self.buffers.get_mut(&key)?;
        if buffer.sequence != sequence || buffer.next_index != index {
            debug!(
                "dropping fast packet for PGN {} from {}: expected frame {} got {}",
                pgn, key.1, buffer.next_index, index
            );
            self.buffers.remove(&key);
            return None;
        }

        buffer.data.extend_from_slice(&fast_packet.data());
        buffer.next_index = buffer.next_index.wrapping_add(1);
        if buffer.is_complete() {
            return self.buffers.remove(&key).map(FastPacketBuffer::take_complete_data);
        }
        None
    }
}

impl Default for FastPacketAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_FAST_PACKET_PGNS.to_vec())
    }
}
