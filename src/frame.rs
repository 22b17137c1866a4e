//! Demultiplexer for the 16-byte CoreSight formatter frame, which
//! interleaves several trace sources into one stream (CoreSight
//! architecture: the trace formatter).
//!
//! Each frame holds 15 data/ID bytes and one flag byte. Even positions
//! are *flagged*: their low bit is stolen by the protocol, and flag
//! byte bit *i* restores the low bit of the byte at position 2*i*. A
//! flagged byte whose raw low bit is set is instead an ID byte carrying
//! a new 7-bit trace source ID; its flag bit then tells whether the
//! byte that follows still belongs to the previous source.

use std::collections::BTreeMap;

use bitvec::prelude::*;

/// Frame synchronization marker, scanned for in
/// [`FrameMode::Streaming`].
pub const FSYNC: [u8; 4] = [0xff, 0xff, 0xff, 0x7f];

/// Half-word synchronization marker, scanned for in
/// [`FrameMode::Streaming`].
pub const HSYNC: [u8; 2] = [0xff, 0x7f];

/// How the raw input is aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FrameMode {
    /// The input is pre-aligned 16-byte frames (an ETB or an
    /// already-aligned capture). No synchronization markers appear.
    MemAligned,

    /// The input carries FSYNC and HSYNC markers (a raw TPIU capture),
    /// which are scanned for and skipped at frame boundaries.
    Streaming,
}

/// Splits a multiplexed CoreSight frame stream into per-trace-source
/// byte queues.
///
/// Bytes that arrive before the first ID byte have no attributable
/// source and are dropped; a queue for a source exists only once its ID
/// has appeared in the stream.
#[derive(Debug)]
pub struct FrameDemuxer {
    mode: FrameMode,
    current_id: Option<u8>,
    pending: Vec<u8>,
    streams: BTreeMap<u8, Vec<u8>>,
}

impl FrameDemuxer {
    pub fn new(mode: FrameMode) -> FrameDemuxer {
        FrameDemuxer {
            mode,
            current_id: None,
            pending: vec![],
            streams: BTreeMap::new(),
        }
    }

    /// Feeds raw capture bytes in. Complete frames are demultiplexed
    /// immediately; a trailing partial frame is buffered until more
    /// data arrives.
    pub fn push(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
        loop {
            if self.mode == FrameMode::Streaming {
                if self.pending.len() >= 4 && self.pending[..4] == FSYNC {
                    self.pending.drain(..4);
                    continue;
                }
                if self.pending.len() >= 2 && self.pending[..2] == HSYNC {
                    self.pending.drain(..2);
                    continue;
                }
            }
            if self.pending.len() < 16 {
                break;
            }
            let mut frame = [0; 16];
            frame.copy_from_slice(&self.pending[..16]);
            self.process_frame(&frame);
            self.pending.drain(..16);
        }
    }

    /// The trace source IDs seen so far.
    pub fn ids(&self) -> impl Iterator<Item = u8> + '_ {
        self.streams.keys().copied()
    }

    /// The demultiplexed bytes of one source. Empty if the ID has not
    /// appeared.
    pub fn bytes(&self, trace_id: u8) -> &[u8] {
        self.streams
            .get(&trace_id)
            .map(|stream| stream.as_slice())
            .unwrap_or(&[])
    }

    /// Drains and returns the demultiplexed bytes of one source, for
    /// feeding a parser incrementally.
    pub fn take(&mut self, trace_id: u8) -> Vec<u8> {
        self.streams
            .get_mut(&trace_id)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    /// The source ID currently in effect, if any.
    pub fn current_id(&self) -> Option<u8> {
        self.current_id
    }

    fn process_frame(&mut self, frame: &[u8; 16]) {
        // A frame of four FSYNCs unsyncs the stream: forget the ID.
        if frame[..4] == FSYNC && frame[4..8] == FSYNC && frame[8..12] == FSYNC
            && frame[12..] == FSYNC
        {
            self.current_id = None;
            return;
        }

        let flags = frame[15].view_bits::<Lsb0>();
        for i in 0..8 {
            let byte = frame[2 * i];
            if i == 7 {
                // Position 14 has no paired data byte.
                if byte & 1 == 1 {
                    self.current_id = Some(byte >> 1);
                } else {
                    self.emit(self.current_id, byte | flags[i] as u8);
                }
                break;
            }

            let next = frame[2 * i + 1];
            if byte & 1 == 1 {
                let new_id = byte >> 1;
                let previous = self.current_id;
                let changed = previous != Some(new_id);
                self.current_id = Some(new_id);
                // Flag set on an ID change: the next byte was emitted
                // by the outgoing source.
                if changed && flags[i] {
                    self.emit(previous, next);
                } else {
                    self.emit(self.current_id, next);
                }
            } else {
                self.emit(self.current_id, byte | flags[i] as u8);
                self.emit(self.current_id, next);
            }
        }
    }

    fn emit(&mut self, id: Option<u8>, byte: u8) {
        if let Some(id) = id {
            self.streams.entry(id).or_default().push(byte);
        }
    }
}
