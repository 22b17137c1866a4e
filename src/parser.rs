//! Parse PTM packets from a per-trace-source byte stream.
//!
//! The parser is sans-I/O: [`push`](PacketParser::push) buffers raw
//! bytes, [`pull`](PacketParser::pull) yields one complete
//! [`TracePacket`] at a time, retaining partial packets until more data
//! arrives. A stream is opaque until its first alignment sync; bytes
//! before it are discarded behind a single [`NoSync`] packet.
//!
//! Parsing never fails. Byte sequences no packet can start with become
//! [`BadSequence`] or [`Reserved`] packets of length ≥ 1, and the
//! decoder resynchronizes on those.
//!
//! [`NoSync`]: PacketKind::NoSync
//! [`BadSequence`]: PacketKind::BadSequence
//! [`Reserved`]: PacketKind::Reserved

use bitmatch::bitmatch;

use crate::packet::{Isa, IsyncReason, PacketKind, TracePacket};
use crate::PtmConfig;

/// Valid address bits carried by 1..=5 branch address bytes.
const ADDR_BITS: [u8; 5] = [7, 14, 21, 28, 32];

/// An A-sync is at least five zero bytes followed by `0x80`.
const ASYNC_MIN_ZEROS: usize = 5;

/// PTM packet tokenizer for one trace source.
pub struct PacketParser {
    config: PtmConfig,
    incoming: Vec<u8>,
    /// Stream offset of `incoming[0]`.
    offset: usize,
    synced: bool,
    nosync_sent: bool,
    discard_start: Option<usize>,
}

/// What a header byte announces. Most packets need payload bytes before
/// they are complete; the second parse stage collects them.
enum Header {
    Async,
    Isync,
    Timestamp { has_cc: bool },
    ContextId,
    Vmid,
    ExceptionReturn,
    Ignore,
    Trigger,
    WaypointUpdate,
    BranchAddress,
    Atom { en_bits: u8, count: u8 },
    Reserved,
}

/// Decodes a header byte. Exact headers win over the branch and atom
/// pattern spaces.
#[bitmatch]
fn classify(header: u8) -> Header {
    #[bitmatch]
    match header {
        "0000_0000" => Header::Async,
        "0000_1000" => Header::Isync,
        "0000_1100" => Header::Trigger,
        "0011_1100" => Header::Vmid,
        "0100_0c10" => Header::Timestamp { has_cc: c == 1 },
        "0110_0110" => Header::Ignore,
        "0110_1110" => Header::ContextId,
        "0111_0010" => Header::WaypointUpdate,
        "0111_0110" => Header::ExceptionReturn,
        // any odd byte opens a branch address packet
        "????_???1" => Header::BranchAddress,
        "hhhh_hhh0" => {
            // atom headers carry E/N bits in the field above the
            // format bit; a field of all zeros or all ones is instead
            // the continuation pattern of a branch address
            let en_field = h & 0x3f;
            if en_field == 0x00 || en_field == 0x3f {
                if h & 0x40 != 0 {
                    Header::BranchAddress
                } else {
                    Header::Reserved
                }
            } else {
                atom_header(header)
            }
        }
    }
}

/// Decodes an atom header: the stop bit is the highest set bit of the
/// field in bits \[7:2\], its position (1..=5) is the atom count, and
/// the bits below it are the atoms, LSB first, wire 0 = Executed. The
/// stored sense is inverted so that bit = 1 means Executed.
fn atom_header(header: u8) -> Header {
    let field = header >> 2;
    let count = (7 - field.leading_zeros() as i32) as i8;
    if !(1..=5).contains(&count) {
        return Header::Reserved;
    }
    let count = count as u8;
    let mask = (1 << count) - 1;
    Header::Atom {
        en_bits: !field & mask,
        count,
    }
}

impl PacketParser {
    pub fn new(config: PtmConfig) -> PacketParser {
        PacketParser {
            config,
            incoming: vec![],
            offset: 0,
            synced: false,
            nosync_sent: false,
            discard_start: None,
        }
    }

    /// Pushes trace data into the parser.
    pub fn push(&mut self, data: &[u8]) {
        self.incoming.extend_from_slice(data);
    }

    /// Pulls the next complete packet, if any. Returns `None` when the
    /// buffered bytes end mid-packet; pushing more data may complete
    /// it.
    pub fn pull(&mut self) -> Option<TracePacket> {
        if !self.synced {
            return self.scan_async();
        }
        let (kind, len) = self.parse_next()?;
        Some(self.consume(kind, len))
    }

    /// Signals the end of the stream. Yields an
    /// [`IncompleteEot`](PacketKind::IncompleteEot) packet if bytes of
    /// a partial packet are pending, or the deferred
    /// [`NoSync`](PacketKind::NoSync) if the stream never synced.
    pub fn finalize(&mut self) -> Option<TracePacket> {
        if !self.synced {
            let len = self.incoming.len();
            if len > 0 {
                self.discard(len);
            }
            return self.take_nosync();
        }
        if self.incoming.is_empty() {
            return None;
        }
        let len = self.incoming.len();
        Some(self.consume(PacketKind::IncompleteEot, len))
    }

    /// Discards input until an A-sync is found, then yields the
    /// deferred `NoSync` (once, if anything was discarded) and the
    /// `Async` packet itself.
    fn scan_async(&mut self) -> Option<TracePacket> {
        let mut zeros = 0;
        let mut found = None;
        for (i, &b) in self.incoming.iter().enumerate() {
            if b == 0x00 {
                zeros += 1;
            } else if b == 0x80 && zeros >= ASYNC_MIN_ZEROS {
                found = Some((i - zeros, zeros + 1));
                break;
            } else {
                zeros = 0;
            }
        }

        match found {
            Some((run_start, len)) => {
                if run_start > 0 {
                    self.discard(run_start);
                    if let Some(packet) = self.take_nosync() {
                        return Some(packet);
                    }
                }
                self.synced = true;
                Some(self.consume(PacketKind::Async, len))
            }
            None => {
                // keep a trailing zero run; it may yet complete
                let keep = self.incoming.iter().rev().take_while(|&&b| b == 0).count();
                let drop = self.incoming.len() - keep;
                if drop > 0 {
                    self.discard(drop);
                }
                self.take_nosync()
            }
        }
    }

    fn discard(&mut self, n: usize) {
        if self.discard_start.is_none() {
            self.discard_start = Some(self.offset);
        }
        self.incoming.drain(..n);
        self.offset += n;
    }

    fn take_nosync(&mut self) -> Option<TracePacket> {
        if self.nosync_sent {
            return None;
        }
        let start = self.discard_start?;
        self.nosync_sent = true;
        Some(TracePacket {
            offset: start,
            raw: vec![],
            kind: PacketKind::NoSync,
        })
    }

    fn consume(&mut self, kind: PacketKind, len: usize) -> TracePacket {
        let raw: Vec<u8> = self.incoming.drain(..len).collect();
        let packet = TracePacket {
            offset: self.offset,
            raw,
            kind,
        };
        self.offset += len;
        packet
    }

    /// Parses one packet from the front of the buffer. `None` means
    /// more bytes are needed.
    fn parse_next(&self) -> Option<(PacketKind, usize)> {
        let header = *self.incoming.first()?;
        match classify(header) {
            Header::Async => self.parse_async(),
            Header::Isync => self.parse_isync(),
            Header::Timestamp { has_cc } => self.parse_timestamp(has_cc),
            Header::ContextId => self.parse_context_id(),
            Header::Vmid => {
                let vmid = *self.incoming.get(1)?;
                Some((PacketKind::Vmid { vmid }, 2))
            }
            Header::ExceptionReturn => Some((PacketKind::ExceptionReturn, 1)),
            Header::Ignore => Some((PacketKind::Ignore, 1)),
            Header::Trigger => Some((PacketKind::Trigger, 1)),
            Header::WaypointUpdate => self.parse_waypoint(),
            Header::BranchAddress => self.parse_branch(),
            Header::Atom { en_bits, count } => self.parse_atom(en_bits, count),
            Header::Reserved => Some((PacketKind::Reserved { header }, 1)),
        }
    }

    /// An in-stream A-sync: a run of zeros closed by `0x80`. A run
    /// closed by anything else, or too short, is a bad sequence; the
    /// closing byte is re-examined as the next header.
    fn parse_async(&self) -> Option<(PacketKind, usize)> {
        let mut zeros = 0;
        for &b in &self.incoming {
            if b == 0x00 {
                zeros += 1;
            } else if b == 0x80 && zeros >= ASYNC_MIN_ZEROS {
                return Some((PacketKind::Async, zeros + 1));
            } else {
                return Some((PacketKind::BadSequence, zeros));
            }
        }
        None
    }

    fn parse_isync(&self) -> Option<(PacketKind, usize)> {
        let addr = self.incoming.get(1..5)?;
        let addr_raw = u32::from_le_bytes([addr[0], addr[1], addr[2], addr[3]]);
        let info = *self.incoming.get(5)?;
        let mut pos = 6;

        let ctxt_bytes = self.config.context_id_bytes.min(4) as usize;
        let context_id = if ctxt_bytes > 0 {
            let bytes = self.incoming.get(pos..pos + ctxt_bytes)?;
            let mut id = 0;
            for (i, b) in bytes.iter().enumerate() {
                id |= u32::from(*b) << (8 * i);
            }
            pos += ctxt_bytes;
            Some(id)
        } else {
            None
        };

        let cycle_count = if self.config.cycle_accurate {
            let (cc, n) = self.take_cycle_count(pos)?;
            pos += n;
            Some(cc)
        } else {
            None
        };

        let alt_isa = info & 0x04 != 0;
        let isa = if addr_raw & 1 == 1 {
            if alt_isa {
                Isa::ThumbEe
            } else {
                Isa::Thumb2
            }
        } else {
            Isa::Arm
        };
        let reason = match (info >> 5) & 0b11 {
            0b00 => IsyncReason::Periodic,
            0b01 => IsyncReason::TraceOn,
            0b10 => IsyncReason::Overflow,
            _ => IsyncReason::DebugExit,
        };

        Some((
            PacketKind::Isync {
                address: addr_raw & !1,
                isa,
                secure: info & 0x08 == 0,
                hyp: info & 0x02 != 0,
                reason,
                context_id,
                cycle_count,
            },
            pos,
        ))
    }

    fn parse_timestamp(&self, has_cc: bool) -> Option<(PacketKind, usize)> {
        let max_bytes = if self.config.timestamp_64bit { 9 } else { 7 };
        let mut pos = 1;
        let mut value = 0u64;
        let mut n = 0;
        loop {
            let b = *self.incoming.get(pos)?;
            pos += 1;
            if n == 8 {
                // ninth byte carries a full 8 bits
                value |= u64::from(b) << 56;
                n += 1;
                break;
            }
            value |= u64::from(b & 0x7f) << (7 * n);
            n += 1;
            if b & 0x80 == 0 || n == max_bytes {
                break;
            }
        }
        let update_bits = if n >= 9 { 64 } else { 7 * n as u8 };

        let cycle_count = if has_cc && self.config.cycle_accurate {
            let (cc, ncc) = self.take_cycle_count(pos)?;
            pos += ncc;
            Some(cc)
        } else {
            None
        };

        Some((
            PacketKind::Timestamp {
                value,
                update_bits,
                cycle_count,
            },
            pos,
        ))
    }

    fn parse_context_id(&self) -> Option<(PacketKind, usize)> {
        let n = self.config.context_id_bytes.min(4) as usize;
        let bytes = self.incoming.get(1..1 + n)?;
        let mut id = 0;
        for (i, b) in bytes.iter().enumerate() {
            id |= u32::from(*b) << (8 * i);
        }
        Some((PacketKind::ContextId { id }, 1 + n))
    }

    fn parse_branch(&self) -> Option<(PacketKind, usize)> {
        let (address, addr_bits, isa, exception_follows, mut pos) = self.take_address(0)?;

        let mut secure = None;
        let mut exception = None;
        if exception_follows {
            let info = *self.incoming.get(pos)?;
            pos += 1;
            secure = Some(info & 0x01 == 0);
            exception = Some(u16::from((info >> 1) & 0x0f));
        }

        let cycle_count = if self.config.cycle_accurate {
            let (cc, n) = self.take_cycle_count(pos)?;
            pos += n;
            Some(cc)
        } else {
            None
        };

        Some((
            PacketKind::BranchAddress {
                address,
                addr_bits,
                isa,
                secure,
                exception,
                cycle_count,
            },
            pos,
        ))
    }

    fn parse_waypoint(&self) -> Option<(PacketKind, usize)> {
        let (address, addr_bits, isa, _, pos) = self.take_address(1)?;
        Some((
            PacketKind::WaypointUpdate {
                address,
                addr_bits,
                isa,
            },
            pos,
        ))
    }

    fn parse_atom(&self, en_bits: u8, count: u8) -> Option<(PacketKind, usize)> {
        let mut pos = 1;
        let cycle_count = if self.config.cycle_accurate {
            let (cc, n) = self.take_cycle_count(pos)?;
            pos += n;
            Some(cc)
        } else {
            None
        };
        Some((
            PacketKind::Atom {
                en_bits,
                count,
                cycle_count,
            },
            pos,
        ))
    }

    /// Collects 1..=5 branch address bytes starting at `pos`. The first
    /// byte contributes address bits \[6:1\], each continuation byte 7
    /// more bits, and the fifth byte bits \[31:28\] plus the ISA flags
    /// and the exception indicator.
    ///
    /// Returns `(address, valid bits, ISA, exception byte follows,
    /// position past the address)`.
    fn take_address(&self, pos: usize) -> Option<(u32, u8, Option<Isa>, bool, usize)> {
        let b0 = *self.incoming.get(pos)?;
        let mut address = u32::from((b0 >> 1) & 0x3f) << 1;
        let mut n = 1;
        let mut cont = b0 & 0x80 != 0;
        while cont && n < 4 {
            let b = *self.incoming.get(pos + n)?;
            address |= u32::from(b & 0x7f) << (7 * n);
            cont = b & 0x80 != 0;
            n += 1;
        }

        let mut isa = None;
        let mut exception_follows = false;
        if cont {
            // fifth and final address byte: no continuation bit
            let b4 = *self.incoming.get(pos + 4)?;
            address |= u32::from(b4 & 0x0f) << 28;
            exception_follows = b4 & 0x40 != 0;
            isa = Some(if b4 & 0x10 != 0 {
                if b4 & 0x20 != 0 {
                    Isa::ThumbEe
                } else {
                    Isa::Thumb2
                }
            } else {
                Isa::Arm
            });
            n = 5;
        }

        Some((address, ADDR_BITS[n - 1], isa, exception_follows, pos + n))
    }

    /// Collects a cycle count: up to five bytes, 7 bits each behind a
    /// continuation bit, the fifth contributing bits \[31:28\].
    fn take_cycle_count(&self, pos: usize) -> Option<(u32, usize)> {
        let mut value = 0;
        let mut n = 0;
        loop {
            let b = *self.incoming.get(pos + n)?;
            if n == 4 {
                value |= u32::from(b & 0x0f) << 28;
                n += 1;
                break;
            }
            value |= u32::from(b & 0x7f) << (7 * n);
            n += 1;
            if b & 0x80 == 0 {
                break;
            }
        }
        Some((value, n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> PacketParser {
        PacketParser::new(PtmConfig::default())
    }

    fn synced_parser() -> PacketParser {
        let mut p = parser();
        p.push(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x80]);
        assert_eq!(p.pull().map(|p| p.kind), Some(PacketKind::Async));
        p
    }

    #[test]
    fn async_alone() {
        let mut p = parser();
        p.push(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x80]);

        let packet = p.pull().unwrap();
        assert_eq!(packet.kind, PacketKind::Async);
        assert_eq!(packet.offset, 0);
        assert_eq!(packet.raw.len(), 6);
        assert_eq!(p.pull(), None);
    }

    #[test]
    fn async_with_extra_zeros() {
        let mut p = parser();
        p.push(&[0x00; 9]);
        assert_eq!(p.pull(), None);
        p.push(&[0x80]);

        let packet = p.pull().unwrap();
        assert_eq!(packet.kind, PacketKind::Async);
        assert_eq!(packet.raw.len(), 10);
    }

    #[test]
    fn garbage_before_sync() {
        let mut p = parser();
        p.push(&[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(p.pull().map(|p| p.kind), Some(PacketKind::NoSync));
        assert_eq!(p.pull(), None);

        p.push(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x80]);
        let packet = p.pull().unwrap();
        assert_eq!(packet.kind, PacketKind::Async);
        assert_eq!(packet.offset, 4);
        assert_eq!(p.pull(), None);
    }

    #[test]
    fn isync() {
        let mut p = synced_parser();
        #[rustfmt::skip]
        p.push(&[
            0x08,
            0x00, 0x02, 0x00, 0x80,
            0x08,
        ]);

        let packet = p.pull().unwrap();
        assert_eq!(packet.offset, 6);
        assert_eq!(
            packet.kind,
            PacketKind::Isync {
                address: 0x8000_0200,
                isa: Isa::Arm,
                secure: false,
                hyp: false,
                reason: IsyncReason::Periodic,
                context_id: None,
                cycle_count: None,
            }
        );
    }

    #[test]
    fn isync_thumb_secure() {
        let mut p = synced_parser();
        #[rustfmt::skip]
        p.push(&[
            0x08,
            0x01, 0x00, 0x01, 0x00, // bit 0 set: Thumb2
            0b0010_0000,            // NS clear, reason trace-on
        ]);

        match p.pull().unwrap().kind {
            PacketKind::Isync {
                address,
                isa,
                secure,
                reason,
                ..
            } => {
                assert_eq!(address, 0x0001_0000);
                assert_eq!(isa, Isa::Thumb2);
                assert!(secure);
                assert_eq!(reason, IsyncReason::TraceOn);
            }
            kind => panic!("{:?}", kind),
        }
    }

    #[test]
    fn isync_with_context_id() {
        let mut p = PacketParser::new(PtmConfig {
            context_id_bytes: 2,
            ..PtmConfig::default()
        });
        p.push(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x80]);
        p.pull().unwrap();

        #[rustfmt::skip]
        p.push(&[
            0x08,
            0x00, 0x00, 0x00, 0x00,
            0x08,
            0x34, 0x12,
        ]);

        match p.pull().unwrap().kind {
            PacketKind::Isync { context_id, .. } => assert_eq!(context_id, Some(0x1234)),
            kind => panic!("{:?}", kind),
        }
    }

    #[test]
    fn timestamp_short() {
        let mut p = synced_parser();
        p.push(&[0x42, 0x25]);

        assert_eq!(
            p.pull().unwrap().kind,
            PacketKind::Timestamp {
                value: 0x25,
                update_bits: 7,
                cycle_count: None,
            }
        );
    }

    #[test]
    fn timestamp_continued() {
        let mut p = synced_parser();
        p.push(&[0x42, 0x85]);
        assert_eq!(p.pull(), None, "continuation bit holds the packet open");
        p.push(&[0x03]);

        assert_eq!(
            p.pull().unwrap().kind,
            PacketKind::Timestamp {
                value: (0x03 << 7) | 0x05,
                update_bits: 14,
                cycle_count: None,
            }
        );
    }

    #[test]
    fn atom_header_five_atoms() {
        let mut p = synced_parser();
        p.push(&[0x98]);

        assert_eq!(
            p.pull().unwrap().kind,
            PacketKind::Atom {
                en_bits: 0b11001,
                count: 5,
                cycle_count: None,
            }
        );
    }

    #[test]
    fn atom_header_two_atoms() {
        let mut p = synced_parser();
        p.push(&[0x10]);

        // field 0b000100: stop at position 2, both atoms executed
        assert_eq!(
            p.pull().unwrap().kind,
            PacketKind::Atom {
                en_bits: 0b11,
                count: 2,
                cycle_count: None,
            }
        );
    }

    #[test]
    fn branch_single_byte() {
        let mut p = synced_parser();
        // 0b0000_1001: address bits [6:1] = 0b000100
        p.push(&[0x09]);

        assert_eq!(
            p.pull().unwrap().kind,
            PacketKind::BranchAddress {
                address: 0x08,
                addr_bits: 7,
                isa: None,
                secure: None,
                exception: None,
                cycle_count: None,
            }
        );
    }

    #[test]
    fn branch_full_address_with_exception() {
        let mut p = synced_parser();
        #[rustfmt::skip]
        p.push(&[
            0x81,               // bits [6:1] = 0, continue
            0x80,               // bits [13:7] = 0, continue
            0x80,               // bits [20:14] = 0, continue
            0x80,               // bits [27:21] = 0, continue
            0b0100_1000,        // bits [31:28] = 0x8, exception follows, ARM
            0b0001_0101,        // exception info: number 10, NS set
        ]);

        assert_eq!(
            p.pull().unwrap().kind,
            PacketKind::BranchAddress {
                address: 0x8000_0000,
                addr_bits: 32,
                isa: Some(Isa::Arm),
                secure: Some(false),
                exception: Some(10),
                cycle_count: None,
            }
        );
    }

    #[test]
    fn branch_partial_two_bytes() {
        let mut p = synced_parser();
        #[rustfmt::skip]
        p.push(&[
            0b1000_0001,        // bits [6:1] = 0, continue
            0b0000_0011,        // bits [13:7] = 3, stop
        ]);

        assert_eq!(
            p.pull().unwrap().kind,
            PacketKind::BranchAddress {
                address: 0x03 << 7,
                addr_bits: 14,
                isa: None,
                secure: None,
                exception: None,
                cycle_count: None,
            }
        );
    }

    #[test]
    fn waypoint_update() {
        let mut p = synced_parser();
        #[rustfmt::skip]
        p.push(&[
            0x72,
            0b1000_1000,        // bits [6:1] = 0b000100, continue
            0b0000_0001,        // bits [13:7] = 1, stop
        ]);

        assert_eq!(
            p.pull().unwrap().kind,
            PacketKind::WaypointUpdate {
                address: (1 << 7) | 0x08,
                addr_bits: 14,
                isa: None,
            }
        );
    }

    #[test]
    fn vmid_and_context_id() {
        let mut p = PacketParser::new(PtmConfig {
            context_id_bytes: 4,
            ..PtmConfig::default()
        });
        p.push(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x80]);
        p.pull().unwrap();

        #[rustfmt::skip]
        p.push(&[
            0x3c, 0x2a,
            0x6e, 0x78, 0x56, 0x34, 0x12,
        ]);

        assert_eq!(p.pull().unwrap().kind, PacketKind::Vmid { vmid: 0x2a });
        assert_eq!(
            p.pull().unwrap().kind,
            PacketKind::ContextId { id: 0x1234_5678 }
        );
    }

    #[test]
    fn exception_return_and_markers() {
        let mut p = synced_parser();
        p.push(&[0x76, 0x66, 0x0c]);

        assert_eq!(p.pull().unwrap().kind, PacketKind::ExceptionReturn);
        assert_eq!(p.pull().unwrap().kind, PacketKind::Ignore);
        assert_eq!(p.pull().unwrap().kind, PacketKind::Trigger);
    }

    #[test]
    fn reserved_header() {
        let mut p = synced_parser();
        p.push(&[0x02, 0x76]);

        assert_eq!(
            p.pull().unwrap().kind,
            PacketKind::Reserved { header: 0x02 }
        );
        // parsing continues on the next byte
        assert_eq!(p.pull().unwrap().kind, PacketKind::ExceptionReturn);
    }

    #[test]
    fn broken_async_is_bad_sequence() {
        let mut p = synced_parser();
        // two zeros closed by a non-zero, non-0x80 byte
        p.push(&[0x00, 0x00, 0x76]);

        let packet = p.pull().unwrap();
        assert_eq!(packet.kind, PacketKind::BadSequence);
        assert_eq!(packet.raw.len(), 2);
        // the closing byte is a packet of its own
        assert_eq!(p.pull().unwrap().kind, PacketKind::ExceptionReturn);
    }

    #[test]
    fn cycle_accurate_atom() {
        let mut p = PacketParser::new(PtmConfig {
            cycle_accurate: true,
            ..PtmConfig::default()
        });
        p.push(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x80]);
        p.pull().unwrap();

        #[rustfmt::skip]
        p.push(&[
            0x10,
            0x85, 0x01,         // cycle count 0x85
        ]);

        assert_eq!(
            p.pull().unwrap().kind,
            PacketKind::Atom {
                en_bits: 0b11,
                count: 2,
                cycle_count: Some((1 << 7) | 0x05),
            }
        );
    }

    #[test]
    fn offsets_accumulate() {
        let mut p = synced_parser();
        p.push(&[0x76, 0x42, 0x25, 0x3c, 0x07]);

        assert_eq!(p.pull().unwrap().offset, 6);
        assert_eq!(p.pull().unwrap().offset, 7);
        assert_eq!(p.pull().unwrap().offset, 9);
    }

    #[test]
    fn finalize_incomplete() {
        let mut p = synced_parser();
        p.push(&[0x08, 0x00, 0x02]);

        assert_eq!(p.pull(), None);
        let packet = p.finalize().unwrap();
        assert_eq!(packet.kind, PacketKind::IncompleteEot);
        assert_eq!(packet.raw, vec![0x08, 0x00, 0x02]);
        assert_eq!(p.finalize(), None);
    }

    #[test]
    fn finalize_never_synced() {
        let mut p = parser();
        p.push(&[0x12, 0x34]);
        assert_eq!(p.pull().map(|p| p.kind), Some(PacketKind::NoSync));
        assert_eq!(p.finalize(), None);
    }
}
