//! Defines PTM packets and their possible contents.

/// The instruction set a PE executes in. PFT distinguishes ARM, Thumb2
/// and ThumbEE; AArch64 is carried for front-ends that mix trace
/// sources but is never produced by a PTM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Isa {
    /// A32, fixed 4-byte instructions.
    Arm,

    /// Thumb2, mixed 2- and 4-byte instructions.
    Thumb2,

    /// ThumbEE. Encodings decode as Thumb2.
    ThumbEe,

    /// A64. Not produced by a PTM.
    Aarch64,
}

/// Why an I-sync packet was generated (I-sync information byte,
/// bits \[6:5\]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IsyncReason {
    /// Periodic synchronization; no state change is implied.
    Periodic,

    /// Tracing was enabled, or resumed after a filter gap.
    TraceOn,

    /// Tracing resumed after a trace unit buffer overflow.
    Overflow,

    /// The PE left debug state.
    DebugExit,
}

/// The type of a packet, with its decoded contents.
///
/// Branch and waypoint addresses are *partial*: only the low
/// `addr_bits` bits were sent, and the decoder merges them into the
/// previously observed packet address.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PacketKind {
    /// Bytes preceded the first alignment sync and were discarded.
    /// Emitted at most once, before the first [`Async`](Self::Async).
    NoSync,

    /// Alignment synchronization: five or more zero bytes followed by
    /// `0x80`. Packet boundaries are only known after one has been
    /// seen.
    Async,

    /// Instruction synchronization: a full snapshot of the PE state
    /// (address, ISA, security state, and optionally the context ID).
    Isync {
        /// The address the PE is executing at, bit 0 cleared.
        address: u32,

        /// ISA at `address`, from the address LSB and the AltISA flag.
        isa: Isa,

        /// Security state (information byte NS bit, inverted).
        secure: bool,

        /// Hypervisor mode.
        hyp: bool,

        /// Why this I-sync was generated.
        reason: IsyncReason,

        /// Context ID, present when the configured context ID width is
        /// non-zero.
        context_id: Option<u32>,

        cycle_count: Option<u32>,
    },

    /// Up to five atoms packed in one header byte. `en_bits` stores
    /// them LSB-first with the wire sense inverted: bit = 1 means
    /// Executed.
    Atom {
        en_bits: u8,

        /// Number of atoms, 1..=5.
        count: u8,

        cycle_count: Option<u32>,
    },

    /// A branch whose target could not be inferred from the program
    /// image: the low `addr_bits` bits of the target, plus optional ISA
    /// change, security change and exception information.
    BranchAddress {
        /// Partial target address, bit 0 cleared.
        address: u32,

        /// How many low bits of `address` are valid: 7, 14, 21, 28 or
        /// 32.
        addr_bits: u8,

        /// ISA at the target; only sent with a full 5-byte address.
        isa: Option<Isa>,

        /// Security state change, from the exception information byte.
        secure: Option<bool>,

        /// Exception number; the branch is an exception entry.
        exception: Option<u16>,

        cycle_count: Option<u32>,
    },

    /// The PE passed a waypoint without a branch being necessary
    /// (tracing a range end): the waypoint's address, encoded like a
    /// branch address.
    WaypointUpdate {
        /// Partial waypoint address, bit 0 cleared.
        address: u32,

        /// How many low bits of `address` are valid.
        addr_bits: u8,

        /// ISA at the waypoint; only sent with a full 5-byte address.
        isa: Option<Isa>,
    },

    /// A global timestamp. The value replaces the low `update_bits`
    /// bits of the accumulated timestamp.
    Timestamp {
        value: u64,

        /// How many low-order bits of the accumulated timestamp the
        /// value updates.
        update_bits: u8,

        cycle_count: Option<u32>,
    },

    /// The context ID changed.
    ContextId { id: u32 },

    /// The virtual machine ID changed.
    Vmid { vmid: u8 },

    /// The PE returned from an exception handler.
    ExceptionReturn,

    /// Padding emitted by the trace unit; carries no information.
    Ignore,

    /// An event counter / trigger marker.
    Trigger,

    /// A byte sequence that no packet can legally start with. The
    /// decoder loses synchronization on it.
    BadSequence,

    /// A header byte that is architecturally reserved.
    Reserved { header: u8 },

    /// The stream ended in the middle of a packet.
    IncompleteEot,
}

/// A packet as read out of a per-source byte stream, tagged with where
/// in the stream it started and the raw bytes it was parsed from (for
/// diagnostics and raw dumps).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TracePacket {
    /// Byte offset of the packet's first byte in the source stream.
    pub offset: usize,

    /// The raw bytes the packet was parsed from.
    pub raw: Vec<u8>,

    /// The kind (type) of this packet.
    pub kind: PacketKind,
}

impl TracePacket {
    /// The cycle count carried by this packet, if any.
    pub fn cycle_count(&self) -> Option<u32> {
        match self.kind {
            PacketKind::Isync { cycle_count, .. }
            | PacketKind::Atom { cycle_count, .. }
            | PacketKind::BranchAddress { cycle_count, .. }
            | PacketKind::Timestamp { cycle_count, .. } => cycle_count,
            _ => None,
        }
    }
}
