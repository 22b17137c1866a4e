//! A [sans-I/O](https://sans-io.readthedocs.io/how-to-sans-io.html)
//! decoder for the ARM CoreSight Program Trace Macrocell (PTM) protocol
//! as specified in the [CoreSight Program Flow Trace architecture
//! specification, PFTv1.0 and
//! PFTv1.1](https://developer.arm.com/documentation/ihi0035/b/). Any
//! references in this code base refer to this document.
//!
//! Common abbreviations:
//!
//! - PTM: program trace macrocell;
//! - PFT: program flow trace (the protocol the PTM emits);
//! - PE: processing element (the traced CPU);
//! - PC: program counter;
//! - ISA: instruction set architecture (ARM, Thumb2, ThumbEE);
//! - atom: one bit of execution information (E = executed, N = not);
//! - waypoint: an instruction that ends an instruction range (a branch,
//!   an ISB, or optionally a DSB/DMB).
//!
//! Decoding a PTM stream is a four stage pipeline:
//!
//! 1. [`FrameDemuxer`] splits the raw 16-byte CoreSight frames into one
//!    byte stream per trace source ID;
//! 2. [`PacketParser`] tokenizes a per-source byte stream into
//!    [`TracePacket`]s;
//! 3. [`Decoder`] walks the packets and emits [`TraceElement`]s,
//!    reconstructing executed instruction ranges by
//! 4. following opcodes read through a [`MemoryMap`] of the target's
//!    memory.
//!
//! Stages are independent: a caller that already has a single-source
//! stream skips the demuxer, and a caller that only wants packets skips
//! the decoder.
//!
//! Usage is simple:
//! ```
//! use ptm_decode::{PacketParser, PtmConfig};
//!
//! // captured from a TPIU or ETB, one trace source
//! let stream: &[u8] = &[
//!     0x00, 0x00, 0x00, 0x00, 0x00, 0x80, // A-sync
//!     0x08, 0x00, 0x02, 0x00, 0x80, 0x08, // I-sync
//! ];
//! let mut parser = PacketParser::new(PtmConfig::default());
//! parser.push(stream);
//! while let Some(packet) = parser.pull() {
//!     // ...
//! }
//! ```
#[deny(rustdoc::broken_intra_doc_links)]
mod decoder;
mod element;
mod error;
mod frame;
mod instruction;
mod memory;
mod packet;
mod parser;

pub use decoder::Decoder;
pub use element::{
    exception_name, ElementKind, ExceptionLevel, InstrRange, PeContext, TraceElement,
    TraceOnReason,
};
pub use error::{DecodeError, MemoryMapError, ReadError};
pub use frame::{FrameDemuxer, FrameMode};
pub use instruction::{InstrInfo, InstrKind};
pub use memory::{
    BufferAccessor, CallbackAccessor, MemSpace, MemoryAccessor, MemoryMap, RegionAccessor,
};
pub use packet::{Isa, IsyncReason, PacketKind, TracePacket};
pub use parser::PacketParser;

/// Static configuration of a traced PTM source. Mirrors the programmed
/// state of the trace unit; the values must match what the hardware was
/// configured with when the stream was captured, or packet boundaries
/// will be misread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PtmConfig {
    /// The 7-bit CoreSight trace source ID of this PTM.
    pub trace_id: u8,

    /// Cycle-accurate tracing: I-sync, atom and branch address packets
    /// carry a trailing cycle count.
    pub cycle_accurate: bool,

    /// Whether the PTM return stack was enabled. When disabled, indirect
    /// returns do not consume the decoder's return stack and the address
    /// is lost until the next address packet.
    pub return_stack_enabled: bool,

    /// Whether VMID tracing is enabled.
    pub vmid_enabled: bool,

    /// Whether timestamp packets are expected in the stream.
    pub timestamp_enabled: bool,

    /// Whether the timestamp counter is 64 bits wide. Bounds the length
    /// of the timestamp packet payload.
    pub timestamp_64bit: bool,

    /// Whether timestamps count in binary rather than gray code. Not
    /// interpreted by the decoder; carried for front-ends that render
    /// timestamp values.
    pub timestamp_binary: bool,

    /// Treat DSB and DMB barriers as waypoints, as configured in the
    /// trace unit's control register.
    pub dsb_dmb_waypoint: bool,

    /// Width of the context ID packet payload in bytes, 0..=4.
    pub context_id_bytes: u8,
}

impl Default for PtmConfig {
    fn default() -> Self {
        PtmConfig {
            trace_id: 0,
            cycle_accurate: false,
            return_stack_enabled: true,
            vmid_enabled: true,
            timestamp_enabled: true,
            timestamp_64bit: false,
            timestamp_binary: false,
            dsb_dmb_waypoint: false,
            context_id_bytes: 0,
        }
    }
}
