//! Generic trace elements, the decoder's output.
//!
//! Elements are protocol-independent: a front-end consuming them needs
//! no knowledge of PFT packet formats. Rendering them to text is a
//! front-end concern; the `ptm-decode` binary prints their `Debug`
//! form.

use crate::instruction::InstrKind;
use crate::memory::MemSpace;
use crate::packet::Isa;

/// Why tracing (re)started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TraceOnReason {
    /// Trace begin, or re-enable after a filter gap.
    Normal,

    /// Tracing resumed after a trace unit buffer overflow; instructions
    /// were lost.
    Overflow,

    /// Tracing resumed when the PE left debug state.
    DebugRestart,
}

impl TraceOnReason {
    /// Short human description, as front-ends conventionally print it.
    pub fn description(self) -> &'static str {
        match self {
            TraceOnReason::Normal => "begin or filter",
            TraceOnReason::Overflow => "overflow",
            TraceOnReason::DebugRestart => "debug restart",
        }
    }
}

/// The exception level a PE executes at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExceptionLevel {
    El0,
    El1,
    El2,
    El3,
}

/// A snapshot of the PE context, emitted when it is first known and
/// whenever it changes. Two consecutive `PeContext` elements always
/// differ in at least one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeContext {
    pub isa: Isa,

    /// Secure state.
    pub secure: bool,

    /// Exception level, as far as PFT exposes it: EL2 when the
    /// hypervisor bit is set.
    pub el: ExceptionLevel,

    /// Context ID of the executing process.
    pub context_id: u32,

    /// Virtual machine ID.
    pub vmid: u8,

    /// Whether the PE executes in an AArch64 state. Always false for a
    /// PTM.
    pub is_64bit: bool,
}

/// A maximal run of instructions executed back to back, ended by a
/// waypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InstrRange {
    /// Address of the first instruction.
    pub start: u32,

    /// Address one past the last instruction (`start + sum of sizes`).
    pub end: u32,

    /// ISA the range was executed in.
    pub isa: Isa,

    /// Number of instructions in the range.
    pub num_instr: u32,

    /// Size in bytes of the last instruction.
    pub last_instr_size: u8,

    /// Whether the last instruction was executed (a conditional branch
    /// may be traced as Not-executed).
    pub last_exec: bool,

    /// Classification of the last instruction.
    pub last_type: InstrKind,

    /// Whether the last instruction was conditional.
    pub last_cond: bool,

    /// Whether the last instruction was a branch with link.
    pub last_link: bool,

    /// Whether the last instruction was a return.
    pub last_return: bool,
}

/// The type of a trace element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ElementKind {
    /// The decoder has no synchronization; trace data was skipped.
    NoSync,

    /// Tracing (re)started.
    TraceOn { reason: TraceOnReason },

    /// The PE context became known or changed.
    PeContext(PeContext),

    /// A run of executed instructions.
    InstrRange(InstrRange),

    /// An opcode could not be read from the memory map; the walk
    /// stopped and the address is lost until the next address packet.
    AddrNacc { address: u32, space: MemSpace },

    /// The PE took an exception. See [`exception_name`] for the PFT
    /// type names.
    Exception {
        number: u16,

        /// The address the exception will return to (the instruction
        /// the PE was at when it was taken).
        preferred_return_address: u32,
    },

    /// The PE returned from an exception handler.
    ExceptionReturn,

    /// The accumulated global timestamp.
    Timestamp { timestamp: u64 },

    /// End of the trace data.
    EndOfTrace,
}

/// One decoded trace element, with the cycle count of the packet that
/// produced it, when cycle-accurate tracing carried one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TraceElement {
    pub kind: ElementKind,
    pub cycle_count: Option<u32>,
}

impl TraceElement {
    pub fn new(kind: ElementKind) -> TraceElement {
        TraceElement {
            kind,
            cycle_count: None,
        }
    }

    pub fn with_cycle_count(kind: ElementKind, cycle_count: Option<u32>) -> TraceElement {
        TraceElement { kind, cycle_count }
    }
}

/// The PFT name of an exception number, as carried in branch address
/// exception information bytes.
pub fn exception_name(number: u16) -> &'static str {
    match number {
        0 => "none",
        1 => "debug halt",
        2 => "SMC",
        3 => "hyp call",
        4 => "async data abort",
        5 => "jazelle",
        8 => "reset",
        9 => "undefined instruction",
        10 => "SVC",
        11 => "prefetch abort",
        12 => "data abort",
        13 => "generic",
        14 => "IRQ",
        15 => "FIQ",
        _ => "reserved",
    }
}
