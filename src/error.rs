//! Representations of errors returned by this crate.
//!
//! Trace *data* problems (bad packet sequences, unreadable opcodes) are
//! never errors: they are reflected in the packet and element streams so
//! that decoding continues. The types here cover memory map bookkeeping
//! and caller bugs.

use crate::memory::MemSpace;

/// Errors from registering or deregistering memory accessors on a
/// [`MemoryMap`](crate::MemoryMap).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryMapError {
    /// The new accessor overlaps a registered accessor whose memory
    /// space conflicts with it. Two accessors conflict iff their ranges
    /// overlap, their space masks intersect and neither is
    /// [`MemSpace::ANY`].
    #[error("range [{start:#x}, {end:#x}) overlaps an accessor in a conflicting memory space")]
    Overlap {
        /// Inclusive start of the rejected range.
        start: u64,

        /// Exclusive end of the rejected range.
        end: u64,
    },

    /// No registered accessor matches the range and space to remove.
    #[error("no accessor registered for [{start:#x}, {end:#x}) in space {space:?}")]
    NotFound {
        /// Inclusive start of the requested range.
        start: u64,

        /// Exclusive end of the requested range.
        end: u64,

        /// Memory space of the requested accessor.
        space: MemSpace,
    },
}

/// Errors from a [`MemoryMap`](crate::MemoryMap) read. A short read is
/// *not* an error; these cover addresses no accessor can serve at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    /// No accessor covers the address in any memory space.
    #[error("no accessor covers address {address:#x}")]
    NoAccessor {
        /// The unmapped address.
        address: u64,
    },

    /// An accessor covers the address, but not in the requested memory
    /// space.
    #[error("address {address:#x} is mapped, but not in memory space {space:?}")]
    SpaceMismatch {
        /// The requested address.
        address: u64,

        /// The memory space the read was issued in.
        space: MemSpace,
    },
}

/// Failures of a [`Decoder`](crate::Decoder) call that indicate a bug in
/// the calling code rather than a problem with the trace data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The packet stream requires target memory (it contains atoms or
    /// waypoint updates) but no memory map is installed on the decoder.
    #[error("packet stream requires target memory, but no memory map is installed")]
    NoMemoryMap,
}
