//! Memory spaces, memory accessors and the overlap-checked memory map
//! the instruction follower fetches opcodes through.
//!
//! The decoder never parses image files itself; callers load target
//! memory however they like and register it here as accessors. Each
//! accessor covers one address range in one (possibly composite) memory
//! space, and may be dedicated to a single trace source ID.

use crate::error::{MemoryMapError, ReadError};

/// A CPU-visible memory space, tagged by privilege and security regime.
///
/// Represented as a bitmask so that composite spaces (all Secure views,
/// any space at all) are expressed with the same type as a specific
/// exception-level view. A space *matches* another iff their masks
/// intersect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemSpace(u8);

impl MemSpace {
    /// EL1/EL0, Non-secure state.
    pub const EL1N: MemSpace = MemSpace(0x01);
    /// EL2, Non-secure state.
    pub const EL2N: MemSpace = MemSpace(0x02);
    /// EL1/EL0, Secure state.
    pub const EL1S: MemSpace = MemSpace(0x04);
    /// EL2, Secure state.
    pub const EL2S: MemSpace = MemSpace(0x08);
    /// EL3.
    pub const EL3: MemSpace = MemSpace(0x10);
    /// EL1/EL0, Realm state.
    pub const EL1R: MemSpace = MemSpace(0x20);
    /// EL2, Realm state.
    pub const EL2R: MemSpace = MemSpace(0x40);
    /// Root state.
    pub const ROOT: MemSpace = MemSpace(0x80);

    /// Any Non-secure view.
    pub const N: MemSpace = MemSpace(0x01 | 0x02);
    /// Any Secure view.
    pub const S: MemSpace = MemSpace(0x04 | 0x08 | 0x10);
    /// Any Realm or Root view.
    pub const R: MemSpace = MemSpace(0x20 | 0x40 | 0x80);
    /// Every memory space.
    pub const ANY: MemSpace = MemSpace(0xff);

    /// The raw bitmask.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Builds a space from a raw bitmask.
    pub const fn from_bits(bits: u8) -> MemSpace {
        MemSpace(bits)
    }

    /// Whether this space serves a read issued in `other`: the masks
    /// intersect.
    pub fn matches(self, other: MemSpace) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether this is the wildcard [`ANY`](Self::ANY) space.
    pub fn is_any(self) -> bool {
        self.0 == 0xff
    }

    /// Registration conflict rule: overlapping accessors conflict iff
    /// their spaces intersect and neither is `ANY`. `ANY` memory (a
    /// flat snapshot) may coexist with per-space views of the same
    /// range; everything else must be disjoint, so that a read is never
    /// satisfiable by two accessors.
    pub fn conflicts_with(self, other: MemSpace) -> bool {
        self.matches(other) && !self.is_any() && !other.is_any()
    }
}

/// A registered source of target memory bytes.
///
/// The three provided implementations ([`BufferAccessor`],
/// [`RegionAccessor`], [`CallbackAccessor`]) share this one capability:
/// copy bytes from `[start, end)` into a caller buffer. Reads never
/// cross out of the region; a read near the end returns the bytes that
/// are available (a *short read*).
pub trait MemoryAccessor {
    /// Inclusive start of the covered range.
    fn start(&self) -> u64;

    /// Exclusive end of the covered range.
    fn end(&self) -> u64;

    /// The memory space(s) this accessor serves.
    fn mem_space(&self) -> MemSpace;

    /// The trace source this accessor is dedicated to. 0 serves every
    /// source.
    fn trace_id(&self) -> u8 {
        0
    }

    /// Copies up to `buf.len()` bytes at `addr` into `buf`, returning
    /// the number of bytes copied. `addr` is within `[start, end)`.
    fn read(&mut self, addr: u64, buf: &mut [u8]) -> usize;

    /// Whether `addr` falls inside the covered range.
    fn covers(&self, addr: u64) -> bool {
        self.start() <= addr && addr < self.end()
    }
}

/// Memory accessor backed by one contiguous byte buffer.
pub struct BufferAccessor {
    start: u64,
    space: MemSpace,
    trace_id: u8,
    data: Vec<u8>,
}

impl BufferAccessor {
    /// A buffer of target memory starting at `start`, serving every
    /// trace source.
    pub fn new(start: u64, space: MemSpace, data: Vec<u8>) -> BufferAccessor {
        BufferAccessor {
            start,
            space,
            trace_id: 0,
            data,
        }
    }

    /// Dedicates this buffer to a single trace source.
    pub fn with_trace_id(mut self, trace_id: u8) -> BufferAccessor {
        self.trace_id = trace_id;
        self
    }
}

impl MemoryAccessor for BufferAccessor {
    fn start(&self) -> u64 {
        self.start
    }

    fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }

    fn mem_space(&self) -> MemSpace {
        self.space
    }

    fn trace_id(&self) -> u8 {
        self.trace_id
    }

    fn read(&mut self, addr: u64, buf: &mut [u8]) -> usize {
        let offset = (addr - self.start) as usize;
        let avail = self.data.len().saturating_sub(offset);
        let n = buf.len().min(avail);
        buf[..n].copy_from_slice(&self.data[offset..offset + n]);
        n
    }
}

/// Memory accessor composed of several non-contiguous regions, all in
/// the same memory space. Reads do not cross the gaps between regions;
/// a read running into a gap is short.
pub struct RegionAccessor {
    space: MemSpace,
    trace_id: u8,
    /// (start, bytes), sorted by start, non-overlapping.
    regions: Vec<(u64, Vec<u8>)>,
}

impl RegionAccessor {
    pub fn new(space: MemSpace) -> RegionAccessor {
        RegionAccessor {
            space,
            trace_id: 0,
            regions: vec![],
        }
    }

    /// Dedicates this accessor to a single trace source.
    pub fn with_trace_id(mut self, trace_id: u8) -> RegionAccessor {
        self.trace_id = trace_id;
        self
    }

    /// Adds a region. Regions must not overlap each other; a region
    /// overlapping an existing one is rejected.
    pub fn add_region(&mut self, start: u64, data: Vec<u8>) -> Result<(), MemoryMapError> {
        let end = start + data.len() as u64;
        for (rstart, rdata) in &self.regions {
            let rend = rstart + rdata.len() as u64;
            if start < rend && *rstart < end {
                return Err(MemoryMapError::Overlap { start, end });
            }
        }
        self.regions.push((start, data));
        self.regions.sort_by_key(|(start, _)| *start);
        Ok(())
    }
}

impl MemoryAccessor for RegionAccessor {
    fn start(&self) -> u64 {
        self.regions.first().map(|(start, _)| *start).unwrap_or(0)
    }

    fn end(&self) -> u64 {
        self.regions
            .last()
            .map(|(start, data)| start + data.len() as u64)
            .unwrap_or(0)
    }

    fn mem_space(&self) -> MemSpace {
        self.space
    }

    fn trace_id(&self) -> u8 {
        self.trace_id
    }

    fn covers(&self, addr: u64) -> bool {
        self.regions
            .iter()
            .any(|(start, data)| *start <= addr && addr < start + data.len() as u64)
    }

    fn read(&mut self, addr: u64, buf: &mut [u8]) -> usize {
        for (start, data) in &self.regions {
            if *start <= addr && addr < start + data.len() as u64 {
                let offset = (addr - start) as usize;
                let n = buf.len().min(data.len() - offset);
                buf[..n].copy_from_slice(&data[offset..offset + n]);
                return n;
            }
        }
        0
    }
}

/// Memory accessor backed by a caller callback, for memory that is not
/// resident in a buffer (an image file read on demand, a live debug
/// link). The callback receives the address and the memory space the
/// read was issued in and returns the number of bytes it wrote.
pub struct CallbackAccessor {
    start: u64,
    end: u64,
    space: MemSpace,
    trace_id: u8,
    read_fn: Box<dyn FnMut(u64, MemSpace, &mut [u8]) -> usize>,
}

impl CallbackAccessor {
    pub fn new<F>(start: u64, end: u64, space: MemSpace, read_fn: F) -> CallbackAccessor
    where
        F: FnMut(u64, MemSpace, &mut [u8]) -> usize + 'static,
    {
        CallbackAccessor {
            start,
            end,
            space,
            trace_id: 0,
            read_fn: Box::new(read_fn),
        }
    }

    /// Dedicates this accessor to a single trace source.
    pub fn with_trace_id(mut self, trace_id: u8) -> CallbackAccessor {
        self.trace_id = trace_id;
        self
    }
}

impl MemoryAccessor for CallbackAccessor {
    fn start(&self) -> u64 {
        self.start
    }

    fn end(&self) -> u64 {
        self.end
    }

    fn mem_space(&self) -> MemSpace {
        self.space
    }

    fn trace_id(&self) -> u8 {
        self.trace_id
    }

    fn read(&mut self, addr: u64, buf: &mut [u8]) -> usize {
        let space = self.space;
        (self.read_fn)(addr, space, buf)
    }
}

/// An overlap-checked registry of [`MemoryAccessor`]s, resolving
/// `(address, trace ID, memory space)` reads against them.
///
/// Registration rejects accessors that overlap an existing accessor in
/// a conflicting space, so a lookup can never be legitimately satisfied
/// by two accessors. Lookup prefers an accessor dedicated to the
/// reading trace source; accessors with trace ID 0 are the fallback.
#[derive(Default)]
pub struct MemoryMap {
    accessors: Vec<Box<dyn MemoryAccessor>>,
}

impl MemoryMap {
    pub fn new() -> MemoryMap {
        MemoryMap { accessors: vec![] }
    }

    /// Registers an accessor. Fails with
    /// [`MemoryMapError::Overlap`] if its range overlaps a registered
    /// accessor whose memory space conflicts (see
    /// [`MemSpace::conflicts_with`]).
    pub fn add<A>(&mut self, accessor: A) -> Result<(), MemoryMapError>
    where
        A: MemoryAccessor + 'static,
    {
        let (start, end) = (accessor.start(), accessor.end());
        let space = accessor.mem_space();
        for existing in &self.accessors {
            let overlaps = start < existing.end() && existing.start() < end;
            if overlaps && space.conflicts_with(existing.mem_space()) {
                return Err(MemoryMapError::Overlap { start, end });
            }
        }
        self.accessors.push(Box::new(accessor));
        Ok(())
    }

    /// Deregisters the accessor with exactly this range and space.
    pub fn remove(&mut self, start: u64, end: u64, space: MemSpace) -> Result<(), MemoryMapError> {
        let pos = self.accessors.iter().position(|a| {
            a.start() == start && a.end() == end && a.mem_space() == space
        });
        match pos {
            Some(pos) => {
                self.accessors.remove(pos);
                Ok(())
            }
            None => Err(MemoryMapError::NotFound { start, end, space }),
        }
    }

    /// Deregisters every accessor.
    pub fn clear(&mut self) {
        self.accessors.clear();
    }

    /// Whether any accessor is registered.
    pub fn is_empty(&self) -> bool {
        self.accessors.is_empty()
    }

    /// Reads up to `buf.len()` bytes at `addr` on behalf of trace
    /// source `trace_id`, in memory space `space`.
    ///
    /// Resolution is two-pass: accessors dedicated to `trace_id` first,
    /// then accessors serving every source. Returns the bytes copied;
    /// short reads at region ends are valid and the caller sees the
    /// actual count. Fails with [`ReadError::NoAccessor`] for unmapped
    /// addresses and [`ReadError::SpaceMismatch`] for addresses mapped
    /// only in other spaces.
    pub fn read(
        &mut self,
        addr: u64,
        trace_id: u8,
        space: MemSpace,
        buf: &mut [u8],
    ) -> Result<usize, ReadError> {
        let mut covered = false;
        for pass in 0..2 {
            for accessor in self.accessors.iter_mut() {
                // dedicated accessors first; the fallback pass only
                // considers accessors serving every source
                let eligible = if pass == 0 {
                    accessor.trace_id() != 0 && accessor.trace_id() == trace_id
                } else {
                    accessor.trace_id() == 0
                };
                if !eligible || !accessor.covers(addr) {
                    continue;
                }
                if accessor.mem_space().matches(space) {
                    return Ok(accessor.read(addr, buf));
                }
                covered = true;
            }
        }
        if covered {
            Err(ReadError::SpaceMismatch { address: addr, space })
        } else {
            Err(ReadError::NoAccessor { address: addr })
        }
    }
}
