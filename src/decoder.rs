//! Translate PTM packets into generic trace elements.
//!
//! The decoder is a state machine over [`TracePacket`]s. It holds the
//! full PE state (address, ISA, security, context) between packets,
//! reconstructs partial branch addresses, and expands atoms into
//! executed instruction ranges by walking opcodes read through a
//! [`MemoryMap`] until the next waypoint.
//!
//! Trace data problems never abort a decode: bad packet sequences
//! resynchronize behind a fresh [`NoSync`](ElementKind::NoSync)
//! element, and unreadable opcodes surface as
//! [`AddrNacc`](ElementKind::AddrNacc) elements with the address
//! invalidated until the next address packet.

use crate::element::{
    ElementKind, ExceptionLevel, InstrRange, PeContext, TraceElement, TraceOnReason,
};
use crate::error::DecodeError;
use crate::instruction::{self, InstrInfo, InstrKind};
use crate::memory::{MemSpace, MemoryMap};
use crate::packet::{Isa, IsyncReason, PacketKind, TracePacket};
use crate::PtmConfig;

/// Walk guard: a range longer than this without a waypoint means the
/// program image does not match the trace.
const MAX_WALK_INSTRUCTIONS: u32 = 4096;

/// The return stack of real PTM hardware is far shallower than this;
/// the oldest entry is dropped on overflow.
const RETURN_STACK_DEPTH: usize = 64;

/// Synchronization state of the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    /// Nothing has been seen yet.
    NoSync,

    /// Discarding packets until an A-sync.
    WaitSync,

    /// A-sync seen; discarding packets until an I-sync provides the PE
    /// state.
    WaitIsync,

    /// Fully synchronized.
    Decode,
}

/// The PE state the decoder maintains between packets.
#[derive(Debug, Clone)]
struct PeState {
    addr: u32,
    addr_valid: bool,
    /// The last address carried by an address packet, used to fill in
    /// the bits a partial branch address did not send.
    last_packet_addr: u32,
    isa: Isa,
    secure: bool,
    hyp: bool,
    context_id: u32,
    vmid: u8,
    timestamp: u64,
}

impl Default for PeState {
    fn default() -> Self {
        PeState {
            addr: 0,
            addr_valid: false,
            last_packet_addr: 0,
            isa: Isa::Arm,
            secure: false,
            hyp: false,
            context_id: 0,
            vmid: 0,
            timestamp: 0,
        }
    }
}

/// What a single follower walk did with its atom.
enum WalkOutcome {
    /// The walk ended on a branch; the atom is used up.
    Consumed,

    /// The walk ended on a barrier, which emits a range but leaves the
    /// atom for the next waypoint.
    NotConsumed,

    /// An opcode could not be read (or the walk guard tripped); the
    /// address is invalid and the packet's remaining atoms are void.
    Failed,
}

/// PTM packet to trace element decoder for one trace source.
pub struct Decoder {
    config: PtmConfig,
    mem: Option<MemoryMap>,
    state: SyncState,
    pe: PeState,
    return_stack: Vec<(u32, Isa)>,
    /// The PE context has been reported at least once; used to
    /// deduplicate `PeContext` elements.
    context_known: bool,
    /// Tracing is on from the consumer's point of view. Cleared on
    /// desync so the next I-sync reports trace-on again.
    trace_active: bool,
}

impl Decoder {
    pub fn new(config: PtmConfig) -> Decoder {
        Decoder {
            config,
            mem: None,
            state: SyncState::NoSync,
            pe: PeState::default(),
            return_stack: vec![],
            context_known: false,
            trace_active: false,
        }
    }

    /// Installs the memory map opcodes are fetched through.
    pub fn with_memory_map(mut self, mem: MemoryMap) -> Decoder {
        self.mem = Some(mem);
        self
    }

    /// Installs or replaces the memory map.
    pub fn set_memory_map(&mut self, mem: MemoryMap) {
        self.mem = Some(mem);
    }

    /// The installed memory map. Mutating it between `decode` calls is
    /// fine; the borrow rules make mutating it during one impossible.
    pub fn memory_map_mut(&mut self) -> Option<&mut MemoryMap> {
        self.mem.as_mut()
    }

    /// Removes and returns the installed memory map.
    pub fn take_memory_map(&mut self) -> Option<MemoryMap> {
        self.mem.take()
    }

    /// The current PE address, when it is known.
    pub fn address(&self) -> Option<u32> {
        if self.pe.addr_valid {
            Some(self.pe.addr)
        } else {
            None
        }
    }

    /// Forgets all trace state. The next packet behaves like the first
    /// ever seen. The memory map is kept.
    pub fn reset(&mut self) {
        self.state = SyncState::NoSync;
        self.pe = PeState::default();
        self.return_stack.clear();
        self.context_known = false;
        self.trace_active = false;
    }

    /// Decodes a run of packets, appending the produced elements to
    /// `out`. Elements appear in strict packet order.
    pub fn decode(
        &mut self,
        packets: &[TracePacket],
        out: &mut Vec<TraceElement>,
    ) -> Result<(), DecodeError> {
        for packet in packets {
            self.process_packet(packet, out)?;
        }
        Ok(())
    }

    /// Signals the end of the trace data.
    pub fn end(&mut self, out: &mut Vec<TraceElement>) {
        out.push(TraceElement::new(ElementKind::EndOfTrace));
    }

    /// Decodes one packet.
    pub fn process_packet(
        &mut self,
        packet: &TracePacket,
        out: &mut Vec<TraceElement>,
    ) -> Result<(), DecodeError> {
        match self.state {
            SyncState::NoSync => {
                // announce the lack of synchronization exactly once
                out.push(TraceElement::new(ElementKind::NoSync));
                self.state = if packet.kind == PacketKind::Async {
                    SyncState::WaitIsync
                } else {
                    SyncState::WaitSync
                };
                Ok(())
            }
            SyncState::WaitSync => {
                if packet.kind == PacketKind::Async {
                    self.state = SyncState::WaitIsync;
                }
                Ok(())
            }
            SyncState::WaitIsync => {
                if let PacketKind::Isync {
                    address,
                    isa,
                    secure,
                    hyp,
                    reason,
                    context_id,
                    cycle_count,
                } = packet.kind
                {
                    self.process_isync(
                        address, isa, secure, hyp, reason, context_id, cycle_count, out,
                    );
                    self.state = SyncState::Decode;
                }
                Ok(())
            }
            SyncState::Decode => self.decode_packet(packet, out),
        }
    }

    fn decode_packet(
        &mut self,
        packet: &TracePacket,
        out: &mut Vec<TraceElement>,
    ) -> Result<(), DecodeError> {
        match packet.kind {
            PacketKind::Async
            | PacketKind::NoSync
            | PacketKind::Ignore
            | PacketKind::Trigger => Ok(()),

            PacketKind::Isync {
                address,
                isa,
                secure,
                hyp,
                reason,
                context_id,
                cycle_count,
            } => {
                self.process_isync(
                    address, isa, secure, hyp, reason, context_id, cycle_count, out,
                );
                Ok(())
            }

            PacketKind::BranchAddress {
                address,
                addr_bits,
                isa,
                secure,
                exception,
                cycle_count,
            } => self.process_branch(address, addr_bits, isa, secure, exception, cycle_count, out),

            PacketKind::Atom {
                en_bits,
                count,
                cycle_count,
            } => self.process_atoms(en_bits, count, cycle_count, out),

            PacketKind::WaypointUpdate {
                address,
                addr_bits,
                isa,
            } => self.process_waypoint(address, addr_bits, isa, out),

            PacketKind::Timestamp {
                value,
                update_bits,
                cycle_count,
            } => {
                let mask = if update_bits >= 64 {
                    u64::MAX
                } else {
                    (1u64 << update_bits) - 1
                };
                self.pe.timestamp = (self.pe.timestamp & !mask) | (value & mask);
                if self.config.timestamp_enabled {
                    out.push(TraceElement::with_cycle_count(
                        ElementKind::Timestamp {
                            timestamp: self.pe.timestamp,
                        },
                        cycle_count,
                    ));
                }
                Ok(())
            }

            PacketKind::ContextId { id } => {
                if id != self.pe.context_id {
                    self.pe.context_id = id;
                    out.push(TraceElement::new(ElementKind::PeContext(self.pe_context())));
                }
                Ok(())
            }

            PacketKind::Vmid { vmid } => {
                if self.config.vmid_enabled && vmid != self.pe.vmid {
                    self.pe.vmid = vmid;
                    out.push(TraceElement::new(ElementKind::PeContext(self.pe_context())));
                }
                Ok(())
            }

            PacketKind::ExceptionReturn => {
                // the return stack is deliberately left alone; the
                // handler's own return traces as an ordinary indirect
                // branch
                out.push(TraceElement::new(ElementKind::ExceptionReturn));
                Ok(())
            }

            PacketKind::BadSequence | PacketKind::Reserved { .. } => {
                // lost the packet boundary; everything up to the next
                // A-sync/I-sync pair is noise
                self.pe.addr_valid = false;
                self.trace_active = false;
                self.state = SyncState::WaitSync;
                out.push(TraceElement::new(ElementKind::NoSync));
                Ok(())
            }

            PacketKind::IncompleteEot => {
                out.push(TraceElement::new(ElementKind::EndOfTrace));
                Ok(())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn process_isync(
        &mut self,
        address: u32,
        isa: Isa,
        secure: bool,
        hyp: bool,
        reason: IsyncReason,
        context_id: Option<u32>,
        cycle_count: Option<u32>,
        out: &mut Vec<TraceElement>,
    ) {
        let context_changed = !self.context_known
            || isa != self.pe.isa
            || secure != self.pe.secure
            || hyp != self.pe.hyp
            || context_id.map_or(false, |id| id != self.pe.context_id);

        self.pe.addr = address;
        self.pe.addr_valid = true;
        self.pe.last_packet_addr = address;
        self.pe.isa = isa;
        self.pe.secure = secure;
        self.pe.hyp = hyp;
        if let Some(id) = context_id {
            self.pe.context_id = id;
        }
        self.context_known = true;

        let trace_on = match reason {
            IsyncReason::TraceOn => Some(TraceOnReason::Normal),
            IsyncReason::Overflow => Some(TraceOnReason::Overflow),
            IsyncReason::DebugExit => Some(TraceOnReason::DebugRestart),
            IsyncReason::Periodic if !self.trace_active => Some(TraceOnReason::Normal),
            IsyncReason::Periodic => None,
        };
        self.trace_active = true;
        if let Some(reason) = trace_on {
            out.push(TraceElement::with_cycle_count(
                ElementKind::TraceOn { reason },
                cycle_count,
            ));
        }
        // a change-free periodic I-sync must not repeat the context
        if context_changed {
            out.push(TraceElement::with_cycle_count(
                ElementKind::PeContext(self.pe_context()),
                cycle_count,
            ));
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn process_branch(
        &mut self,
        address: u32,
        addr_bits: u8,
        isa: Option<Isa>,
        secure: Option<bool>,
        exception: Option<u16>,
        cycle_count: Option<u32>,
        out: &mut Vec<TraceElement>,
    ) -> Result<(), DecodeError> {
        let new_addr = merge_address(self.pe.last_packet_addr, address, addr_bits);

        if let Some(number) = exception {
            out.push(TraceElement::with_cycle_count(
                ElementKind::Exception {
                    number,
                    preferred_return_address: self.pe.addr,
                },
                cycle_count,
            ));
        } else if self.pe.addr_valid && self.mem.is_some() {
            // the packet stands for a branch the program image could
            // not predict: walk to it as an implicit Executed atom
            loop {
                match self.follow_atom(true, cycle_count, out) {
                    WalkOutcome::NotConsumed => continue,
                    WalkOutcome::Consumed | WalkOutcome::Failed => break,
                }
            }
        }

        // the packet address is ground truth, even after a failed walk
        self.pe.addr = new_addr;
        self.pe.addr_valid = true;
        self.pe.last_packet_addr = new_addr;
        if let Some(isa) = isa {
            self.pe.isa = isa;
        }
        if let Some(secure) = secure {
            self.pe.secure = secure;
        }
        Ok(())
    }

    fn process_atoms(
        &mut self,
        en_bits: u8,
        count: u8,
        cycle_count: Option<u32>,
        out: &mut Vec<TraceElement>,
    ) -> Result<(), DecodeError> {
        if self.mem.is_none() {
            return Err(DecodeError::NoMemoryMap);
        }
        if !self.pe.addr_valid {
            // nowhere to walk from; the atoms carry no usable
            // information until the next address packet
            return Ok(());
        }

        for i in 0..count {
            let executed = en_bits >> i & 1 == 1;
            loop {
                match self.follow_atom(executed, cycle_count, out) {
                    WalkOutcome::Consumed => break,
                    WalkOutcome::NotConsumed => continue,
                    WalkOutcome::Failed => return Ok(()),
                }
            }
        }
        Ok(())
    }

    fn process_waypoint(
        &mut self,
        address: u32,
        addr_bits: u8,
        isa: Option<Isa>,
        out: &mut Vec<TraceElement>,
    ) -> Result<(), DecodeError> {
        let target = merge_address(self.pe.last_packet_addr, address, addr_bits);
        self.pe.last_packet_addr = target;

        if self.pe.addr_valid {
            if self.mem.is_none() {
                return Err(DecodeError::NoMemoryMap);
            }
            self.follow_to(target, out);
        }
        if let Some(isa) = isa {
            self.pe.isa = isa;
        }
        Ok(())
    }

    fn pe_context(&self) -> PeContext {
        PeContext {
            isa: self.pe.isa,
            secure: self.pe.secure,
            el: if self.pe.hyp {
                ExceptionLevel::El2
            } else {
                ExceptionLevel::El0
            },
            context_id: self.pe.context_id,
            vmid: self.pe.vmid,
            is_64bit: false,
        }
    }

    fn mem_space(&self) -> MemSpace {
        if self.pe.secure {
            MemSpace::S
        } else {
            MemSpace::N
        }
    }

    fn push_return(&mut self, addr: u32) {
        if !self.config.return_stack_enabled {
            return;
        }
        if self.return_stack.len() == RETURN_STACK_DEPTH {
            self.return_stack.remove(0);
        }
        self.return_stack.push((addr, self.pe.isa));
    }

    /// Walks from the current address to the next waypoint and applies
    /// one atom to it.
    fn follow_atom(
        &mut self,
        executed: bool,
        cycle_count: Option<u32>,
        out: &mut Vec<TraceElement>,
    ) -> WalkOutcome {
        let space = self.mem_space();
        let range_start = self.pe.addr;
        let range_isa = self.pe.isa;
        let mut count = 0;

        loop {
            if count >= MAX_WALK_INSTRUCTIONS {
                out.push(TraceElement::with_cycle_count(
                    ElementKind::AddrNacc {
                        address: self.pe.addr,
                        space,
                    },
                    cycle_count,
                ));
                self.pe.addr_valid = false;
                return WalkOutcome::Failed;
            }

            let instr = match self.read_instr(self.pe.addr, space) {
                Some(instr) => instr,
                None => {
                    out.push(TraceElement::with_cycle_count(
                        ElementKind::AddrNacc {
                            address: self.pe.addr,
                            space,
                        },
                        cycle_count,
                    ));
                    self.pe.addr_valid = false;
                    return WalkOutcome::Failed;
                }
            };

            count += 1;
            let next_addr = self.pe.addr.wrapping_add(u32::from(instr.size));

            let barrier = instr.kind == InstrKind::Isb
                || (instr.kind == InstrKind::DsbDmb && self.config.dsb_dmb_waypoint);
            if barrier {
                // a barrier ends the range but does not use the atom
                self.pe.addr = next_addr;
                out.push(TraceElement::with_cycle_count(
                    ElementKind::InstrRange(InstrRange {
                        start: range_start,
                        end: next_addr,
                        isa: range_isa,
                        num_instr: count,
                        last_instr_size: instr.size,
                        last_exec: true,
                        last_type: instr.kind,
                        last_cond: instr.conditional,
                        last_link: false,
                        last_return: false,
                    }),
                    cycle_count,
                ));
                return WalkOutcome::NotConsumed;
            }

            match instr.kind {
                InstrKind::Branch => {
                    if executed {
                        if instr.link {
                            self.push_return(next_addr);
                        }
                        match instr.branch_target {
                            Some(target) => self.pe.addr = target,
                            None => self.pe.addr_valid = false,
                        }
                    } else {
                        self.pe.addr = next_addr;
                    }
                }
                InstrKind::BranchIndirect => {
                    if executed {
                        if instr.link {
                            self.push_return(next_addr);
                        }
                        self.pe.addr_valid = false;
                        if instr.is_return && self.config.return_stack_enabled {
                            if let Some((addr, isa)) = self.return_stack.pop() {
                                self.pe.addr = addr;
                                self.pe.isa = isa;
                                self.pe.addr_valid = true;
                            }
                        }
                    } else {
                        self.pe.addr = next_addr;
                    }
                }
                _ => {
                    // straight-line instruction
                    self.pe.addr = next_addr;
                    continue;
                }
            }

            if executed {
                if let Some(isa) = instr.next_isa {
                    self.pe.isa = isa;
                }
            }

            out.push(TraceElement::with_cycle_count(
                ElementKind::InstrRange(InstrRange {
                    start: range_start,
                    end: next_addr,
                    isa: range_isa,
                    num_instr: count,
                    last_instr_size: instr.size,
                    last_exec: executed,
                    last_type: instr.kind,
                    last_cond: instr.conditional,
                    last_link: instr.link,
                    last_return: instr.is_return,
                }),
                cycle_count,
            ));
            return WalkOutcome::Consumed;
        }
    }

    /// Walks straight-line execution up to and including the
    /// instruction at `target` (a waypoint update: no atom involved,
    /// everything executed).
    fn follow_to(&mut self, target: u32, out: &mut Vec<TraceElement>) {
        let space = self.mem_space();
        let range_start = self.pe.addr;
        let range_isa = self.pe.isa;
        let mut count = 0;

        loop {
            if count >= MAX_WALK_INSTRUCTIONS || self.pe.addr > target {
                self.pe.addr_valid = false;
                return;
            }

            let instr = match self.read_instr(self.pe.addr, space) {
                Some(instr) => instr,
                None => {
                    out.push(TraceElement::new(ElementKind::AddrNacc {
                        address: self.pe.addr,
                        space,
                    }));
                    self.pe.addr_valid = false;
                    return;
                }
            };

            count += 1;
            let at_target = self.pe.addr == target;
            let next_addr = self.pe.addr.wrapping_add(u32::from(instr.size));
            self.pe.addr = next_addr;

            if at_target {
                out.push(TraceElement::new(ElementKind::InstrRange(InstrRange {
                    start: range_start,
                    end: next_addr,
                    isa: range_isa,
                    num_instr: count,
                    last_instr_size: instr.size,
                    last_exec: true,
                    last_type: instr.kind,
                    last_cond: instr.conditional,
                    last_link: instr.link,
                    last_return: instr.is_return,
                })));
                return;
            }
        }
    }

    /// Fetches and classifies the opcode at `addr`. `None` if the
    /// memory map cannot produce enough bytes.
    fn read_instr(&mut self, addr: u32, space: MemSpace) -> Option<InstrInfo> {
        let mem = self.mem.as_mut()?;
        let trace_id = self.config.trace_id;
        let isa = self.pe.isa;

        let mut buf = [0; 4];
        match isa {
            Isa::Arm | Isa::Aarch64 => {
                fetch_exact(mem, addr, trace_id, space, &mut buf)?;
                instruction::decode(isa, &buf, addr)
            }
            Isa::Thumb2 | Isa::ThumbEe => {
                fetch_exact(mem, addr, trace_id, space, &mut buf[..2])?;
                let hw1 = u16::from_le_bytes([buf[0], buf[1]]);
                let len = if instruction::thumb_is_32bit(hw1) {
                    let (_, rest) = buf.split_at_mut(2);
                    fetch_exact(mem, addr.wrapping_add(2), trace_id, space, rest)?;
                    4
                } else {
                    2
                };
                instruction::decode(isa, &buf[..len], addr)
            }
        }
    }
}

/// Merges a partial packet address into the last seen one: the low
/// `addr_bits` bits come from the packet, the rest are retained.
fn merge_address(last: u32, packet: u32, addr_bits: u8) -> u32 {
    let mask = if addr_bits >= 32 {
        u32::MAX
    } else {
        (1u32 << addr_bits) - 1
    };
    (last & !mask) | (packet & mask)
}

fn fetch_exact(
    mem: &mut MemoryMap,
    addr: u32,
    trace_id: u8,
    space: MemSpace,
    buf: &mut [u8],
) -> Option<()> {
    match mem.read(u64::from(addr), trace_id, space, buf) {
        Ok(n) if n == buf.len() => Some(()),
        _ => None,
    }
}
