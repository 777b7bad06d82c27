//! The filter virtual machine: a stack+trie bytecode interpreter evaluating
//! boolean predicates over a current BGP (and optionally wrapping MRT)
//! message.

use crate::codec::bgp::{BgpMsg, BgpMsgFlags};
use crate::codec::mrt::MrtMsg;
use crate::error::VmError;
use crate::filter::opcodes::{arg, extend_arg, make_op, opcode, Bytecode, Opcode, PacketAccess};
use crate::models::bgp::{AttrType, BgpMsgType, Community, ExtendedCommunity, LargeCommunity};
use crate::models::network::{AddrFamily, NetAddr};
use crate::trie::PatriciaTrie;
use std::fmt::Write as _;

/// Feeder constant slot: peer address of the wrapping MRT record.
pub const K_PEER_ADDR: usize = 0;
/// Feeder constant slot: peer AS of the wrapping MRT record.
pub const K_PEER_AS: usize = 1;
/// First constant slot not reserved for feeder values.
pub const K_BASE_SIZE: usize = 2;
/// Highest user constant register index.
pub const K_MAX: usize = 32;

/// Reserved scratch tries, cleared before every execution.
pub const VM_TMPTRIE: usize = 0;
pub const VM_TMPTRIE6: usize = 1;

const BLK_STACK_SIZE: usize = 32;

/// Intrinsic function indices addressable by `CALL`.
pub const VM_WITHDRAWN_INSERT_FN: u32 = 0;
pub const VM_WITHDRAWN_ACCUMULATE_FN: u32 = 1;
pub const VM_ALL_WITHDRAWN_INSERT_FN: u32 = 2;
pub const VM_ALL_WITHDRAWN_ACCUMULATE_FN: u32 = 3;
pub const VM_NLRI_INSERT_FN: u32 = 4;
pub const VM_NLRI_ACCUMULATE_FN: u32 = 5;
pub const VM_ALL_NLRI_INSERT_FN: u32 = 6;
pub const VM_ALL_NLRI_ACCUMULATE_FN: u32 = 7;
pub const VM_FUNCS_COUNT: u32 = 8;

/// Operand cell. Opcode contracts pair tags with operations; the VM never
/// reinterprets a cell under the wrong tag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell {
    Addr(NetAddr),
    As(u32),
    /// Wildcard AS pattern element, matches any hop.
    AsAny,
    Comm(Community),
    ExComm(ExtendedCommunity),
    LargeComm(LargeCommunity),
    Value(i32),
    /// Span of cells in the VM heap.
    Array { base: u32, nels: u32 },
}

/// Heap allocation zone: permanent survives across `filter()` calls,
/// temporary is reset by every one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapZone {
    Permanent,
    Temporary,
}

/// Which trie relationship a match opcode tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchKind {
    Exact,
    Subnet,
    Supernet,
    Related,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AspKind {
    Match,
    Starts,
    Ends,
    Exact,
}

/// The filter virtual machine.
pub struct FilterVm {
    code: Vec<Bytecode>,
    k: Vec<Cell>,
    tries: Vec<PatriciaTrie<()>>,
    curtrie: usize,
    curtrie6: usize,
    stack: Vec<Cell>,
    blk: Vec<usize>,
    heap: Vec<Cell>,
    highwater: usize,
    dynmarker: usize,
    pc: usize,
    access: PacketAccess,
    error: Option<VmError>,
}

impl Default for FilterVm {
    fn default() -> Self {
        FilterVm::new()
    }
}

impl FilterVm {
    pub fn new() -> FilterVm {
        FilterVm {
            code: Vec::new(),
            k: vec![Cell::Value(0); K_BASE_SIZE],
            tries: vec![
                PatriciaTrie::new(AddrFamily::Ipv4),
                PatriciaTrie::new(AddrFamily::Ipv6),
            ],
            curtrie: VM_TMPTRIE,
            curtrie6: VM_TMPTRIE6,
            stack: Vec::with_capacity(256),
            blk: Vec::with_capacity(BLK_STACK_SIZE),
            heap: Vec::new(),
            highwater: 0,
            dynmarker: 0,
            pc: 0,
            access: PacketAccess::empty(),
            error: None,
        }
    }

    // -- program construction ------------------------------------------------

    pub fn emit(&mut self, word: Bytecode) {
        self.code.push(word);
    }

    pub fn emit_op(&mut self, op: Opcode, arg: u8) {
        self.code.push(make_op(op, arg));
    }

    /// Emits `op` with EXARG prefixes as needed for a wide argument.
    pub fn emit_ex(&mut self, op: Opcode, idx: u32) {
        super::opcodes::emit_ex(&mut self.code, op, idx);
    }

    pub fn code(&self) -> &[Bytecode] {
        &self.code
    }

    pub(crate) fn code_mut(&mut self) -> &mut Vec<Bytecode> {
        &mut self.code
    }

    /// Reserves a fresh constant slot.
    pub fn new_k(&mut self) -> usize {
        self.k.push(Cell::Value(0));
        self.k.len() - 1
    }

    /// Releases the most recently reserved constant for reuse.
    pub(crate) fn pop_k(&mut self) {
        debug_assert!(self.k.len() > K_BASE_SIZE);
        self.k.pop();
    }

    pub fn k_len(&self) -> usize {
        self.k.len()
    }

    /// Defines a constant. Slots reserved through [`new_k`](Self::new_k)
    /// may always be written; registers up to [`K_MAX`] spring into
    /// existence on first use.
    pub fn set_k(&mut self, idx: usize, cell: Cell) -> Result<(), VmError> {
        if idx >= self.k.len() {
            if idx > K_MAX {
                return Err(VmError::KUndefined);
            }
            self.k.resize(idx + 1, Cell::Value(0));
        }
        self.k[idx] = cell;
        Ok(())
    }

    pub fn k_cell(&self, idx: usize) -> Result<&Cell, VmError> {
        self.k.get(idx).ok_or(VmError::KUndefined)
    }

    /// Allocates a trie of `family`, owned and freed by the VM.
    pub fn new_trie(&mut self, family: AddrFamily) -> usize {
        self.tries.push(PatriciaTrie::new(family));
        self.tries.len() - 1
    }

    pub fn ntries(&self) -> usize {
        self.tries.len()
    }

    /// Allocates `cells` in the VM heap and returns the array cell spanning
    /// them. Permanent allocations are rejected once any temporary
    /// allocation was made.
    pub fn heap_alloc(&mut self, cells: &[Cell], zone: HeapZone) -> Result<Cell, VmError> {
        match zone {
            HeapZone::Permanent => {
                if self.dynmarker > 0 {
                    return Err(VmError::OutOfMemory);
                }
                let base = self.highwater;
                debug_assert_eq!(base, self.heap.len());
                self.heap.extend_from_slice(cells);
                self.highwater += cells.len();
                Ok(Cell::Array {
                    base: base as u32,
                    nels: cells.len() as u32,
                })
            }
            HeapZone::Temporary => {
                let base = self.highwater + self.dynmarker;
                debug_assert_eq!(base, self.heap.len());
                self.heap.extend_from_slice(cells);
                self.dynmarker += cells.len();
                Ok(Cell::Array {
                    base: base as u32,
                    nels: cells.len() as u32,
                })
            }
        }
    }

    /// Size of the per-invocation scratch zone; zero whenever no filter is
    /// running.
    pub fn dyn_marker(&self) -> usize {
        self.dynmarker
    }

    pub fn last_error(&self) -> Option<VmError> {
        self.error
    }

    // -- compile-time trie prepopulation -------------------------------------

    pub(crate) fn set_current_tries(&mut self, v4: usize, v6: usize) -> Result<(), VmError> {
        self.exec_settrie(v4)?;
        self.exec_settrie6(v6)
    }

    pub(crate) fn current_tries(&self) -> (usize, usize) {
        (self.curtrie, self.curtrie6)
    }

    /// Inserts the address constant at `idx` into the current trie pair
    /// (used to precompile literal constants).
    pub(crate) fn store_constant(&mut self, idx: usize) -> Result<(), VmError> {
        let cell = *self.k.get(idx).ok_or(VmError::KUndefined)?;
        self.store_cell(cell)
    }

    // -- entry points --------------------------------------------------------

    /// Evaluates the program against a BGP message.
    pub fn filter_bgp(&mut self, msg: &mut BgpMsg) -> Result<bool, VmError> {
        self.run(Some(msg))
    }

    /// Evaluates the program against an MRT record. BGP4MP message records
    /// expose their wrapped BGP message and populate the peer feeder
    /// constants; other records run with no BGP message loaded.
    pub fn filter_mrt(&mut self, mrt: &MrtMsg) -> Result<bool, VmError> {
        if !mrt.is_bgp_wrapper() {
            return self.run(None);
        }
        let (peer, flags, raw) = mrt.unwrap_bgp4mp().map_err(|_| VmError::BadPacket)?;
        self.k[K_PEER_ADDR] = Cell::Addr(NetAddr::from(peer.peer_addr));
        self.k[K_PEER_AS] = Cell::As(peer.peer_as.get());

        let mut bgp = BgpMsg::new();
        bgp.set_read(raw, flags | BgpMsgFlags::NO_COPY)
            .map_err(|_| VmError::BadPacket)?;
        let result = self.run(Some(&mut bgp));
        let _ = bgp.close();
        result
    }

    // -- execution -----------------------------------------------------------

    fn run(&mut self, mut bgp: Option<&mut BgpMsg>) -> Result<bool, VmError> {
        self.pc = 0;
        self.error = None;
        self.stack.clear();
        self.blk.clear();
        self.heap.truncate(self.highwater);
        self.dynmarker = 0;
        self.curtrie = VM_TMPTRIE;
        self.curtrie6 = VM_TMPTRIE6;
        self.tries[VM_TMPTRIE].clear();
        self.tries[VM_TMPTRIE6].clear();
        self.access = PacketAccess::empty();

        let result = self.exec_loop(&mut bgp);

        // leave no trace of the invocation: scratch zone, blocks and any
        // active sub-iterator are all settled, trap or not
        self.heap.truncate(self.highwater);
        self.dynmarker = 0;
        self.blk.clear();
        self.access = PacketAccess::empty();
        if let Some(msg) = bgp.as_deref_mut() {
            let _ = msg.end_pending();
        }

        if let Err(e) = result {
            self.error = Some(e);
        }
        result
    }

    fn exec_loop(&mut self, bgp: &mut Option<&mut BgpMsg>) -> Result<bool, VmError> {
        let mut exarg = 0u32;

        while self.pc < self.code.len() {
            let word = self.code[self.pc];
            self.pc += 1;
            let op = opcode(word)?;
            let raw_arg = arg(word);

            match op {
                Opcode::Nop => {}
                Opcode::ExArg => {
                    exarg = (exarg << 8) | raw_arg;
                    continue; // keep accumulating for the next instruction
                }
                Opcode::Blk => {
                    let offset = extend_arg(raw_arg, exarg) as usize;
                    let target = self.pc + offset;
                    if target > self.code.len() {
                        return Err(VmError::BadBlock);
                    }
                    if self.blk.len() == BLK_STACK_SIZE {
                        return Err(VmError::BlocksOverflow);
                    }
                    self.blk.push(target);
                }
                Opcode::EndBlk => {
                    if self.blk.pop().is_none() {
                        return Err(VmError::BadBlock);
                    }
                }
                Opcode::Load => {
                    self.stack.push(Cell::Value(extend_arg(raw_arg, exarg) as i32));
                }
                Opcode::LoadK => {
                    let idx = extend_arg(raw_arg, exarg) as usize;
                    let cell = *self.k.get(idx).ok_or(VmError::KUndefined)?;
                    self.stack.push(cell);
                }
                Opcode::Unpack => {
                    let cell = self.pop()?;
                    let Cell::Array { base, nels } = cell else {
                        return Err(VmError::BadArray);
                    };
                    let (base, nels) = (base as usize, nels as usize);
                    if base + nels > self.heap.len() {
                        return Err(VmError::BadArray);
                    }
                    for i in 0..nels {
                        self.stack.push(self.heap[base + i]);
                    }
                }
                Opcode::Store => {
                    let cell = self.pop()?;
                    self.store_cell(cell)?;
                }
                Opcode::Discard => {
                    let cell = self.pop()?;
                    let Cell::Addr(addr) = cell else {
                        return Err(VmError::SurprisingBytes);
                    };
                    match addr.family() {
                        AddrFamily::Ipv4 => {
                            self.tries[self.curtrie].remove(&addr);
                        }
                        AddrFamily::Ipv6 => {
                            self.tries[self.curtrie6].remove(&addr);
                        }
                        AddrFamily::Unspec => return Err(VmError::SurprisingBytes),
                    }
                }
                Opcode::Not => {
                    let v = self.pop_value()?;
                    self.stack.push(Cell::Value((v == 0) as i32));
                }
                Opcode::CPass => {
                    let v = self.peek_value()?;
                    if v != 0 {
                        match self.blk.pop() {
                            Some(target) => self.pc = target,
                            None => return Ok(true),
                        }
                    } else {
                        self.pop()?;
                    }
                }
                Opcode::CFail => {
                    let v = self.peek_value()?;
                    if v == 0 {
                        match self.blk.pop() {
                            Some(target) => self.pc = target,
                            None => return Ok(false),
                        }
                    } else {
                        self.pop()?;
                    }
                }
                Opcode::Exact | Opcode::Subnet | Opcode::Supernet | Opcode::Related => {
                    let kind = match op {
                        Opcode::Exact => MatchKind::Exact,
                        Opcode::Subnet => MatchKind::Subnet,
                        Opcode::Supernet => MatchKind::Supernet,
                        _ => MatchKind::Related,
                    };
                    let mode = extend_arg(raw_arg, exarg);
                    self.exec_match(kind, mode, bgp)?;
                }
                Opcode::PfxContains | Opcode::AddrContains | Opcode::AsContains => {
                    let kidx = extend_arg(raw_arg, exarg) as usize;
                    self.exec_contains(op, kidx)?;
                }
                Opcode::AspMatch | Opcode::AspStarts | Opcode::AspEnds | Opcode::AspExact => {
                    let kind = match op {
                        Opcode::AspMatch => AspKind::Match,
                        Opcode::AspStarts => AspKind::Starts,
                        Opcode::AspEnds => AspKind::Ends,
                        _ => AspKind::Exact,
                    };
                    let mode = extend_arg(raw_arg, exarg);
                    self.exec_asp_match(kind, mode, bgp)?;
                }
                Opcode::CommExact => {
                    self.exec_comm_exact(bgp)?;
                }
                Opcode::Call => {
                    let idx = extend_arg(raw_arg, exarg);
                    self.call_intrinsic(idx, bgp)?;
                }
                Opcode::SetTrie => {
                    let idx = extend_arg(raw_arg, exarg) as usize;
                    self.exec_settrie(idx)?;
                }
                Opcode::SetTrie6 => {
                    let idx = extend_arg(raw_arg, exarg) as usize;
                    self.exec_settrie6(idx)?;
                }
                Opcode::ClrTrie => {
                    let cur = self.curtrie;
                    self.tries[cur].clear();
                }
                Opcode::ClrTrie6 => {
                    let cur = self.curtrie6;
                    self.tries[cur].clear();
                }
                Opcode::PfxCmp | Opcode::AddrCmp | Opcode::AsCmp => {
                    let kidx = extend_arg(raw_arg, exarg) as usize;
                    self.exec_cmp(op, kidx)?;
                }
                Opcode::HasAttr => {
                    let code = extend_arg(raw_arg, exarg) as u8;
                    let msg = Self::require_update(bgp)?;
                    let found = msg.has_attribute(code).map_err(|_| VmError::BadPacket)?;
                    self.stack.push(Cell::Value(found as i32));
                }
            }
            exarg = 0;
        }

        // the program fell off the end: its result is the top of the stack
        let v = self.pop_value()?;
        Ok(v != 0)
    }

    // -- small operand helpers -----------------------------------------------

    fn pop(&mut self) -> Result<Cell, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    fn pop_value(&mut self) -> Result<i32, VmError> {
        match self.pop()? {
            Cell::Value(v) => Ok(v),
            _ => Err(VmError::SurprisingBytes),
        }
    }

    fn peek_value(&self) -> Result<i32, VmError> {
        match self.stack.last() {
            Some(Cell::Value(v)) => Ok(*v),
            Some(_) => Err(VmError::SurprisingBytes),
            None => Err(VmError::StackUnderflow),
        }
    }

    fn store_cell(&mut self, cell: Cell) -> Result<(), VmError> {
        let Cell::Addr(addr) = cell else {
            return Err(VmError::SurprisingBytes);
        };
        let trie = match addr.family() {
            AddrFamily::Ipv4 => self.curtrie,
            AddrFamily::Ipv6 => self.curtrie6,
            AddrFamily::Unspec => return Err(VmError::SurprisingBytes),
        };
        self.tries[trie]
            .insert(&addr, ())
            .map_err(|_| VmError::TrieMismatch)?;
        Ok(())
    }

    fn exec_settrie(&mut self, idx: usize) -> Result<(), VmError> {
        if idx >= self.tries.len() {
            return Err(VmError::TrieUndefined);
        }
        if self.tries[idx].family() != AddrFamily::Ipv4 {
            return Err(VmError::TrieMismatch);
        }
        self.curtrie = idx;
        Ok(())
    }

    fn exec_settrie6(&mut self, idx: usize) -> Result<(), VmError> {
        if idx >= self.tries.len() {
            return Err(VmError::TrieUndefined);
        }
        if self.tries[idx].family() != AddrFamily::Ipv6 {
            return Err(VmError::TrieMismatch);
        }
        self.curtrie6 = idx;
        Ok(())
    }

    fn trie_check(&self, kind: MatchKind, addr: &NetAddr) -> Result<bool, VmError> {
        let trie = match addr.family() {
            AddrFamily::Ipv4 => &self.tries[self.curtrie],
            AddrFamily::Ipv6 => &self.tries[self.curtrie6],
            AddrFamily::Unspec => return Err(VmError::SurprisingBytes),
        };
        Ok(match kind {
            MatchKind::Exact => trie.search_exact(addr).is_some(),
            MatchKind::Subnet => trie.is_subnet_of(addr),
            MatchKind::Supernet => trie.is_supernet_of(addr),
            MatchKind::Related => trie.is_related_of(addr),
        })
    }

    // -- packet access -------------------------------------------------------

    fn require_update<'a, 'b>(
        bgp: &'a mut Option<&'b mut BgpMsg>,
    ) -> Result<&'a mut BgpMsg, VmError> {
        let msg = bgp.as_deref_mut().ok_or(VmError::PacketMismatch)?;
        match msg.msg_type() {
            Ok(BgpMsgType::Update) => Ok(msg),
            _ => Err(VmError::PacketMismatch),
        }
    }

    /// Starts the prefix iterator named by `mask`, settling whatever was
    /// active before.
    fn prepare_addr_access(
        &mut self,
        msg: &mut BgpMsg,
        mask: PacketAccess,
    ) -> Result<bool, VmError> {
        let all = mask.contains(PacketAccess::ALL);
        let res = if mask.contains(PacketAccess::WITHDRAWN) {
            if all {
                msg.start_all_withdrawn()
            } else {
                msg.start_withdrawn()
            }
        } else if mask.contains(PacketAccess::NLRI) {
            if all {
                msg.start_all_nlri()
            } else {
                msg.start_nlri()
            }
        } else {
            return Err(VmError::BadAccessor);
        };
        res.map_err(|_| VmError::BadPacket)?;
        self.access = mask & !PacketAccess::SETTLE;
        Ok(mask.contains(PacketAccess::WITHDRAWN))
    }

    fn settle(&mut self, msg: &mut BgpMsg) -> Result<(), VmError> {
        self.access = PacketAccess::empty();
        msg.end_pending().map_err(|_| VmError::BadPacket)
    }

    fn exec_match(
        &mut self,
        kind: MatchKind,
        mode: u32,
        bgp: &mut Option<&mut BgpMsg>,
    ) -> Result<(), VmError> {
        if mode == 0 {
            // stack form: test every accumulated address
            let mut matched = false;
            while let Some(cell) = self.stack.pop() {
                let Cell::Addr(addr) = cell else {
                    return Err(VmError::SurprisingBytes);
                };
                if self.trie_check(kind, &addr)? {
                    matched = true;
                    break;
                }
            }
            self.stack.clear();
            self.stack.push(Cell::Value(matched as i32));
            return Ok(());
        }

        // packet form: iterate the named collection directly
        let mask = PacketAccess::from_bits_truncate(mode as u8);
        let msg = Self::require_update(bgp)?;
        let withdrawn = self.prepare_addr_access(msg, mask)?;

        let mut matched = false;
        loop {
            let next = if withdrawn {
                msg.next_withdrawn()
            } else {
                msg.next_nlri()
            };
            match next {
                Ok(Some(p)) => {
                    if self.trie_check(kind, &p.addr)? {
                        matched = true;
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => return Err(VmError::BadPacket),
            }
        }
        self.settle(msg)?;
        self.stack.push(Cell::Value(matched as i32));
        Ok(())
    }

    fn exec_contains(&mut self, op: Opcode, kidx: usize) -> Result<(), VmError> {
        let probe = *self.k.get(kidx).ok_or(VmError::KUndefined)?;
        let mut matched = false;
        while let Some(cell) = self.stack.pop() {
            let hit = match (op, cell, probe) {
                (Opcode::PfxContains, Cell::Addr(have), Cell::Addr(want)) => have.covers(&want),
                (Opcode::AddrContains, Cell::Addr(have), Cell::Addr(want)) => {
                    have.family() == want.family() && have.octets() == want.octets()
                }
                (Opcode::AsContains, Cell::As(have), Cell::As(want)) => have == want,
                _ => return Err(VmError::SurprisingBytes),
            };
            if hit {
                matched = true;
                break;
            }
        }
        self.stack.clear();
        self.stack.push(Cell::Value(matched as i32));
        Ok(())
    }

    fn exec_cmp(&mut self, op: Opcode, kidx: usize) -> Result<(), VmError> {
        let probe = *self.k.get(kidx).ok_or(VmError::KUndefined)?;
        let cell = *self.stack.last().ok_or(VmError::StackUnderflow)?;
        let equal = match (op, cell, probe) {
            (Opcode::AddrCmp, Cell::Addr(a), Cell::Addr(b)) => {
                a.family() == b.family() && a.octets() == b.octets()
            }
            (Opcode::PfxCmp, Cell::Addr(a), Cell::Addr(b)) => a == b,
            (Opcode::AsCmp, Cell::As(a), Cell::As(b)) => a == b,
            _ => return Err(VmError::SurprisingBytes),
        };
        *self.stack.last_mut().unwrap() = Cell::Value(equal as i32);
        Ok(())
    }

    fn exec_asp_match(
        &mut self,
        kind: AspKind,
        mode: u32,
        bgp: &mut Option<&mut BgpMsg>,
    ) -> Result<(), VmError> {
        // the whole stack is the pattern, bottom first
        let mut pattern: Vec<Option<u32>> = Vec::with_capacity(self.stack.len());
        for cell in self.stack.drain(..) {
            match cell {
                Cell::As(asn) => pattern.push(Some(asn)),
                Cell::AsAny => pattern.push(None),
                _ => return Err(VmError::SurprisingBytes),
            }
        }

        let mask = PacketAccess::from_bits_truncate(mode as u8);
        let msg = Self::require_update(bgp)?;
        let res = if mask.contains(PacketAccess::AS4_PATH) {
            msg.start_as4_path()
        } else if mask.contains(PacketAccess::REAL_AS_PATH) {
            msg.start_real_as_path()
        } else {
            msg.start_as_path()
        };
        res.map_err(|_| VmError::BadPacket)?;
        self.access = mask & !PacketAccess::SETTLE;

        // stage the path in the scratch heap zone
        let base = self.heap.len();
        loop {
            match msg.next_as_path_entry() {
                Ok(Some(entry)) => {
                    self.heap.push(Cell::As(entry.asn.get()));
                    self.dynmarker += 1;
                }
                Ok(None) => break,
                Err(_) => return Err(VmError::BadPacket),
            }
        }
        self.settle(msg)?;

        let path: Vec<u32> = self.heap[base..]
            .iter()
            .map(|c| match c {
                Cell::As(asn) => *asn,
                _ => unreachable!(),
            })
            .collect();

        let hit_at = |start: usize| -> bool {
            pattern
                .iter()
                .zip(&path[start..])
                .all(|(want, have)| want.map_or(true, |w| w == *have))
        };

        let matched = match kind {
            AspKind::Exact => pattern.len() == path.len() && hit_at(0),
            AspKind::Starts => pattern.len() <= path.len() && hit_at(0),
            AspKind::Ends => {
                pattern.len() <= path.len() && hit_at(path.len() - pattern.len())
            }
            AspKind::Match => {
                pattern.is_empty()
                    || (pattern.len() <= path.len()
                        && (0..=path.len() - pattern.len()).any(hit_at))
            }
        };
        self.stack.push(Cell::Value(matched as i32));
        Ok(())
    }

    fn exec_comm_exact(&mut self, bgp: &mut Option<&mut BgpMsg>) -> Result<(), VmError> {
        let mut wanted: Vec<Community> = Vec::with_capacity(self.stack.len());
        for cell in self.stack.drain(..) {
            match cell {
                Cell::Comm(c) => wanted.push(c),
                _ => return Err(VmError::SurprisingBytes),
            }
        }

        let msg = Self::require_update(bgp)?;
        msg.start_communities(AttrType::COMMUNITIES)
            .map_err(|_| VmError::BadPacket)?;
        let mut present: Vec<Community> = Vec::new();
        loop {
            match msg.next_community() {
                Ok(Some(crate::codec::bgp::CommunityItem::Plain(c))) => present.push(c),
                Ok(Some(_)) => return Err(VmError::BadPacket),
                Ok(None) => break,
                Err(_) => return Err(VmError::BadPacket),
            }
        }
        self.settle(msg)?;

        let matched = wanted.iter().all(|c| present.contains(c));
        self.stack.push(Cell::Value(matched as i32));
        Ok(())
    }

    fn call_intrinsic(&mut self, idx: u32, bgp: &mut Option<&mut BgpMsg>) -> Result<(), VmError> {
        if idx >= VM_FUNCS_COUNT {
            return Err(VmError::FuncUndefined);
        }
        let withdrawn = matches!(
            idx,
            VM_WITHDRAWN_INSERT_FN
                | VM_WITHDRAWN_ACCUMULATE_FN
                | VM_ALL_WITHDRAWN_INSERT_FN
                | VM_ALL_WITHDRAWN_ACCUMULATE_FN
        );
        let all = matches!(
            idx,
            VM_ALL_WITHDRAWN_INSERT_FN
                | VM_ALL_WITHDRAWN_ACCUMULATE_FN
                | VM_ALL_NLRI_INSERT_FN
                | VM_ALL_NLRI_ACCUMULATE_FN
        );
        let insert = matches!(
            idx,
            VM_WITHDRAWN_INSERT_FN
                | VM_ALL_WITHDRAWN_INSERT_FN
                | VM_NLRI_INSERT_FN
                | VM_ALL_NLRI_INSERT_FN
        );

        let mut mask = if withdrawn {
            PacketAccess::WITHDRAWN
        } else {
            PacketAccess::NLRI
        };
        if all {
            mask |= PacketAccess::ALL;
        }

        let msg = Self::require_update(bgp)?;
        let withdrawn = self.prepare_addr_access(msg, mask)?;

        if insert {
            // preloads land in the reserved scratch tries
            self.curtrie = VM_TMPTRIE;
            self.curtrie6 = VM_TMPTRIE6;
        }

        loop {
            let next = if withdrawn {
                msg.next_withdrawn()
            } else {
                msg.next_nlri()
            };
            match next {
                Ok(Some(p)) => {
                    if insert {
                        self.store_cell(Cell::Addr(p.addr))?;
                    } else {
                        self.stack.push(Cell::Addr(p.addr));
                    }
                }
                Ok(None) => break,
                Err(_) => return Err(VmError::BadPacket),
            }
        }
        self.settle(msg)
    }

    // -- diagnostics ---------------------------------------------------------

    /// Renders the program one instruction per line, with decoded
    /// arguments (EXARG prefixes folded into their instruction).
    pub fn dump_code(&self) -> String {
        let mut out = String::new();
        let mut exarg = 0u32;
        for (i, word) in self.code.iter().enumerate() {
            let Ok(op) = opcode(*word) else {
                let _ = writeln!(out, "{i:04}: <illegal {word:#06x}>");
                continue;
            };
            if op == Opcode::ExArg {
                exarg = (exarg << 8) | arg(*word);
                let _ = writeln!(out, "{i:04}: EXARG {:#04x}", arg(*word));
                continue;
            }
            let eff = extend_arg(arg(*word), exarg);
            exarg = 0;
            let _ = writeln!(out, "{i:04}: {op:?} {eff}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::attrs;
    use crate::models::bgp::Origin;
    use crate::models::network::NetAddrAp;
    use std::str::FromStr;

    fn addr(s: &str) -> NetAddr {
        NetAddr::from_str(s).unwrap()
    }

    fn update_with_nlri(prefixes: &[&str]) -> BgpMsg {
        let mut msg = BgpMsg::new();
        msg.set_write(BgpMsgType::Update, BgpMsgFlags::empty()).unwrap();
        msg.start_attribs().unwrap();
        msg.put_attrib(&attrs::make_origin(Origin::Igp)).unwrap();
        msg.put_attrib(&attrs::make_next_hop("1.2.3.4".parse().unwrap()))
            .unwrap();
        msg.end_attribs().unwrap();
        msg.start_nlri().unwrap();
        for p in prefixes {
            msg.put_nlri(&NetAddrAp::from(addr(p))).unwrap();
        }
        msg.end_nlri().unwrap();
        msg.finish().unwrap();
        msg
    }

    fn update_with_withdrawn(prefixes: &[&str]) -> BgpMsg {
        let mut msg = BgpMsg::new();
        msg.set_write(BgpMsgType::Update, BgpMsgFlags::empty()).unwrap();
        msg.start_withdrawn().unwrap();
        for p in prefixes {
            msg.put_withdrawn(&NetAddrAp::from(addr(p))).unwrap();
        }
        msg.end_withdrawn().unwrap();
        msg.finish().unwrap();
        msg
    }

    #[test]
    fn test_load_not_terminates() {
        let mut vm = FilterVm::new();
        vm.emit_op(Opcode::Load, 0);
        vm.emit_op(Opcode::Not, 0);
        let mut msg = update_with_nlri(&["10.0.0.0/8"]);
        assert!(vm.filter_bgp(&mut msg).unwrap());
        assert_eq!(vm.dyn_marker(), 0);
    }

    #[test]
    fn test_stack_underflow_on_empty_program() {
        let mut vm = FilterVm::new();
        let mut msg = update_with_nlri(&["10.0.0.0/8"]);
        assert_eq!(vm.filter_bgp(&mut msg), Err(VmError::StackUnderflow));
        assert_eq!(vm.last_error(), Some(VmError::StackUnderflow));
    }

    #[test]
    fn test_packet_exact_match() {
        // prepopulate a trie pair, then match the NLRI against it
        let mut vm = FilterVm::new();
        let v4 = vm.new_trie(AddrFamily::Ipv4);
        let v6 = vm.new_trie(AddrFamily::Ipv6);
        vm.set_current_tries(v4, v6).unwrap();
        let k = vm.new_k();
        vm.set_k(k, Cell::Addr(addr("10.0.0.0/8"))).unwrap();
        vm.store_constant(k).unwrap();

        vm.emit_ex(Opcode::SetTrie, v4 as u32);
        vm.emit_ex(Opcode::SetTrie6, v6 as u32);
        vm.emit_op(Opcode::Exact, (PacketAccess::NLRI | PacketAccess::SETTLE).bits());

        let mut msg = update_with_nlri(&["10.0.0.0/8"]);
        assert!(vm.filter_bgp(&mut msg).unwrap());

        let mut other = update_with_nlri(&["11.0.0.0/8"]);
        assert!(!vm.filter_bgp(&mut other).unwrap());
    }

    #[test]
    fn test_stack_exact_match() {
        // accumulate the withdrawn routes, compare against a stored set
        let mut vm = FilterVm::new();
        let v4 = vm.new_trie(AddrFamily::Ipv4);
        let v6 = vm.new_trie(AddrFamily::Ipv6);
        vm.set_current_tries(v4, v6).unwrap();
        let k = vm.new_k();
        vm.set_k(k, Cell::Addr(addr("192.168.0.0/16"))).unwrap();
        vm.store_constant(k).unwrap();

        vm.emit_ex(Opcode::SetTrie, v4 as u32);
        vm.emit_ex(Opcode::SetTrie6, v6 as u32);
        vm.emit_ex(Opcode::Call, VM_WITHDRAWN_ACCUMULATE_FN);
        vm.emit_op(Opcode::Exact, 0);

        let mut msg = update_with_withdrawn(&["192.168.0.0/16", "10.0.0.0/8"]);
        assert!(vm.filter_bgp(&mut msg).unwrap());

        let mut msg = update_with_withdrawn(&["10.0.0.0/8"]);
        assert!(!vm.filter_bgp(&mut msg).unwrap());
    }

    #[test]
    fn test_subnet_match_mode() {
        let mut vm = FilterVm::new();
        let v4 = vm.new_trie(AddrFamily::Ipv4);
        let v6 = vm.new_trie(AddrFamily::Ipv6);
        vm.set_current_tries(v4, v6).unwrap();
        let k = vm.new_k();
        vm.set_k(k, Cell::Addr(addr("10.0.0.0/8"))).unwrap();
        vm.store_constant(k).unwrap();

        vm.emit_ex(Opcode::SetTrie, v4 as u32);
        vm.emit_ex(Opcode::SetTrie6, v6 as u32);
        vm.emit_op(Opcode::Subnet, (PacketAccess::NLRI | PacketAccess::SETTLE).bits());

        // a /24 inside the stored /8 is a subnet match
        let mut msg = update_with_nlri(&["10.1.2.0/24"]);
        assert!(vm.filter_bgp(&mut msg).unwrap());
        let mut msg = update_with_nlri(&["11.1.2.0/24"]);
        assert!(!vm.filter_bgp(&mut msg).unwrap());
    }

    #[test]
    fn test_short_circuit_cfail() {
        // false AND <bomb>: the bomb half must never run; it would trap
        // with SurprisingBytes if it did
        let mut vm = FilterVm::new();
        vm.emit_op(Opcode::Load, 0);
        vm.emit_op(Opcode::CFail, 0);
        vm.emit_ex(Opcode::Call, VM_NLRI_ACCUMULATE_FN);
        vm.emit_op(Opcode::Exact, 0);

        let mut msg = update_with_nlri(&["10.0.0.0/8"]);
        assert!(!vm.filter_bgp(&mut msg).unwrap());
    }

    #[test]
    fn test_short_circuit_cpass() {
        let mut vm = FilterVm::new();
        vm.emit_op(Opcode::Load, 1);
        vm.emit_op(Opcode::CPass, 0);
        // unreachable garbage that would trap
        vm.emit_op(Opcode::Unpack, 0);

        let mut msg = update_with_nlri(&["10.0.0.0/8"]);
        assert!(vm.filter_bgp(&mut msg).unwrap());
    }

    #[test]
    fn test_blocks() {
        // BLK ( false CFAIL ) ENDBLK-target; CFAIL inside the block jumps
        // past it, leaving false on the stack for the outer CFAIL
        let mut vm = FilterVm::new();
        vm.emit_op(Opcode::Blk, 2); // target: after the block body
        vm.emit_op(Opcode::Load, 0);
        vm.emit_op(Opcode::CFail, 0);
        vm.emit_op(Opcode::Not, 0); // runs at the block target

        let mut msg = update_with_nlri(&["10.0.0.0/8"]);
        assert!(vm.filter_bgp(&mut msg).unwrap());
    }

    #[test]
    fn test_bad_block_and_overflow() {
        let mut vm = FilterVm::new();
        vm.emit_op(Opcode::Blk, 200); // way past the end
        let mut msg = update_with_nlri(&["10.0.0.0/8"]);
        assert_eq!(vm.filter_bgp(&mut msg), Err(VmError::BadBlock));

        let mut vm = FilterVm::new();
        for _ in 0..=BLK_STACK_SIZE {
            vm.emit_op(Opcode::Blk, 0);
        }
        let mut msg = update_with_nlri(&["10.0.0.0/8"]);
        assert_eq!(vm.filter_bgp(&mut msg), Err(VmError::BlocksOverflow));
    }

    #[test]
    fn test_asp_match_modes() {
        let mut build = BgpMsg::new();
        build.set_write(BgpMsgType::Update, BgpMsgFlags::empty()).unwrap();
        build.start_attribs().unwrap();
        build
            .put_attrib(&attrs::make_as_path_16(&[(
                crate::models::bgp::AsSegmentType::Sequence,
                &[2598, 137, 3356],
            )]))
            .unwrap();
        build.end_attribs().unwrap();
        build.finish().unwrap();

        let run = |cells: &[Cell], op: Opcode| -> bool {
            let mut vm = FilterVm::new();
            let mut kidx = Vec::new();
            for c in cells {
                let k = vm.new_k();
                vm.set_k(k, *c).unwrap();
                kidx.push(k);
            }
            for k in kidx {
                vm.emit_ex(Opcode::LoadK, k as u32);
            }
            vm.emit_op(op, PacketAccess::AS_PATH.bits());
            let mut msg = BgpMsg::new();
            msg.set_read(
                bytes::Bytes::copy_from_slice(build.data().unwrap()),
                BgpMsgFlags::empty(),
            )
            .unwrap();
            vm.filter_bgp(&mut msg).unwrap()
        };

        assert!(run(&[Cell::As(137)], Opcode::AspMatch));
        assert!(!run(&[Cell::As(1)], Opcode::AspMatch));
        assert!(run(&[Cell::As(2598)], Opcode::AspStarts));
        assert!(!run(&[Cell::As(3356)], Opcode::AspStarts));
        assert!(run(&[Cell::As(3356)], Opcode::AspEnds));
        assert!(run(
            &[Cell::As(2598), Cell::AsAny, Cell::As(3356)],
            Opcode::AspExact
        ));
        assert!(!run(&[Cell::As(2598), Cell::As(3356)], Opcode::AspExact));
    }

    #[test]
    fn test_comm_exact() {
        let mut build = BgpMsg::new();
        build.set_write(BgpMsgType::Update, BgpMsgFlags::empty()).unwrap();
        build.start_attribs().unwrap();
        build
            .put_attrib(&attrs::make_communities(&[
                Community::NO_EXPORT,
                Community(0x0d1c0064),
            ]))
            .unwrap();
        build.end_attribs().unwrap();
        build.finish().unwrap();

        let mut vm = FilterVm::new();
        let k = vm.new_k();
        vm.set_k(k, Cell::Comm(Community::NO_EXPORT)).unwrap();
        vm.emit_ex(Opcode::LoadK, k as u32);
        vm.emit_op(Opcode::CommExact, 0);

        let mut msg = BgpMsg::new();
        msg.set_read(
            bytes::Bytes::copy_from_slice(build.data().unwrap()),
            BgpMsgFlags::empty(),
        )
        .unwrap();
        assert!(vm.filter_bgp(&mut msg).unwrap());

        // asking for a community the message does not carry fails
        let mut vm = FilterVm::new();
        let k = vm.new_k();
        vm.set_k(k, Cell::Comm(Community::BLACKHOLE)).unwrap();
        vm.emit_ex(Opcode::LoadK, k as u32);
        vm.emit_op(Opcode::CommExact, 0);
        assert!(!vm.filter_bgp(&mut msg).unwrap());
    }

    #[test]
    fn test_has_attr() {
        let mut msg = update_with_nlri(&["10.0.0.0/8"]);
        let mut vm = FilterVm::new();
        vm.emit_ex(Opcode::HasAttr, 1); // ORIGIN
        assert!(vm.filter_bgp(&mut msg).unwrap());

        let mut vm = FilterVm::new();
        vm.emit_ex(Opcode::HasAttr, 32); // LARGE_COMMUNITIES
        assert!(!vm.filter_bgp(&mut msg).unwrap());
    }

    #[test]
    fn test_cmp_ops() {
        let mut vm = FilterVm::new();
        let k = vm.new_k();
        vm.set_k(k, Cell::As(65000)).unwrap();
        vm.emit_ex(Opcode::LoadK, k as u32);
        vm.emit_ex(Opcode::AsCmp, k as u32);
        let mut msg = update_with_nlri(&["10.0.0.0/8"]);
        assert!(vm.filter_bgp(&mut msg).unwrap());
    }

    #[test]
    fn test_unpack_and_heap_zones() {
        let mut vm = FilterVm::new();
        let array = vm
            .heap_alloc(
                &[Cell::As(1), Cell::As(2), Cell::As(3)],
                HeapZone::Permanent,
            )
            .unwrap();
        let k = vm.new_k();
        vm.set_k(k, array).unwrap();
        vm.emit_ex(Opcode::LoadK, k as u32);
        vm.emit_op(Opcode::Unpack, 0);
        vm.emit_op(Opcode::AspMatch, PacketAccess::AS_PATH.bits());

        // temporary allocations forbid further permanent ones
        vm.heap_alloc(&[Cell::Value(0)], HeapZone::Temporary).unwrap();
        assert_eq!(
            vm.heap_alloc(&[Cell::Value(0)], HeapZone::Permanent),
            Err(VmError::OutOfMemory)
        );
        // the scratch zone dies with the next run
        let mut msg = update_with_nlri(&["10.0.0.0/8"]);
        let _ = vm.filter_bgp(&mut msg);
        assert_eq!(vm.dyn_marker(), 0);
    }

    #[test]
    fn test_trie_index_errors() {
        let mut vm = FilterVm::new();
        vm.emit_ex(Opcode::SetTrie, 99);
        let mut msg = update_with_nlri(&["10.0.0.0/8"]);
        assert_eq!(vm.filter_bgp(&mut msg), Err(VmError::TrieUndefined));

        // selecting the v6 scratch trie as the v4 one is a mismatch
        let mut vm = FilterVm::new();
        vm.emit_ex(Opcode::SetTrie, VM_TMPTRIE6 as u32);
        assert_eq!(vm.filter_bgp(&mut msg), Err(VmError::TrieMismatch));
    }

    #[test]
    fn test_exarg_wide_constant() {
        let mut vm = FilterVm::new();
        // force a wide LoadK index to exercise the EXARG path end to end
        for _ in 0..300 {
            vm.new_k();
        }
        let k = vm.k_len() - 1;
        vm.set_k(k, Cell::Value(1)).unwrap();
        vm.emit_ex(Opcode::LoadK, k as u32);
        assert!(vm.code().len() > 1, "wide index must need an EXARG");
        let mut msg = update_with_nlri(&["10.0.0.0/8"]);
        assert!(vm.filter_bgp(&mut msg).unwrap());
    }

    #[test]
    fn test_dump_code() {
        let mut vm = FilterVm::new();
        vm.emit_ex(Opcode::LoadK, 0x1234);
        vm.emit_op(Opcode::Exact, 0);
        let dump = vm.dump_code();
        assert!(dump.contains("EXARG"));
        assert!(dump.contains("LoadK 4660"));
        assert!(dump.contains("Exact 0"));
    }
}
