//! The matcher-facing trace buffer: a sequence of [`TraceRecord`]s recording
//! interpreted-bytecode runs, JIT-code runs, and codelet transitions, plus
//! the side tables the driver and splitter populate as they walk it
//! (per-location split classification, per-location method descriptors,
//! per-thread address spans).
//!
//! The original keeps this as one flat `malloc`'d byte buffer with records
//! punned in place (an `InterRecord`/`JitRecord` header is overwritten with
//! a running byte count, and JIT records literally store
//! `PCStackInfo*`/`jit_section*` pointers inline). That layout doesn't
//! survive translation to safe Rust; here a [`TraceData`] location is an
//! index into a `Vec<TraceRecord>` instead of a byte offset, and jit
//! records hold `Arc<JitSection>` plus a `Vec<PcStackInfo>` directly rather
//! than raw pointers into section-owned memory. The append/demote/split
//! state machine in [`TraceDataRecord`] mirrors the original one-for-one.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use fnv::FnvHashMap;

use crate::jit::section::{JitSection, MethodDesc, PcStackInfo};

/// How many most-recent split points a `switch_out` demotes to `MayLoss`
/// when the thread is evicted before it can prove itself loss-free.
pub const MAY_LOSS_DEMOTION_WINDOW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitKind {
    NotSplit,
    MayLoss,
    HeadTailLoss,
    HeadLoss,
    TailLoss,
    NoLoss,
}

#[derive(Debug, Clone)]
pub struct ThreadSplit {
    pub tid: i64,
    pub start_addr: usize,
    pub end_addr: Option<usize>,
    pub start_time: u64,
    pub end_time: u64,
    pub head_loss: bool,
    pub tail_loss: bool,
}

/// One byte of the inline interpreted-bytecode stream: either a canonical
/// opcode tag or a taken/not-taken flag following a branch tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BytecodeStep {
    Op(u8),
    Branch(bool),
}

#[derive(Debug, Clone)]
pub enum TraceRecord {
    Bytecode(Vec<BytecodeStep>),
    JitEntry { section: Arc<JitSection>, pcs: Vec<PcStackInfo> },
    Jit { section: Arc<JitSection>, pcs: Vec<PcStackInfo> },
    MethodEntry,
    ThrowException,
    InvokeReturnEntryPoints,
    DeoptimizationEntryPoints,
    ExceptionHandling,
    OsrEntryPoints,
}

impl TraceRecord {
    fn is_bytecode(&self) -> bool {
        matches!(self, Self::Bytecode(_))
    }

    fn is_jit(&self) -> bool {
        matches!(self, Self::Jit { .. } | Self::JitEntry { .. })
    }
}

fn tag_is_return(tag: u8) -> bool {
    (0xac..=0xb1).contains(&tag)
}

fn tag_is_branch(tag: u8) -> bool {
    (0x99..=0xa8).contains(&tag) || matches!(tag, 0xc6 | 0xc7 | 0xc8 | 0xc9)
}

fn tag_is_goto(tag: u8) -> bool {
    matches!(tag, 0xa7 | 0xc8)
}

#[derive(Debug, Default)]
pub struct TraceData {
    records: Vec<TraceRecord>,
    split_map: FnvHashMap<usize, Vec<usize>>,
    split_kind_map: FnvHashMap<usize, SplitKind>,
    method_desc_map: FnvHashMap<usize, MethodDesc>,
    thread_map: HashMap<i64, Vec<ThreadSplit>>,
}

impl TraceData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn thread_map(&self) -> &HashMap<i64, Vec<ThreadSplit>> {
        &self.thread_map
    }

    pub fn method_desc_map(&self) -> &FnvHashMap<usize, MethodDesc> {
        &self.method_desc_map
    }

    pub fn get_split_kind(&self, loc: usize) -> SplitKind {
        self.split_kind_map.get(&loc).copied().unwrap_or(SplitKind::NotSplit)
    }

    pub fn get_md(&self, loc: usize) -> Option<&MethodDesc> {
        self.method_desc_map.get(&loc)
    }

    pub fn get_inter(&self, loc: usize) -> Option<&[BytecodeStep]> {
        match self.records.get(loc) {
            Some(TraceRecord::Bytecode(steps)) => Some(steps),
            _ => None,
        }
    }

    pub fn get_jit(&self, loc: usize) -> Option<(&Arc<JitSection>, &[PcStackInfo])> {
        match self.records.get(loc) {
            Some(TraceRecord::Jit { section, pcs } | TraceRecord::JitEntry { section, pcs }) => {
                Some((section, pcs))
            }
            _ => None,
        }
    }

    /// All split points reachable from `loc`: `loc` itself plus any
    /// recorded continuations.
    pub fn get_split_locs(&self, loc: usize) -> Option<Vec<usize>> {
        if !self.split_kind_map.contains_key(&loc) {
            return None;
        }
        let mut locs = vec![loc];
        if let Some(more) = self.split_map.get(&loc) {
            locs.extend(more.iter().copied());
        }
        Some(locs)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The append-time state machine: tracks the in-progress bytecode/jit run,
/// the live call stack, and the recent-split "dump list" used to demote
/// split points to [`SplitKind::MayLoss`] when a thread is evicted without
/// having proven itself loss-free.
pub struct TraceDataRecord<'a> {
    trace: &'a mut TraceData,
    current: Option<usize>,
    current_is_method_entry: bool,
    last_section: Option<Arc<JitSection>>,
    call_stack: Vec<usize>,
    dump_list: VecDeque<(usize, usize)>,
    dump_cnt: usize,
    current_time: u64,
    bytecode_type: Option<u8>,
    in_exception_handling: bool,
    active_thread: Option<(i64, usize)>,
}

impl<'a> TraceDataRecord<'a> {
    pub fn new(trace: &'a mut TraceData) -> Self {
        Self {
            trace,
            current: None,
            current_is_method_entry: false,
            last_section: None,
            call_stack: Vec::new(),
            dump_list: VecDeque::new(),
            dump_cnt: 0,
            current_time: 0,
            bytecode_type: None,
            in_exception_handling: false,
            active_thread: None,
        }
    }

    fn begin_record(&mut self, record: TraceRecord) -> usize {
        let begin = self.trace.records.len();
        self.trace.records.push(record);
        begin
    }

    pub fn add_bytecode(&mut self, time: u64, tag: u8) {
        self.current_time = time;
        if !self.current.map(|i| self.trace.records[i].is_bytecode()).unwrap_or(false) {
            let begin = self.trace.records.len();
            if self.dump_cnt > 0 {
                self.trace.split_kind_map.insert(begin, SplitKind::MayLoss);
                self.dump_cnt -= 1;
            } else if self.current_is_method_entry {
                self.trace.split_kind_map.insert(begin, SplitKind::TailLoss);
                self.call_stack.push(begin);
            } else if self.call_stack.is_empty() {
                self.trace.split_kind_map.insert(begin, SplitKind::HeadTailLoss);
                self.call_stack.push(begin);
            }
            if let Some(&top) = self.call_stack.last() {
                if top != begin {
                    self.trace.split_map.entry(top).or_default().push(begin);
                    self.push_dump((top, begin));
                } else {
                    self.push_dump((begin, begin));
                }
            } else {
                self.push_dump((begin, begin));
            }
            let was_exception_handling = self.in_exception_handling;
            self.in_exception_handling = false;
            self.current_is_method_entry = false;
            let mut steps = Vec::new();
            if was_exception_handling {
                steps.push(BytecodeStep::Op(tag_marker_exception_handling()));
            }
            self.current = Some(self.begin_record(TraceRecord::Bytecode(steps)));
        }
        let TraceRecord::Bytecode(steps) = &mut self.trace.records[self.current.unwrap()] else {
            unreachable!("current always points at a Bytecode record here");
        };
        steps.push(BytecodeStep::Op(tag));

        if tag_is_return(tag) {
            if let Some(top) = self.call_stack.pop() {
                let kind = self.trace.split_kind_map.get(&top).copied();
                match kind {
                    Some(SplitKind::HeadTailLoss) => {
                        self.trace.split_kind_map.insert(top, SplitKind::HeadLoss);
                    }
                    Some(SplitKind::TailLoss) => {
                        self.trace.split_kind_map.insert(top, SplitKind::NoLoss);
                    }
                    _ => {}
                }
            }
            self.current = None;
        }
        self.bytecode_type = Some(tag);
    }

    /// Records a branch's taken/not-taken outcome. Must directly follow the
    /// `add_bytecode` call for the branch instruction it belongs to.
    pub fn add_branch(&mut self, taken: bool) -> Result<(), &'static str> {
        let Some(bytecode_type) = self.bytecode_type else {
            return Err("trace data record: non branch bytecode");
        };
        if !tag_is_branch(bytecode_type) || self.current.is_none() {
            return Err("trace data record: non branch bytecode");
        }
        let TraceRecord::Bytecode(steps) = &mut self.trace.records[self.current.unwrap()] else {
            return Err("trace data record: non branch bytecode");
        };
        steps.push(BytecodeStep::Branch(taken));
        Ok(())
    }

    pub fn add_jitcode(&mut self, time: u64, section: Arc<JitSection>, pc: PcStackInfo, entry: bool) {
        self.current_time = time;
        let same_run = match (&self.current, &self.last_section) {
            (Some(i), Some(last)) => {
                self.trace.records[*i].is_jit() && Arc::ptr_eq(last, &section)
            }
            _ => false,
        };
        if !same_run {
            let record = if entry {
                TraceRecord::JitEntry { section: section.clone(), pcs: Vec::new() }
            } else {
                TraceRecord::Jit { section: section.clone(), pcs: Vec::new() }
            };
            self.current = Some(self.begin_record(record));
            self.last_section = Some(section);
        }
        match &mut self.trace.records[self.current.unwrap()] {
            TraceRecord::Jit { pcs, .. } | TraceRecord::JitEntry { pcs, .. } => pcs.push(pc),
            _ => unreachable!("current always points at a jit record here"),
        }
        self.bytecode_type = None;
    }

    pub fn add_codelet(&mut self, codelet: crate::codelet::CodeletKind) {
        use crate::codelet::CodeletKind::*;
        self.bytecode_type = None;
        match codelet {
            MethodEntryPoint => {
                self.begin_record(TraceRecord::MethodEntry);
                self.current = None;
                self.current_is_method_entry = true;
            }
            ThrowExceptionEntrypoints | RethrowException => {
                if self.in_exception_handling {
                    self.call_stack.pop();
                }
                self.begin_record(TraceRecord::ThrowException);
                self.current = None;
                self.in_exception_handling = false;
            }
            InvokeReturnEntryPoints => {
                if self.current_is_method_entry {
                    // The preceding method-entry codelet never reached a
                    // real entry; drop it rather than emit a return record.
                    self.trace.records.pop();
                    self.current_is_method_entry = false;
                    return;
                }
                self.begin_record(TraceRecord::InvokeReturnEntryPoints);
                self.current = None;
            }
            DeoptimizationEntryPoints => {
                self.begin_record(TraceRecord::DeoptimizationEntryPoints);
                self.current = None;
                self.call_stack.clear();
            }
            ExceptionHandling => {
                self.begin_record(TraceRecord::ExceptionHandling);
                self.current = None;
                self.in_exception_handling = true;
            }
            ResultHandlersForNativeCalls => {
                if self.current_is_method_entry {
                    self.trace.records.pop();
                }
                self.current = None;
                self.current_is_method_entry = false;
            }
            _ => {
                self.current = None;
                self.call_stack.clear();
            }
        }
    }

    pub fn add_method_desc(&mut self, md: MethodDesc) {
        if self.current_is_method_entry {
            self.trace.method_desc_map.insert(self.trace.records.len(), md);
        }
    }

    pub fn add_osr_entry(&mut self) -> bool {
        let Some(bytecode_type) = self.bytecode_type else { return false };
        if !tag_is_goto(bytecode_type) && !tag_is_branch(bytecode_type) {
            return false;
        }
        self.begin_record(TraceRecord::OsrEntryPoints);
        self.current = None;
        self.bytecode_type = None;
        self.call_stack.pop();
        true
    }

    fn push_dump(&mut self, entry: (usize, usize)) {
        self.dump_list.push_front(entry);
        if self.dump_list.len() > MAY_LOSS_DEMOTION_WINDOW {
            self.dump_list.pop_back();
        }
    }

    pub fn switch_out(&mut self, loss: bool) {
        if !self.dump_list.is_empty() {
            self.dump_cnt = MAY_LOSS_DEMOTION_WINDOW;
        }
        for (top, begin) in self.dump_list.drain(..) {
            if let Some(conts) = self.trace.split_map.get_mut(&top) {
                if conts.pop().is_some() {
                    self.trace.split_kind_map.insert(begin, SplitKind::MayLoss);
                }
            }
        }
        self.call_stack.clear();
        self.current = None;
        self.bytecode_type = None;
        if let Some((tid, idx)) = self.active_thread.take() {
            if let Some(split) = self.trace.thread_map.get_mut(&tid).and_then(|v| v.get_mut(idx)) {
                split.end_addr = Some(self.trace.records.len());
                split.end_time = self.current_time;
                split.tail_loss = loss;
            }
        }
    }

    pub fn switch_in(&mut self, tid: i64, time: u64, loss: bool) {
        if let Some((active_tid, _)) = self.active_thread {
            if active_tid == tid && !loss {
                return;
            }
        }
        self.current_time = time;
        let spans = self.trace.thread_map.entry(tid).or_default();
        let insert_at = spans.iter().position(|s| time < s.start_time).unwrap_or(spans.len());
        spans.insert(
            insert_at,
            ThreadSplit {
                tid,
                start_addr: self.trace.records.len(),
                end_addr: None,
                start_time: time,
                end_time: time,
                head_loss: loss,
                tail_loss: false,
            },
        );
        self.active_thread = Some((tid, insert_at));
        self.call_stack.clear();
        self.current = None;
        self.bytecode_type = None;
    }
}

/// A synthetic marker byte folded into the bytecode stream immediately
/// after an exception-handling codelet hands control back to interpreted
/// bytecode, mirroring the original's one extra `prev_code` byte write.
fn tag_marker_exception_handling() -> u8 {
    0xfe
}

/// Forward-only cursor over a [`TraceData`]'s records, yielding the
/// location (record index) and kind of each run in order.
pub struct TraceDataAccess<'a> {
    trace: &'a TraceData,
    current: usize,
    terminal: usize,
}

impl<'a> TraceDataAccess<'a> {
    pub fn new(trace: &'a TraceData) -> Self {
        Self { trace, current: 0, terminal: trace.records.len() }
    }

    pub fn from_range(trace: &'a TraceData, begin: usize, end: usize) -> Self {
        let terminal = end.min(trace.records.len());
        let current = if begin > terminal { terminal } else { begin };
        Self { trace, current, terminal }
    }

    pub fn set_current(&mut self, addr: usize) {
        self.current = if addr > self.trace.records.len() { self.trace.records.len() } else { addr };
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn end(&self) -> bool {
        self.current >= self.terminal
    }

    pub fn terminal(&self) -> usize {
        self.terminal
    }

    pub fn next_record(&mut self) -> Option<(usize, &'a TraceRecord)> {
        if self.current >= self.terminal {
            return None;
        }
        let loc = self.current;
        let record = &self.trace.records[loc];
        self.current += 1;
        Some((loc, record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fnv::FnvHashMap as FMap;

    fn section() -> Arc<JitSection> {
        JitSection::new(
            "sec".into(),
            0x1000,
            vec![0u8; 16],
            crate::jit::section::CompiledMethodDesc {
                entry_point: 0x1000,
                verified_entry_point: 0x1000,
                osr_entry_point: 0,
                main_method: MethodDesc::default(),
                inline_methods: FMap::default(),
            },
            Vec::new(),
            Vec::new(),
        )
    }

    #[test]
    fn bytecode_run_accumulates_until_return() {
        let mut trace = TraceData::new();
        let mut rec = TraceDataRecord::new(&mut trace);
        rec.add_codelet(crate::codelet::CodeletKind::MethodEntryPoint);
        rec.add_method_desc(MethodDesc { klass_name: "Foo".into(), name: "bar".into(), signature: "()V".into() });
        rec.add_bytecode(1, 0x2a); // aload_0, not a branch/return
        rec.add_bytecode(2, 0xb1); // return
        drop(rec);

        assert_eq!(trace.len(), 2);
        let steps = trace.get_inter(1).unwrap();
        assert_eq!(steps, &[BytecodeStep::Op(0x2a), BytecodeStep::Op(0xb1)]);
        assert_eq!(trace.get_md(0).unwrap().name, "bar");
    }

    #[test]
    fn branch_flag_attaches_to_current_bytecode_run() {
        let mut trace = TraceData::new();
        let mut rec = TraceDataRecord::new(&mut trace);
        rec.add_bytecode(1, 0x99); // ifeq
        rec.add_branch(true).unwrap();
        drop(rec);

        let steps = trace.get_inter(0).unwrap();
        assert_eq!(steps, &[BytecodeStep::Op(0x99), BytecodeStep::Branch(true)]);
    }

    #[test]
    fn branch_without_preceding_bytecode_is_rejected() {
        let mut trace = TraceData::new();
        let mut rec = TraceDataRecord::new(&mut trace);
        assert!(rec.add_branch(true).is_err());
    }

    #[test]
    fn jit_run_groups_consecutive_pcs_from_same_section() {
        let mut trace = TraceData::new();
        let sec = section();
        let mut rec = TraceDataRecord::new(&mut trace);
        rec.add_jitcode(1, sec.clone(), PcStackInfo { pc: 4, frames: vec![] }, true);
        rec.add_jitcode(2, sec.clone(), PcStackInfo { pc: 8, frames: vec![] }, true);
        drop(rec);

        assert_eq!(trace.len(), 1);
        let (got_section, pcs) = trace.get_jit(0).unwrap();
        assert!(Arc::ptr_eq(got_section, &sec));
        assert_eq!(pcs.len(), 2);
    }

    #[test]
    fn switch_in_then_switch_out_records_thread_span() {
        let mut trace = TraceData::new();
        let mut rec = TraceDataRecord::new(&mut trace);
        rec.switch_in(7, 10, false);
        rec.add_bytecode(11, 0xb1);
        rec.switch_out(false);
        drop(rec);

        let spans = &trace.thread_map()[&7];
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start_time, 10);
        assert_eq!(spans[0].end_addr, Some(1));
        assert!(!spans[0].tail_loss);
    }

    #[test]
    fn empty_call_stack_at_first_bytecode_is_head_tail_loss() {
        let mut trace = TraceData::new();
        let mut rec = TraceDataRecord::new(&mut trace);
        rec.add_bytecode(1, 0x2a);
        drop(rec);
        assert_eq!(trace.get_split_kind(0), SplitKind::HeadTailLoss);
    }
}
