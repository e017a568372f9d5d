//! Top-level method matcher (§4.9): walks one thread's trace records and
//! assigns each interpreted/JIT run to the method it most plausibly
//! belongs to.
//!
//! Candidate selection narrows the search before scoring ever runs: a
//! codelet-confirmed method entry prefers the current context's statically
//! known callees; a bare continuation prefers the context method and its
//! callers; anything else falls back to every parsed method, gated by
//! `no_matched_depth` so an unmatched thread doesn't re-scan the whole
//! program on every single record. Ties are logged and dropped rather than
//! guessed at.
//!
//! This is a reduced, self-contained translation: the original keeps three
//! separate result caches (general/JIT/no-context) and a score+depth
//! tie-break; here method identity plus location already disambiguates a
//! cache entry, so one `(loc, MethodId)` cache suffices, and ties break on
//! score alone.

use std::sync::Arc;

use fnv::FnvHashMap;

use jportal_classfile::analyser::Analyser;
use jportal_classfile::method::MethodId;
use jportal_decode::jit::section::{JitSection, MethodDesc, PcStackInfo};
use jportal_decode::trace_data::{BytecodeStep, ThreadSplit, TraceData, TraceDataAccess, TraceRecord};

use crate::block_matcher::BlockMatcher;

/// Default budget (in unmatched bytecode/JIT records) before candidate
/// selection gives up narrowing to callees/callers and falls back to
/// scanning every parsed method. Matches the CLI's documented default.
pub const DEFAULT_NO_MATCHED_DEPTH: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchPick {
    pub loc: usize,
    pub method: MethodId,
    pub score: usize,
}

pub struct MethodMatcher<'a> {
    analyser: &'a Analyser,
    trace: &'a TraceData,
    no_matched_depth: Option<u32>,
    cache: FnvHashMap<(usize, MethodId), usize>,
}

impl<'a> MethodMatcher<'a> {
    pub fn new(analyser: &'a Analyser, trace: &'a TraceData) -> Self {
        Self::with_no_matched_depth(analyser, trace, Some(DEFAULT_NO_MATCHED_DEPTH))
    }

    pub fn with_no_matched_depth(
        analyser: &'a Analyser,
        trace: &'a TraceData,
        no_matched_depth: Option<u32>,
    ) -> Self {
        Self { analyser, trace, no_matched_depth, cache: FnvHashMap::default() }
    }

    /// Matches every record in `split`'s range, returning one [`MatchPick`]
    /// per record a candidate was confidently found for. Gaps (no
    /// candidate scored above zero, or a tie) are simply absent.
    pub fn match_split(&mut self, split: &ThreadSplit) -> Vec<MatchPick> {
        let end = split.end_addr.unwrap_or_else(|| self.trace.len());
        let mut access = TraceDataAccess::from_range(self.trace, split.start_addr, end);
        let mut context: Option<MethodId> = None;
        let mut entering_callee = false;
        let mut depth_budget = self.no_matched_depth;
        let mut picks = Vec::new();

        while let Some((loc, record)) = access.next_record() {
            match record {
                TraceRecord::MethodEntry => entering_callee = true,
                TraceRecord::InvokeReturnEntryPoints => entering_callee = false,
                TraceRecord::Bytecode(steps) => {
                    if let Some(pick) = self.match_inter(loc, steps, context, entering_callee, &mut depth_budget) {
                        context = Some(pick.method);
                        picks.push(pick);
                    }
                    entering_callee = false;
                }
                TraceRecord::Jit { section, pcs } | TraceRecord::JitEntry { section, pcs } => {
                    let jit_picks = self.match_jit(loc, section, pcs);
                    if let Some(last) = jit_picks.last() {
                        context = Some(last.method);
                    }
                    picks.extend(jit_picks);
                }
                _ => {}
            }
        }
        picks
    }

    fn match_inter(
        &mut self,
        loc: usize,
        steps: &[BytecodeStep],
        context: Option<MethodId>,
        entering_callee: bool,
        depth_budget: &mut Option<u32>,
    ) -> Option<MatchPick> {
        if let Some(md) = self.trace.get_md(loc) {
            if let Some(method) = self.resolve_md(md) {
                let score = self.score_candidate(loc, method, steps);
                return Some(MatchPick { loc, method, score });
            }
        }
        let candidates = self.candidates(context, entering_callee, depth_budget);
        self.pick_best(loc, &candidates, steps)
    }

    /// One `MatchPick` per `PcStackInfo` the JIT run carries (§4.9), not
    /// just the last one: a single JIT record can span several distinct
    /// resolved frames and each one resolves to its own method index.
    fn match_jit(&mut self, loc: usize, section: &Arc<JitSection>, pcs: &[PcStackInfo]) -> Vec<MatchPick> {
        pcs.iter()
            .filter_map(|info| {
                let (method_index, _bci) = *info.frames.first()?;
                let md = section.cmd().method_desc(method_index)?;
                let method = self.resolve_md(md)?;
                Some(MatchPick { loc, method, score: 1 })
            })
            .collect()
    }

    /// Candidate methods for one unmatched record.
    ///
    /// - A confirmed method entry with a known caller context prefers that
    ///   method's statically resolved callees at every call site.
    /// - Absent a known callee set (virtual dispatch the hierarchy couldn't
    ///   pin down, or no context at all), falls back to every parsed method
    ///   plus registered callbacks, spending one unit of `depth_budget`.
    /// - A continuation (not a fresh entry) prefers the context method
    ///   itself plus its known callers, covering both "still inside the
    ///   same method" and "this is a return resumption".
    /// - With no context and no entry marker, every known call site's
    ///   caller is fair game.
    fn candidates(
        &self,
        context: Option<MethodId>,
        entering_callee: bool,
        depth_budget: &mut Option<u32>,
    ) -> Vec<MethodId> {
        if entering_callee {
            if let Some(ctx) = context {
                let callees: Vec<MethodId> =
                    self.analyser.method(ctx).callee_map().values().flatten().copied().collect();
                if !callees.is_empty() {
                    return callees;
                }
            }
            if let Some(budget) = depth_budget {
                if *budget == 0 {
                    return Vec::new();
                }
                *budget -= 1;
            }
            self.analyser.all_methods().chain(self.analyser.callbacks().iter().copied()).collect()
        } else if let Some(ctx) = context {
            let mut out = vec![ctx];
            out.extend(self.analyser.method(ctx).callers().iter().map(|&(_, caller)| caller));
            out
        } else {
            self.analyser.all_call_sites().iter().map(|&(_, caller)| caller).collect()
        }
    }

    fn pick_best(&mut self, loc: usize, candidates: &[MethodId], steps: &[BytecodeStep]) -> Option<MatchPick> {
        let mut best: Option<MatchPick> = None;
        let mut tied = false;
        for &method in candidates {
            let score = self.score_candidate(loc, method, steps);
            if score == 0 {
                continue;
            }
            match &best {
                None => best = Some(MatchPick { loc, method, score }),
                Some(b) if score > b.score => {
                    best = Some(MatchPick { loc, method, score });
                    tied = false;
                }
                Some(b) if score == b.score => tied = true,
                _ => {}
            }
        }
        if tied {
            log::debug!("ambiguous method match at location {loc}: top score tied among {} candidates", candidates.len());
            return None;
        }
        best
    }

    fn score_candidate(&mut self, loc: usize, method: MethodId, steps: &[BytecodeStep]) -> usize {
        if let Some(&cached) = self.cache.get(&(loc, method)) {
            return cached;
        }
        let graph = self.analyser.method(method).block_graph();
        let score = match graph.offset_to_block(0) {
            Some(entry) => BlockMatcher::new(graph)
                .match_from(entry, steps)
                .iter()
                .map(|o| o.end_offset)
                .max()
                .unwrap_or(0),
            None => 0,
        };
        self.cache.insert((loc, method), score);
        score
    }

    fn resolve_md(&self, md: &MethodDesc) -> Option<MethodId> {
        let klass = self.analyser.get_klass(&md.klass_name)?;
        self.analyser.klass(klass).method(&format!("{}{}", md.name, md.signature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fnv::FnvHashMap as FMap;
    use jportal_classfile::block::BlockGraph;
    use jportal_classfile::ids::class::ClassName;
    use jportal_classfile::ids::method::{MethodDescriptor, MethodName};
    use jportal_classfile::klass::Klass;
    use jportal_classfile::method::Method;
    use jportal_classfile::opcode::{Instruction, InstructionList, Op};
    use jportal_decode::trace_data::TraceDataRecord;

    fn leaf_graph() -> BlockGraph {
        let instructions =
            vec![Instruction { offset: 0, op: Op::Iconst0 }, Instruction { offset: 1, op: Op::Ireturn }];
        let mut offset_to_index = FMap::default();
        for (i, instr) in instructions.iter().enumerate() {
            offset_to_index.insert(instr.offset, i);
        }
        let il = InstructionList { instructions, offset_to_index };
        BlockGraph::build(&il, 2, &[]).unwrap()
    }

    fn one_method_analyser() -> (Analyser, MethodId) {
        let mut a = Analyser::new();
        let name = ClassName::parse_str("com/exopteron/Leaf").unwrap();
        let klass_id = a.insert_klass(name.clone(), Klass::new(name));
        let method = Method::new(
            MethodName::Generic("leaf".to_string()),
            MethodDescriptor::parse_str("()I").unwrap(),
            klass_id,
            leaf_graph(),
        );
        let method_id = a.insert_method(method);
        a.klass_mut(klass_id).insert_method("leaf()I".to_string(), method_id);
        a.analyse_hierarchy();
        a.analyse_call_graph();
        (a, method_id)
    }

    #[test]
    fn method_desc_hint_short_circuits_candidate_search() {
        let (analyser, method_id) = one_method_analyser();
        // add_method_desc only stamps the map when current_is_method_entry;
        // seed that state via add_codelet before it.
        let mut trace = TraceData::new();
        {
            let mut rec = TraceDataRecord::new(&mut trace);
            rec.add_codelet(jportal_decode::codelet::CodeletKind::MethodEntryPoint);
            rec.add_method_desc(MethodDesc {
                klass_name: "com/exopteron/Leaf".into(),
                name: "leaf".into(),
                signature: "()I".into(),
            });
            rec.add_bytecode(0, 0x03);
            rec.add_bytecode(0, 0xac);
        }

        let mut matcher = MethodMatcher::new(&analyser, &trace);
        let split = ThreadSplit {
            tid: 1,
            start_addr: 0,
            end_addr: None,
            start_time: 0,
            end_time: 0,
            head_loss: false,
            tail_loss: false,
        };
        let picks = matcher.match_split(&split);
        assert!(picks.iter().any(|p| p.method == method_id));
    }

    #[test]
    fn unresolvable_method_desc_falls_back_to_candidate_search() {
        let (analyser, method_id) = one_method_analyser();
        let mut trace = TraceData::new();
        {
            let mut rec = TraceDataRecord::new(&mut trace);
            rec.add_codelet(jportal_decode::codelet::CodeletKind::MethodEntryPoint);
            rec.add_bytecode(0, 0x03);
            rec.add_bytecode(0, 0xac);
        }
        let mut matcher = MethodMatcher::new(&analyser, &trace);
        let split = ThreadSplit {
            tid: 1,
            start_addr: 0,
            end_addr: None,
            start_time: 0,
            end_time: 0,
            head_loss: false,
            tail_loss: false,
        };
        let picks = matcher.match_split(&split);
        assert!(picks.iter().any(|p| p.method == method_id));
    }
}
