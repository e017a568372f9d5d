//! JIT matcher for a single method (§4.8).
//!
//! A JIT `PCStackInfo` frame only names `(method, bci)`; this module
//! answers the three questions the top-level matcher needs about one such
//! frame using nothing but the method's [`BlockGraph`]: can control
//! plausibly reach `dest_bci` from `src_bci` (used to merge adjacent JIT
//! stack frames at the same method), does the bci's chain eventually
//! return, and is the bci the method's entry block.

use fnv::FnvHashSet;

use jportal_classfile::block::{Block, BlockGraph, BlockId, Branch};

/// Canonical tag range for the eight `*return` opcodes
/// (`ireturn`..`return`), used only to tell a terminal return block apart
/// from an `athrow`/unresolved `ret` — `BlockGraph` doesn't retain the
/// terminating opcode itself.
const RETURN_TAG_RANGE: std::ops::RangeInclusive<u8> = 0xac..=0xb1;

pub struct JitMatcher<'g> {
    graph: &'g BlockGraph,
}

impl<'g> JitMatcher<'g> {
    pub fn new(graph: &'g BlockGraph) -> Self {
        Self { graph }
    }

    /// Whether `bci` is the method's entry block offset.
    pub fn is_entry(&self, bci: usize) -> bool {
        bci == 0
    }

    /// True if `dest_bci` is reachable from `src_bci` by following
    /// single-successor chains, or through any branch of a multi-successor
    /// block encountered along the way.
    pub fn match_bci(&self, src_bci: usize, dest_bci: usize) -> bool {
        if src_bci == dest_bci {
            return true;
        }
        let Some(start) = self.graph.offset_to_block(src_bci) else { return false };
        let mut seen = FnvHashSet::default();
        self.match_chain(start, dest_bci, &mut seen)
    }

    fn match_chain(&self, block_id: BlockId, dest_bci: usize, seen: &mut FnvHashSet<BlockId>) -> bool {
        if !seen.insert(block_id) {
            return false;
        }
        let block = self.graph.block(block_id);
        match block.branch() {
            Branch::Terminal => false,
            Branch::Single | Branch::Conditional | Branch::Switch => {
                block.succs().iter().any(|&succ| {
                    self.graph.block(succ).begin_offset() == dest_bci
                        || self.match_chain(succ, dest_bci, seen)
                })
            }
        }
    }

    /// Follows single-successor chains from `bci`; true if the terminal
    /// block reached has no successors (a return/athrow/unresolved `ret`),
    /// false if the chain forks before reaching one.
    pub fn will_return(&self, bci: usize) -> bool {
        let Some(mut block_id) = self.graph.offset_to_block(bci) else { return false };
        let mut seen = FnvHashSet::default();
        loop {
            if !seen.insert(block_id) {
                return false;
            }
            let block = self.graph.block(block_id);
            match block.branch() {
                Branch::Terminal => return block.succs().is_empty(),
                Branch::Single => match block.succs().first() {
                    Some(&next) => block_id = next,
                    None => return true,
                },
                Branch::Conditional | Branch::Switch => return false,
            }
        }
    }

    /// Whether the terminal block reached from `bci` (via single-successor
    /// chains only) ends in something other than a `*return`, i.e. an
    /// `athrow` or an unresolved `ret`.
    pub fn terminal_is_throw(&self, bci: usize) -> bool {
        let Some(mut block_id) = self.graph.offset_to_block(bci) else { return false };
        let mut seen = FnvHashSet::default();
        loop {
            if !seen.insert(block_id) {
                return false;
            }
            let block = self.graph.block(block_id);
            match block.branch() {
                Branch::Terminal => return self.is_throw_terminal(block),
                Branch::Single => match block.succs().first() {
                    Some(&next) => block_id = next,
                    None => return false,
                },
                Branch::Conditional | Branch::Switch => return false,
            }
        }
    }

    fn is_throw_terminal(&self, block: &Block) -> bool {
        if !block.succs().is_empty() || block.bct_len() == 0 {
            return false;
        }
        match self.graph.bct_code().get(block.bct_end() - 1) {
            Some(tag) => !RETURN_TAG_RANGE.contains(tag),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fnv::FnvHashMap;
    use jportal_classfile::opcode::{Instruction, InstructionList, Op};

    fn instr(offset: usize, op: Op) -> Instruction {
        Instruction { offset, op }
    }

    fn list(items: Vec<Instruction>) -> InstructionList {
        let mut offset_to_index = FnvHashMap::default();
        for (i, instr) in items.iter().enumerate() {
            offset_to_index.insert(instr.offset, i);
        }
        InstructionList { instructions: items, offset_to_index }
    }

    #[test]
    fn entry_bci_is_zero() {
        let il = list(vec![instr(0, Op::Iconst0), instr(1, Op::Ireturn)]);
        let g = BlockGraph::build(&il, 2, &[]).unwrap();
        let m = JitMatcher::new(&g);
        assert!(m.is_entry(0));
        assert!(!m.is_entry(1));
    }

    #[test]
    fn straight_line_method_will_return() {
        let il = list(vec![instr(0, Op::Iconst0), instr(1, Op::Ireturn)]);
        let g = BlockGraph::build(&il, 2, &[]).unwrap();
        let m = JitMatcher::new(&g);
        assert!(m.will_return(0));
        assert!(!m.terminal_is_throw(0));
    }

    #[test]
    fn conditional_block_matches_either_branch_target() {
        let il = list(vec![
            instr(0, Op::Ifeq { offset: 4 }),
            instr(3, Op::Iconst0),
            instr(4, Op::Ireturn),
        ]);
        let g = BlockGraph::build(&il, 5, &[]).unwrap();
        let m = JitMatcher::new(&g);
        assert!(m.match_bci(0, 3));
        assert!(m.match_bci(0, 4));
        // A conditional block itself is a fork, so will_return from the
        // entry can't follow a single chain through it.
        assert!(!m.will_return(0));
    }
}
