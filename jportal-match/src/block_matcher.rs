//! Bytecode-sequence-to-block matcher, positive path (§4.7).
//!
//! Walks a method's [`BlockGraph`] against one observed `INTER` run's
//! canonical opcode/branch steps, consuming the graph's canonicalized byte
//! stream block by block. A graph block that ends before the observed
//! bytes do is a fall-through interior (its single successor continues the
//! walk); an observed run that ends mid-block is a valid partial match
//! (the split point lands there); a switch forks over every successor and
//! all surviving forks are unioned.

use jportal_classfile::block::{Block, BlockGraph, BlockId, Branch};
use jportal_decode::trace_data::BytecodeStep;

/// Where one walk of the observed stream against the graph ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOutcome {
    pub end_block: BlockId,
    /// Offset into the observed `steps` slice the walk consumed up to.
    pub end_offset: usize,
    /// Whether the observed stream ran out (a legitimate split point)
    /// rather than the graph running out (reaching a terminal block with
    /// bytes still unconsumed, which is not itself an error but leaves
    /// nothing further to match).
    pub exhausted: bool,
}

pub struct BlockMatcher<'g> {
    graph: &'g BlockGraph,
}

impl<'g> BlockMatcher<'g> {
    pub fn new(graph: &'g BlockGraph) -> Self {
        Self { graph }
    }

    /// Matches `observed` against the graph starting at `start`. Returns
    /// every outcome a switch fork along the way can produce; an empty
    /// result means the observed bytes disagree with the graph somewhere.
    pub fn match_from(&self, start: BlockId, observed: &[BytecodeStep]) -> Vec<MatchOutcome> {
        self.match_block(start, observed, 0)
    }

    /// Matches starting from every exception-table target in the graph,
    /// unioning the results — the "exception-observed-block" path in §4.7.
    pub fn match_exception_fragment(&self, observed: &[BytecodeStep]) -> Vec<MatchOutcome> {
        self.graph
            .exceptions()
            .iter()
            .filter_map(|e| self.graph.offset_to_block(e.target as usize))
            .flat_map(|block_id| self.match_block(block_id, observed, 0))
            .collect()
    }

    fn match_block(&self, block_id: BlockId, observed: &[BytecodeStep], pos: usize) -> Vec<MatchOutcome> {
        let block = self.graph.block(block_id);
        let block_bytes = &self.graph.bct_code()[block.bct_begin()..block.bct_end()];

        let mut obs_pos = pos;
        for &expected in block_bytes {
            match observed.get(obs_pos) {
                Some(BytecodeStep::Op(actual)) if *actual == expected => obs_pos += 1,
                Some(_) => return Vec::new(),
                None => {
                    return vec![MatchOutcome { end_block: block_id, end_offset: obs_pos, exhausted: true }];
                }
            }
        }
        self.continue_past(block, block_id, observed, obs_pos)
    }

    fn continue_past(
        &self,
        block: &Block,
        block_id: BlockId,
        observed: &[BytecodeStep],
        obs_pos: usize,
    ) -> Vec<MatchOutcome> {
        if obs_pos >= observed.len() {
            return vec![MatchOutcome { end_block: block_id, end_offset: obs_pos, exhausted: true }];
        }
        match block.branch() {
            Branch::Terminal => {
                vec![MatchOutcome { end_block: block_id, end_offset: obs_pos, exhausted: false }]
            }
            Branch::Single => match block.succs().first() {
                Some(&next) => self.match_block(next, observed, obs_pos),
                None => Vec::new(),
            },
            Branch::Conditional => {
                let (taken, next_pos) = match observed.get(obs_pos) {
                    Some(BytecodeStep::Branch(taken)) => (*taken, obs_pos + 1),
                    _ => return Vec::new(),
                };
                let idx = if taken { 1 } else { 0 };
                match block.succs().get(idx) {
                    Some(&next) => self.match_block(next, observed, next_pos),
                    None => Vec::new(),
                }
            }
            Branch::Switch => {
                block.succs().iter().flat_map(|&next| self.match_block(next, observed, obs_pos)).collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jportal_classfile::opcode::{Instruction, InstructionList, Op};
    use fnv::FnvHashMap;

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
    fn straight_line_match_consumes_whole_observed_run() {
        let il = list(vec![instr(0, Op::Iconst0), instr(1, Op::Ireturn)]);
        let g = BlockGraph::build(&il, 2, &[]).unwrap();
        let matcher = BlockMatcher::new(&g);
        let observed = vec![BytecodeStep::Op(0x03), BytecodeStep::Op(0xac)];
        let outcomes = matcher.match_from(g.offset_to_block(0).unwrap(), &observed);
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].exhausted);
        assert_eq!(outcomes[0].end_offset, 2);
    }

    #[test]
    fn mismatched_byte_rejects() {
        let il = list(vec![instr(0, Op::Iconst0), instr(1, Op::Ireturn)]);
        let g = BlockGraph::build(&il, 2, &[]).unwrap();
        let matcher = BlockMatcher::new(&g);
        let observed = vec![BytecodeStep::Op(0x99), BytecodeStep::Op(0xac)];
        assert!(matcher.match_from(g.offset_to_block(0).unwrap(), &observed).is_empty());
    }

    #[test]
    fn conditional_branch_follows_taken_flag() {
        let il = list(vec![
            instr(0, Op::Ifeq { offset: 4 }),
            instr(3, Op::Iconst0),
            instr(4, Op::Ireturn),
        ]);
        let g = BlockGraph::build(&il, 5, &[]).unwrap();
        let matcher = BlockMatcher::new(&g);
        // ifeq tag is 0x99; take the branch straight to the ireturn block.
        let observed = vec![BytecodeStep::Op(0x99), BytecodeStep::Branch(true), BytecodeStep::Op(0xac)];
        let outcomes = matcher.match_from(g.offset_to_block(0).unwrap(), &observed);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].end_block, g.offset_to_block(4).unwrap());
        assert!(outcomes[0].exhausted);
    }

    #[test]
    fn observed_stream_ending_mid_block_is_a_valid_partial_match() {
        let il = list(vec![instr(0, Op::Iconst0), instr(1, Op::Ireturn)]);
        let g = BlockGraph::build(&il, 2, &[]).unwrap();
        let matcher = BlockMatcher::new(&g);
        let observed = vec![BytecodeStep::Op(0x03)];
        let outcomes = matcher.match_from(g.offset_to_block(0).unwrap(), &observed);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].end_offset, 1);
        assert!(outcomes[0].exhausted);
    }
}
