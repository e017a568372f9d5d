//! Control-flow block graph built from a method's decoded instruction
//! stream, plus the canonicalized byte-compacted ("BCT") form of the same
//! code used for byte-exact trace matching.

use std::collections::{BTreeSet, HashMap};

use crate::{
    attribute::ExceptionTableEntry,
    error,
    opcode::{InstructionList, Op},
};

/// Index of a [`Block`] within a [`BlockGraph`]'s arena.
pub type BlockId = usize;

/// How a block ends, mirroring the successor-selection rule the matcher
/// applies against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    /// A single successor: unconditional `goto`/`jsr`, an invoke's
    /// following block, or a `ret`'s resumed call sites.
    Single,
    /// A two-way conditional: `successors[0]` is fall-through,
    /// `successors[1]` is the taken branch.
    Conditional,
    /// A `tableswitch`/`lookupswitch`: `successors[0]` is `default`, the
    /// rest are cases in table order.
    Switch,
    /// A return, `athrow`, or a `ret` with no recorded continuation —
    /// no successors.
    Terminal,
}

/// One basic block in a method's control-flow graph.
#[derive(Debug, Clone)]
pub struct Block {
    id: BlockId,
    begin_offset: usize,
    end_offset: usize,
    bct_begin: usize,
    bct_end: usize,
    preds: Vec<BlockId>,
    succs: Vec<BlockId>,
    branch: Branch,
}

impl Block {
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// `[begin_offset, end_offset)` in the method's raw bytecode.
    pub fn begin_offset(&self) -> usize {
        self.begin_offset
    }

    pub fn end_offset(&self) -> usize {
        self.end_offset
    }

    /// `[bct_begin, bct_end)` in the method's canonicalized byte stream.
    pub fn bct_begin(&self) -> usize {
        self.bct_begin
    }

    pub fn bct_end(&self) -> usize {
        self.bct_end
    }

    pub fn bct_len(&self) -> usize {
        self.bct_end - self.bct_begin
    }

    pub fn preds(&self) -> &[BlockId] {
        &self.preds
    }

    pub fn succs(&self) -> &[BlockId] {
        &self.succs
    }

    pub fn branch(&self) -> Branch {
        self.branch
    }

    fn add_pred(&mut self, pred: BlockId) {
        if !self.preds.contains(&pred) {
            self.preds.push(pred);
        }
    }

    fn add_succ(&mut self, succ: BlockId) {
        if !self.succs.contains(&succ) {
            self.succs.push(succ);
        }
    }
}

/// An exception table entry, carried through unchanged from the `Code`
/// attribute for use by the matcher's exception-fragment handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Excep {
    pub from: u16,
    pub to: u16,
    pub target: u16,
    pub catch_type: u16,
}

/// A method's control-flow graph, its canonicalized byte stream, and the
/// call sites and exception handlers needed to match observed traces
/// against it.
#[derive(Debug)]
pub struct BlockGraph {
    blocks: Vec<Block>,
    offset_to_block: HashMap<usize, BlockId>,
    bct_code: Vec<u8>,
    bc_offset_to_bct_offset: HashMap<usize, usize>,
    exceptions: Vec<Excep>,
    /// Offset of an invoke instruction to its opcode and constant-pool index.
    call_sites: HashMap<usize, (Op, u16)>,
    /// 224-bit bitmap (7 u32 words) of which canonical opcodes appear
    /// anywhere in the method; a cheap pre-filter during matching.
    bc_set: [u32; 7],
}

impl BlockGraph {
    pub fn build(
        instructions: &InstructionList,
        code_length: usize,
        exception_table: &[ExceptionTableEntry],
    ) -> error::Result<Self> {
        let mut g = BlockGraph {
            blocks: Vec::new(),
            offset_to_block: HashMap::new(),
            bct_code: Vec::new(),
            bc_offset_to_bct_offset: HashMap::new(),
            exceptions: exception_table
                .iter()
                .map(|e| Excep {
                    from: *e.pc_range.start(),
                    to: *e.pc_range.end(),
                    target: e.handler_pc,
                    catch_type: e.catch_type,
                })
                .collect(),
            call_sites: HashMap::new(),
            bc_set: [0; 7],
        };
        for instr in &instructions.instructions {
            let tag = instr.op.tag() as usize;
            g.bc_set[tag >> 5] |= 1 << (tag & 31);
        }
        g.build_graph(instructions, code_length)?;
        g.build_bct(instructions);
        Ok(g)
    }

    pub fn bc_set(&self) -> &[u32; 7] {
        &self.bc_set
    }

    /// Whether every opcode set in `other` also appears in this method
    /// (a cheap necessary-but-not-sufficient pre-filter for matching).
    pub fn contains_bc_set(&self, other: &[u32; 7]) -> bool {
        (0..7).all(|i| other[i] & self.bc_set[i] == other[i])
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id]
    }

    pub fn offset_to_block(&self, offset: usize) -> Option<BlockId> {
        self.offset_to_block.get(&offset).copied()
    }

    pub fn bct_code(&self) -> &[u8] {
        &self.bct_code
    }

    /// Maps a raw bytecode offset to its position in the canonicalized
    /// byte stream. Only defined at instruction boundaries.
    pub fn bc_offset_to_bct_offset(&self, offset: usize) -> Option<usize> {
        self.bc_offset_to_bct_offset.get(&offset).copied()
    }

    pub fn exceptions(&self) -> &[Excep] {
        &self.exceptions
    }

    pub fn call_sites(&self) -> &HashMap<usize, (Op, u16)> {
        &self.call_sites
    }

    fn block_at(&mut self, offset: usize, pred: Option<BlockId>) -> BlockId {
        let id = *self.offset_to_block.entry(offset).or_insert_with(|| {
            let id = self.blocks.len();
            self.blocks.push(Block {
                id,
                begin_offset: offset,
                end_offset: usize::MAX,
                bct_begin: 0,
                bct_end: 0,
                preds: Vec::new(),
                succs: Vec::new(),
                branch: Branch::Terminal,
            });
            id
        });
        if let Some(pred) = pred {
            self.blocks[pred].add_succ(id);
            self.blocks[id].add_pred(pred);
        }
        id
    }

    /// First pass: every offset that must begin a block — branch/switch
    /// targets and exception handlers. Fall-through boundaries after a
    /// terminator or invoke are handled structurally in the second pass
    /// and don't need to be recorded here.
    fn branch_targets(instructions: &InstructionList) -> (BTreeSet<usize>, Vec<usize>) {
        let mut starts = BTreeSet::new();
        starts.insert(0);
        let mut jsr_following = Vec::new();
        let items = &instructions.instructions;
        for (i, instr) in items.iter().enumerate() {
            match &instr.op {
                Op::TableSwitch { default, offsets, .. } => {
                    starts.insert((instr.offset as i64 + *default as i64) as usize);
                    for off in offsets {
                        starts.insert((instr.offset as i64 + *off as i64) as usize);
                    }
                }
                Op::LookupSwitch { default, pairs } => {
                    starts.insert((instr.offset as i64 + *default as i64) as usize);
                    for (_, off) in pairs {
                        starts.insert((instr.offset as i64 + *off as i64) as usize);
                    }
                }
                Op::Jsr { .. } | Op::JsrW { .. } => {
                    if let Some(next) = items.get(i + 1) {
                        jsr_following.push(next.offset);
                    }
                    if let Some(target) = instr.op.branch_offset() {
                        starts.insert((instr.offset as i64 + target as i64) as usize);
                    }
                }
                _ if instr.op.is_branch() => {
                    if let Some(target) = instr.op.branch_offset() {
                        starts.insert((instr.offset as i64 + target as i64) as usize);
                    }
                }
                _ => {}
            }
        }
        (starts, jsr_following)
    }

    fn build_graph(&mut self, instructions: &InstructionList, code_length: usize) -> error::Result<()> {
        for excep in &self.exceptions {
            self.offset_to_block
                .entry(excep.target as usize)
                .or_insert_with(|| {
                    let id = self.blocks.len();
                    self.blocks.push(Block {
                        id,
                        begin_offset: excep.target as usize,
                        end_offset: usize::MAX,
                        bct_begin: 0,
                        bct_end: 0,
                        preds: Vec::new(),
                        succs: Vec::new(),
                        branch: Branch::Terminal,
                    });
                    id
                });
        }

        let (block_starts, jsr_following) = Self::branch_targets(instructions);
        for &offset in &block_starts {
            self.block_at(offset, None);
        }

        let items = &instructions.instructions;
        let mut current: Option<BlockId> = None;
        for (i, instr) in items.iter().enumerate() {
            let next_offset = items.get(i + 1).map(|n| n.offset).unwrap_or(code_length);

            if current.is_none() {
                current = Some(self.block_at(instr.offset, None));
            } else if block_starts.contains(&instr.offset) {
                let prev = current.unwrap();
                self.blocks[prev].end_offset = instr.offset;
                if self.blocks[prev].branch == Branch::Terminal {
                    self.blocks[prev].branch = Branch::Single;
                }
                current = Some(self.block_at(instr.offset, Some(prev)));
            }
            let cur = current.unwrap();

            if let Op::Invokevirtual { index }
            | Op::Invokespecial { index }
            | Op::Invokestatic { index }
            | Op::Invokedynamic { index } = &instr.op
            {
                self.call_sites.insert(instr.offset, (instr.op, *index));
            } else if let Op::Invokeinterface { index, .. } = &instr.op {
                self.call_sites.insert(instr.offset, (instr.op, *index));
            }

            if instr.op.is_invoke() {
                self.blocks[cur].end_offset = next_offset;
                self.blocks[cur].branch = Branch::Single;
                self.block_at(next_offset, Some(cur));
                current = None;
            } else if instr.op.is_block_terminator() {
                self.blocks[cur].end_offset = next_offset;
                match &instr.op {
                    Op::TableSwitch { default, offsets, .. } => {
                        self.blocks[cur].branch = Branch::Switch;
                        let default_off = (instr.offset as i64 + *default as i64) as usize;
                        self.block_at(default_off, Some(cur));
                        for off in offsets {
                            let target = (instr.offset as i64 + *off as i64) as usize;
                            self.block_at(target, Some(cur));
                        }
                    }
                    Op::LookupSwitch { default, pairs } => {
                        self.blocks[cur].branch = Branch::Switch;
                        let default_off = (instr.offset as i64 + *default as i64) as usize;
                        self.block_at(default_off, Some(cur));
                        for (_, off) in pairs {
                            let target = (instr.offset as i64 + *off as i64) as usize;
                            self.block_at(target, Some(cur));
                        }
                    }
                    _ if instr.op.is_branch() => {
                        let target = (instr.offset as i64 + instr.op.branch_offset().unwrap() as i64) as usize;
                        let unconditional = matches!(instr.op, Op::Goto { .. } | Op::GotoW { .. });
                        let has_continuation = matches!(instr.op, Op::Jsr { .. } | Op::JsrW { .. });
                        if unconditional || has_continuation {
                            self.blocks[cur].branch = Branch::Single;
                            self.block_at(target, Some(cur));
                        } else {
                            self.blocks[cur].branch = Branch::Conditional;
                            self.block_at(next_offset, Some(cur));
                            self.block_at(target, Some(cur));
                        }
                    }
                    Op::Ret { .. } | Op::WideLocal { op: crate::opcode::WideOp::Ret, .. } => {
                        self.blocks[cur].branch = if jsr_following.is_empty() {
                            Branch::Terminal
                        } else {
                            Branch::Single
                        };
                        for &off in &jsr_following {
                            self.block_at(off, Some(cur));
                        }
                    }
                    _ => {
                        self.blocks[cur].branch = Branch::Terminal;
                    }
                }
                current = None;
            }
        }
        if let Some(cur) = current {
            if self.blocks[cur].end_offset == usize::MAX {
                self.blocks[cur].end_offset = code_length;
            }
        }
        Ok(())
    }

    /// Builds the canonicalized byte stream: one tag byte per instruction,
    /// operands stripped, with block boundaries preserved and the
    /// bytecode-offset <-> BCT-offset mapping recorded both ways.
    fn build_bct(&mut self, instructions: &InstructionList) {
        for instr in &instructions.instructions {
            if let Some(&id) = self.offset_to_block.get(&instr.offset) {
                self.blocks[id].bct_begin = self.bct_code.len();
            }
            self.bc_offset_to_bct_offset.insert(instr.offset, self.bct_code.len());
            self.bct_code.push(instr.op.tag());
        }
        for block in &mut self.blocks {
            block.bct_end = self
                .bc_offset_to_bct_offset
                .get(&block.end_offset)
                .copied()
                .unwrap_or(self.bct_code.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Instruction;
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
    fn straight_line_method_is_one_block() {
        let il = list(vec![instr(0, Op::Iconst0), instr(1, Op::Ireturn)]);
        let g = BlockGraph::build(&il, 2, &[]).unwrap();
        assert_eq!(g.blocks().len(), 1);
        assert_eq!(g.block(0).begin_offset(), 0);
        assert_eq!(g.block(0).end_offset(), 2);
        assert_eq!(g.block(0).branch(), Branch::Terminal);
        assert_eq!(g.bct_code(), &[0x03, 0xac]);
        // iconst_0 = 0x03 (bit 3 of word 0), ireturn = 0xac (bit 12 of word 5)
        assert_eq!(g.bc_set()[0] & (1 << 3), 1 << 3);
        assert_eq!(g.bc_set()[0xac >> 5] & (1 << (0xac & 31)), 1 << (0xac & 31));
        assert!(g.contains_bc_set(&[1 << 3, 0, 0, 0, 0, 0, 0]));
    }

    #[test]
    fn conditional_branch_has_two_successors() {
        // ifeq +4 (to offset 3+1=... ), then two one-byte blocks
        let il = list(vec![
            instr(0, Op::Ifeq { offset: 4 }),
            instr(3, Op::Iconst0),
            instr(4, Op::Ireturn),
        ]);
        let g = BlockGraph::build(&il, 5, &[]).unwrap();
        let entry = g.offset_to_block(0).unwrap();
        assert_eq!(g.block(entry).branch(), Branch::Conditional);
        assert_eq!(g.block(entry).succs().len(), 2);
        assert_eq!(g.block(entry).succs()[0], g.offset_to_block(3).unwrap());
        assert_eq!(g.block(entry).succs()[1], g.offset_to_block(4).unwrap());
    }

    #[test]
    fn invoke_splits_block_with_single_successor() {
        let il = list(vec![
            instr(0, Op::Invokestatic { index: 7 }),
            instr(3, Op::Return),
        ]);
        let g = BlockGraph::build(&il, 4, &[]).unwrap();
        let entry = g.offset_to_block(0).unwrap();
        assert_eq!(g.block(entry).branch(), Branch::Single);
        assert_eq!(g.block(entry).succs(), &[g.offset_to_block(3).unwrap()]);
        assert_eq!(g.call_sites().get(&0), Some(&(Op::Invokestatic { index: 7 }, 7)));
    }

    #[test]
    fn exception_handler_target_becomes_a_block() {
        let il = list(vec![
            instr(0, Op::Iconst0),
            instr(1, Op::Pop),
            instr(2, Op::Return),
            instr(3, Op::Astore { index: 1 }),
            instr(5, Op::Return),
        ]);
        let entry = ExceptionTableEntry { pc_range: 0..=2, handler_pc: 3, catch_type: 0 };
        let g = BlockGraph::build(&il, 6, &[entry]).unwrap();
        assert!(g.offset_to_block(3).is_some());
        assert_eq!(g.exceptions()[0].target, 3);
    }
}
