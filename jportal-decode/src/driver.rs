//! Drives one PT chunk (§4.11): resyncs at PSB boundaries, drains query
//! events against the codelet registry and the live JIT image, and feeds
//! [`TraceDataRecord`] the resulting bytecode/branch/jit/codelet calls.
//!
//! Instruction-level JIT-mode decoding borrows its classification scheme
//! (`InstructionClass`, derived from `iced_x86::FlowControl`) from the same
//! shape a standalone Intel-PT coverage tool uses to drive its own decoder
//! loop; the chunk driver here additionally resolves debug info per PC and
//! hands control back to bytecode mode through the codelet registry instead
//! of accumulating a coverage map.
//!
//! "Wall-clock time" in this reduced packet model (`pt::packet` has no
//! CYC/MTC/TSC packets — see its module doc) is a monotonically increasing
//! counter advanced once per resolved IP; it exists only to give
//! `TraceDataRecord`/the dump and sideband decoders a total order to drain
//! against, not to recover real nanosecond timestamps.

use fnv::FnvHashMap;
use iced_x86::{Code, Decoder, DecoderOptions, FlowControl, Instruction, Register};

use crate::codelet::{CodeletKind, CodeletMatch, CodeletRegistry};
use crate::cpu::PtCpu;
use crate::dump::{DumpEvent, JvmDumpDecoder};
use crate::error::{Error, Result};
use crate::jit::image::JitImage;
use crate::jit::section::PcStackInfo;
use crate::pt::query::{PtQuery, QueryEvent};
use crate::sideband::{SidebandDecoder, SidebandEvent};
use crate::trace_data::TraceDataRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InstructionClass {
    Other,
    CallDirect,
    CallIndirect,
    CondBranch,
    FarCall,
    FarJump,
    FarReturn,
    JumpDirect,
    JumpIndirect,
    MovCr3,
    Return,
}

impl From<&Instruction> for InstructionClass {
    fn from(ins: &Instruction) -> Self {
        match ins.flow_control() {
            FlowControl::Next => {
                if matches!(ins.code(), Code::Mov_cr_r32 | Code::Mov_cr_r64)
                    && ins.op0_register() == Register::CR3
                {
                    Self::MovCr3
                } else {
                    Self::Other
                }
            }
            FlowControl::ConditionalBranch => Self::CondBranch,
            FlowControl::UnconditionalBranch => {
                if ins.is_jmp_far() {
                    Self::FarJump
                } else {
                    Self::JumpDirect
                }
            }
            FlowControl::Interrupt | FlowControl::Exception => Self::FarCall,
            FlowControl::Return => Self::Return,
            FlowControl::IndirectBranch => {
                if ins.is_jmp_far_indirect() {
                    Self::FarJump
                } else {
                    Self::JumpIndirect
                }
            }
            FlowControl::Call => {
                if ins.is_call_near() {
                    Self::CallDirect
                } else {
                    Self::FarCall
                }
            }
            FlowControl::IndirectCall => {
                if ins.is_call_far_indirect() {
                    Self::FarCall
                } else {
                    Self::CallIndirect
                }
            }
            FlowControl::XbeginXabortXend => Self::Other,
        }
    }
}

impl InstructionClass {
    fn needs_trace(self) -> bool {
        !matches!(self, Self::Other | Self::JumpDirect | Self::CallDirect)
    }
}

/// Per-chunk driver state: one PT byte range, its sideband slice, and the
/// shared dump decoder/codelet registry the whole decode phase reuses.
pub struct ChunkDriver<'a> {
    query: PtQuery<'a>,
    sideband: SidebandDecoder<'a>,
    dump: &'a mut JvmDumpDecoder,
    codelets: &'a CodeletRegistry,
    jit_image: JitImage,
    inline_cache: FnvHashMap<u64, u64>,
    cpu: PtCpu,
    thread_tid: i64,
    wall_time: u64,
    last_pc_stack: Option<PcStackInfo>,
}

impl<'a> ChunkDriver<'a> {
    pub fn new(
        pt_bytes: &'a [u8],
        sb_bytes: &'a [u8],
        dump: &'a mut JvmDumpDecoder,
        codelets: &'a CodeletRegistry,
        cpu: PtCpu,
        thread_tid: i64,
    ) -> Self {
        Self {
            query: PtQuery::new(pt_bytes),
            sideband: SidebandDecoder::new(sb_bytes),
            dump,
            codelets,
            jit_image: JitImage::new(None),
            inline_cache: FnvHashMap::default(),
            cpu,
            thread_tid,
            wall_time: 0,
            last_pc_stack: None,
        }
    }

    /// Runs to end of chunk. Each sync segment that fails outright is
    /// reported as thread loss and the outer sync-forward loop resumes;
    /// running out of PSBs to resync to ends the chunk.
    pub fn run(&mut self, rec: &mut TraceDataRecord) {
        loop {
            if self.query.sync_forward().is_err() {
                return;
            }
            if let Err(err) = self.run_segment(rec) {
                log::warn!("chunk driver: losing sync after {err}");
                rec.switch_out(true);
            }
        }
    }

    fn tick(&mut self) -> u64 {
        self.wall_time += 1;
        self.wall_time
    }

    fn drain_side_channels(&mut self, rec: &mut TraceDataRecord, time: u64) -> Result<()> {
        while let Some((_, event)) = self.sideband.sideband_event(time)? {
            match event {
                SidebandEvent::Aux { truncated } if truncated => {
                    rec.switch_out(true);
                }
                SidebandEvent::ThreadSwitch { tid } => {
                    rec.switch_in(tid as i64, time, false);
                }
                _ => {}
            }
        }
        while let Some(event) = self.dump.dumper_event(time)? {
            match event {
                DumpEvent::MethodEntry { method, .. } => rec.add_method_desc(method),
                DumpEvent::CompiledMethodLoad { section, .. } => self.jit_image.add(section),
                DumpEvent::CompiledMethodUnload { code_begin } => {
                    let _ = self.jit_image.remove(code_begin);
                }
                DumpEvent::DynamicCodeGenerated { section, .. } => self.jit_image.add(section),
                DumpEvent::InlineCacheAdd { src, dest } => {
                    self.inline_cache.insert(src, dest);
                }
                DumpEvent::InlineCacheClear { src } => {
                    self.inline_cache.remove(&src);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn run_segment(&mut self, rec: &mut TraceDataRecord) -> Result<()> {
        loop {
            match self.query.next_event()? {
                QueryEvent::Eos => return Ok(()),
                QueryEvent::Enabled { ip } => self.resolve_ip(ip, rec)?,
                QueryEvent::Disabled { ip } => {
                    // SKD022: a VM-entry-induced FUP/TIP.PGD pair is a
                    // recovered synchronous disable, not data loss.
                    rec.switch_out(!self.cpu.errata().skd022 && ip.is_none());
                }
                QueryEvent::AsyncBranch { ip } => self.resolve_ip(ip, rec)?,
                QueryEvent::Paging { .. } | QueryEvent::ExecMode(_) => {}
                QueryEvent::Overflow => {
                    return Err(Error::Loss {
                        offset: self.query.position() as u64,
                        reason: "PT overflow packet".into(),
                    })
                }
            }
        }
    }

    fn resolve_ip(&mut self, ip: u64, rec: &mut TraceDataRecord) -> Result<()> {
        let ip = self.inline_cache.get(&ip).copied().unwrap_or(ip);
        let time = self.tick();
        self.drain_side_channels(rec, time)?;

        if let Ok(section) = self.jit_image.find(ip) {
            return self.run_jit_mode(ip, section, rec);
        }

        match self.codelets.match_ip(ip) {
            CodeletMatch { kind: CodeletKind::Bytecode, code: Some(code) } => {
                let (tag, follow) = jportal_classfile::opcode::canonicalize(code).ok_or_else(|| Error::BadInput(format!("unrecognized vm_code {code}")))?;
                self.emit_bytecode(tag, time, rec)?;
                if let Some(follow) = follow {
                    self.emit_bytecode(follow, time, rec)?;
                }
                Ok(())
            }
            CodeletMatch { kind, .. } => {
                rec.add_codelet(kind);
                Ok(())
            }
        }
    }

    /// Emits one canonical bytecode tag, consuming the trailing TNT bit if
    /// the canonical tag (not the raw dispatch code) is a branch.
    fn emit_bytecode(&mut self, tag: u8, time: u64, rec: &mut TraceDataRecord) -> Result<()> {
        rec.add_bytecode(time, tag);
        if is_branch_tag(tag) {
            let taken = self.query.next_tnt()?;
            let _ = rec.add_branch(taken);
        }
        Ok(())
    }

    fn run_jit_mode(
        &mut self,
        start_ip: u64,
        section: std::sync::Arc<crate::jit::section::JitSection>,
        rec: &mut TraceDataRecord,
    ) -> Result<()> {
        let base = section.code_begin();
        let code = section
            .read(base, section.code_size() as usize)
            .map_err(|_| Error::NoMapping(start_ip))?;
        let mut decoder = Decoder::with_ip(64, code, base, DecoderOptions::NONE);
        decoder
            .set_position((start_ip - base) as usize)
            .map_err(|_| Error::Internal("jit decoder position out of range".into()))?;
        decoder.set_ip(start_ip);

        let mut entry = true;
        let mut ins = Instruction::default();
        loop {
            if !decoder.can_decode() {
                return Err(Error::NoMapping(decoder.ip()));
            }
            let ip = decoder.ip();
            decoder.decode_out(&mut ins);
            if ins.is_invalid() {
                return Err(Error::BadInput(format!("invalid jit instruction at {ip:#x}")));
            }

            let time = self.tick();
            if let Some(pc) = section.read_debug_info(ip)? {
                let changed = self.last_pc_stack.as_ref() != Some(&pc);
                if changed {
                    rec.add_jitcode(time, section.clone(), pc.clone(), entry);
                    self.last_pc_stack = Some(pc);
                    entry = false;
                }
            }

            let class = InstructionClass::from(&ins);
            if !class.needs_trace() {
                continue;
            }
            match class {
                InstructionClass::JumpDirect | InstructionClass::CallDirect => unreachable!(),
                InstructionClass::CondBranch => {
                    let taken = self.query.next_tnt()?;
                    if taken {
                        let target = ins.near_branch_target();
                        if section.contains(target) {
                            decoder.set_ip(target);
                            decoder.set_position((target - base) as usize).map_err(|_| {
                                Error::Internal("jit branch target out of section".into())
                            })?;
                            continue;
                        }
                        return self.resolve_ip(target, rec);
                    }
                }
                InstructionClass::MovCr3 => {}
                InstructionClass::Return
                | InstructionClass::JumpIndirect
                | InstructionClass::CallIndirect
                | InstructionClass::FarCall
                | InstructionClass::FarJump
                | InstructionClass::FarReturn => {
                    // BDM64: a TSX abort can log the pre-abort branch target
                    // ahead of the abort's own packet; treat the queried
                    // target as authoritative regardless.
                    let target = self.query.next_indirect_target()?;
                    let _ = self.cpu.errata().bdm64;
                    return self.resolve_ip(target, rec);
                }
                InstructionClass::Other => unreachable!(),
            }
        }
    }
}

fn is_branch_tag(tag: u8) -> bool {
    (0x99..=0xa8).contains(&tag) || matches!(tag, 0xc6 | 0xc7 | 0xc8 | 0xc9)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_class_maps_flow_control() {
        // A bare `ret` (0xC3) decodes to a near return.
        let code = [0xc3u8];
        let mut decoder = Decoder::with_ip(64, &code, 0x1000, DecoderOptions::NONE);
        let ins = decoder.decode();
        assert_eq!(InstructionClass::from(&ins), InstructionClass::Return);
    }

    #[test]
    fn direct_jump_does_not_need_trace() {
        // jmp rel8 (+2): EB 02
        let code = [0xebu8, 0x02];
        let mut decoder = Decoder::with_ip(64, &code, 0x1000, DecoderOptions::NONE);
        let ins = decoder.decode();
        assert_eq!(InstructionClass::from(&ins), InstructionClass::JumpDirect);
        assert!(!InstructionClass::from(&ins).needs_trace());
    }

    #[test]
    fn conditional_branch_needs_trace() {
        // je rel8: 74 02
        let code = [0x74u8, 0x02];
        let mut decoder = Decoder::with_ip(64, &code, 0x1000, DecoderOptions::NONE);
        let ins = decoder.decode();
        assert_eq!(InstructionClass::from(&ins), InstructionClass::CondBranch);
        assert!(InstructionClass::from(&ins).needs_trace());
    }

    #[test]
    fn skd022_errata_suppresses_loss_on_ip_less_disable() {
        let cpu = PtCpu::new(0x6, 0x9e);
        assert!(cpu.errata().skd022);
    }
}
