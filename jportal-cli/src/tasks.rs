//! Concrete [`jportal_decode::task::Task`] implementations (§4.13).
//!
//! `Task` trait objects are `Box<dyn Task>` and therefore implicitly
//! `'static`, so unlike [`jportal_match::method_matcher::MethodMatcher`]'s
//! borrowed-lifetime API, these own their inputs through `Arc` rather than
//! holding references into the driver's stack frame. Each decode task
//! constructs its own fresh [`JvmDumpDecoder`] from the shared dump bytes
//! (§4.11's "wall-clock time" is a per-chunk counter, not a global one, so
//! nothing is lost by restarting the dump stream per chunk) rather than
//! sharing one mutable decoder across worker threads, which `ChunkDriver`'s
//! exclusive `&mut JvmDumpDecoder` borrow wouldn't allow anyway.

use std::sync::{Arc, Mutex};

use jportal_classfile::analyser::Analyser;
use jportal_decode::codelet::CodeletRegistry;
use jportal_decode::cpu::PtCpu;
use jportal_decode::driver::ChunkDriver;
use jportal_decode::dump::JvmDumpDecoder;
use jportal_decode::error::Result;
use jportal_decode::splitter::TracePart;
use jportal_decode::task::{Task, TaskKind};
use jportal_decode::trace_data::{ThreadSplit, TraceData, TraceDataRecord};
use jportal_match::method_matcher::{MatchPick, MethodMatcher};

/// One decoded chunk's result: which CPU it came from and the `TraceData`
/// the chunk driver built for it.
pub struct DecodedChunk {
    pub cpu: i32,
    pub chunk_index: usize,
    pub trace: TraceData,
}

pub struct DecodeTask {
    pub cpu: i32,
    pub chunk_index: usize,
    pub part: TracePart,
    pub dump_bytes: Arc<Vec<u8>>,
    pub codelets: Arc<CodeletRegistry>,
    pub pt_cpu: PtCpu,
    pub sink: Arc<Mutex<Vec<DecodedChunk>>>,
}

impl Task for DecodeTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Decode
    }

    fn run(self: Box<Self>) -> Result<Option<Box<dyn Task>>> {
        let mut dump = JvmDumpDecoder::new((*self.dump_bytes).clone())?;
        let mut trace = TraceData::new();
        {
            let mut rec = TraceDataRecord::new(&mut trace);
            let mut driver =
                ChunkDriver::new(&self.part.pt_bytes, &self.part.sb_bytes_copy, &mut dump, &self.codelets, self.pt_cpu, 0);
            // `self.part.loss_flag` (set when the splitter saw an AUX_ADVANCE
            // discard ahead of this chunk) has no wired consumer: `ChunkDriver`
            // only ever marks `head_loss` through a sideband `ThreadSwitch`
            // event, which always reports `loss=false`. Surfacing the
            // chunk-level flag would need a new `ChunkDriver` constructor
            // parameter; left as a follow-up rather than bolted on here.
            driver.run(&mut rec);
        }
        self.sink.lock().unwrap().push(DecodedChunk { cpu: self.cpu, chunk_index: self.chunk_index, trace });
        Ok(None)
    }
}

/// One match result: the thread split that was matched and the picks the
/// matcher found for it, ready for the per-tid output writer.
pub struct MatchedSplit {
    pub sys_tid: i64,
    pub split: ThreadSplit,
    pub picks: Vec<MatchPick>,
}

pub struct MatchTask {
    pub analyser: Arc<Analyser>,
    pub trace: Arc<TraceData>,
    pub split: ThreadSplit,
    pub no_matched_depth: Option<u32>,
    pub sink: Arc<Mutex<Vec<MatchedSplit>>>,
}

impl Task for MatchTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Match
    }

    fn run(self: Box<Self>) -> Result<Option<Box<dyn Task>>> {
        let mut matcher = MethodMatcher::with_no_matched_depth(&self.analyser, &self.trace, self.no_matched_depth);
        let picks = matcher.match_split(&self.split);
        self.sink.lock().unwrap().push(MatchedSplit { sys_tid: self.split.tid, split: self.split.clone(), picks });
        Ok(None)
    }
}
