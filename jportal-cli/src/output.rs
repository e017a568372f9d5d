//! Writes the four output files (§6): `methods`, one file per java thread
//! id, the optional `cpu<N>` debug dump, and `call_graph`.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use jportal_classfile::analyser::Analyser;
use jportal_decode::trace_data::{TraceData, TraceDataAccess};

use crate::error::{CliError, Result};
use crate::tasks::MatchedSplit;

pub fn write_methods(dir: &Path, analyser: &Analyser) -> Result<()> {
    let mut out = std::fs::File::create(dir.join("methods")).map_err(CliError::Io)?;
    for method_id in analyser.all_methods() {
        let method = analyser.method(method_id);
        let klass_name = analyser.klass(method.klass()).name().display_name();
        writeln!(out, "{klass_name} {} : {}", method.signature(), method_id.0).map_err(CliError::Io)?;
    }
    Ok(())
}

pub fn write_call_graph(dir: &Path, analyser: &Analyser) -> Result<()> {
    let mut out = std::fs::File::create(dir.join("call_graph")).map_err(CliError::Io)?;
    for method_id in analyser.all_methods() {
        let method = analyser.method(method_id);
        let klass_name = analyser.klass(method.klass()).name().display_name();
        writeln!(out, "{klass_name} {} ({})", method.signature(), method_id.0).map_err(CliError::Io)?;
        let mut offsets: Vec<_> = method.callee_map().keys().copied().collect();
        offsets.sort_unstable();
        for offset in offsets {
            for &callee in method.callees_at(offset).unwrap_or(&[]) {
                let callee_method = analyser.method(callee);
                let callee_klass = analyser.klass(callee_method.klass()).name().display_name();
                writeln!(out, "  @{offset} -> {callee_klass} {} ({})", callee_method.signature(), callee.0)
                    .map_err(CliError::Io)?;
            }
        }
    }
    Ok(())
}

/// Groups matched splits by java thread id and writes one file per tid,
/// each split ordered by `start_time` within the file (§5's cross-CPU
/// ordering guarantee: splits are only comparable once sorted by time).
pub fn write_thread_files(dir: &Path, grouped: &BTreeMap<i64, Vec<MatchedSplit>>) -> Result<()> {
    for (java_tid, splits) in grouped {
        let mut ordered: Vec<&MatchedSplit> = splits.iter().collect();
        ordered.sort_by_key(|m| m.split.start_time);

        let mut out = std::fs::File::create(dir.join(java_tid.to_string())).map_err(CliError::Io)?;
        for matched in ordered {
            let s = &matched.split;
            writeln!(
                out,
                "#{} {} {} {}",
                s.start_time, s.end_time, s.head_loss as u8, s.tail_loss as u8
            )
            .map_err(CliError::Io)?;
            for pick in &matched.picks {
                writeln!(out, "{}", pick.method.0).map_err(CliError::Io)?;
            }
        }
    }
    Ok(())
}

/// Raw per-CPU record dump for debugging, gated by `--dump-cpu-traces`. One
/// file per decoded chunk, since each chunk owns its own independent
/// `TraceData` location space.
pub fn write_cpu_trace(dir: &Path, cpu: i32, chunk_index: usize, trace: &TraceData) -> Result<()> {
    let mut out = std::fs::File::create(dir.join(format!("cpu{cpu}.{chunk_index}"))).map_err(CliError::Io)?;
    let mut access = TraceDataAccess::new(trace);
    while let Some((loc, record)) = access.next_record() {
        writeln!(out, "{loc}: {record:?}").map_err(CliError::Io)?;
    }
    Ok(())
}
