//! Binary entry point (§4.15): parses arguments, loads the class model,
//! drives the splitter and the two-phase decode/match task pools, and
//! writes the output files (§6).

mod config;
mod error;
mod output;
mod tasks;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser;

use jportal_classfile::analyser::Analyser;
use jportal_decode::codelet::CodeletRegistry;
use jportal_decode::dump::{DumpEvent, JvmDumpDecoder};
use jportal_decode::splitter::{self, TraceFileHeader};
use jportal_decode::task::{run_to_completion, Task, TaskManager, DEFAULT_JOBS};

use config::ClassConfig;
use error::{CliError, Result};
use tasks::{DecodeTask, DecodedChunk, MatchTask, MatchedSplit};

/// Reconstructs JVM bytecode/JIT execution traces from an Intel-PT trace
/// plus a VM-emitted metadata dump.
#[derive(Parser, Debug)]
#[command(name = "jportal", version, about)]
struct Args {
    /// Binary trace file.
    #[arg(long = "trace-data", default_value = "JPortalTrace.data")]
    trace_data: PathBuf,

    /// VM-side metadata stream.
    #[arg(long = "dump-data", default_value = "JPortalDump.data")]
    dump_data: PathBuf,

    /// Configuration listing classfile search roots and option blocks.
    #[arg(long = "class-config")]
    class_config: PathBuf,

    /// List of (class_name method_name+signature) pairs seeding the
    /// callback candidate set.
    #[arg(long)]
    callback: Option<PathBuf>,

    /// Directory the output files are written into.
    #[arg(long = "output-dir", default_value = ".")]
    output_dir: PathBuf,

    /// Worker-pool parallelism cap.
    #[arg(long, default_value_t = DEFAULT_JOBS)]
    jobs: usize,

    /// Method matcher's no-matched-candidate governor; omitted means the
    /// bounded default, 0 disables the governor.
    #[arg(long = "no-matched-depth")]
    no_matched_depth: Option<u32>,

    /// Enables the optional `cpu<N>` debug output file.
    #[arg(long = "dump-cpu-traces")]
    dump_cpu_traces: bool,
}

fn no_matched_depth(arg: Option<u32>) -> Option<u32> {
    match arg {
        None => Some(jportal_match::method_matcher::DEFAULT_NO_MATCHED_DEPTH),
        Some(0) => None,
        Some(n) => Some(n),
    }
}

fn run(args: Args) -> Result<()> {
    std::fs::create_dir_all(&args.output_dir).map_err(CliError::Io)?;

    log::info!("loading class config from {}", args.class_config.display());
    let class_config = ClassConfig::load(&args.class_config)?;
    let mut analyser = Analyser::new();
    for root in class_config.roots() {
        log::info!("parsing class files under {}", root.display());
        jportal_classfile::loader::load_root(&mut analyser, &root)?;
    }

    if let Some(callback_path) = &args.callback {
        for entry in config::load_callbacks(callback_path)? {
            if analyser.analyse_callback(&entry.klass_name, &entry.signature).is_none() {
                log::warn!("callback {} {} did not resolve to a parsed method", entry.klass_name, entry.signature);
            }
        }
    }

    analyser.analyse_hierarchy();
    analyser.analyse_call_graph();
    let analyser = Arc::new(analyser);

    output::write_methods(&args.output_dir, &analyser)?;
    output::write_call_graph(&args.output_dir, &analyser)?;

    log::info!("reading dump data from {}", args.dump_data.display());
    let dump_bytes = Arc::new(std::fs::read(&args.dump_data).map_err(CliError::Io)?);

    let mut table_decoder = JvmDumpDecoder::new((*dump_bytes).clone())?;
    let mut table = None;
    while let Some(event) = table_decoder.dumper_event(u64::MAX)? {
        if let DumpEvent::InterpreterInfo(t) = event {
            table = Some(t);
            break;
        }
    }
    let table = table.ok_or_else(|| CliError::BadConfig("dump-data missing interpreter_info record".into()))?;
    let codelets = Arc::new(CodeletRegistry::init(true, *table)?);

    log::info!("reading trace data from {}", args.trace_data.display());
    let trace_bytes = std::fs::read(&args.trace_data).map_err(CliError::Io)?;
    let (header, consumed) = TraceFileHeader::read(&trace_bytes)?;
    let per_cpu_parts = splitter::split(&trace_bytes[consumed..], header.sample_type)?;
    let total_chunks: usize = per_cpu_parts.values().map(Vec::len).sum();
    log::info!("split trace into {total_chunks} chunks across {} cpus", per_cpu_parts.len());

    log::info!("decoding chunks");
    let manager = TaskManager::new();
    let decoded: Arc<Mutex<Vec<DecodedChunk>>> = Arc::new(Mutex::new(Vec::new()));
    let mut decode_tasks: Vec<Box<dyn Task>> = Vec::new();
    for (cpu, parts) in per_cpu_parts {
        for (chunk_index, part) in parts.into_iter().enumerate() {
            decode_tasks.push(Box::new(DecodeTask {
                cpu,
                chunk_index,
                part,
                dump_bytes: Arc::clone(&dump_bytes),
                codelets: Arc::clone(&codelets),
                pt_cpu: header.cpu,
                sink: Arc::clone(&decoded),
            }));
        }
    }
    run_to_completion(&manager, decode_tasks, args.jobs);
    let decoded = Arc::try_unwrap(decoded).unwrap().into_inner().unwrap();
    log::info!("decoded {} chunks", decoded.len());

    if args.dump_cpu_traces {
        for chunk in &decoded {
            output::write_cpu_trace(&args.output_dir, chunk.cpu, chunk.chunk_index, &chunk.trace)?;
        }
    }

    log::info!("matching methods");
    let matched: Arc<Mutex<Vec<MatchedSplit>>> = Arc::new(Mutex::new(Vec::new()));
    let governor = no_matched_depth(args.no_matched_depth);
    let mut match_tasks: Vec<Box<dyn Task>> = Vec::new();
    let mut traces = Vec::new();
    for chunk in decoded {
        traces.push(Arc::new(chunk.trace));
        let trace = traces.last().unwrap();
        for splits in trace.thread_map().values() {
            for split in splits {
                match_tasks.push(Box::new(MatchTask {
                    analyser: Arc::clone(&analyser),
                    trace: Arc::clone(trace),
                    split: split.clone(),
                    no_matched_depth: governor,
                    sink: Arc::clone(&matched),
                }));
            }
        }
    }
    run_to_completion(&manager, match_tasks, args.jobs);
    let matched = Arc::try_unwrap(matched).unwrap().into_inner().unwrap();

    log::info!("writing thread output files");
    let mut by_java_tid: BTreeMap<i64, Vec<MatchedSplit>> = BTreeMap::new();
    for m in matched {
        let java_tid = table_decoder.get_java_tid(m.sys_tid).unwrap_or(m.sys_tid);
        by_java_tid.entry(java_tid).or_default().push(m);
    }
    output::write_thread_files(&args.output_dir, &by_java_tid)?;

    let lossy = by_java_tid.values().flatten().filter(|m| m.split.head_loss || m.split.tail_loss).count();
    let split_count: usize = by_java_tid.values().map(Vec::len).sum();
    log::info!("done: {total_chunks} chunks, {split_count} thread splits, {lossy} lossy splits");

    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(err) = run(args) {
        log::error!("{err}");
        std::process::exit(1);
    }
}
