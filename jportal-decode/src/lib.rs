//! Reconstructs JVM bytecode/JIT execution traces from Intel PT packets
//! plus a VM-emitted metadata dump.
//!
//! Pipeline, top to bottom: [`splitter`] cuts a perf-format trace-data file
//! into per-CPU, per-sync-range [`splitter::TracePart`]s; [`pt`] and
//! [`cpu`] give the packet/query-level view of one such range and its
//! silicon errata; [`codelet`], [`jit`], [`sideband`], and [`dump`]
//! classify addresses and replay the VM's own metadata stream; [`driver`]
//! ties those together into one decoded [`trace_data::TraceData`] per
//! chunk; and [`task`] runs the decode (and, from the matcher crate that
//! depends on this one, the match) phases across a worker pool.

pub mod codelet;
pub mod compressed_stream;
pub mod cpu;
pub mod driver;
pub mod dump;
pub mod error;
pub mod jit;
pub mod pt;
pub mod sideband;
pub mod splitter;
pub mod task;
pub mod trace_data;

pub use error::{Error, ErrorKind, Result};
