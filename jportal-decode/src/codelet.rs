//! Maps VM instruction-pointer ranges to codelet kinds (interpreter dispatch
//! stubs, method-entry points, return entries, deopt handlers, ...), and
//! recovers the dispatched bytecode when an IP lands inside a per-state
//! dispatch-table entry.
//!
//! Populated once, at startup, from the dump's `interpreter_info` record;
//! never mutated afterward.

use crate::error::{Error, Result};

pub const NUMBER_OF_STATES: usize = 10;
pub const NUMBER_OF_RETURN_ENTRIES: usize = 6;
pub const NUMBER_OF_RETURN_ADDRS: usize = 10;
pub const NUMBER_OF_METHOD_ENTRIES: usize = 34;
pub const NUMBER_OF_RESULT_HANDLERS: usize = 10;
pub const NUMBER_OF_DEOPT_ENTRIES: usize = 7;
pub const NUMBER_OF_CODES: usize = 239;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeletKind {
    Illegal,
    SlowSignatureHandler,
    ErrorExits,
    BytecodeTracingSupport,
    ReturnEntryPoints,
    InvokeReturnEntryPoints,
    EarlyretEntryPoints,
    ResultHandlersForNativeCalls,
    SafepointEntryPoints,
    ExceptionHandling,
    ThrowExceptionEntrypoints,
    MethodEntryPoint,
    Bytecode,
    ReturnBytecode,
    ThrowBytecode,
    RethrowException,
    ThrowArrayIndexOutOfBoundsException,
    ThrowArrayStoreException,
    ThrowArithmeticException,
    ThrowClassCastException,
    ThrowNullPointerException,
    ThrowStackOverflowError,
    ShouldNotReachHere,
    DeoptimizationEntryPoints,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeletMatch {
    pub kind: CodeletKind,
    /// The raw VM dispatch code (a `vm_code` value, not yet canonicalized)
    /// at this IP; only present when `kind == Bytecode`.
    pub code: Option<u16>,
}

/// The per-state and flat address-range tables carried by a dump's
/// `interpreter_info` record. Every outer/inner dimension here is checked
/// against the fixed cardinalities above at [`CodeletRegistry::init`] time;
/// a dump whose arrays don't match is `BadInput`, never silently truncated.
#[derive(Debug, Clone, Default)]
pub struct CodeletTable {
    pub low_bound: u64,
    pub high_bound: u64,
    pub slow_signature_handler: (u64, u64),
    pub error_exits: (u64, u64),
    /// Zero-length (`start == end`) when tracing-bytecodes support is
    /// disabled in the VM build that produced this dump.
    pub bytecode_tracing_support: (u64, u64),
    /// `[state][return_entry]`.
    pub return_entry: Vec<Vec<(u64, u64)>>,
    pub invoke_return_entry: Vec<(u64, u64)>,
    pub invokeinterface_return_entry: Vec<(u64, u64)>,
    pub invokedynamic_return_entry: Vec<(u64, u64)>,
    /// `[state]`.
    pub earlyret_entry: Vec<(u64, u64)>,
    /// `[state]`.
    pub safept_entry: Vec<(u64, u64)>,
    pub entry_table: Vec<(u64, u64)>,
    pub native_abi_to_tosca: Vec<(u64, u64)>,
    /// `[state][deopt_entry]`.
    pub deopt_entry: Vec<Vec<(u64, u64)>>,
    /// `[state][code]`; `code` is the raw dispatch-table index, i.e. the
    /// `vm_code` value recovered by a successful match.
    pub dispatch_table: Vec<Vec<(u64, u64)>>,
    pub rethrow_exception_entry: (u64, u64),
    pub throw_exception_entry: (u64, u64),
    pub throw_array_index_oob_entry: (u64, u64),
    pub throw_array_store_entry: (u64, u64),
    pub throw_arithmetic_entry: (u64, u64),
    pub throw_class_cast_entry: (u64, u64),
    pub throw_null_pointer_entry: (u64, u64),
    pub throw_stack_overflow_entry: (u64, u64),
    pub should_not_reach_here: (u64, u64),
    pub deoptimization_entry_points: (u64, u64),
}

/// Size of the dump's `interpreter_info.codelets_address` array.
pub const CODELETS_ADDRESS_WORDS: usize = 3200;

impl CodeletTable {
    /// Builds a table from the dump's flat `codelets_address` word array.
    ///
    /// The dumper emits one contiguous buffer of addresses; the grouping
    /// below (order, and the convention that the end of a region is the
    /// start of the next one) is a read of how a template-based
    /// interpreter generator lays out its codelets — monotonically,
    /// back-to-back. 2638 of the 3200 words are consumed; the remainder
    /// is reserved.
    pub fn from_dump_addresses(tracing_bytecodes: bool, addrs: &[u64]) -> Result<Self> {
        if addrs.len() != CODELETS_ADDRESS_WORDS {
            return Err(Error::BadInput(format!(
                "interpreter_info.codelets_address has length {} (expected {CODELETS_ADDRESS_WORDS})",
                addrs.len()
            )));
        }
        let mut cur = 0usize;
        let mut next = |n: usize| -> Result<&[u64]> {
            let slice = addrs.get(cur..cur + n).ok_or_else(|| {
                Error::BadInput("interpreter_info.codelets_address truncated group".into())
            })?;
            cur += n;
            Ok(slice)
        };

        let mut starts = Vec::with_capacity(2638);
        starts.extend_from_slice(next(1)?); // slow_signature_handler
        starts.extend_from_slice(next(1)?); // error_exits
        starts.extend_from_slice(next(1)?); // bytecode_tracing_support
        starts.extend_from_slice(next(NUMBER_OF_STATES)?); // trace_code
        starts.extend_from_slice(next(NUMBER_OF_STATES * NUMBER_OF_RETURN_ENTRIES)?); // return_entry
        starts.extend_from_slice(next(NUMBER_OF_RETURN_ADDRS)?); // invoke_return_entry
        starts.extend_from_slice(next(NUMBER_OF_RETURN_ADDRS)?); // invokeinterface_return_entry
        starts.extend_from_slice(next(NUMBER_OF_RETURN_ADDRS)?); // invokedynamic_return_entry
        starts.extend_from_slice(next(NUMBER_OF_STATES)?); // earlyret_entry
        starts.extend_from_slice(next(NUMBER_OF_STATES)?); // safept_entry
        starts.extend_from_slice(next(NUMBER_OF_METHOD_ENTRIES)?); // entry_table
        starts.extend_from_slice(next(NUMBER_OF_RESULT_HANDLERS)?); // native_abi_to_tosca
        starts.extend_from_slice(next(NUMBER_OF_STATES * NUMBER_OF_DEOPT_ENTRIES)?); // deopt_entry
        starts.extend_from_slice(next(NUMBER_OF_STATES * NUMBER_OF_CODES)?); // dispatch_table
        starts.extend_from_slice(next(10)?); // the 10 scalar throw/rethrow/should-not-reach entries
        let high_bound = *next(1)?.first().unwrap(); // end sentinel

        let mut ranges = starts.windows(2).map(|w| (w[0], w[1])).collect::<Vec<_>>();
        ranges.push((*starts.last().unwrap(), high_bound));

        let mut idx = 0usize;
        let mut take = |n: usize| -> Vec<(u64, u64)> {
            let v = ranges[idx..idx + n].to_vec();
            idx += n;
            v
        };
        let mut take_grouped = |outer: usize, inner: usize| -> Vec<Vec<(u64, u64)>> {
            (0..outer).map(|_| take(inner)).collect()
        };

        let slow_signature_handler = take(1)[0];
        let error_exits = take(1)[0];
        let bytecode_tracing_support = take(1)[0];
        // Per-state bytecode-tracing entry points; not separately classified
        // beyond the flat `BytecodeTracingSupport` region above.
        let _trace_code = take(NUMBER_OF_STATES);
        let return_entry = take_grouped(NUMBER_OF_STATES, NUMBER_OF_RETURN_ENTRIES);
        let invoke_return_entry = take(NUMBER_OF_RETURN_ADDRS);
        let invokeinterface_return_entry = take(NUMBER_OF_RETURN_ADDRS);
        let invokedynamic_return_entry = take(NUMBER_OF_RETURN_ADDRS);
        let earlyret_entry = take(NUMBER_OF_STATES);
        let safept_entry = take(NUMBER_OF_STATES);
        let entry_table = take(NUMBER_OF_METHOD_ENTRIES);
        let native_abi_to_tosca = take(NUMBER_OF_RESULT_HANDLERS);
        let deopt_entry = take_grouped(NUMBER_OF_STATES, NUMBER_OF_DEOPT_ENTRIES);
        let dispatch_table = take_grouped(NUMBER_OF_STATES, NUMBER_OF_CODES);
        let scalars = take(10);

        Ok(CodeletTable {
            low_bound: starts[0],
            high_bound,
            slow_signature_handler,
            error_exits,
            bytecode_tracing_support: if tracing_bytecodes {
                bytecode_tracing_support
            } else {
                (0, 0)
            },
            return_entry,
            invoke_return_entry,
            invokeinterface_return_entry,
            invokedynamic_return_entry,
            earlyret_entry,
            safept_entry,
            entry_table,
            native_abi_to_tosca,
            deopt_entry,
            dispatch_table,
            rethrow_exception_entry: scalars[0],
            throw_exception_entry: scalars[1],
            throw_array_index_oob_entry: scalars[2],
            throw_array_store_entry: scalars[3],
            throw_arithmetic_entry: scalars[4],
            throw_class_cast_entry: scalars[5],
            throw_null_pointer_entry: scalars[6],
            throw_stack_overflow_entry: scalars[7],
            should_not_reach_here: scalars[8],
            deoptimization_entry_points: scalars[9],
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Region {
    start: u64,
    end: u64,
    kind: CodeletKind,
    state: Option<usize>,
}

#[derive(Debug, Default)]
pub struct CodeletRegistry {
    low_bound: u64,
    high_bound: u64,
    regions: Vec<Region>,
    dispatch_table: Vec<Vec<(u64, u64)>>,
}

impl CodeletRegistry {
    pub fn init(tracing_bytecodes: bool, table: CodeletTable) -> Result<Self> {
        check_len("return_entry", &table.return_entry, NUMBER_OF_STATES)?;
        for row in &table.return_entry {
            check_len("return_entry[state]", row, NUMBER_OF_RETURN_ENTRIES)?;
        }
        check_len(
            "invoke_return_entry",
            &table.invoke_return_entry,
            NUMBER_OF_RETURN_ADDRS,
        )?;
        check_len(
            "invokeinterface_return_entry",
            &table.invokeinterface_return_entry,
            NUMBER_OF_RETURN_ADDRS,
        )?;
        check_len(
            "invokedynamic_return_entry",
            &table.invokedynamic_return_entry,
            NUMBER_OF_RETURN_ADDRS,
        )?;
        check_len("earlyret_entry", &table.earlyret_entry, NUMBER_OF_STATES)?;
        check_len("safept_entry", &table.safept_entry, NUMBER_OF_STATES)?;
        check_len("entry_table", &table.entry_table, NUMBER_OF_METHOD_ENTRIES)?;
        check_len(
            "native_abi_to_tosca",
            &table.native_abi_to_tosca,
            NUMBER_OF_RESULT_HANDLERS,
        )?;
        check_len("deopt_entry", &table.deopt_entry, NUMBER_OF_STATES)?;
        for row in &table.deopt_entry {
            check_len("deopt_entry[state]", row, NUMBER_OF_DEOPT_ENTRIES)?;
        }
        check_len("dispatch_table", &table.dispatch_table, NUMBER_OF_STATES)?;
        for row in &table.dispatch_table {
            check_len("dispatch_table[state]", row, NUMBER_OF_CODES)?;
        }

        let mut regions = Vec::new();
        let mut push = |start: u64, end: u64, kind: CodeletKind, state: Option<usize>| {
            if end > start {
                regions.push(Region { start, end, kind, state });
            }
        };

        let (s, e) = table.slow_signature_handler;
        push(s, e, CodeletKind::SlowSignatureHandler, None);
        let (s, e) = table.error_exits;
        push(s, e, CodeletKind::ErrorExits, None);
        if tracing_bytecodes {
            let (s, e) = table.bytecode_tracing_support;
            push(s, e, CodeletKind::BytecodeTracingSupport, None);
        }
        for (state, row) in table.return_entry.iter().enumerate() {
            for (s, e) in row {
                push(*s, *e, CodeletKind::ReturnEntryPoints, Some(state));
            }
        }
        for (s, e) in table
            .invoke_return_entry
            .iter()
            .chain(&table.invokeinterface_return_entry)
            .chain(&table.invokedynamic_return_entry)
        {
            push(*s, *e, CodeletKind::InvokeReturnEntryPoints, None);
        }
        for (state, (s, e)) in table.earlyret_entry.iter().enumerate() {
            push(*s, *e, CodeletKind::EarlyretEntryPoints, Some(state));
        }
        for (s, e) in &table.native_abi_to_tosca {
            push(*s, *e, CodeletKind::ResultHandlersForNativeCalls, None);
        }
        for (state, (s, e)) in table.safept_entry.iter().enumerate() {
            push(*s, *e, CodeletKind::SafepointEntryPoints, Some(state));
        }
        for (s, e) in &table.entry_table {
            push(*s, *e, CodeletKind::MethodEntryPoint, None);
        }
        for (state, row) in table.dispatch_table.iter().enumerate() {
            let start = row.iter().map(|(s, _)| *s).min();
            let end = row.iter().map(|(_, e)| *e).max();
            if let (Some(start), Some(end)) = (start, end) {
                push(start, end, CodeletKind::Bytecode, Some(state));
            }
        }
        for (state, row) in table.deopt_entry.iter().enumerate() {
            for (s, e) in row {
                push(*s, *e, CodeletKind::DeoptimizationEntryPoints, Some(state));
            }
        }
        let (s, e) = table.rethrow_exception_entry;
        push(s, e, CodeletKind::RethrowException, None);
        let (s, e) = table.throw_exception_entry;
        push(s, e, CodeletKind::ThrowExceptionEntrypoints, None);
        for (s, e) in [
            table.throw_array_index_oob_entry,
            table.throw_array_store_entry,
            table.throw_arithmetic_entry,
            table.throw_class_cast_entry,
            table.throw_null_pointer_entry,
            table.throw_stack_overflow_entry,
        ] {
            push(s, e, CodeletKind::ThrowBytecode, None);
        }
        let (s, e) = table.should_not_reach_here;
        push(s, e, CodeletKind::ShouldNotReachHere, None);

        regions.sort_by_key(|r| r.start);
        for w in regions.windows(2) {
            if w[0].end > w[1].start {
                return Err(Error::BadInput(
                    "overlapping codelet regions in interpreter_info dump record".into(),
                ));
            }
        }

        Ok(Self {
            low_bound: table.low_bound,
            high_bound: table.high_bound,
            regions,
            dispatch_table: table.dispatch_table,
        })
    }

    /// Classifies `ip`, recovering the raw dispatch code when it lands in a
    /// bytecode dispatch-table entry.
    pub fn match_ip(&self, ip: u64) -> CodeletMatch {
        if ip < self.low_bound || ip >= self.high_bound {
            return CodeletMatch { kind: CodeletKind::Illegal, code: None };
        }
        let idx = match self.regions.binary_search_by(|r| {
            if ip < r.start {
                std::cmp::Ordering::Greater
            } else if ip >= r.end {
                std::cmp::Ordering::Less
            } else {
                std::cmp::Ordering::Equal
            }
        }) {
            Ok(idx) => idx,
            Err(_) => return CodeletMatch { kind: CodeletKind::Illegal, code: None },
        };
        let region = self.regions[idx];
        if region.kind != CodeletKind::Bytecode {
            return CodeletMatch { kind: region.kind, code: None };
        }
        let state = region.state.expect("bytecode regions always carry a state");
        let code = self.dispatch_table[state]
            .iter()
            .position(|(s, e)| ip >= *s && ip < *e);
        match code {
            Some(code) => CodeletMatch { kind: CodeletKind::Bytecode, code: Some(code as u16) },
            None => CodeletMatch { kind: CodeletKind::Illegal, code: None },
        }
    }
}

fn check_len<T>(name: &'static str, v: &[T], expected: usize) -> Result<()> {
    if v.len() != expected {
        return Err(Error::BadInput(format!(
            "interpreter_info.{name} has length {} (expected {expected})",
            v.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_table() -> CodeletTable {
        CodeletTable {
            return_entry: vec![vec![(0, 0); NUMBER_OF_RETURN_ENTRIES]; NUMBER_OF_STATES],
            invoke_return_entry: vec![(0, 0); NUMBER_OF_RETURN_ADDRS],
            invokeinterface_return_entry: vec![(0, 0); NUMBER_OF_RETURN_ADDRS],
            invokedynamic_return_entry: vec![(0, 0); NUMBER_OF_RETURN_ADDRS],
            earlyret_entry: vec![(0, 0); NUMBER_OF_STATES],
            safept_entry: vec![(0, 0); NUMBER_OF_STATES],
            entry_table: vec![(0, 0); NUMBER_OF_METHOD_ENTRIES],
            native_abi_to_tosca: vec![(0, 0); NUMBER_OF_RESULT_HANDLERS],
            deopt_entry: vec![vec![(0, 0); NUMBER_OF_DEOPT_ENTRIES]; NUMBER_OF_STATES],
            dispatch_table: vec![vec![(0, 0); NUMBER_OF_CODES]; NUMBER_OF_STATES],
            ..Default::default()
        }
    }

    #[test]
    fn from_dump_addresses_builds_monotonic_dense_table() {
        let addrs: Vec<u64> = (0..CODELETS_ADDRESS_WORDS as u64).map(|i| 0x1000 + i * 8).collect();
        let table = CodeletTable::from_dump_addresses(true, &addrs).unwrap();
        assert_eq!(table.low_bound, 0x1000);
        assert!(table.high_bound > table.low_bound);
        assert_eq!(table.dispatch_table.len(), NUMBER_OF_STATES);
        assert_eq!(table.dispatch_table[0].len(), NUMBER_OF_CODES);
        let reg = CodeletRegistry::init(true, table).unwrap();
        assert_ne!(reg.match_ip(0x1004).kind, CodeletKind::Illegal);
    }

    #[test]
    fn from_dump_addresses_rejects_wrong_length() {
        let addrs = vec![0u64; 100];
        assert!(CodeletTable::from_dump_addresses(true, &addrs).is_err());
    }

    #[test]
    fn rejects_wrong_dispatch_table_cardinality() {
        let mut table = empty_table();
        table.dispatch_table.pop();
        assert!(CodeletRegistry::init(true, table).is_err());
    }

    #[test]
    fn matches_method_entry_point() {
        let mut table = empty_table();
        table.low_bound = 0x1000;
        table.high_bound = 0x9000;
        table.entry_table[0] = (0x2000, 0x2010);
        let reg = CodeletRegistry::init(true, table).unwrap();
        assert_eq!(reg.match_ip(0x2005).kind, CodeletKind::MethodEntryPoint);
    }

    #[test]
    fn matches_bytecode_dispatch_and_recovers_code() {
        let mut table = empty_table();
        table.low_bound = 0x1000;
        table.high_bound = 0x9000;
        table.dispatch_table[3][87] = (0x5000, 0x5010);
        table.dispatch_table[3][88] = (0x5010, 0x5020);
        let reg = CodeletRegistry::init(true, table).unwrap();
        let m = reg.match_ip(0x5004);
        assert_eq!(m.kind, CodeletKind::Bytecode);
        assert_eq!(m.code, Some(87));
        let m = reg.match_ip(0x5015);
        assert_eq!(m.code, Some(88));
    }

    #[test]
    fn ip_outside_bounds_is_illegal() {
        let mut table = empty_table();
        table.low_bound = 0x1000;
        table.high_bound = 0x9000;
        let reg = CodeletRegistry::init(true, table).unwrap();
        assert_eq!(reg.match_ip(0x500).kind, CodeletKind::Illegal);
        assert_eq!(reg.match_ip(0x9000).kind, CodeletKind::Illegal);
    }

    #[test]
    fn gap_between_regions_is_illegal() {
        let mut table = empty_table();
        table.low_bound = 0x1000;
        table.high_bound = 0x9000;
        table.entry_table[0] = (0x2000, 0x2010);
        let reg = CodeletRegistry::init(true, table).unwrap();
        assert_eq!(reg.match_ip(0x2020).kind, CodeletKind::Illegal);
    }
}
