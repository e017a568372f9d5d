//! Decodes the VM-emitted metadata dump: a concatenation of
//! `{type, size, time}` record headers followed by variant payloads.
//!
//! Mirrors the dumper's own two-pass shape: [`JvmDumpDecoder::new`] does
//! the initial pass, resolving method indices and compiled-method
//! sections into owned tables once; [`JvmDumpDecoder::dumper_event`] then
//! streams records in order, bounded by the caller's current-time, the
//! way the PT-side driver consumes them.

use std::collections::HashMap;
use std::sync::Arc;

use fnv::FnvHashMap;

use crate::codelet::CodeletTable;
use crate::error::{Error, Result};
use crate::jit::section::{CompiledMethodDesc, JitSection, MethodDesc};

const TAG_INTERPRETER_INFO: u8 = 0;
const TAG_METHOD_ENTRY_INITIAL: u8 = 1;
const TAG_METHOD_ENTRY: u8 = 2;
const TAG_METHOD_EXIT: u8 = 3;
const TAG_COMPILED_METHOD_LOAD: u8 = 4;
const TAG_COMPILED_METHOD_UNLOAD: u8 = 5;
const TAG_THREAD_START: u8 = 6;
const TAG_DYNAMIC_CODE_GENERATED: u8 = 7;
const TAG_INLINE_CACHE_ADD: u8 = 8;
const TAG_INLINE_CACHE_CLEAR: u8 = 9;

const HEADER_LEN: usize = 1 + 8 + 8;

#[derive(Debug, Clone)]
pub enum DumpEvent {
    InterpreterInfo(Box<CodeletTable>),
    MethodEntry { tid: u64, idx: i32, method: MethodDesc },
    MethodExit { tid: u64, idx: i32 },
    CompiledMethodLoad { code_begin: u64, section: Arc<JitSection> },
    CompiledMethodUnload { code_begin: u64 },
    ThreadStart { sys_tid: i64, java_tid: i64 },
    DynamicCodeGenerated { name: String, section: Arc<JitSection> },
    InlineCacheAdd { src: u64, dest: u64 },
    InlineCacheClear { src: u64 },
}

struct Header {
    tag: u8,
    size: u64,
    time: u64,
}

pub struct JvmDumpDecoder {
    buffer: Vec<u8>,
    cursor: usize,
    md_map: FnvHashMap<i32, MethodDesc>,
    thread_map: HashMap<i64, i64>,
}

impl JvmDumpDecoder {
    /// Runs the initial pass (method-index and thread-id tables) and
    /// leaves the streaming cursor at the start of the buffer.
    pub fn new(buffer: Vec<u8>) -> Result<Self> {
        let mut decoder =
            Self { buffer, cursor: 0, md_map: FnvHashMap::default(), thread_map: HashMap::new() };
        decoder.initial_pass()?;
        Ok(decoder)
    }

    fn initial_pass(&mut self) -> Result<()> {
        let mut pos = 0usize;
        while pos < self.buffer.len() {
            let (header, mut body) = self.read_header(pos)?;
            match header.tag {
                TAG_METHOD_ENTRY_INITIAL => {
                    let (idx, _tid, method) = read_method_entry_initial(&mut body)?;
                    self.md_map.insert(idx, method);
                }
                TAG_THREAD_START => {
                    let (sys_tid, java_tid) = read_thread_start(&mut body)?;
                    self.thread_map.insert(sys_tid, java_tid);
                }
                _ => {}
            }
            pos += HEADER_LEN + header.size as usize;
        }
        Ok(())
    }

    fn read_header<'a>(&'a self, pos: usize) -> Result<(Header, Cursor<'a>)> {
        let bytes = self
            .buffer
            .get(pos..pos + HEADER_LEN)
            .ok_or_else(|| Error::BadInput("truncated dump record header".into()))?;
        let tag = bytes[0];
        let size = u64::from_le_bytes(bytes[1..9].try_into().unwrap());
        let time = u64::from_le_bytes(bytes[9..17].try_into().unwrap());
        let body_start = pos + HEADER_LEN;
        let body_end = body_start
            .checked_add(size as usize)
            .filter(|&e| e <= self.buffer.len())
            .ok_or_else(|| Error::BadInput("dump record size exceeds buffer".into()))?;
        Ok((Header { tag, size, time }, Cursor { buf: &self.buffer[body_start..body_end], pos: 0 }))
    }

    /// Yields the next record whose timestamp is `<= time`, or `Ok(None)`
    /// if the next record (if any) is still in the future or the stream
    /// is exhausted.
    pub fn dumper_event(&mut self, time: u64) -> Result<Option<DumpEvent>> {
        if self.cursor >= self.buffer.len() {
            return Ok(None);
        }
        let (header, mut body) = self.read_header(self.cursor)?;
        if header.time > time {
            return Ok(None);
        }
        let next_cursor = self.cursor + HEADER_LEN + header.size as usize;

        let event = match header.tag {
            TAG_INTERPRETER_INFO => {
                let tracing = body.read_u8()? != 0;
                let mut addrs = Vec::with_capacity(crate::codelet::CODELETS_ADDRESS_WORDS);
                for _ in 0..crate::codelet::CODELETS_ADDRESS_WORDS {
                    addrs.push(body.read_u64()?);
                }
                let table = CodeletTable::from_dump_addresses(tracing, &addrs)?;
                DumpEvent::InterpreterInfo(Box::new(table))
            }
            TAG_METHOD_ENTRY_INITIAL => {
                let (idx, tid, method) = read_method_entry_initial(&mut body)?;
                self.check_tid(tid, idx)?;
                DumpEvent::MethodEntry { tid, idx, method }
            }
            TAG_METHOD_ENTRY => {
                let idx = body.read_i32()?;
                let tid = body.read_u64()?;
                self.check_tid(tid, idx)?;
                let method = self
                    .md_map
                    .get(&idx)
                    .cloned()
                    .ok_or_else(|| Error::BadInput(format!("method_entry for unknown idx {idx}")))?;
                DumpEvent::MethodEntry { tid, idx, method }
            }
            TAG_METHOD_EXIT => {
                let idx = body.read_i32()?;
                let tid = body.read_u64()?;
                self.check_tid(tid, idx)?;
                DumpEvent::MethodExit { tid, idx }
            }
            TAG_COMPILED_METHOD_LOAD => {
                let code_begin = body.read_u64()?;
                let code_size = body.read_u64()?;
                let scopes_pc_size = body.read_u64()?;
                let scopes_data_size = body.read_u64()?;
                let entry_point = body.read_u64()?;
                let verified_entry_point = body.read_u64()?;
                let osr_entry_point = body.read_u64()?;
                let inline_method_cnt = body.read_i32()?;

                let mut main_method = None;
                let mut inline_methods = FnvHashMap::default();
                for i in 0..inline_method_cnt {
                    let klass_name_len = body.read_i32()? as usize;
                    let name_len = body.read_i32()? as usize;
                    let signature_len = body.read_i32()? as usize;
                    let method_index = body.read_i32()?;
                    let klass_name = body.read_string(klass_name_len)?;
                    let name = body.read_string(name_len)?;
                    let signature = body.read_string(signature_len)?;
                    let method = MethodDesc { klass_name, name, signature };
                    if i == 0 {
                        main_method = Some(method.clone());
                    }
                    inline_methods.insert(method_index, method);
                }
                let code = body.read_bytes(code_size as usize)?.to_vec();
                let scopes_pc = body.read_bytes(scopes_pc_size as usize)?.to_vec();
                let scopes_data = body.read_bytes(scopes_data_size as usize)?.to_vec();

                let cmd = CompiledMethodDesc {
                    entry_point,
                    verified_entry_point,
                    osr_entry_point,
                    main_method: main_method.unwrap_or_default(),
                    inline_methods,
                };
                let section = JitSection::new(
                    String::new(),
                    code_begin,
                    code,
                    cmd,
                    scopes_pc,
                    scopes_data,
                );
                DumpEvent::CompiledMethodLoad { code_begin, section }
            }
            TAG_COMPILED_METHOD_UNLOAD => {
                let code_begin = body.read_u64()?;
                DumpEvent::CompiledMethodUnload { code_begin }
            }
            TAG_THREAD_START => {
                let (sys_tid, java_tid) = read_thread_start(&mut body)?;
                DumpEvent::ThreadStart { sys_tid, java_tid }
            }
            TAG_DYNAMIC_CODE_GENERATED => {
                let name_len = body.read_i32()? as usize;
                let code_begin = body.read_u64()?;
                let code_size = body.read_u64()?;
                let name = body.read_string(name_len)?;
                let code = body.read_bytes(code_size as usize)?.to_vec();
                let cmd = CompiledMethodDesc {
                    entry_point: code_begin,
                    verified_entry_point: code_begin,
                    osr_entry_point: 0,
                    main_method: MethodDesc::default(),
                    inline_methods: FnvHashMap::default(),
                };
                let section =
                    JitSection::new(name.clone(), code_begin, code, cmd, Vec::new(), Vec::new());
                DumpEvent::DynamicCodeGenerated { name, section }
            }
            TAG_INLINE_CACHE_ADD => {
                let src = body.read_u64()?;
                let dest = body.read_u64()?;
                DumpEvent::InlineCacheAdd { src, dest }
            }
            TAG_INLINE_CACHE_CLEAR => {
                let src = body.read_u64()?;
                DumpEvent::InlineCacheClear { src }
            }
            other => return Err(Error::BadInput(format!("unknown dump record tag {other}"))),
        };
        self.cursor = next_cursor;
        Ok(Some(event))
    }

    pub fn get_java_tid(&self, sys_tid: i64) -> Option<i64> {
        self.thread_map.get(&sys_tid).copied()
    }

    fn check_tid(&self, tid: u64, idx: i32) -> Result<()> {
        let _ = idx;
        if !self.thread_map.values().any(|&java_tid| java_tid as u64 == tid)
            && !self.thread_map.contains_key(&(tid as i64))
        {
            return Err(Error::BadInput(format!("method event for unregistered thread {tid}")));
        }
        Ok(())
    }
}

fn read_method_entry_initial(body: &mut Cursor) -> Result<(i32, u64, MethodDesc)> {
    let idx = body.read_i32()?;
    let tid = body.read_u64()?;
    let klass_name_len = body.read_i32()? as usize;
    let name_len = body.read_i32()? as usize;
    let signature_len = body.read_i32()? as usize;
    let klass_name = body.read_string(klass_name_len)?;
    let name = body.read_string(name_len)?;
    let signature = body.read_string(signature_len)?;
    Ok((idx, tid, MethodDesc { klass_name, name, signature }))
}

fn read_thread_start(body: &mut Cursor) -> Result<(i64, i64)> {
    let sys_tid = body.read_i64()?;
    let java_tid = body.read_i64()?;
    Ok((sys_tid, java_tid))
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let slice = self
            .buf
            .get(self.pos..self.pos + n)
            .ok_or_else(|| Error::BadInput("truncated dump record body".into()))?;
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_bytes(8)?.try_into().unwrap()))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read_bytes(8)?.try_into().unwrap()))
    }

    fn read_string(&mut self, len: usize) -> Result<String> {
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::BadInput(format!("non-utf8 string in dump record: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_header(buf: &mut Vec<u8>, tag: u8, time: u64, body: &[u8]) {
        buf.push(tag);
        buf.extend_from_slice(&(body.len() as u64).to_le_bytes());
        buf.extend_from_slice(&time.to_le_bytes());
        buf.extend_from_slice(body);
    }

    fn thread_start_record(time: u64, sys_tid: i64, java_tid: i64) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&sys_tid.to_le_bytes());
        body.extend_from_slice(&java_tid.to_le_bytes());
        let mut rec = Vec::new();
        push_header(&mut rec, TAG_THREAD_START, time, &body);
        rec
    }

    #[test]
    fn thread_start_round_trips() {
        let buf = thread_start_record(5, 100, 7);
        let mut dec = JvmDumpDecoder::new(buf).unwrap();
        assert_eq!(dec.get_java_tid(100), Some(7));
        let ev = dec.dumper_event(10).unwrap().unwrap();
        assert!(matches!(ev, DumpEvent::ThreadStart { sys_tid: 100, java_tid: 7 }));
    }

    #[test]
    fn events_beyond_time_bound_are_not_yielded() {
        let buf = thread_start_record(50, 1, 2);
        let mut dec = JvmDumpDecoder::new(buf).unwrap();
        assert!(dec.dumper_event(10).unwrap().is_none());
        assert!(dec.dumper_event(50).unwrap().is_some());
    }

    #[test]
    fn method_entry_initial_then_method_entry_resolve_same_method() {
        let mut buf = thread_start_record(0, 1, 2);
        let mut body = Vec::new();
        body.extend_from_slice(&7i32.to_le_bytes()); // idx
        body.extend_from_slice(&2u64.to_le_bytes()); // tid (java)
        body.extend_from_slice(&3i32.to_le_bytes());
        body.extend_from_slice(&3i32.to_le_bytes());
        body.extend_from_slice(&2i32.to_le_bytes());
        body.extend_from_slice(b"Foo");
        body.extend_from_slice(b"bar");
        body.extend_from_slice(b"()V");
        push_header(&mut buf, TAG_METHOD_ENTRY_INITIAL, 1, &body);

        let mut exit_body = Vec::new();
        exit_body.extend_from_slice(&7i32.to_le_bytes());
        exit_body.extend_from_slice(&2u64.to_le_bytes());
        push_header(&mut buf, TAG_METHOD_EXIT, 2, &exit_body);

        let mut dec = JvmDumpDecoder::new(buf).unwrap();
        let ev = dec.dumper_event(100).unwrap().unwrap();
        match ev {
            DumpEvent::MethodEntry { method, .. } => {
                assert_eq!(method.klass_name, "Foo");
                assert_eq!(method.name, "bar");
            }
            other => panic!("unexpected {other:?}"),
        }
        let ev = dec.dumper_event(100).unwrap().unwrap();
        assert!(matches!(ev, DumpEvent::MethodExit { idx: 7, tid: 2 }));
    }
}
