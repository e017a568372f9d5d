//! A contiguous run of compiled native code for one method (plus its
//! inlined callees), with the scope-descriptor tables needed to recover
//! the logical call stack at any PC inside it.
//!
//! Sections carry two independent locks, matching the original's layout:
//! `counts` (user/attach/map refcounts) and `mapped` (live-in-image
//! status). The counts lock is never held while taking the map lock; the
//! reverse order is fine. [`super::image::JitImage`] is the only caller
//! that takes both.

use std::sync::Arc;

use fnv::FnvHashMap;
use parking_lot::Mutex;

use crate::compressed_stream::CompressedReadStream;
use crate::error::{Error, Result};

pub type MethodIndex = i32;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodDesc {
    pub klass_name: String,
    pub name: String,
    pub signature: String,
}

/// The logical Java call stack at one PC inside a compiled method,
/// innermost frame first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcStackInfo {
    pub pc: u64,
    pub frames: Vec<(MethodIndex, u32)>,
}

#[derive(Debug, Clone)]
pub struct CompiledMethodDesc {
    pub entry_point: u64,
    pub verified_entry_point: u64,
    pub osr_entry_point: u64,
    pub main_method: MethodDesc,
    pub inline_methods: FnvHashMap<MethodIndex, MethodDesc>,
}

impl CompiledMethodDesc {
    /// `id < 0` names the outermost (non-inlined) method.
    pub fn method_desc(&self, id: MethodIndex) -> Option<&MethodDesc> {
        if id < 0 {
            Some(&self.main_method)
        } else {
            self.inline_methods.get(&id)
        }
    }
}

#[derive(Debug, Default)]
struct Counts {
    ucount: u16,
    acount: u16,
    mcount: u16,
}

#[derive(Debug)]
pub struct JitSection {
    pub name: String,
    code_begin: u64,
    code: Vec<u8>,
    cmd: CompiledMethodDesc,
    /// UNSIGNED5-encoded `(pc, data_offset)` pairs sorted by ascending pc.
    scopes_pc: Vec<u8>,
    /// Per-pc frame lists: UNSIGNED5 `numframes`, then `numframes` pairs of
    /// `(method_id + 1, bci)` (`method_id` 0 means the outermost method).
    scopes_data: Vec<u8>,
    counts: Mutex<Counts>,
    mapped: Mutex<bool>,
}

impl JitSection {
    pub fn new(
        name: String,
        code_begin: u64,
        code: Vec<u8>,
        cmd: CompiledMethodDesc,
        scopes_pc: Vec<u8>,
        scopes_data: Vec<u8>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            code_begin,
            code,
            cmd,
            scopes_pc,
            scopes_data,
            counts: Mutex::new(Counts { ucount: 1, acount: 0, mcount: 0 }),
            mapped: Mutex::new(false),
        })
    }

    pub fn code_begin(&self) -> u64 {
        self.code_begin
    }

    pub fn code_size(&self) -> u64 {
        self.code.len() as u64
    }

    pub fn contains(&self, vaddr: u64) -> bool {
        vaddr >= self.code_begin && vaddr < self.code_begin + self.code_size()
    }

    pub fn cmd(&self) -> &CompiledMethodDesc {
        &self.cmd
    }

    pub fn read(&self, vaddr: u64, size: usize) -> Result<&[u8]> {
        if !self.contains(vaddr) {
            return Err(Error::NoMapping(vaddr));
        }
        let offset = (vaddr - self.code_begin) as usize;
        let end = (offset + size).min(self.code.len());
        Ok(&self.code[offset..end])
    }

    /// Increments the user count. Mirrors `jit_section_get`.
    pub fn get(&self) -> Result<()> {
        let mut c = self.counts.lock();
        if c.ucount == u16::MAX {
            return Err(Error::Internal("jit section user count overflow".into()));
        }
        c.ucount += 1;
        Ok(())
    }

    /// Decrements the user count; returns `true` if this was the last user.
    pub fn put(&self) -> Result<bool> {
        let mut c = self.counts.lock();
        if c.ucount == 0 {
            return Err(Error::Internal("jit section user count underflow".into()));
        }
        c.ucount -= 1;
        Ok(c.ucount == 0)
    }

    pub fn mark_mapped(&self) {
        *self.mapped.lock() = true;
        self.counts.lock().mcount += 1;
    }

    pub fn mark_unmapped(&self) {
        *self.mapped.lock() = false;
    }

    pub fn is_mapped(&self) -> bool {
        *self.mapped.lock()
    }

    /// Decodes the scope tables to recover the logical call stack at
    /// `vaddr`. `None` if this section has no debug record for that PC.
    pub fn read_debug_info(&self, vaddr: u64) -> Result<Option<PcStackInfo>> {
        if !self.contains(vaddr) {
            return Err(Error::NoMapping(vaddr));
        }
        let target_pc = vaddr - self.code_begin;
        let mut stream = CompressedReadStream::new(&self.scopes_pc, 0);
        let mut best: Option<(u64, u64)> = None;
        while let Some(pc) = stream.read_int() {
            let Some(data_offset) = stream.read_int() else {
                return Err(Error::BadInput(format!(
                    "truncated scopes_pc table in section {}",
                    self.name
                )));
            };
            if pc as u64 <= target_pc {
                best = Some((pc as u64, data_offset as u64));
            } else {
                break;
            }
        }
        let Some((pc, data_offset)) = best else {
            return Ok(None);
        };
        let mut data = CompressedReadStream::new(&self.scopes_data, data_offset as usize);
        let numframes = data.read_int().ok_or_else(|| {
            Error::BadInput(format!("truncated scopes_data table in section {}", self.name))
        })?;
        let mut frames = Vec::with_capacity(numframes as usize);
        for _ in 0..numframes {
            let raw_id = data.read_int().ok_or_else(|| {
                Error::BadInput(format!("truncated scope frame in section {}", self.name))
            })?;
            let bci = data.read_int().ok_or_else(|| {
                Error::BadInput(format!("truncated scope frame in section {}", self.name))
            })?;
            let method_id: MethodIndex = if raw_id == 0 { -1 } else { raw_id as i32 - 1 };
            frames.push((method_id, bci));
        }
        Ok(Some(PcStackInfo { pc, frames }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unsigned5(values: &[u32]) -> Vec<u8> {
        // Minimal local re-implementation matching the encoder used in
        // compressed_stream's own tests; kept separate to avoid exposing
        // test-only code across module boundaries.
        let mut out = Vec::new();
        for &value in values {
            let v = value as i64;
            const L: i64 = 192;
            const H: i64 = 64;
            if v < L {
                out.push(v as u8);
                continue;
            }
            let mut encoded = false;
            for n in 1..=4i64 {
                let geom: i64 = (0..n).map(|i| H.pow(i as u32)).sum();
                let offset = L * geom;
                if v < offset {
                    continue;
                }
                let vp = v - offset;
                let hk = H.pow(n as u32);
                let dn = vp / hk;
                let max_dn = if n < 4 { L - 1 } else { 255 };
                if dn > max_dn {
                    continue;
                }
                let mut low = vp % hk;
                for _ in 0..n {
                    out.push((low % H) as u8 + L as u8);
                    low /= H;
                }
                out.push(dn as u8);
                encoded = true;
                break;
            }
            assert!(encoded, "value {value} did not fit in 5 UNSIGNED5 bytes");
        }
        out
    }

    fn test_section() -> Arc<JitSection> {
        // One PC (offset 4) with two frames: main method at bci 10, one
        // inlined method (index 0) at bci 2.
        let scopes_data = {
            let mut v = unsigned5(&[2]); // numframes
            v.extend(unsigned5(&[0, 10])); // main (id 0 -> -1), bci 10
            v.extend(unsigned5(&[1, 2])); // inline id 0 (stored as 1), bci 2
            v
        };
        let scopes_pc = unsigned5(&[4, 0]);
        JitSection::new(
            "test".into(),
            0x1000,
            vec![0u8; 64],
            CompiledMethodDesc {
                entry_point: 0x1000,
                verified_entry_point: 0x1008,
                osr_entry_point: 0,
                main_method: MethodDesc {
                    klass_name: "Foo".into(),
                    name: "bar".into(),
                    signature: "()V".into(),
                },
                inline_methods: FnvHashMap::default(),
            },
            scopes_pc,
            scopes_data,
        )
    }

    #[test]
    fn contains_checks_address_range() {
        let s = test_section();
        assert!(s.contains(0x1000));
        assert!(s.contains(0x103f));
        assert!(!s.contains(0x1040));
        assert!(!s.contains(0xfff));
    }

    #[test]
    fn refcount_get_put_tracks_last_user() {
        let s = test_section();
        s.get().unwrap();
        assert!(!s.put().unwrap());
        assert!(s.put().unwrap());
        assert!(s.put().is_err());
    }

    #[test]
    fn read_debug_info_recovers_frames_innermost_first() {
        let s = test_section();
        let info = s.read_debug_info(0x1004).unwrap().unwrap();
        assert_eq!(info.pc, 4);
        assert_eq!(info.frames, vec![(-1, 10), (0, 2)]);
    }

    #[test]
    fn read_debug_info_before_first_pc_is_none() {
        let s = test_section();
        assert_eq!(s.read_debug_info(0x1000).unwrap(), None);
    }
}
