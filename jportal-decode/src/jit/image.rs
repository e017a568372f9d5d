//! The currently-live mapping from virtual address to compiled-method
//! section, maintained chronologically from `compiled_method_load`/
//! `compiled_method_unload`/`dynamic_code_generated` dump events.
//!
//! `find` moves its hit to the front of the live list (MRU), matching the
//! access pattern of a PT decoder walking mostly-sequential trace: the
//! section currently executing is overwhelmingly likely to be the next
//! lookup too.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::jit::section::JitSection;

#[derive(Debug, Default)]
pub struct JitImage {
    pub name: Option<String>,
    live: Vec<Arc<JitSection>>,
    removed: Vec<Arc<JitSection>>,
}

impl JitImage {
    pub fn new(name: Option<String>) -> Self {
        Self { name, live: Vec::new(), removed: Vec::new() }
    }

    /// Adds `section`, evicting any live section whose range intersects it.
    pub fn add(&mut self, section: Arc<JitSection>) {
        let (begin, end) = (section.code_begin(), section.code_begin() + section.code_size());
        let mut i = 0;
        while i < self.live.len() {
            let (b, e) =
                (self.live[i].code_begin(), self.live[i].code_begin() + self.live[i].code_size());
            if b < end && begin < e {
                let evicted = self.live.remove(i);
                evicted.mark_unmapped();
                self.removed.push(evicted);
            } else {
                i += 1;
            }
        }
        section.mark_mapped();
        self.live.push(section);
    }

    /// Removes the live section whose base address equals `base` exactly.
    pub fn remove(&mut self, base: u64) -> Result<()> {
        let idx = self
            .live
            .iter()
            .position(|s| s.code_begin() == base)
            .ok_or(Error::NoMapping(base))?;
        let section = self.live.remove(idx);
        section.mark_unmapped();
        self.removed.push(section);
        Ok(())
    }

    /// Finds the section containing `vaddr`, takes a user reference, and
    /// moves it to the front of the live list.
    pub fn find(&mut self, vaddr: u64) -> Result<Arc<JitSection>> {
        let idx =
            self.live.iter().position(|s| s.contains(vaddr)).ok_or(Error::NoMapping(vaddr))?;
        let section = self.live.remove(idx);
        section.get()?;
        self.live.insert(0, section.clone());
        Ok(section)
    }

    /// Cheap re-check that `section` still contains `vaddr` and is still
    /// the MRU entry. A `false` return means the caller should retry via
    /// [`JitImage::find`] rather than trust a stale reference.
    pub fn validate(&self, section: &Arc<JitSection>, vaddr: u64) -> bool {
        section.contains(vaddr)
            && self.live.first().map(|s| Arc::ptr_eq(s, section)).unwrap_or(false)
    }

    pub fn live_sections(&self) -> &[Arc<JitSection>] {
        &self.live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fnv::FnvHashMap;
    use crate::jit::section::{CompiledMethodDesc, MethodDesc};

    fn section(code_begin: u64, size: usize) -> Arc<JitSection> {
        JitSection::new(
            format!("sec@{code_begin:x}"),
            code_begin,
            vec![0u8; size],
            CompiledMethodDesc {
                entry_point: code_begin,
                verified_entry_point: code_begin,
                osr_entry_point: 0,
                main_method: MethodDesc::default(),
                inline_methods: FnvHashMap::default(),
            },
            Vec::new(),
            Vec::new(),
        )
    }

    #[test]
    fn add_evicts_overlapping_sections() {
        let mut image = JitImage::new(None);
        image.add(section(0x1000, 0x100));
        image.add(section(0x1080, 0x100));
        assert_eq!(image.live_sections().len(), 1);
        assert_eq!(image.live_sections()[0].code_begin(), 0x1080);
        assert_eq!(image.removed.len(), 1);
    }

    #[test]
    fn find_moves_hit_to_front_mru() {
        let mut image = JitImage::new(None);
        image.add(section(0x1000, 0x100));
        image.add(section(0x2000, 0x100));
        let found = image.find(0x1050).unwrap();
        assert_eq!(found.code_begin(), 0x1000);
        assert_eq!(image.live_sections()[0].code_begin(), 0x1000);
    }

    #[test]
    fn find_miss_is_no_mapping() {
        let mut image = JitImage::new(None);
        image.add(section(0x1000, 0x100));
        assert!(matches!(image.find(0x5000), Err(Error::NoMapping(0x5000))));
    }

    #[test]
    fn remove_by_base_moves_to_removed_list() {
        let mut image = JitImage::new(None);
        image.add(section(0x1000, 0x100));
        image.remove(0x1000).unwrap();
        assert!(image.live_sections().is_empty());
        assert_eq!(image.removed.len(), 1);
    }
}
