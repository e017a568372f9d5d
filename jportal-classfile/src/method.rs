//! A parsed method: its name/descriptor, control-flow graph, and the
//! call-site/caller bookkeeping the matcher's candidate selection needs.

use std::collections::HashMap;

use crate::{
    block::BlockGraph,
    ids::method::{MethodDescriptor, MethodName},
    klass::KlassId,
};

/// Index of a [`Method`] within an [`crate::analyser::Analyser`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(pub usize);

#[derive(Debug)]
pub struct Method {
    name: MethodName,
    descriptor: MethodDescriptor,
    klass: KlassId,
    block_graph: BlockGraph,
    /// Bytecode offset of a call site to the methods it might invoke,
    /// resolved once the whole class hierarchy is known.
    callees: HashMap<usize, Vec<MethodId>>,
    /// (call-site offset, caller method) pairs, used for
    /// `INVOKE_RETURN_ENTRY` candidate selection.
    callers: Vec<(usize, MethodId)>,
}

impl Method {
    pub fn new(name: MethodName, descriptor: MethodDescriptor, klass: KlassId, block_graph: BlockGraph) -> Self {
        Self {
            name,
            descriptor,
            klass,
            block_graph,
            callees: HashMap::new(),
            callers: Vec::new(),
        }
    }

    pub fn name(&self) -> &MethodName {
        &self.name
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    pub fn klass(&self) -> KlassId {
        self.klass
    }

    pub fn block_graph(&self) -> &BlockGraph {
        &self.block_graph
    }

    /// A stable `name+signature` key, used by [`crate::klass::Klass`]'s
    /// method table and the matcher's per-method caches.
    pub fn signature(&self) -> String {
        format!("{}{}", self.name.display_name(), self.descriptor.display_descriptor())
    }

    pub fn set_callees(&mut self, offset: usize, callees: Vec<MethodId>) {
        self.callees.insert(offset, callees);
    }

    pub fn callees_at(&self, offset: usize) -> Option<&[MethodId]> {
        self.callees.get(&offset).map(Vec::as_slice)
    }

    pub fn callee_map(&self) -> &HashMap<usize, Vec<MethodId>> {
        &self.callees
    }

    pub fn add_caller(&mut self, offset: usize, caller: MethodId) {
        self.callers.push((offset, caller));
    }

    pub fn callers(&self) -> &[(usize, MethodId)] {
        &self.callers
    }
}
