//! The static program model: every parsed class and method, the class
//! hierarchy linked once all classes are known, and the whole-program call
//! graph the method matcher consults for candidate selection.

use std::collections::HashMap;

use crate::{
    ids::class::ClassName,
    klass::{Klass, KlassId},
    method::{Method, MethodId},
    opcode::Op,
};

/// Owns every [`Klass`]/[`Method`] parsed for a run, plus the two derived
/// views (`analyse_hierarchy`, `analyse_call_graph`) the matcher needs.
///
/// Built once up front from the configured class roots and read-only for the
/// rest of the run: there is no mutable global class table, unlike the
/// original's `static map<string, Klass*>`.
#[derive(Debug, Default)]
pub struct Analyser {
    klasses: Vec<Klass>,
    methods: Vec<Method>,
    name_to_klass: HashMap<String, KlassId>,
    /// (bytecode offset within the call site's method, call site's method).
    all_call_sites: Vec<(usize, MethodId)>,
    callbacks: Vec<MethodId>,
    hierarchy_done: bool,
    call_graph_done: bool,
}

impl Analyser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly parsed class, returning the id it was stored
    /// under. Must be called once per class before [`Self::analyse_hierarchy`].
    pub fn insert_klass(&mut self, name: ClassName, klass: Klass) -> KlassId {
        let id = KlassId(self.klasses.len());
        self.name_to_klass.insert(name.display_name(), id);
        self.klasses.push(klass);
        id
    }

    pub fn insert_method(&mut self, method: Method) -> MethodId {
        let id = MethodId(self.methods.len());
        self.methods.push(method);
        id
    }

    pub fn klass(&self, id: KlassId) -> &Klass {
        &self.klasses[id.0]
    }

    pub fn klass_mut(&mut self, id: KlassId) -> &mut Klass {
        &mut self.klasses[id.0]
    }

    pub fn method(&self, id: MethodId) -> &Method {
        &self.methods[id.0]
    }

    pub fn method_mut(&mut self, id: MethodId) -> &mut Method {
        &mut self.methods[id.0]
    }

    pub fn get_klass(&self, name: &str) -> Option<KlassId> {
        self.name_to_klass.get(name).copied()
    }

    pub fn all_methods(&self) -> impl Iterator<Item = MethodId> {
        (0..self.methods.len()).map(MethodId)
    }

    pub fn all_call_sites(&self) -> &[(usize, MethodId)] {
        &self.all_call_sites
    }

    pub fn callbacks(&self) -> &[MethodId] {
        &self.callbacks
    }

    /// Registers a method (by fully-qualified `Klass.signature`) as an
    /// externally-invoked callback, seeded from `--callback` at the CLI.
    pub fn analyse_callback(&mut self, klass_name: &str, signature: &str) -> Option<MethodId> {
        let klass = self.get_klass(klass_name)?;
        let method = self.klass(klass).method(signature)?;
        self.callbacks.push(method);
        Some(method)
    }

    /// Links every class's father/child pointers from the father names
    /// recorded while parsing. Must run once, after every class root has
    /// been parsed and registered.
    pub fn analyse_hierarchy(&mut self) {
        if self.hierarchy_done {
            return;
        }
        let links: Vec<(KlassId, KlassId)> = self
            .klasses
            .iter()
            .enumerate()
            .filter_map(|(i, k)| {
                let father_name = k.father_name()?.display_name();
                let father = self.name_to_klass.get(&father_name).copied()?;
                Some((KlassId(i), father))
            })
            .collect();
        for (child, father) in links {
            self.klasses[child.0].set_father(father);
            self.klasses[father.0].add_child(child);
        }
        self.hierarchy_done = true;
    }

    /// Walks every method's block graph, resolving each invoke instruction's
    /// constant-pool method reference against the class hierarchy to
    /// populate callee/caller lists and the flattened call-site list.
    ///
    /// Virtual/interface invokes resolve to every override reachable from
    /// the static receiver type down through its children, since the actual
    /// receiver is only known at trace-match time.
    pub fn analyse_call_graph(&mut self) {
        if self.call_graph_done {
            return;
        }
        assert!(self.hierarchy_done, "analyse_hierarchy must run first");

        let mut edges: Vec<(MethodId, usize, Vec<MethodId>)> = Vec::new();
        for (caller_idx, caller) in self.methods.iter().enumerate() {
            let caller_id = MethodId(caller_idx);
            for (&offset, &(op, cp_index)) in caller.block_graph().call_sites() {
                let klass = caller.klass();
                let Some(signature) = self.klass(klass).method_ref(cp_index).map(str::to_string) else {
                    continue;
                };
                let callees = self.resolve_invoke(op, klass, &signature);
                if !callees.is_empty() {
                    edges.push((caller_id, offset, callees));
                }
            }
        }

        for (caller_id, offset, callees) in edges {
            self.all_call_sites.push((offset, caller_id));
            for &callee_id in &callees {
                self.methods[callee_id.0].add_caller(offset, caller_id);
            }
            self.methods[caller_id.0].set_callees(offset, callees);
        }
        self.call_graph_done = true;
    }

    fn resolve_invoke(&self, op: Op, klass: KlassId, signature: &str) -> Vec<MethodId> {
        match op {
            Op::Invokestatic { .. } | Op::Invokespecial { .. } => {
                self.lookup_up_hierarchy(klass, signature).into_iter().collect()
            }
            Op::Invokevirtual { .. } | Op::Invokeinterface { .. } => {
                let mut found = Vec::new();
                if let Some(m) = self.lookup_up_hierarchy(klass, signature) {
                    found.push(m);
                }
                self.collect_overrides(klass, signature, &mut found);
                found
            }
            // invokedynamic's target is resolved by a bootstrap method at
            // runtime; there is no static callee to record.
            _ => Vec::new(),
        }
    }

    fn lookup_up_hierarchy(&self, klass: KlassId, signature: &str) -> Option<MethodId> {
        let mut current = Some(klass);
        while let Some(id) = current {
            if let Some(m) = self.klass(id).method(signature) {
                return Some(m);
            }
            current = self.klass(id).father();
        }
        None
    }

    fn collect_overrides(&self, klass: KlassId, signature: &str, out: &mut Vec<MethodId>) {
        for &child in self.klass(klass).children() {
            if let Some(m) = self.klass(child).method(signature) {
                out.push(m);
            }
            self.collect_overrides(child, signature, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockGraph;
    use crate::ids::method::{MethodDescriptor, MethodName};
    use crate::opcode::{Instruction, InstructionList};
    use fnv::FnvHashMap;

    fn single_instruction_graph(op: Op) -> BlockGraph {
        let instructions = vec![Instruction { offset: 0, op }, Instruction { offset: 3, op: Op::Return }];
        let mut offset_to_index = FnvHashMap::default();
        for (i, instr) in instructions.iter().enumerate() {
            offset_to_index.insert(instr.offset, i);
        }
        let il = InstructionList { instructions, offset_to_index };
        BlockGraph::build(&il, 4, &[]).unwrap()
    }

    #[test]
    fn hierarchy_links_father_and_children() {
        let mut a = Analyser::new();
        let object = ClassName::parse_str("java/lang/Object").unwrap();
        let sub = ClassName::parse_str("com/exopteron/Sub").unwrap();

        let object_id = a.insert_klass(object.clone(), Klass::new(object));
        let mut sub_klass = Klass::new(sub.clone());
        sub_klass.set_father_name(ClassName::parse_str("java/lang/Object").unwrap());
        let sub_id = a.insert_klass(sub, sub_klass);

        a.analyse_hierarchy();

        assert_eq!(a.klass(sub_id).father(), Some(object_id));
        assert_eq!(a.klass(object_id).children(), &[sub_id]);
    }

    #[test]
    fn call_graph_resolves_static_invoke() {
        let mut a = Analyser::new();
        let owner = ClassName::parse_str("com/exopteron/Owner").unwrap();
        let owner_id = a.insert_klass(owner.clone(), Klass::new(owner));

        let callee = Method::new(
            MethodName::Generic("target".to_string()),
            MethodDescriptor::parse_str("()V").unwrap(),
            owner_id,
            single_instruction_graph(Op::Return),
        );
        let callee_id = a.insert_method(callee);
        a.klass_mut(owner_id).insert_method("target()V".to_string(), callee_id);
        a.klass_mut(owner_id).insert_method_ref(1, "target()V".to_string());

        let caller = Method::new(
            MethodName::Generic("caller".to_string()),
            MethodDescriptor::parse_str("()V").unwrap(),
            owner_id,
            single_instruction_graph(Op::Invokestatic { index: 1 }),
        );
        let caller_id = a.insert_method(caller);

        a.analyse_hierarchy();
        a.analyse_call_graph();

        assert_eq!(a.method(caller_id).callees_at(0), Some(&[callee_id][..]));
        assert_eq!(a.method(callee_id).callers(), &[(0, caller_id)]);
        assert_eq!(a.all_call_sites(), &[(0, caller_id)]);
    }
}
