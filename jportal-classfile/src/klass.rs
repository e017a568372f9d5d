//! A loaded class: its name, its place in the single-inheritance hierarchy,
//! and the method tables the call-graph analysis and matcher both need.

use std::collections::HashMap;

use crate::{ids::class::ClassName, method::MethodId};

/// Index of a [`Klass`] within an [`crate::analyser::Analyser`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KlassId(pub usize);

#[derive(Debug)]
pub struct Klass {
    name: ClassName,
    /// `CONSTANT_Methodref`/`CONSTANT_InterfaceMethodref` constant pool index
    /// to the `name+signature` of the method it refers to, resolved while
    /// parsing this class's own constant pool.
    cp_index_to_method_ref: HashMap<u16, String>,
    /// `name+signature` to the method itself, populated once this class's
    /// methods have all been parsed.
    method_map: HashMap<String, MethodId>,
    father_name: Option<ClassName>,
    interfaces: Vec<ClassName>,
    father: Option<KlassId>,
    children: Vec<KlassId>,
}

impl Klass {
    pub fn new(name: ClassName) -> Self {
        Self {
            name,
            cp_index_to_method_ref: HashMap::new(),
            method_map: HashMap::new(),
            father_name: None,
            interfaces: Vec::new(),
            father: None,
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &ClassName {
        &self.name
    }

    pub fn insert_method_ref(&mut self, index: u16, name_and_signature: String) {
        self.cp_index_to_method_ref.insert(index, name_and_signature);
    }

    /// Resolves a `CONSTANT_Methodref` index to the `name+signature` key it
    /// was recorded under, the same key [`Self::method`] looks up with.
    pub fn method_ref(&self, index: u16) -> Option<&str> {
        self.cp_index_to_method_ref.get(&index).map(String::as_str)
    }

    pub fn insert_method(&mut self, signature: String, method: MethodId) {
        self.method_map.insert(signature, method);
    }

    pub fn method(&self, signature: &str) -> Option<MethodId> {
        self.method_map.get(signature).copied()
    }

    pub fn method_map(&self) -> &HashMap<String, MethodId> {
        &self.method_map
    }

    pub fn set_father_name(&mut self, father_name: ClassName) {
        self.father_name = Some(father_name);
    }

    pub fn father_name(&self) -> Option<&ClassName> {
        self.father_name.as_ref()
    }

    pub fn add_interface_name(&mut self, interface_name: ClassName) {
        self.interfaces.push(interface_name);
    }

    pub fn interface_names(&self) -> &[ClassName] {
        &self.interfaces
    }

    pub fn set_father(&mut self, father: KlassId) {
        self.father = Some(father);
    }

    pub fn father(&self) -> Option<KlassId> {
        self.father
    }

    pub fn add_child(&mut self, child: KlassId) {
        self.children.push(child);
    }

    pub fn children(&self) -> &[KlassId] {
        &self.children
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_ref_round_trips() {
        let mut k = Klass::new(ClassName::parse_str("java/lang/Object").unwrap());
        k.insert_method_ref(7, "toString()Ljava/lang/String;".to_string());
        assert_eq!(k.method_ref(7), Some("toString()Ljava/lang/String;"));
        assert_eq!(k.method_ref(8), None);
    }

    #[test]
    fn method_map_round_trips() {
        let mut k = Klass::new(ClassName::parse_str("java/lang/Object").unwrap());
        k.insert_method(
            "hashCode()I".to_string(),
            MethodId(3),
        );
        assert_eq!(k.method("hashCode()I"), Some(MethodId(3)));
        assert_eq!(k.method("missing()V"), None);
    }

    #[test]
    fn hierarchy_links_are_explicit_indices() {
        let mut k = Klass::new(ClassName::parse_str("com/exopteron/Sub").unwrap());
        k.set_father(KlassId(0));
        k.add_child(KlassId(2));
        assert_eq!(k.father(), Some(KlassId(0)));
        assert_eq!(k.children(), &[KlassId(2)]);
    }
}
