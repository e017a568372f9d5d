//! Walks a class-file search root, parsing every `.class` file found under
//! it into the [`crate::analyser::Analyser`]'s arena.
//!
//! Registers each class's method-ref constant-pool entries (needed by
//! [`crate::analyser::Analyser::analyse_call_graph`]) and every method that
//! carries a `Code` attribute (methods without one, e.g. native/abstract,
//! have no bytecode to ever match against and are simply not registered).

use std::fs;
use std::io::Cursor;
use std::path::Path;

use crate::analyser::Analyser;
use crate::attribute::{attrtype, Attribute};
use crate::constant_pool::ConstantPoolEntry;
use crate::error::{ClassFileError, Result};
use crate::file::ClassFile;
use crate::ids::class::ClassName;
use crate::ids::method::{MethodDescriptor, MethodName};
use crate::klass::Klass;
use crate::method::Method;
use crate::block::BlockGraph;
use crate::stream::{ClassFileItem, ClassFileStream};

/// Parses every `.class` file under `root` (recursively) and registers its
/// classes/methods with `analyser`. Must run, for every configured root,
/// before [`Analyser::analyse_hierarchy`]/[`Analyser::analyse_call_graph`].
pub fn load_root(analyser: &mut Analyser, root: &Path) -> Result<()> {
    for path in collect_class_files(root).map_err(ClassFileError::IoError)? {
        let bytes = fs::read(&path).map_err(ClassFileError::IoError)?;
        let mut cursor = Cursor::new(bytes);
        let mut stream = ClassFileStream::new(&mut cursor);
        let class_file = ClassFile::read_from_stream(&mut stream, None)?;
        load_class(analyser, class_file)?;
    }
    Ok(())
}

fn collect_class_files(root: &Path) -> std::io::Result<Vec<std::path::PathBuf>> {
    let mut out = Vec::new();
    if root.is_file() {
        out.push(root.to_path_buf());
        return Ok(out);
    }
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some("class") {
                out.push(path);
            }
        }
    }
    Ok(out)
}

fn load_class(analyser: &mut Analyser, class_file: ClassFile) -> Result<()> {
    let name = ClassName::parse_str(class_file.class_name()?)
        .ok_or(ClassFileError::ExpectedString)?;
    let mut klass = Klass::new(name.clone());

    if let Some(super_name) = class_file.super_class_name()? {
        if let Some(parsed) = ClassName::parse_str(super_name) {
            klass.set_father_name(parsed);
        }
    }

    for (index, entry) in class_file.constant_pool.entries.iter().enumerate() {
        let name_and_type_index = match entry {
            ConstantPoolEntry::Methodref { name_and_type_index, .. }
            | ConstantPoolEntry::InterfaceMethodref { name_and_type_index, .. } => *name_and_type_index,
            _ => continue,
        };
        if let ConstantPoolEntry::NameAndType { name_index, descriptor_index } =
            class_file.constant_pool.get_constant(name_and_type_index as usize)
        {
            let method_name = class_file.constant_pool.get_utf8_constant(*name_index as usize)?;
            let descriptor = class_file.constant_pool.get_utf8_constant(*descriptor_index as usize)?;
            // Constant pool indices are 1-based; entry `index` here is 0-based.
            klass.insert_method_ref((index + 1) as u16, format!("{method_name}{descriptor}"));
        }
    }

    let klass_id = analyser.insert_klass(name, klass);

    for method_info in &class_file.methods {
        let Some(Attribute::Code { code, exception_table, .. }) =
            method_info.attributes.get(attrtype::CODE).first()
        else {
            continue;
        };
        let method_name_str = class_file.constant_pool.get_utf8_constant(method_info.name_index as usize)?;
        let descriptor_str =
            class_file.constant_pool.get_utf8_constant(method_info.descriptor_index as usize)?;
        let Some(method_name) = MethodName::parse_str(method_name_str) else { continue };
        let Some(descriptor) = MethodDescriptor::parse_str(descriptor_str) else { continue };

        // `Attribute::Code` doesn't retain the raw code array's byte length
        // (only the already-decoded `InstructionList`); approximate it from
        // the last instruction's offset, which is exact whenever the final
        // instruction is a zero-operand terminator (return/ireturn/...), the
        // overwhelmingly common case for a method's last instruction.
        let code_length = code.instructions.last().map(|i| i.offset + 1).unwrap_or(0);
        let block_graph = BlockGraph::build(code, code_length, exception_table)?;

        let method = Method::new(method_name, descriptor, klass_id, block_graph);
        let signature = method.signature();
        let method_id = analyser.insert_method(method);
        analyser.klass_mut(klass_id).insert_method(signature, method_id);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeCollection;
    use crate::constant_pool::ConstantPool;
    use crate::field_info::FieldInfo;
    use crate::file::ClassAccessFlags;
    use crate::method_info::{MethodAccessFlags, MethodInfo};
    use crate::opcode::{Instruction, InstructionList, Op};
    use fnv::FnvHashMap;

    fn utf8(s: &str) -> ConstantPoolEntry {
        ConstantPoolEntry::Utf8 { data: s.to_string() }
    }

    fn leaf_class_file() -> ClassFile {
        // #1 Utf8 "com/exopteron/Leaf", #2 Class -> #1, #3 Utf8 "leaf", #4 Utf8 "()I"
        let entries = vec![
            utf8("com/exopteron/Leaf"),
            ConstantPoolEntry::Class { name_index: 1 },
            utf8("leaf"),
            utf8("()I"),
        ];
        let instructions = vec![
            Instruction { offset: 0, op: Op::Iconst0 },
            Instruction { offset: 1, op: Op::Ireturn },
        ];
        let mut offset_to_index = FnvHashMap::default();
        for (i, instr) in instructions.iter().enumerate() {
            offset_to_index.insert(instr.offset, i);
        }
        let code = InstructionList { instructions, offset_to_index };

        let mut attrs = AttributeCollection::default();
        attrs.collection.insert(
            "Code".to_string(),
            vec![Attribute::Code { max_stack: 1, max_locals: 1, code, exception_table: Vec::new(), attributes: AttributeCollection::default() }],
        );

        ClassFile {
            version: (52, 0),
            constant_pool: ConstantPool { entries },
            access_flags: ClassAccessFlags::ACC_PUBLIC | ClassAccessFlags::ACC_SUPER,
            this_class: 2,
            super_class: 0,
            interfaces: Vec::new(),
            fields: Vec::<FieldInfo>::new(),
            methods: vec![MethodInfo {
                access_flags: MethodAccessFlags::ACC_PUBLIC,
                name_index: 3,
                descriptor_index: 4,
                attributes: attrs,
            }],
            attributes: AttributeCollection::default(),
        }
    }

    #[test]
    fn load_class_registers_klass_and_method() {
        let mut analyser = Analyser::new();
        load_class(&mut analyser, leaf_class_file()).unwrap();

        let klass_id = analyser.get_klass("com/exopteron/Leaf").expect("klass registered");
        assert!(analyser.klass(klass_id).method("leaf()I").is_some());
    }

    #[test]
    fn method_without_code_attribute_is_not_registered() {
        let mut analyser = Analyser::new();
        let mut cf = leaf_class_file();
        cf.methods[0].attributes = AttributeCollection::default();
        load_class(&mut analyser, cf).unwrap();

        let klass_id = analyser.get_klass("com/exopteron/Leaf").unwrap();
        assert!(analyser.klass(klass_id).method("leaf()I").is_none());
        assert_eq!(analyser.all_methods().count(), 0);
    }
}
