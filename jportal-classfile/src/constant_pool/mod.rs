use std::io::Read;

use crate::{
    attribute::{attrtype, Attribute},
    error::{self, ClassFileError},
    file::ClassFile,
    ids::{
        class::ClassName,
        field::FieldDescriptor,
        method::{MethodDescriptor, MethodName, ReturnDescriptor},
        UnqualifiedName,
    },
    stream::{ClassFileItem, ClassFileStream},
};

pub use self::entry::{ConstantPoolEntry, RefKind};

mod entry;

/// The constant pool. Contains all constant pool entries.
///
/// Does not perform index verification upon deserialization.
#[derive(Debug)]
pub struct ConstantPool {
    pub entries: Vec<ConstantPoolEntry>,
}

impl ClassFileItem for ConstantPool {
    fn read_from_stream<R: Read>(s: &mut ClassFileStream<R>, cp: Option<&ConstantPool>) -> error::Result<Self>
    where
        Self: Sized,
    {
        let len = (s.read_u2()? - 1) as usize;
        Ok(Self {
            entries: s.read_sequence::<ConstantPoolEntry>(cp, len)?,
        })
    }
}

#[derive(Debug)]
pub struct IndexVerificationError {
    pub index: usize,
    pub ty: IndexVerificationErrorType,
}

#[derive(Debug)]
pub enum IndexVerificationErrorType {
    ClassNameIndexNotUtf8,
    RefClassIndexNotClass,
    RefNameAndTypeIndexNotNameAndType,
    StringIndexNotUtf8,
    NameAndTypeNameIndexNotUtf8,
    NameAndTypeDescriptorIndexNotUtf8,
    MethodHandleReferenceIndexBadType,
    MethodTypeDescriptorIndexNotUtf8,
    InvokeDynamicNameAndTypeIndexNotNameAndType,
}

macro_rules! verify_index {
    ($index:expr, $e:expr, $err:expr) => {
        if !$e {
            Err(IndexVerificationError {
                index: $index,
                ty: $err,
            })
        } else {
            Ok(())
        }
    };
}

/// Constant pool verification errors.
#[derive(Debug)]
pub enum ConstantPoolVerificationError {
    IndexVerificationError(IndexVerificationError),
    ClassFileError(ClassFileError),
    ClassInfoStructureMalformedClassName,
    RefInfoMalformedClassName,
    FieldRefMalformedFieldDescriptor,
    MethodRefMalformedMethodDescriptor,
    MethodRefInvalidName,
    MethodRefInitReturnNotVoid,
    NameAndTypeNameInvalid,
    NameAndTypeMalformedDescriptor,
    MethodTypeMalformedDescriptor,
    InvokeDynamicInvalidBootstrapMethodsIndex,
    InvokeDynamicNoBootstrapMethodsAttr,
    InvokeDynamicInvalidMethodDescriptor,
    InvokeDynamicInvalidMethodName,
    BootstrapMethodsTooMany,
}

impl ConstantPool {
    /// Get a constant from the pool. Entries are based on 1.
    pub fn get_constant(&self, index: usize) -> &ConstantPoolEntry {
        &self.entries[index - 1]
    }

    pub fn get_utf8_constant(&self, index: usize) -> error::Result<&str> {
        let c = self.get_constant(index);
        if let ConstantPoolEntry::Utf8 { data } = c {
            return Ok(data);
        }
        Err(ClassFileError::ExpectedString)
    }

    /// Verifies that the constant pool is well-formed.
    pub fn verify_structure(&self, class_file: &ClassFile) -> Result<(), ConstantPoolVerificationError> {
        self.verify_cp_index_types()
            .map_err(ConstantPoolVerificationError::IndexVerificationError)?;

        for entry in self.entries.iter() {
            match entry {
                ConstantPoolEntry::Class { name_index } => {
                    let name = self
                        .get_utf8_constant(*name_index as usize)
                        .map_err(ConstantPoolVerificationError::ClassFileError)?;
                    if ClassName::parse_str(name).is_none() && FieldDescriptor::parse_str(name).is_none() {
                        return Err(ConstantPoolVerificationError::ClassInfoStructureMalformedClassName);
                    }
                }
                ConstantPoolEntry::Methodref {
                    class_index,
                    name_and_type_index,
                }
                | ConstantPoolEntry::Fieldref {
                    class_index,
                    name_and_type_index,
                }
                | ConstantPoolEntry::InterfaceMethodref {
                    class_index,
                    name_and_type_index,
                } => {
                    let name = match self.get_constant(*class_index as usize) {
                        ConstantPoolEntry::Class { name_index } => self.get_utf8_constant(*name_index as usize),
                        _ => panic!("we checked types"),
                    }
                    .map_err(ConstantPoolVerificationError::ClassFileError)?;
                    if ClassName::parse_str(name).is_none() {
                        return Err(ConstantPoolVerificationError::RefInfoMalformedClassName);
                    }

                    let (name_index, descriptor_index) = match self.get_constant(*name_and_type_index as usize) {
                        ConstantPoolEntry::NameAndType {
                            name_index,
                            descriptor_index,
                        } => (name_index, descriptor_index),
                        _ => panic!("should be impossible, we verified types"),
                    };

                    if matches!(entry, ConstantPoolEntry::Fieldref { .. }) {
                        let descriptor = self
                            .get_utf8_constant(*descriptor_index as usize)
                            .map_err(ConstantPoolVerificationError::ClassFileError)?;
                        if FieldDescriptor::parse_str(descriptor).is_none() {
                            return Err(ConstantPoolVerificationError::FieldRefMalformedFieldDescriptor);
                        }
                    } else {
                        let descriptor = self
                            .get_utf8_constant(*descriptor_index as usize)
                            .map_err(ConstantPoolVerificationError::ClassFileError)?;
                        let d = match MethodDescriptor::parse_str(descriptor) {
                            Some(d) => d,
                            None => return Err(ConstantPoolVerificationError::MethodRefMalformedMethodDescriptor),
                        };
                        if matches!(entry, ConstantPoolEntry::Methodref { .. }) {
                            let name = self
                                .get_utf8_constant(*name_index as usize)
                                .map_err(ConstantPoolVerificationError::ClassFileError)?;
                            if name.starts_with('<') {
                                if name != "<init>" {
                                    return Err(ConstantPoolVerificationError::MethodRefInvalidName);
                                }
                                if !matches!(d.return_desc, ReturnDescriptor::Void(_)) {
                                    return Err(ConstantPoolVerificationError::MethodRefInitReturnNotVoid);
                                }
                            }
                        }
                    }
                }
                ConstantPoolEntry::NameAndType {
                    name_index,
                    descriptor_index,
                } => {
                    let name = self
                        .get_utf8_constant(*name_index as usize)
                        .map_err(ConstantPoolVerificationError::ClassFileError)?;
                    if UnqualifiedName::new(name).is_none() {
                        return Err(ConstantPoolVerificationError::NameAndTypeNameInvalid);
                    }

                    let descriptor = self
                        .get_utf8_constant(*descriptor_index as usize)
                        .map_err(ConstantPoolVerificationError::ClassFileError)?;
                    if MethodDescriptor::parse_str(descriptor).is_none() && FieldDescriptor::parse_str(descriptor).is_none() {
                        return Err(ConstantPoolVerificationError::NameAndTypeMalformedDescriptor);
                    }
                }
                ConstantPoolEntry::MethodType { descriptor_index } => {
                    let descriptor = self
                        .get_utf8_constant(*descriptor_index as usize)
                        .map_err(ConstantPoolVerificationError::ClassFileError)?;
                    if MethodDescriptor::parse_str(descriptor).is_none() {
                        return Err(ConstantPoolVerificationError::MethodTypeMalformedDescriptor);
                    }
                }
                ConstantPoolEntry::InvokeDynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                } => {
                    let bs_methods = class_file.attributes.get(attrtype::BOOTSTRAP_METHODS);
                    if bs_methods.is_empty() {
                        return Err(ConstantPoolVerificationError::InvokeDynamicNoBootstrapMethodsAttr);
                    }
                    if bs_methods.len() > 1 {
                        return Err(ConstantPoolVerificationError::BootstrapMethodsTooMany);
                    }
                    if let Attribute::BootstrapMethods { bootstrap_methods } = &bs_methods[0] {
                        if *bootstrap_method_attr_index as usize > bootstrap_methods.len() {
                            return Err(ConstantPoolVerificationError::InvokeDynamicInvalidBootstrapMethodsIndex);
                        }
                    }
                    let (name_index, descriptor_index) = match self.get_constant(*name_and_type_index as usize) {
                        ConstantPoolEntry::NameAndType {
                            name_index,
                            descriptor_index,
                        } => (name_index, descriptor_index),
                        _ => panic!("should be impossible, we verified types"),
                    };

                    let descriptor = self
                        .get_utf8_constant(*descriptor_index as usize)
                        .map_err(ConstantPoolVerificationError::ClassFileError)?;
                    if MethodDescriptor::parse_str(descriptor).is_none() {
                        return Err(ConstantPoolVerificationError::InvokeDynamicInvalidMethodDescriptor);
                    }

                    let name = self
                        .get_utf8_constant(*name_index as usize)
                        .map_err(ConstantPoolVerificationError::ClassFileError)?;
                    if MethodName::parse_str(name).is_none() {
                        return Err(ConstantPoolVerificationError::InvokeDynamicInvalidMethodName);
                    }
                }
                _ => (),
            }
        }
        Ok(())
    }

    /// Verify all constant pool index types within this constant pool.
    pub fn verify_cp_index_types(&self) -> Result<(), IndexVerificationError> {
        for (index, entry) in self.entries.iter().enumerate() {
            match entry {
                ConstantPoolEntry::Class { name_index } => verify_index!(
                    index,
                    matches!(self.get_constant(*name_index as usize), ConstantPoolEntry::Utf8 { .. }),
                    IndexVerificationErrorType::ClassNameIndexNotUtf8
                )?,
                ConstantPoolEntry::Fieldref {
                    class_index,
                    name_and_type_index,
                }
                | ConstantPoolEntry::Methodref {
                    class_index,
                    name_and_type_index,
                }
                | ConstantPoolEntry::InterfaceMethodref {
                    class_index,
                    name_and_type_index,
                } => {
                    verify_index!(
                        index,
                        matches!(self.get_constant(*class_index as usize), ConstantPoolEntry::Class { .. }),
                        IndexVerificationErrorType::RefClassIndexNotClass
                    )?;
                    verify_index!(
                        index,
                        matches!(
                            self.get_constant(*name_and_type_index as usize),
                            ConstantPoolEntry::NameAndType { .. }
                        ),
                        IndexVerificationErrorType::RefNameAndTypeIndexNotNameAndType
                    )?;
                }
                ConstantPoolEntry::String { string_index } => verify_index!(
                    index,
                    matches!(self.get_constant(*string_index as usize), ConstantPoolEntry::Utf8 { .. }),
                    IndexVerificationErrorType::StringIndexNotUtf8
                )?,
                ConstantPoolEntry::NameAndType {
                    name_index,
                    descriptor_index,
                } => {
                    verify_index!(
                        index,
                        matches!(self.get_constant(*name_index as usize), ConstantPoolEntry::Utf8 { .. }),
                        IndexVerificationErrorType::NameAndTypeNameIndexNotUtf8
                    )?;
                    verify_index!(
                        index,
                        matches!(self.get_constant(*descriptor_index as usize), ConstantPoolEntry::Utf8 { .. }),
                        IndexVerificationErrorType::NameAndTypeDescriptorIndexNotUtf8
                    )?;
                }
                ConstantPoolEntry::MethodHandle {
                    reference_kind,
                    reference_index,
                } => {
                    let target = self.get_constant(*reference_index as usize);
                    match reference_kind {
                        RefKind::GetField | RefKind::GetStatic | RefKind::PutField | RefKind::PutStatic => {
                            verify_index!(
                                index,
                                matches!(target, ConstantPoolEntry::Fieldref { .. }),
                                IndexVerificationErrorType::MethodHandleReferenceIndexBadType
                            )?;
                        }
                        RefKind::InvokeVirtual | RefKind::NewInvokeSpecial => {
                            verify_index!(
                                index,
                                matches!(target, ConstantPoolEntry::Methodref { .. }),
                                IndexVerificationErrorType::MethodHandleReferenceIndexBadType
                            )?;

                            if matches!(reference_kind, RefKind::NewInvokeSpecial) {
                                if let ConstantPoolEntry::Methodref { name_and_type_index, .. } = target {
                                    if let ConstantPoolEntry::NameAndType { name_index, .. } =
                                        &self.entries[*name_and_type_index as usize - 1]
                                    {
                                        if let ConstantPoolEntry::Utf8 { data } = &self.entries[*name_index as usize - 1] {
                                            if data != "<init>" {
                                                verify_index!(
                                                    index,
                                                    false,
                                                    IndexVerificationErrorType::MethodHandleReferenceIndexBadType
                                                )?;
                                            }
                                        }
                                    }
                                }
                            }
                        }
                        RefKind::InvokeStatic | RefKind::InvokeSpecial => {
                            verify_index!(
                                index,
                                matches!(target, ConstantPoolEntry::Methodref { .. })
                                    || matches!(target, ConstantPoolEntry::InterfaceMethodref { .. }),
                                IndexVerificationErrorType::MethodHandleReferenceIndexBadType
                            )?;
                        }
                        RefKind::InvokeInterface => {
                            verify_index!(
                                index,
                                matches!(target, ConstantPoolEntry::InterfaceMethodref { .. }),
                                IndexVerificationErrorType::MethodHandleReferenceIndexBadType
                            )?;
                        }
                    }
                    match reference_kind {
                        RefKind::InvokeVirtual | RefKind::InvokeStatic | RefKind::InvokeSpecial | RefKind::InvokeInterface => {
                            let info_index = match target {
                                ConstantPoolEntry::Methodref { name_and_type_index, .. } => *name_and_type_index,
                                ConstantPoolEntry::InterfaceMethodref { name_and_type_index, .. } => *name_and_type_index,
                                _ => {
                                    verify_index!(index, false, IndexVerificationErrorType::MethodHandleReferenceIndexBadType)?;
                                    unreachable!()
                                }
                            };

                            if let ConstantPoolEntry::NameAndType { name_index, .. } = &self.entries[info_index as usize - 1] {
                                if let ConstantPoolEntry::Utf8 { data } = &self.entries[*name_index as usize - 1] {
                                    verify_index!(index, data != "<init>", IndexVerificationErrorType::MethodHandleReferenceIndexBadType)?;
                                    verify_index!(index, data != "<clinit>", IndexVerificationErrorType::MethodHandleReferenceIndexBadType)?;
                                }
                            }
                        }
                        _ => (),
                    }
                }
                ConstantPoolEntry::MethodType { descriptor_index } => verify_index!(
                    index,
                    matches!(self.get_constant(*descriptor_index as usize), ConstantPoolEntry::Utf8 { .. }),
                    IndexVerificationErrorType::MethodTypeDescriptorIndexNotUtf8
                )?,
                ConstantPoolEntry::InvokeDynamic {
                    name_and_type_index, ..
                } => verify_index!(
                    index,
                    matches!(
                        self.get_constant(*name_and_type_index as usize),
                        ConstantPoolEntry::NameAndType { .. }
                    ),
                    IndexVerificationErrorType::InvokeDynamicNameAndTypeIndexNotNameAndType
                )?,
                _ => (),
            }
        }
        Ok(())
    }
}
