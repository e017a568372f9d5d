use std::io::Read;

use crate::{
    attribute::AttributeCollection,
    error::{self, ClassFileError},
    stream::{ClassFileItem, ClassFileStream},
};

use super::constant_pool::ConstantPool;

bitflags::bitflags! {
    pub struct MethodAccessFlags: u16 {
        const ACC_PUBLIC = 0x0001;
        const ACC_PRIVATE = 0x0002;
        const ACC_PROTECTED = 0x0004;
        const ACC_STATIC = 0x0008;
        const ACC_FINAL = 0x0010;
        const ACC_SYNCHRONIZED = 0x0020;
        const ACC_BRIDGE = 0x0040;
        const ACC_VARARGS = 0x0080;
        const ACC_NATIVE = 0x0100;
        const ACC_ABSTRACT = 0x0400;
        const ACC_STRICT = 0x0800;
        const ACC_SYNTHETIC = 0x1000;
    }
}

/// A `method_info` structure: one declared method of a class or interface.
///
/// `ACC_NATIVE`/`ACC_ABSTRACT` methods carry no `Code` attribute; their
/// block graph is never built and they never appear as a trace-matchable
/// method (they have no bytecode to match against).
#[derive(Debug)]
pub struct MethodInfo {
    pub access_flags: MethodAccessFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: AttributeCollection,
}

impl ClassFileItem for MethodInfo {
    fn read_from_stream<R: Read>(s: &mut ClassFileStream<R>, cp: Option<&ConstantPool>) -> error::Result<Self>
    where
        Self: Sized,
    {
        let access_flags = MethodAccessFlags::from_bits(s.read_u2()?).ok_or(ClassFileError::BadMethodAccessFlags)?;
        let name_index = s.read_u2()?;
        let descriptor_index = s.read_u2()?;
        Ok(Self {
            access_flags,
            name_index,
            descriptor_index,
            attributes: AttributeCollection::read_from_stream(s, cp)?,
        })
    }
}
