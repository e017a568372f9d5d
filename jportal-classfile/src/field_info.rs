use std::io::Read;

use crate::{
    attribute::AttributeCollection,
    error::{self, ClassFileError},
    stream::{ClassFileItem, ClassFileStream},
};

use super::constant_pool::ConstantPool;

bitflags::bitflags! {
    pub struct FieldAccessFlags: u16 {
        const ACC_PUBLIC = 0x0001;
        const ACC_PRIVATE = 0x0002;
        const ACC_PROTECTED = 0x0004;
        const ACC_STATIC = 0x0008;
        const ACC_FINAL = 0x0010;
        const ACC_VOLATILE = 0x0040;
        const ACC_TRANSIENT = 0x0080;
        const ACC_SYNTHETIC = 0x1000;
        const ACC_ENUM = 0x4000;
    }
}

/// A `field_info` structure: one declared field of a class or interface.
#[derive(Debug)]
pub struct FieldInfo {
    pub access_flags: FieldAccessFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: AttributeCollection,
}

impl ClassFileItem for FieldInfo {
    fn read_from_stream<R: Read>(s: &mut ClassFileStream<R>, cp: Option<&ConstantPool>) -> error::Result<Self>
    where
        Self: Sized,
    {
        let access_flags = FieldAccessFlags::from_bits(s.read_u2()?).ok_or(ClassFileError::BadFieldAccessFlags)?;
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
