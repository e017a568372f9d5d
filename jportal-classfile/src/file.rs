use std::io::Read;

use crate::{
    attribute::AttributeCollection,
    error::{self, ClassFileError},
    field_info::FieldInfo,
    method_info::MethodInfo,
    stream::{ClassFileItem, ClassFileStream},
};

pub use crate::constant_pool::ConstantPool;

/// The magic number every class file starts with.
pub const CLASS_MAGIC: u32 = 0xCAFEBABE;

bitflags::bitflags! {
    pub struct ClassAccessFlags: u16 {
        const ACC_PUBLIC = 0x0001;
        const ACC_FINAL = 0x0010;
        const ACC_SUPER = 0x0020;
        const ACC_INTERFACE = 0x0200;
        const ACC_ABSTRACT = 0x0400;
        const ACC_SYNTHETIC = 0x1000;
        const ACC_ANNOTATION = 0x2000;
        const ACC_ENUM = 0x4000;
    }
}

/// A fully-read `.class` file, as produced by `ClassFile::read_from_stream`.
#[derive(Debug)]
pub struct ClassFile {
    /// (major, minor).
    pub version: (u16, u16),
    pub constant_pool: ConstantPool,
    pub access_flags: ClassAccessFlags,
    /// Index of this class's own `CONSTANT_Class_info` in the constant pool.
    pub this_class: u16,
    /// Index of the superclass's `CONSTANT_Class_info`, or 0 for `java.lang.Object`.
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub attributes: AttributeCollection,
}

impl ClassFileItem for ClassFile {
    fn read_from_stream<R: Read>(s: &mut ClassFileStream<R>, _cp: Option<&ConstantPool>) -> error::Result<Self>
    where
        Self: Sized,
    {
        let magic = s.read_u4()?;
        if magic != CLASS_MAGIC {
            return Err(ClassFileError::BadMagicNumber(magic));
        }

        let minor_version = s.read_u2()?;
        let major_version = s.read_u2()?;

        let constant_pool = ConstantPool::read_from_stream(s, None)?;

        let access_flags = ClassAccessFlags::from_bits(s.read_u2()?).ok_or(ClassFileError::BadClassAccessFlags)?;

        let this_class = s.read_u2()?;
        let super_class = s.read_u2()?;

        let interfaces_count = s.read_u2()?;
        let interfaces = s.read_sequence::<u16>(Some(&constant_pool), interfaces_count as usize)?;

        let fields_count = s.read_u2()?;
        let fields = s.read_sequence(Some(&constant_pool), fields_count as usize)?;

        let methods_count = s.read_u2()?;
        let methods = s.read_sequence(Some(&constant_pool), methods_count as usize)?;

        let attributes = AttributeCollection::read_from_stream(s, Some(&constant_pool))?;

        Ok(Self {
            version: (major_version, minor_version),
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }
}

impl ClassFile {
    /// The class name this file declares, resolved through `this_class`.
    pub fn class_name(&self) -> error::Result<&str> {
        match self.constant_pool.get_constant(self.this_class as usize) {
            crate::constant_pool::ConstantPoolEntry::Class { name_index } => {
                self.constant_pool.get_utf8_constant(*name_index as usize)
            }
            _ => Err(ClassFileError::WrongConstantType),
        }
    }

    /// The superclass name, or `None` for `java.lang.Object`.
    pub fn super_class_name(&self) -> error::Result<Option<&str>> {
        if self.super_class == 0 {
            return Ok(None);
        }
        match self.constant_pool.get_constant(self.super_class as usize) {
            crate::constant_pool::ConstantPoolEntry::Class { name_index } => {
                self.constant_pool.get_utf8_constant(*name_index as usize).map(Some)
            }
            _ => Err(ClassFileError::WrongConstantType),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_magic() {
        let bytes = [0u8, 0, 0, 0];
        let mut cursor = std::io::Cursor::new(&bytes[..]);
        let mut s = ClassFileStream::new(&mut cursor);
        let err = ClassFile::read_from_stream(&mut s, None).unwrap_err();
        assert!(matches!(err, ClassFileError::BadMagicNumber(0)));
    }
}
