use std::io::Read;

use crate::{
    error::{self, ClassFileError},
    stream::{ClassFileItem, ClassFileStream},
};

pub use self::refkind::RefKind;

use super::ConstantPool;

/// The tag values for each type of constant pool entry.
mod tags {
    pub const CONSTANT_CLASS: u8 = 7;
    pub const CONSTANT_FIELDREF: u8 = 9;
    pub const CONSTANT_METHODREF: u8 = 10;
    pub const CONSTANT_INTERFACE_METHODREF: u8 = 11;
    pub const CONSTANT_STRING: u8 = 8;
    pub const CONSTANT_INTEGER: u8 = 3;
    pub const CONSTANT_FLOAT: u8 = 4;
    pub const CONSTANT_LONG: u8 = 5;
    pub const CONSTANT_DOUBLE: u8 = 6;
    pub const CONSTANT_NAME_AND_TYPE: u8 = 12;
    pub const CONSTANT_UTF8: u8 = 1;
    pub const CONSTANT_METHOD_HANDLE: u8 = 15;
    pub const CONSTANT_METHOD_TYPE: u8 = 16;
    pub const CONSTANT_INVOKE_DYNAMIC: u8 = 18;
}

/// The possible reference kind values for method handles.
mod refkind {
    use crate::error::{self, ClassFileError};

    const REF_GET_FIELD: u8 = 1;
    const REF_GET_STATIC: u8 = 2;
    const REF_PUT_FIELD: u8 = 3;
    const REF_PUT_STATIC: u8 = 4;
    const REF_INVOKE_VIRTUAL: u8 = 5;
    const REF_INVOKE_STATIC: u8 = 6;
    const REF_INVOKE_SPECIAL: u8 = 7;
    const REF_NEW_INVOKE_SPECIAL: u8 = 8;
    const REF_INVOKE_INTERFACE: u8 = 9;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum RefKind {
        GetField,
        GetStatic,
        PutField,
        PutStatic,
        InvokeVirtual,
        InvokeStatic,
        InvokeSpecial,
        NewInvokeSpecial,
        InvokeInterface,
    }

    impl RefKind {
        pub fn decode(v: u8) -> error::Result<Self> {
            match v {
                REF_GET_FIELD => Ok(Self::GetField),
                REF_GET_STATIC => Ok(Self::GetStatic),
                REF_PUT_FIELD => Ok(Self::PutField),
                REF_PUT_STATIC => Ok(Self::PutStatic),
                REF_INVOKE_VIRTUAL => Ok(Self::InvokeVirtual),
                REF_INVOKE_STATIC => Ok(Self::InvokeStatic),
                REF_INVOKE_SPECIAL => Ok(Self::InvokeSpecial),
                REF_NEW_INVOKE_SPECIAL => Ok(Self::NewInvokeSpecial),
                REF_INVOKE_INTERFACE => Ok(Self::InvokeInterface),
                _ => Err(ClassFileError::UnknownReferenceKind(v)),
            }
        }
    }
}

/// A constant pool entry.
///
/// Deserialization does not perform any index verification; that happens in
/// [`ConstantPool::verify_structure`](super::ConstantPool::verify_structure).
#[derive(Debug, Clone)]
pub enum ConstantPoolEntry {
    Class {
        name_index: u16,
    },
    Fieldref {
        class_index: u16,
        name_and_type_index: u16,
    },
    Methodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    InterfaceMethodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    String {
        string_index: u16,
    },
    Integer {
        bytes: i32,
    },
    Float {
        float: u32,
    },
    Long {
        bytes: i64,
    },
    Double {
        bytes: u64,
    },
    NameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    Utf8 {
        data: String,
    },
    MethodHandle {
        reference_kind: RefKind,
        reference_index: u16,
    },
    MethodType {
        descriptor_index: u16,
    },
    InvokeDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
}

impl ClassFileItem for ConstantPoolEntry {
    fn read_from_stream<R: Read>(s: &mut ClassFileStream<R>, cp: Option<&ConstantPool>) -> error::Result<Self>
    where
        Self: Sized,
    {
        let _ = cp;
        match s.read_u1()? {
            tags::CONSTANT_CLASS => Ok(Self::Class {
                name_index: s.read_u2()?,
            }),
            tags::CONSTANT_FIELDREF => Ok(Self::Fieldref {
                class_index: s.read_u2()?,
                name_and_type_index: s.read_u2()?,
            }),
            tags::CONSTANT_METHODREF => Ok(Self::Methodref {
                class_index: s.read_u2()?,
                name_and_type_index: s.read_u2()?,
            }),
            tags::CONSTANT_INTERFACE_METHODREF => Ok(Self::InterfaceMethodref {
                class_index: s.read_u2()?,
                name_and_type_index: s.read_u2()?,
            }),
            tags::CONSTANT_STRING => Ok(Self::String {
                string_index: s.read_u2()?,
            }),
            tags::CONSTANT_INTEGER => Ok(Self::Integer {
                bytes: s.read_u4()? as i32,
            }),
            tags::CONSTANT_FLOAT => Ok(Self::Float { float: s.read_u4()? }),
            tags::CONSTANT_LONG => Ok(Self::Long {
                bytes: i64::from_be_bytes(s.read::<8>()?),
            }),
            tags::CONSTANT_DOUBLE => Ok(Self::Double {
                bytes: u64::from_be_bytes(s.read::<8>()?),
            }),
            tags::CONSTANT_NAME_AND_TYPE => Ok(Self::NameAndType {
                name_index: s.read_u2()?,
                descriptor_index: s.read_u2()?,
            }),
            tags::CONSTANT_UTF8 => {
                let length = s.read_u2()?;
                let bytes = s.read_dynamic(length as usize)?;
                Ok(Self::Utf8 {
                    data: String::from_utf8(bytes).map_err(ClassFileError::InvalidUTF8Error)?,
                })
            }
            tags::CONSTANT_METHOD_HANDLE => Ok(Self::MethodHandle {
                reference_kind: RefKind::decode(s.read_u1()?)?,
                reference_index: s.read_u2()?,
            }),
            tags::CONSTANT_METHOD_TYPE => Ok(Self::MethodType {
                descriptor_index: s.read_u2()?,
            }),
            tags::CONSTANT_INVOKE_DYNAMIC => Ok(Self::InvokeDynamic {
                bootstrap_method_attr_index: s.read_u2()?,
                name_and_type_index: s.read_u2()?,
            }),
            v => Err(ClassFileError::UnknownConstantPoolTag(v)),
        }
    }
}
