use std::{
    collections::HashMap,
    io::{Cursor, Read},
    ops::RangeInclusive,
};

use crate::{
    constant_pool::ConstantPool,
    error::{self, ClassFileError},
    opcode::InstructionList,
    stream::{ClassFileItem, ClassFileStream},
};

/// Verification type items, used inside `StackMapTable` entries.
mod verification {
    use std::io::Read;

    use crate::{
        constant_pool::ConstantPool,
        error::{self, ClassFileError},
        stream::{ClassFileItem, ClassFileStream},
    };

    const ITEM_TOP: u8 = 0;
    const ITEM_INTEGER: u8 = 1;
    const ITEM_FLOAT: u8 = 2;
    const ITEM_DOUBLE: u8 = 3;
    const ITEM_LONG: u8 = 4;
    const ITEM_NULL: u8 = 5;
    const ITEM_UNINITIALIZED_THIS: u8 = 6;
    const ITEM_OBJECT: u8 = 7;
    const ITEM_UNINITIALIZED: u8 = 8;

    #[derive(Debug, Clone)]
    pub enum VerificationTypeInfo {
        Top,
        Integer,
        Float,
        Double,
        Long,
        Null,
        UninitializedThis,
        Object { cpool_index: u16 },
        Uninitialized { offset: u16 },
    }

    impl ClassFileItem for VerificationTypeInfo {
        fn read_from_stream<R: Read>(s: &mut ClassFileStream<R>, cp: Option<&ConstantPool>) -> error::Result<Self>
        where
            Self: Sized,
        {
            let _ = cp;
            match s.read_u1()? {
                ITEM_TOP => Ok(Self::Top),
                ITEM_INTEGER => Ok(Self::Integer),
                ITEM_FLOAT => Ok(Self::Float),
                ITEM_LONG => Ok(Self::Long),
                ITEM_DOUBLE => Ok(Self::Double),
                ITEM_NULL => Ok(Self::Null),
                ITEM_UNINITIALIZED_THIS => Ok(Self::UninitializedThis),
                ITEM_OBJECT => Ok(Self::Object {
                    cpool_index: s.read_u2()?,
                }),
                ITEM_UNINITIALIZED => Ok(Self::Uninitialized { offset: s.read_u2()? }),
                v => Err(ClassFileError::UnknownVerificationTypeInfo(v)),
            }
        }
    }
}

/// Stack map frame items.
mod stackmap {
    use std::io::Read;

    use crate::{
        constant_pool::ConstantPool,
        error::{self, ClassFileError},
        stream::{ClassFileItem, ClassFileStream},
    };

    use super::verification::VerificationTypeInfo;

    const SAME: Range<u8> = 0..63;
    const SAME_LOCALS_1_STACK_ITEM: Range<u8> = 64..127;
    const SAME_LOCALS_1_STACK_ITEM_EXTENDED: u8 = 247;
    const CHOP: Range<u8> = 248..250;
    const SAME_FRAME_EXTENDED: u8 = 251;
    const APPEND: Range<u8> = 252..254;
    const FULL_FRAME: u8 = 255;

    use std::ops::Range;

    #[derive(Debug, Clone)]
    pub enum StackMapFrame {
        SameFrame,
        SameLocals1StackItemFrame { stack: VerificationTypeInfo },
        SameLocals1StackItemFrameExtended { offset_delta: u16, stack: VerificationTypeInfo },
        ChopFrame { offset_delta: u16 },
        SameFrameExtended { offset_delta: u16 },
        AppendFrame { offset_delta: u16, locals: Vec<VerificationTypeInfo> },
        FullFrame {
            offset_delta: u16,
            locals: Vec<VerificationTypeInfo>,
            stack: Vec<VerificationTypeInfo>,
        },
    }

    impl ClassFileItem for StackMapFrame {
        fn read_from_stream<R: Read>(s: &mut ClassFileStream<R>, cp: Option<&ConstantPool>) -> error::Result<Self>
        where
            Self: Sized,
        {
            match s.read_u1()? {
                v if SAME.contains(&v) => Ok(Self::SameFrame),
                v if SAME_LOCALS_1_STACK_ITEM.contains(&v) => Ok(Self::SameLocals1StackItemFrame {
                    stack: VerificationTypeInfo::read_from_stream(s, cp)?,
                }),
                SAME_LOCALS_1_STACK_ITEM_EXTENDED => Ok(Self::SameLocals1StackItemFrameExtended {
                    offset_delta: s.read_u2()?,
                    stack: VerificationTypeInfo::read_from_stream(s, cp)?,
                }),
                v if CHOP.contains(&v) => Ok(Self::ChopFrame {
                    offset_delta: s.read_u2()?,
                }),
                SAME_FRAME_EXTENDED => Ok(Self::SameFrameExtended {
                    offset_delta: s.read_u2()?,
                }),
                v if APPEND.contains(&v) => Ok(Self::AppendFrame {
                    offset_delta: s.read_u2()?,
                    locals: s.read_sequence(cp, (v as usize) - 251)?,
                }),
                FULL_FRAME => {
                    let offset_delta = s.read_u2()?;
                    let number_of_locals = s.read_u2()?;
                    let locals = s.read_sequence(cp, number_of_locals as usize)?;
                    let number_of_stack_items = s.read_u2()?;
                    let stack = s.read_sequence(cp, number_of_stack_items as usize)?;
                    Ok(Self::FullFrame {
                        offset_delta,
                        locals,
                        stack,
                    })
                }
                v => Err(ClassFileError::UnknownStackMapFrameTag(v)),
            }
        }
    }
}

pub use stackmap::StackMapFrame;
pub use verification::VerificationTypeInfo;

/// Attribute name constants recognized by [`Attribute::read_from_stream`].
pub mod attrtype {
    pub const CODE: &str = "Code";
    pub const STACK_MAP_TABLE: &str = "StackMapTable";
    pub const EXCEPTIONS: &str = "Exceptions";
    pub const BOOTSTRAP_METHODS: &str = "BootstrapMethods";
    pub const SOURCE_FILE: &str = "SourceFile";
    pub const LINE_NUMBER_TABLE: &str = "LineNumberTable";
    pub const CONSTANT_VALUE: &str = "ConstantValue";
    pub const SYNTHETIC: &str = "Synthetic";
    pub const DEPRECATED: &str = "Deprecated";
}

/// An attribute attached to a `ClassFile`, `field_info`, `method_info`, or
/// `Code` structure.
///
/// This only covers the attributes the matcher and decoder actually read:
/// bytecode, exception handlers, line numbers, bootstrap methods, and the
/// source file name. Annotation and debug-signature attributes are parsed
/// by neither the original decoder nor this one, so their bytes are simply
/// skipped over as unrecognized attribute data would be.
#[derive(Debug, Clone)]
pub enum Attribute {
    ConstantValue {
        constantvalue_index: u16,
    },
    Code {
        max_stack: u16,
        max_locals: u16,
        code: InstructionList,
        exception_table: Vec<ExceptionTableEntry>,
        attributes: AttributeCollection,
    },
    StackMapTable {
        entries: Vec<StackMapFrame>,
    },
    Exceptions {
        exception_index_table: Vec<u16>,
    },
    BootstrapMethods {
        bootstrap_methods: Vec<BootstrapMethodsElement>,
    },
    SourceFile {
        sourcefile_index: u16,
    },
    LineNumberTable {
        line_number_table: Vec<LineNumberTableEntry>,
    },
    Synthetic,
    Deprecated,
    /// An attribute this crate does not model; its raw bytes are kept so
    /// round-tripping and size accounting stay correct.
    Unknown {
        name: String,
        data: Vec<u8>,
    },
}

/// All attributes attached to one structure, keyed by name (a structure may
/// repeat an attribute, e.g. multiple `LineNumberTable`s).
#[derive(Debug, Clone, Default)]
pub struct AttributeCollection {
    pub collection: HashMap<String, Vec<Attribute>>,
}

impl AttributeCollection {
    fn insert(&mut self, k: String, v: Attribute) {
        self.collection.entry(k).or_default().push(v);
    }

    pub fn get(&self, k: &str) -> &[Attribute] {
        self.collection.get(k).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn take(&mut self, k: &str) -> Vec<Attribute> {
        self.collection.remove(k).unwrap_or_default()
    }
}

impl ClassFileItem for AttributeCollection {
    fn read_from_stream<R: Read>(s: &mut ClassFileStream<R>, cp: Option<&ConstantPool>) -> error::Result<Self>
    where
        Self: Sized,
    {
        let attributes_count = s.read_u2()?;
        let mut attributes = Self::default();
        for _ in 0..attributes_count {
            let cp = cp.expect("constant pool should exist at the time of attribute deserialization");
            let attribute_name_index = s.read_u2()?;
            let attribute_length = s.read_u4()?;
            let mut info = Cursor::new(s.read_dynamic(attribute_length as usize)?);
            let mut s = ClassFileStream::new(&mut info);
            let attribute_name = cp.get_utf8_constant(attribute_name_index as usize)?.to_string();

            let a = match attribute_name.as_str() {
                attrtype::CONSTANT_VALUE => Attribute::ConstantValue {
                    constantvalue_index: s.read_u2()?,
                },
                attrtype::CODE => {
                    let max_stack = s.read_u2()?;
                    let max_locals = s.read_u2()?;
                    let code_length = s.read_u4()?;
                    let code = s.read_dynamic(code_length as usize)?;
                    let exception_table_length = s.read_u2()?;
                    let exception_table =
                        s.read_sequence::<ExceptionTableEntry>(Some(cp), exception_table_length as usize)?;
                    let attributes = AttributeCollection::read_from_stream(&mut s, Some(cp))?;
                    let code = InstructionList::read_from_stream(&mut ClassFileStream::new(&mut Cursor::new(code)), Some(cp))?;
                    Attribute::Code {
                        max_stack,
                        max_locals,
                        code,
                        exception_table,
                        attributes,
                    }
                }
                attrtype::STACK_MAP_TABLE => {
                    let number_of_entries = s.read_u2()?;
                    Attribute::StackMapTable {
                        entries: s.read_sequence(Some(cp), number_of_entries as usize)?,
                    }
                }
                attrtype::EXCEPTIONS => {
                    let number_of_exceptions = s.read_u2()?;
                    Attribute::Exceptions {
                        exception_index_table: s.read_sequence(Some(cp), number_of_exceptions as usize)?,
                    }
                }
                attrtype::BOOTSTRAP_METHODS => {
                    let num_bootstrap_methods = s.read_u2()?;
                    Attribute::BootstrapMethods {
                        bootstrap_methods: s.read_sequence(Some(cp), num_bootstrap_methods as usize)?,
                    }
                }
                attrtype::SOURCE_FILE => Attribute::SourceFile {
                    sourcefile_index: s.read_u2()?,
                },
                attrtype::LINE_NUMBER_TABLE => {
                    let line_number_table_length = s.read_u2()?;
                    Attribute::LineNumberTable {
                        line_number_table: s.read_sequence(Some(cp), line_number_table_length as usize)?,
                    }
                }
                attrtype::SYNTHETIC => Attribute::Synthetic,
                attrtype::DEPRECATED => Attribute::Deprecated,
                _ => Attribute::Unknown {
                    name: attribute_name.clone(),
                    data: s.read_dynamic(attribute_length as usize).unwrap_or_default(),
                },
            };
            attributes.insert(attribute_name, a);
        }
        Ok(attributes)
    }
}

/// An entry in the `exception_table` array of a `Code` attribute.
#[derive(Debug, Clone)]
pub struct ExceptionTableEntry {
    /// `[start_pc, end_pc)`, the range of the code array this handler is active over.
    pub pc_range: RangeInclusive<u16>,
    pub handler_pc: u16,
    /// Index into the constant pool of the caught exception's class, or 0 for `finally`.
    pub catch_type: u16,
}

impl ClassFileItem for ExceptionTableEntry {
    fn read_from_stream<R: Read>(s: &mut ClassFileStream<R>, _cp: Option<&ConstantPool>) -> error::Result<Self>
    where
        Self: Sized,
    {
        Ok(Self {
            pc_range: s.read_u2()?..=s.read_u2()?,
            handler_pc: s.read_u2()?,
            catch_type: s.read_u2()?,
        })
    }
}

/// An entry in the `line_number_table` array of a `LineNumberTable` attribute.
#[derive(Debug, Clone, Copy)]
pub struct LineNumberTableEntry {
    pub start_pc: u16,
    pub line_number: u16,
}

impl ClassFileItem for LineNumberTableEntry {
    fn read_from_stream<R: Read>(s: &mut ClassFileStream<R>, _cp: Option<&ConstantPool>) -> error::Result<Self>
    where
        Self: Sized,
    {
        Ok(Self {
            start_pc: s.read_u2()?,
            line_number: s.read_u2()?,
        })
    }
}

/// An entry in the `bootstrap_methods` table of a `BootstrapMethods` attribute.
#[derive(Debug, Clone)]
pub struct BootstrapMethodsElement {
    pub bootstrap_method_ref: u16,
    pub bootstrap_arguments: Vec<u16>,
}

impl ClassFileItem for BootstrapMethodsElement {
    fn read_from_stream<R: Read>(s: &mut ClassFileStream<R>, cp: Option<&ConstantPool>) -> error::Result<Self>
    where
        Self: Sized,
    {
        let bootstrap_method_ref = s.read_u2()?;
        let num_bootstrap_arguments = s.read_u2()?;
        Ok(Self {
            bootstrap_method_ref,
            bootstrap_arguments: s.read_sequence(cp, num_bootstrap_arguments as usize)?,
        })
    }
}
