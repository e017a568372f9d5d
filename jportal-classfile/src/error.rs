use std::string::FromUtf8Error;

/// An error which can occur while deserializing or verifying a class file.
#[derive(Debug)]
pub enum ClassFileError {
    /// A generic I/O error.
    IoError(std::io::Error),

    /// Returned when a class file has a bad magic number.
    BadMagicNumber(u32),

    /// Returned when an unknown constant pool tag is found.
    UnknownConstantPoolTag(u8),

    /// Returned when invalid UTF-8 is found.
    InvalidUTF8Error(FromUtf8Error),

    /// Returned when an unknown reference kind is found.
    UnknownReferenceKind(u8),

    /// Returned when bad class access flags are found.
    BadClassAccessFlags,

    /// Returned when bad field access flags are found.
    BadFieldAccessFlags,

    /// Returned when bad method access flags are found.
    BadMethodAccessFlags,

    /// Returned when a string constant was expected.
    ExpectedString,

    /// Returned when an unexpected constant pool entry kind is found.
    WrongConstantType,

    /// Returned when an unknown attribute is found (carried for completeness;
    /// unrecognized attributes are otherwise skipped by length).
    UnknownAttribute(String),

    /// Returned when an unknown opcode is found.
    UnknownOpcodeError(u8),

    /// Returned when an unknown stack map frame tag is found.
    UnknownStackMapFrameTag(u8),

    /// Returned when an unknown verification type info tag is found.
    UnknownVerificationTypeInfo(u8),

    /// Returned when a descriptor or name string fails to parse.
    BadDescriptor(String),

    /// Returned when a branch or switch target falls outside the method's code.
    BranchTargetOutOfBounds,

    /// Returned when a `tableswitch`'s `low` is greater than its `high`.
    TableSwitchLowGtHigh,

    /// Returned when a `wide`-prefixed opcode is not one of the widenable forms.
    BadWideOp,

    /// Arithmetic overflow/underflow while computing an offset or length.
    ArithmeticError,
}

impl std::fmt::Display for ClassFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(e) => write!(f, "i/o error: {e}"),
            Self::BadMagicNumber(v) => write!(f, "bad magic number: {v:#x}"),
            Self::UnknownConstantPoolTag(v) => write!(f, "unknown constant pool tag: {v}"),
            Self::InvalidUTF8Error(e) => write!(f, "invalid utf-8: {e}"),
            Self::UnknownReferenceKind(v) => write!(f, "unknown method handle reference kind: {v}"),
            Self::BadClassAccessFlags => write!(f, "bad class access flags"),
            Self::BadFieldAccessFlags => write!(f, "bad field access flags"),
            Self::BadMethodAccessFlags => write!(f, "bad method access flags"),
            Self::ExpectedString => write!(f, "expected a UTF-8 constant pool entry"),
            Self::WrongConstantType => write!(f, "wrong constant pool entry type"),
            Self::UnknownAttribute(name) => write!(f, "unknown attribute: {name}"),
            Self::UnknownOpcodeError(v) => write!(f, "unknown opcode: {v:#x}"),
            Self::UnknownStackMapFrameTag(v) => write!(f, "unknown stack map frame tag: {v}"),
            Self::UnknownVerificationTypeInfo(v) => write!(f, "unknown verification type info tag: {v}"),
            Self::BadDescriptor(s) => write!(f, "bad descriptor: {s}"),
            Self::BranchTargetOutOfBounds => write!(f, "branch target out of bounds"),
            Self::TableSwitchLowGtHigh => write!(f, "tableswitch low > high"),
            Self::BadWideOp => write!(f, "bad opcode inside wide prefix"),
            Self::ArithmeticError => write!(f, "arithmetic overflow decoding class file"),
        }
    }
}

impl std::error::Error for ClassFileError {}

pub type Result<T> = std::result::Result<T, ClassFileError>;
