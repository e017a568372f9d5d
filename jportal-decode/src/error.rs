//! The §7 error taxonomy: `BadInput`, `NoMapping`, `Loss`, `Internal`,
//! `Transient`. Per-chunk and per-thread-split tasks catch these at their
//! boundary and convert them into a `switch_out(loss=true)`/skip rather than
//! propagating; only `jportal-cli::main` ever turns an `Err` into a process
//! exit code.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed trace/dump/class input: {0}")]
    BadInput(String),

    #[error("no mapping for address {0:#x}")]
    NoMapping(u64),

    #[error("data loss at offset {offset}: {reason}")]
    Loss { offset: u64, reason: String },

    #[error("internal invariant violated: {0}")]
    Internal(String),

    #[error("transient contention: {0}")]
    Transient(String),

    #[error(transparent)]
    ClassFile(#[from] jportal_classfile::error::ClassFileError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The §7 taxonomy kind this error maps onto, used for log-level
    /// selection and for deciding whether a task should retry.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadInput(_) | Self::ClassFile(_) => ErrorKind::BadInput,
            Self::NoMapping(_) => ErrorKind::NoMapping,
            Self::Loss { .. } => ErrorKind::Loss,
            Self::Internal(_) => ErrorKind::Internal,
            Self::Transient(_) => ErrorKind::Transient,
            Self::Io(_) => ErrorKind::BadInput,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadInput,
    NoMapping,
    Loss,
    Internal,
    Transient,
}

pub type Result<T> = std::result::Result<T, Error>;
