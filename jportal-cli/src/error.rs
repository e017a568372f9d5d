//! Top-level error type. Only argument parsing and initial file-open
//! failures (§7) ever turn one of these into a process exit code; per-chunk
//! and per-split failures are caught and logged inside the decode/match
//! tasks themselves.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed configuration: {0}")]
    BadConfig(String),

    #[error(transparent)]
    ClassFile(#[from] jportal_classfile::error::ClassFileError),

    #[error(transparent)]
    Decode(#[from] jportal_decode::error::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;
