//! The matcher reuses the decode side's §7 error taxonomy rather than
//! minting its own — there's nothing about scoring candidates against a
//! `TraceData` that needs a new error kind.

pub use jportal_decode::error::{Error, ErrorKind, Result};
