//! Class-file parsing and the static program model (classes, methods, call
//! graph, control-flow graphs) that the trace decoder and matcher are built
//! against.

pub mod analyser;
pub mod attribute;
pub mod block;
pub mod constant_pool;
pub mod error;
pub mod field_info;
pub mod file;
pub mod ids;
pub mod klass;
pub mod loader;
pub mod method;
pub mod method_info;
pub mod opcode;
pub mod stream;

pub use file::ClassFile;
