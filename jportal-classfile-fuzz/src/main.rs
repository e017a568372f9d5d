use std::io::Cursor;

use afl::fuzz;
use jportal_classfile::{file::ClassFile, stream::ClassFileStream, stream::ClassFileItem};

fn main() {
    fuzz!(|data: &[u8]| {
        if let Ok(v) = ClassFile::read_from_stream(&mut ClassFileStream::new(&mut Cursor::new(data)), None) {
            let _ = v.constant_pool.verify_cp_index_types();
            let _ = v.constant_pool.verify_structure(&v);
        }
    });
}
