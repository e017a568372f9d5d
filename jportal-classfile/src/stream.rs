use std::io::Read;

use crate::{
    constant_pool::ConstantPool,
    error::{self, ClassFileError},
};

/// A component of a class file, readable off a [`ClassFileStream`].
pub trait ClassFileItem {
    fn read_from_stream<R: Read>(s: &mut ClassFileStream<R>, cp: Option<&ConstantPool>) -> error::Result<Self>
    where
        Self: Sized;
}

/// A utility wrapper to allow easily reading class file types from a [Reader](std::io::Read).
///
/// Tracks the number of bytes consumed so far (`.1`), which the opcode
/// decoder needs to compute `tableswitch`/`lookupswitch` padding.
pub struct ClassFileStream<'a, R: Read>(pub &'a mut R, pub usize);

impl<'a, R: Read> ClassFileStream<'a, R> {
    pub fn new(r: &'a mut R) -> Self {
        Self(r, 0)
    }

    /// Read a sequence of `length` `T`s from this stream.
    pub fn read_sequence<T: ClassFileItem>(
        &mut self,
        constant_pool: Option<&ConstantPool>,
        length: usize,
    ) -> error::Result<Vec<T>> {
        let mut v = Vec::with_capacity(length);
        for _ in 0..length {
            v.push(T::read_from_stream(self, constant_pool)?);
        }
        Ok(v)
    }

    pub fn read_u4(&mut self) -> error::Result<u32> {
        Ok(u32::from_be_bytes(self.read::<4>()?))
    }

    pub fn read_u2(&mut self) -> error::Result<u16> {
        Ok(u16::from_be_bytes(self.read::<2>()?))
    }

    pub fn read_u1(&mut self) -> error::Result<u8> {
        Ok(self.read::<1>()?[0])
    }

    /// Read `S` bytes from the stream.
    pub fn read<const S: usize>(&mut self) -> error::Result<[u8; S]> {
        let mut w = [0; S];
        self.0.read_exact(&mut w).map_err(ClassFileError::IoError)?;
        self.1 += S;
        Ok(w)
    }

    /// Read a runtime-length byte sequence from the stream.
    pub fn read_dynamic(&mut self, l: usize) -> error::Result<Vec<u8>> {
        let mut w = vec![0; l];
        self.0.read_exact(&mut w).map_err(ClassFileError::IoError)?;
        self.1 += l;
        Ok(w)
    }

    /// Current byte offset since this stream was constructed.
    pub fn position(&self) -> usize {
        self.1
    }
}

impl ClassFileItem for u8 {
    fn read_from_stream<R: Read>(s: &mut ClassFileStream<R>, _cp: Option<&ConstantPool>) -> error::Result<Self> {
        s.read_u1()
    }
}

impl ClassFileItem for u16 {
    fn read_from_stream<R: Read>(s: &mut ClassFileStream<R>, _cp: Option<&ConstantPool>) -> error::Result<Self> {
        s.read_u2()
    }
}

impl ClassFileItem for i16 {
    fn read_from_stream<R: Read>(s: &mut ClassFileStream<R>, _cp: Option<&ConstantPool>) -> error::Result<Self> {
        Ok(s.read_u2()? as i16)
    }
}

impl ClassFileItem for u32 {
    fn read_from_stream<R: Read>(s: &mut ClassFileStream<R>, _cp: Option<&ConstantPool>) -> error::Result<Self> {
        s.read_u4()
    }
}
