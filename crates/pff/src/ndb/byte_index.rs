//! ## Byte indexes
//!
//! Absolute file offsets, 4 or 8 bytes wide depending on the variant.

use byteorder::{LittleEndian, ReadBytesExt};
use std::{
    fmt::Debug,
    io::{self, Read},
};

pub trait ByteIndex: Sized + Copy + Debug {
    type Index: Copy;

    fn new(index: Self::Index) -> Self;
    fn read(f: &mut dyn Read) -> io::Result<Self>;
    fn from_u64(value: u64) -> Self;
    fn index(&self) -> Self::Index;
    fn into_u64(self) -> u64;
}

#[derive(Clone, Copy, Default, Debug)]
pub struct UnicodeByteIndex(u64);

impl ByteIndex for UnicodeByteIndex {
    type Index = u64;

    fn new(index: u64) -> Self {
        Self(index)
    }

    fn read(f: &mut dyn Read) -> io::Result<Self> {
        let value = f.read_u64::<LittleEndian>()?;
        Ok(Self(value))
    }

    fn from_u64(value: u64) -> Self {
        Self(value)
    }

    fn index(&self) -> u64 {
        self.0
    }

    fn into_u64(self) -> u64 {
        self.0
    }
}

#[derive(Clone, Copy, Default, Debug)]
pub struct AnsiByteIndex(u32);

impl ByteIndex for AnsiByteIndex {
    type Index = u32;

    fn new(index: u32) -> Self {
        Self(index)
    }

    fn read(f: &mut dyn Read) -> io::Result<Self> {
        let value = f.read_u32::<LittleEndian>()?;
        Ok(Self(value))
    }

    fn from_u64(value: u64) -> Self {
        Self(value as u32)
    }

    fn index(&self) -> u32 {
        self.0
    }

    fn into_u64(self) -> u64 {
        u64::from(self.0)
    }
}
