//! ## Data identifiers
//!
//! Keys into the offsets index. Bit 0x01 marks the referenced bytes as
//! *internal*: structure data (data arrays, sub-node trees) that is stored
//! in plaintext even when the container declares an encryption mode. The
//! bit is masked off before searching the index.

use byteorder::{LittleEndian, ReadBytesExt};
use std::{
    fmt::Debug,
    io::{self, Read},
};

use super::{NdbError, NdbResult};

pub trait BlockId: Sized + Copy + Debug {
    type Index: Copy;

    fn new(is_internal: bool, index: Self::Index) -> NdbResult<Self>;
    fn read(f: &mut dyn Read) -> io::Result<Self>;
    fn from_u64(value: u64) -> Self;
    fn is_internal(&self) -> bool;
    fn index(&self) -> Self::Index;

    /// The raw identifier widened to 64 bits.
    fn into_u64(self) -> u64;

    /// The identifier with the internal bit masked off; this is the value
    /// stored as the offsets-index key.
    fn search_key(self) -> u64 {
        self.into_u64() & !0x1
    }

    /// The 32-bit key the encryption codecs derive their rotor from.
    fn cyclic_key(self) -> u32 {
        self.into_u64() as u32
    }
}

pub const MAX_UNICODE_BLOCK_INDEX: u64 = 1_u64.rotate_right(1) - 1;

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct UnicodeBlockId(u64);

impl BlockId for UnicodeBlockId {
    type Index = u64;

    fn new(is_internal: bool, index: u64) -> NdbResult<Self> {
        let is_internal = if is_internal { 0x1 } else { 0x0 };

        let shifted_index = index.rotate_left(1);
        if shifted_index & 0x1 != 0 {
            return Err(NdbError::InvalidBlockIndex(index));
        };

        Ok(Self(shifted_index | is_internal))
    }

    fn read(f: &mut dyn Read) -> io::Result<Self> {
        let value = f.read_u64::<LittleEndian>()?;
        Ok(Self(value))
    }

    fn from_u64(value: u64) -> Self {
        Self(value)
    }

    fn is_internal(&self) -> bool {
        self.0 & 0x1 == 0x1
    }

    fn index(&self) -> u64 {
        self.0 >> 1
    }

    fn into_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for UnicodeBlockId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<UnicodeBlockId> for u64 {
    fn from(value: UnicodeBlockId) -> Self {
        value.0
    }
}

pub const MAX_ANSI_BLOCK_INDEX: u32 = 1_u32.rotate_right(1) - 1;

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct AnsiBlockId(u32);

impl BlockId for AnsiBlockId {
    type Index = u32;

    fn new(is_internal: bool, index: u32) -> NdbResult<Self> {
        let is_internal = if is_internal { 0x1 } else { 0x0 };

        let shifted_index = index.rotate_left(1);
        if shifted_index & 0x1 != 0 {
            return Err(NdbError::InvalidBlockIndex(u64::from(index)));
        };

        Ok(Self(shifted_index | is_internal))
    }

    fn read(f: &mut dyn Read) -> io::Result<Self> {
        let value = f.read_u32::<LittleEndian>()?;
        Ok(Self(value))
    }

    fn from_u64(value: u64) -> Self {
        Self(value as u32)
    }

    fn is_internal(&self) -> bool {
        self.0 & 0x1 == 0x1
    }

    fn index(&self) -> u32 {
        self.0 >> 1
    }

    fn into_u64(self) -> u64 {
        u64::from(self.0)
    }
}

impl From<u32> for AnsiBlockId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<AnsiBlockId> for u32 {
    fn from(value: AnsiBlockId) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unicode_bid_index_overflow() {
        let Err(NdbError::InvalidBlockIndex(value)) =
            UnicodeBlockId::new(false, MAX_UNICODE_BLOCK_INDEX + 1)
        else {
            panic!("UnicodeBlockId should be out of range");
        };
        assert_eq!(value, MAX_UNICODE_BLOCK_INDEX + 1);
    }

    #[test]
    fn test_ansi_bid_index_overflow() {
        let Err(NdbError::InvalidBlockIndex(value)) =
            AnsiBlockId::new(false, MAX_ANSI_BLOCK_INDEX + 1)
        else {
            panic!("AnsiBlockId should be out of range");
        };
        assert_eq!(value, u64::from(MAX_ANSI_BLOCK_INDEX) + 1);
    }

    #[test]
    fn test_internal_bit_is_masked_from_search_key() {
        let internal = UnicodeBlockId::new(true, 0x40).unwrap();
        let external = UnicodeBlockId::new(false, 0x40).unwrap();
        assert!(internal.is_internal());
        assert!(!external.is_internal());
        assert_eq!(internal.search_key(), external.search_key());
        assert_ne!(internal.into_u64(), external.into_u64());
    }
}
