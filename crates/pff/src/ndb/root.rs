//! ## Root structure
//!
//! The slice of the header that anchors everything else: the container size,
//! the allocation-map state, and the references to the root pages of the
//! descriptors and offsets indexes.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Read};

use super::{block_ref::*, byte_index::*, NdbError};

/// `fAMapValid`
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
pub enum AmapStatus {
    /// One or more allocation maps are invalid; recovery must not trust
    /// them.
    #[default]
    Invalid = 0x00,
    /// Deprecated valid marker.
    Valid1 = 0x01,
    /// The allocation maps are valid.
    Valid2 = 0x02,
}

impl TryFrom<u8> for AmapStatus {
    type Error = NdbError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(AmapStatus::Invalid),
            0x01 => Ok(AmapStatus::Valid1),
            0x02 => Ok(AmapStatus::Valid2),
            _ => Err(NdbError::InvalidAmapStatus(value)),
        }
    }
}

impl From<AmapStatus> for bool {
    fn from(status: AmapStatus) -> bool {
        status != AmapStatus::Invalid
    }
}

pub trait Root: Sized {
    type Index: ByteIndex;
    type BTreeRef: BlockRef;

    fn new(
        file_eof_index: Self::Index,
        amap_last_index: Self::Index,
        amap_free_size: Self::Index,
        pmap_free_size: Self::Index,
        descriptors_index: Self::BTreeRef,
        offsets_index: Self::BTreeRef,
        amap_is_valid: AmapStatus,
    ) -> Self;

    fn file_eof_index(&self) -> &Self::Index;
    fn amap_last_index(&self) -> &Self::Index;
    fn amap_free_size(&self) -> &Self::Index;
    fn pmap_free_size(&self) -> &Self::Index;
    fn descriptors_index(&self) -> &Self::BTreeRef;
    fn offsets_index(&self) -> &Self::BTreeRef;
    fn amap_is_valid(&self) -> AmapStatus;

    fn read(f: &mut dyn Read) -> io::Result<Self> {
        // dwReserved
        let _ = f.read_u32::<LittleEndian>()?;
        let file_eof_index = Self::Index::read(f)?;
        let amap_last_index = Self::Index::read(f)?;
        let amap_free_size = Self::Index::read(f)?;
        let pmap_free_size = Self::Index::read(f)?;
        let descriptors_index = Self::BTreeRef::read(f)?;
        let offsets_index = Self::BTreeRef::read(f)?;
        let amap_is_valid = AmapStatus::try_from(f.read_u8()?).unwrap_or(AmapStatus::Invalid);
        // bReserved
        let _ = f.read_u8()?;
        // wReserved
        let _ = f.read_u16::<LittleEndian>()?;

        Ok(Self::new(
            file_eof_index,
            amap_last_index,
            amap_free_size,
            pmap_free_size,
            descriptors_index,
            offsets_index,
            amap_is_valid,
        ))
    }
}

pub struct UnicodeRoot {
    file_eof_index: UnicodeByteIndex,
    amap_last_index: UnicodeByteIndex,
    amap_free_size: UnicodeByteIndex,
    pmap_free_size: UnicodeByteIndex,
    descriptors_index: UnicodeBlockRef,
    offsets_index: UnicodeBlockRef,
    amap_is_valid: AmapStatus,
}

impl Root for UnicodeRoot {
    type Index = UnicodeByteIndex;
    type BTreeRef = UnicodeBlockRef;

    fn new(
        file_eof_index: UnicodeByteIndex,
        amap_last_index: UnicodeByteIndex,
        amap_free_size: UnicodeByteIndex,
        pmap_free_size: UnicodeByteIndex,
        descriptors_index: UnicodeBlockRef,
        offsets_index: UnicodeBlockRef,
        amap_is_valid: AmapStatus,
    ) -> Self {
        Self {
            file_eof_index,
            amap_last_index,
            amap_free_size,
            pmap_free_size,
            descriptors_index,
            offsets_index,
            amap_is_valid,
        }
    }

    fn file_eof_index(&self) -> &UnicodeByteIndex {
        &self.file_eof_index
    }

    fn amap_last_index(&self) -> &UnicodeByteIndex {
        &self.amap_last_index
    }

    fn amap_free_size(&self) -> &UnicodeByteIndex {
        &self.amap_free_size
    }

    fn pmap_free_size(&self) -> &UnicodeByteIndex {
        &self.pmap_free_size
    }

    fn descriptors_index(&self) -> &UnicodeBlockRef {
        &self.descriptors_index
    }

    fn offsets_index(&self) -> &UnicodeBlockRef {
        &self.offsets_index
    }

    fn amap_is_valid(&self) -> AmapStatus {
        self.amap_is_valid
    }
}

pub struct AnsiRoot {
    file_eof_index: AnsiByteIndex,
    amap_last_index: AnsiByteIndex,
    amap_free_size: AnsiByteIndex,
    pmap_free_size: AnsiByteIndex,
    descriptors_index: AnsiBlockRef,
    offsets_index: AnsiBlockRef,
    amap_is_valid: AmapStatus,
}

impl Root for AnsiRoot {
    type Index = AnsiByteIndex;
    type BTreeRef = AnsiBlockRef;

    fn new(
        file_eof_index: AnsiByteIndex,
        amap_last_index: AnsiByteIndex,
        amap_free_size: AnsiByteIndex,
        pmap_free_size: AnsiByteIndex,
        descriptors_index: AnsiBlockRef,
        offsets_index: AnsiBlockRef,
        amap_is_valid: AmapStatus,
    ) -> Self {
        Self {
            file_eof_index,
            amap_last_index,
            amap_free_size,
            pmap_free_size,
            descriptors_index,
            offsets_index,
            amap_is_valid,
        }
    }

    fn file_eof_index(&self) -> &AnsiByteIndex {
        &self.file_eof_index
    }

    fn amap_last_index(&self) -> &AnsiByteIndex {
        &self.amap_last_index
    }

    fn amap_free_size(&self) -> &AnsiByteIndex {
        &self.amap_free_size
    }

    fn pmap_free_size(&self) -> &AnsiByteIndex {
        &self.pmap_free_size
    }

    fn descriptors_index(&self) -> &AnsiBlockRef {
        &self.descriptors_index
    }

    fn offsets_index(&self) -> &AnsiBlockRef {
        &self.offsets_index
    }

    fn amap_is_valid(&self) -> AmapStatus {
        self.amap_is_valid
    }
}
