//! ## Data blocks
//!
//! The atomic on-disk payload unit: stored bytes, alignment padding, and a
//! trailer binding the block to the identifier that references it. Blocks
//! are validated in a fixed order (declared size, back-pointer, CRC) and are
//! never decrypted here; that decision needs descriptor context and belongs
//! to the data-array layer.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use tracing::warn;

use super::{block_id::*, block_ref::*, byte_index::*, *};
use crate::{crc::compute_crc, io_handle::FileHandle, PffFile};

/// Round a stored size up to the variant's block alignment, capped at the
/// variant's maximum block size.
pub const fn block_size(size: u32, align: u32, max_size: u32) -> u32 {
    if size >= max_size {
        max_size
    } else {
        let size = if size < align { align } else { size };
        let tail = size % align;
        if tail == 0 {
            size
        } else {
            size - tail + align
        }
    }
}

/// Block trailer
pub trait BlockTrailer: Sized + Copy {
    type BlockId: BlockId;

    const SIZE: usize;

    fn read(f: &mut dyn Read) -> NdbResult<Self>;
    fn size(&self) -> u16;
    fn signature(&self) -> u16;
    fn crc(&self) -> u32;
    fn back_pointer(&self) -> Self::BlockId;
}

#[derive(Copy, Clone, Default, Debug)]
pub struct UnicodeBlockTrailer {
    size: u16,
    signature: u16,
    crc: u32,
    back_pointer: UnicodeBlockId,
}

impl BlockTrailer for UnicodeBlockTrailer {
    type BlockId = UnicodeBlockId;

    const SIZE: usize = 16;

    fn read(f: &mut dyn Read) -> NdbResult<Self> {
        let size = f.read_u16::<LittleEndian>()?;
        let signature = f.read_u16::<LittleEndian>()?;
        let crc = f.read_u32::<LittleEndian>()?;
        let back_pointer = UnicodeBlockId::read(f)?;

        Ok(Self {
            size,
            signature,
            crc,
            back_pointer,
        })
    }

    fn size(&self) -> u16 {
        self.size
    }

    fn signature(&self) -> u16 {
        self.signature
    }

    fn crc(&self) -> u32 {
        self.crc
    }

    fn back_pointer(&self) -> UnicodeBlockId {
        self.back_pointer
    }
}

#[derive(Copy, Clone, Default, Debug)]
pub struct AnsiBlockTrailer {
    size: u16,
    signature: u16,
    back_pointer: AnsiBlockId,
    crc: u32,
}

impl BlockTrailer for AnsiBlockTrailer {
    type BlockId = AnsiBlockId;

    const SIZE: usize = 12;

    fn read(f: &mut dyn Read) -> NdbResult<Self> {
        let size = f.read_u16::<LittleEndian>()?;
        let signature = f.read_u16::<LittleEndian>()?;
        let back_pointer = AnsiBlockId::read(f)?;
        let crc = f.read_u32::<LittleEndian>()?;

        Ok(Self {
            size,
            signature,
            back_pointer,
            crc,
        })
    }

    fn size(&self) -> u16 {
        self.size
    }

    fn signature(&self) -> u16 {
        self.signature
    }

    fn crc(&self) -> u32 {
        self.crc
    }

    fn back_pointer(&self) -> AnsiBlockId {
        self.back_pointer
    }
}

/// Read and validate the stored bytes of one block.
///
/// Validation order: declared size against the size the offsets index
/// declared, trailer back-pointer against the identifier used to find the
/// block, then the payload CRC. In strict mode a CRC mismatch fails the
/// read; otherwise it marks the container corrupted and the stored bytes are
/// still returned.
pub fn read_data_block<Pff: PffFile>(
    handle: &FileHandle,
    block: &Pff::BlockRef,
    size: u16,
    strict: bool,
    flags: &ContainerFlags,
) -> NdbResult<Vec<u8>> {
    let offset = block.index().into_u64();
    let padded = block_size(
        u32::from(size) + <Pff::BlockTrailer as BlockTrailer>::SIZE as u32,
        Pff::BLOCK_ALIGN,
        Pff::MAX_BLOCK_SIZE,
    );
    if u32::from(size) + (<Pff::BlockTrailer as BlockTrailer>::SIZE as u32) > padded {
        return Err(NdbError::InvalidBlockSize(u32::from(size)));
    }

    let mut buffer = vec![0_u8; padded as usize];
    handle.read_exact_at(offset, &mut buffer)?;

    let trailer_offset = padded as usize - <Pff::BlockTrailer as BlockTrailer>::SIZE;
    let mut trailer_cursor = Cursor::new(&buffer[trailer_offset..]);
    let trailer = Pff::BlockTrailer::read(&mut trailer_cursor)?;

    if trailer.size() != size {
        return Err(NdbError::BlockSizeMismatch {
            expected: u32::from(size),
            declared: trailer.size(),
        });
    }

    let expected = block.block().into_u64();
    let found = trailer.back_pointer().into_u64();
    if found != expected {
        return Err(NdbError::BlockBackPointerMismatch { expected, found });
    }

    buffer.truncate(usize::from(size));
    let computed = compute_crc(0, &buffer);
    if computed != trailer.crc() {
        if strict {
            return Err(NdbError::InvalidBlockCrc {
                computed,
                stored: trailer.crc(),
            });
        }
        warn!(
            name: "PffBlockCrcMismatch",
            computed,
            stored = trailer.crc(),
            offset,
            "data block CRC mismatch"
        );
        flags.mark_corrupted();
    }

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_size_alignment() {
        assert_eq!(block_size(1, 64, 8192), 64);
        assert_eq!(block_size(64, 64, 8192), 64);
        assert_eq!(block_size(65, 64, 8192), 128);
        assert_eq!(block_size(8191, 64, 8192), 8192);
        assert_eq!(block_size(10000, 64, 8192), 8192);
    }

    #[test]
    fn test_block_size_4k_alignment() {
        assert_eq!(block_size(1, 512, 65536), 512);
        assert_eq!(block_size(513, 512, 65536), 1024);
        assert_eq!(block_size(70000, 512, 65536), 65536);
    }
}
