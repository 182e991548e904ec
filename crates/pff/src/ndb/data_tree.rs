//! ## Data arrays and descriptor data streams
//!
//! A descriptor whose payload spans more than one block stores an array
//! descriptor instead: a small tree (signature 0x01) whose leaves are
//! offsets-index identifiers. The container resolves the tree into a flat
//! segment list; [`DataStream`] then serves idempotent positioned reads over
//! the segments, deciding per entry whether the stored bytes must be
//! de-obfuscated.

use byteorder::{LittleEndian, ReadBytesExt};
use std::{cell::RefCell, io::Cursor, marker::PhantomData, rc::Rc};
use tracing::warn;

use super::{block::read_data_block, block_id::*, block_ref::*, byte_index::*, node_id::*, *};
use crate::{cache::LruCache, encode, io_handle::FileHandle, PffFile};

pub const DATA_ARRAY_SIGNATURE: u8 = 0x01;

/// The invariant third/fourth byte pair at the start of a property table
/// block. The fourth-byte set is inherited from the format as-is, including
/// 0xA5.
pub(crate) const TABLE_BLOCK_SIGNATURE: u8 = 0xEC;
pub(crate) const TABLE_BLOCK_TYPES: [u8; 8] = [0x6C, 0x7C, 0x8C, 0x9C, 0xA5, 0xAC, 0xBC, 0xCC];

/// Whether `data` starts with a plausible property table block.
pub(crate) fn has_table_signature(data: &[u8]) -> bool {
    data.len() >= 4 && data[2] == TABLE_BLOCK_SIGNATURE && TABLE_BLOCK_TYPES.contains(&data[3])
}

/// Whether the leading declared index-offset field of a table block lands
/// inside the block, which it always does for stored-plaintext entries.
pub(crate) fn looks_unencrypted(data: &[u8]) -> bool {
    if data.len() < 2 {
        return false;
    }
    let index_offset = usize::from(u16::from_le_bytes([data[0], data[1]]));
    index_offset > 0 && index_offset < data.len()
}

/// One parsed data array node.
pub struct DataArrayNode {
    level: u8,
    total_size: u64,
    entries: Vec<u64>,
}

impl DataArrayNode {
    /// Parse the payload of an array descriptor block that has already
    /// passed block validation.
    pub fn parse<Pff: PffFile>(data: &[u8]) -> NdbResult<Self> {
        let mut cursor = Cursor::new(data);

        let signature = cursor.read_u8()?;
        if signature != DATA_ARRAY_SIGNATURE {
            return Err(NdbError::InvalidDataArraySignature(signature));
        }

        let level = cursor.read_u8()?;
        if level == 0 || u32::from(level) >= MAXIMUM_RECURSION_DEPTH {
            return Err(NdbError::InvalidDataArrayLevel(level));
        }

        let entry_count = cursor.read_u16::<LittleEndian>()?;
        let total_size = u64::from(cursor.read_u32::<LittleEndian>()?);

        let entries_size = usize::from(entry_count)
            .checked_mul(Pff::ARRAY_ENTRY_SIZE)
            .ok_or(NdbError::InvalidDataArrayEntryCount(entry_count))?;
        if DATA_ARRAY_HEADER_SIZE + entries_size > data.len() {
            return Err(NdbError::InvalidDataArrayEntryCount(entry_count));
        }

        let mut cursor = Cursor::new(&data[DATA_ARRAY_HEADER_SIZE..]);
        let entries = (0..entry_count)
            .map(|_| Pff::BlockId::read(&mut cursor).map(|bid| bid.into_u64()))
            .collect::<std::io::Result<Vec<_>>>()?;

        Ok(Self {
            level,
            total_size,
            entries,
        })
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn entries(&self) -> &[u64] {
        &self.entries
    }
}

pub const DATA_ARRAY_HEADER_SIZE: usize = 8;

/// One payload block of a resolved data list.
#[derive(Copy, Clone, Debug)]
pub struct DataSegment {
    /// Raw offsets-index identifier of the block.
    pub bid: u64,
    /// Absolute file offset of the stored bytes.
    pub offset: u64,
    /// Stored size.
    pub size: u16,
    /// Offset of this segment in the logical stream.
    pub mapped_offset: u64,
}

/// A seekable, cached, idempotent view over a descriptor's payload.
///
/// The stream holds no cursor; every read maps an absolute logical offset
/// through the segment list. Blocks are fetched through the shared block
/// cache, and the de-obfuscation decision for each entry is frozen on its
/// first fetch.
pub struct DataStream<Pff: PffFile> {
    handle: Rc<FileHandle>,
    cache: Rc<RefCell<LruCache<u64, Rc<Vec<u8>>>>>,
    flags: Rc<ContainerFlags>,
    crypt_method: NdbCryptMethod,
    node: NodeId,
    segments: Vec<DataSegment>,
    total_size: u64,
    _variant: PhantomData<Pff>,
}

impl<Pff: PffFile> std::fmt::Debug for DataStream<Pff> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStream")
            .field("node", &self.node)
            .field("segments", &self.segments)
            .field("total_size", &self.total_size)
            .finish_non_exhaustive()
    }
}

impl<Pff: PffFile> DataStream<Pff> {
    pub(crate) fn new(
        handle: Rc<FileHandle>,
        cache: Rc<RefCell<LruCache<u64, Rc<Vec<u8>>>>>,
        flags: Rc<ContainerFlags>,
        crypt_method: NdbCryptMethod,
        node: NodeId,
        segments: Vec<DataSegment>,
        total_size: u64,
    ) -> Self {
        Self {
            handle,
            cache,
            flags,
            crypt_method,
            node,
            segments,
            total_size,
            _variant: PhantomData,
        }
    }

    /// The logical payload size in bytes.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Copy up to `buf.len()` bytes starting at logical `offset` into
    /// `buf`, returning the number of bytes copied. Reads past the end
    /// return 0.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> NdbResult<usize> {
        if buf.is_empty() || offset >= self.total_size {
            return Ok(0);
        }

        let mut index = self
            .segments
            .partition_point(|segment| segment.mapped_offset + u64::from(segment.size) <= offset);
        let mut position = offset;
        let mut copied = 0;

        while copied < buf.len() && index < self.segments.len() {
            self.flags.check_abort()?;

            let segment = self.segments[index];
            let data = self.fetch_segment(&segment, index)?;

            let start = (position - segment.mapped_offset) as usize;
            if start >= data.len() {
                break;
            }
            let take = (data.len() - start).min(buf.len() - copied);
            buf[copied..copied + take].copy_from_slice(&data[start..start + take]);

            copied += take;
            position += take as u64;
            index += 1;
        }

        Ok(copied)
    }

    /// The whole payload as one buffer.
    pub fn read_to_end(&self) -> NdbResult<Vec<u8>> {
        let mut data = vec![0_u8; self.total_size as usize];
        let copied = self.read(0, &mut data)?;
        data.truncate(copied);
        Ok(data)
    }

    fn fetch_segment(&self, segment: &DataSegment, index: usize) -> NdbResult<Rc<Vec<u8>>> {
        if let Some(data) = self.cache.borrow_mut().get(&segment.bid) {
            return Ok(data);
        }

        let block = Pff::BlockRef::new(
            Pff::BlockId::from_u64(segment.bid),
            Pff::ByteIndex::from_u64(segment.offset),
        );
        let mut data =
            read_data_block::<Pff>(&self.handle, &block, segment.size, false, &self.flags)?;
        self.apply_decryption(segment, index, &mut data)?;

        let data = Rc::new(data);
        self.cache.borrow_mut().insert(segment.bid, data.clone());
        Ok(data)
    }

    /// Decide whether the stored bytes of one entry must be de-obfuscated,
    /// and do it. Internal blocks are always stored plaintext. When the
    /// container declares no encryption but the first entry of a property
    /// table node does not show the table signature, the block is treated
    /// as compressible-encoded anyway and the decision sticks for the whole
    /// container. The last entry of a table array may be stored plaintext
    /// even then.
    fn apply_decryption(
        &self,
        segment: &DataSegment,
        index: usize,
        data: &mut Vec<u8>,
    ) -> NdbResult<()> {
        let bid = Pff::BlockId::from_u64(segment.bid);
        if bid.is_internal() {
            return Ok(());
        }

        match self.crypt_method {
            NdbCryptMethod::None => {
                if self.flags.forced_decryption() {
                    let is_last = index + 1 == self.segments.len();
                    if is_last && looks_unencrypted(data) {
                        return Ok(());
                    }
                    encode::decrypt(NdbCryptMethod::Compressible, bid.cyclic_key(), data)?;
                } else if index == 0
                    && self.node.is_property_table_node()
                    && !has_table_signature(data)
                    && data.len() >= 4
                {
                    // Trial-decode the leading bytes; the codec is
                    // byte-wise, so the probe matches a full decode.
                    let mut probe = [data[0], data[1], data[2], data[3]];
                    encode::decrypt(NdbCryptMethod::Compressible, bid.cyclic_key(), &mut probe)?;
                    if has_table_signature(&probe) {
                        encode::decrypt(NdbCryptMethod::Compressible, bid.cyclic_key(), data)?;
                        warn!(
                            name: "PffForcedDecryption",
                            node = ?self.node,
                            "container declares no encryption but block decodes as compressible"
                        );
                        self.flags.set_forced_decryption();
                        self.flags.mark_corrupted();
                    }
                }
                Ok(())
            }
            method => {
                encode::decrypt(method, bid.cyclic_key(), data)?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_signature() {
        assert!(has_table_signature(&[0x00, 0x00, 0xEC, 0x6C]));
        assert!(has_table_signature(&[0x12, 0x34, 0xEC, 0xA5]));
        assert!(!has_table_signature(&[0x00, 0x00, 0xEC, 0x42]));
        assert!(!has_table_signature(&[0x00, 0x00, 0xEB, 0x6C]));
        assert!(!has_table_signature(&[0xEC, 0x6C]));
    }

    #[test]
    fn test_looks_unencrypted() {
        // Declared index offset inside the buffer.
        assert!(looks_unencrypted(&[0x04, 0x00, 0xEC, 0x6C, 0x00, 0x00]));
        // Offset beyond the buffer.
        assert!(!looks_unencrypted(&[0xFF, 0xFF, 0xEC, 0x6C]));
        // Zero offset.
        assert!(!looks_unencrypted(&[0x00, 0x00, 0xEC, 0x6C]));
    }
}
