//! ## Node database layer
//!
//! The storage engine of a PFF container: the file header, the descriptors
//! and offsets B-tree indexes, data blocks, data arrays, and the per-item
//! sub-node (local descriptors) trees. Everything in this module reads; the
//! format is never written.

use std::{
    cell::Cell,
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use thiserror::Error;

pub mod block;
pub mod block_id;
pub mod block_ref;
pub mod byte_index;
pub mod data_tree;
pub mod header;
pub mod node_id;
pub mod page;
pub mod root;
pub mod sub_node;

use node_id::NodeId;
use page::PageType;

#[derive(Error, Debug)]
pub enum NdbError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("File smaller than HEADER: {0} bytes")]
    TruncatedHeader(u64),
    #[error("Invalid HEADER dwMagic: 0x{0:08X}")]
    InvalidHeaderMagicValue(u32),
    #[error("Unsupported HEADER wMagicClient: 0x{0:04X}")]
    UnsupportedContentType(u16),
    #[error("Unsupported HEADER wVer: 0x{0:04X}")]
    UnsupportedVersion(u16),
    #[error("Unexpected HEADER wVer for this reader: 0x{0:04X}")]
    UnexpectedVersion(u16),
    #[error("Unsupported HEADER bCryptMethod: 0x{0:02X}")]
    UnsupportedCryptMethod(u8),
    #[error("Invalid ROOT fAMapValid: 0x{0:02X}")]
    InvalidAmapStatus(u8),
    #[error("Invalid nidType: 0x{0:02X}")]
    InvalidNodeIdType(u8),
    #[error("Invalid nidIndex: 0x{0:08X}")]
    InvalidNodeIndex(u32),
    #[error("Invalid bidIndex: 0x{0:016X}")]
    InvalidBlockIndex(u64),
    #[error("Mismatch between page type and its repeat byte: (0x{0:02X}, 0x{1:02X})")]
    MismatchPageTypeRepeat(u8, u8),
    #[error("Invalid page type: 0x{0:02X}")]
    InvalidPageType(u8),
    #[error("Unexpected page type: {0:?}")]
    UnexpectedPageType(PageType),
    #[error("Invalid page CRC: computed 0x{computed:08X}, stored 0x{stored:08X}")]
    InvalidPageCrc { computed: u32, stored: u32 },
    #[error("Invalid page signature: computed 0x{computed:04X}, stored 0x{stored:04X}")]
    InvalidPageSignature { computed: u16, stored: u16 },
    #[error("Page back-pointer mismatch: expected 0x{expected:016X}, found 0x{found:016X}")]
    PageBackPointerMismatch { expected: u64, found: u64 },
    #[error("Invalid index page entry count: {0}")]
    InvalidIndexEntryCount(usize),
    #[error("Invalid index page maximum entry count: {0}")]
    InvalidIndexEntryMaxCount(u8),
    #[error("Invalid index page entry size: {0}")]
    InvalidIndexEntrySize(u8),
    #[error("Invalid index page level: 0x{0:02X}")]
    InvalidIndexLevel(u8),
    #[error("Index recursion depth exceeded: {0}")]
    IndexDepthExceeded(u32),
    #[error("Invalid block size: {0}")]
    InvalidBlockSize(u32),
    #[error("Block size mismatch: expected {expected}, declared {declared}")]
    BlockSizeMismatch { expected: u32, declared: u16 },
    #[error("Block back-pointer mismatch: expected 0x{expected:016X}, found 0x{found:016X}")]
    BlockBackPointerMismatch { expected: u64, found: u64 },
    #[error("Invalid block CRC: computed 0x{computed:08X}, stored 0x{stored:08X}")]
    InvalidBlockCrc { computed: u32, stored: u32 },
    #[error("Missing offsets index value: 0x{0:016X}")]
    MissingOffsetsIndexValue(u64),
    #[error("Invalid data array signature: 0x{0:02X}")]
    InvalidDataArraySignature(u8),
    #[error("Invalid data array level: 0x{0:02X}")]
    InvalidDataArrayLevel(u8),
    #[error("Invalid data array entry count: {0}")]
    InvalidDataArrayEntryCount(u16),
    #[error("Data array size mismatch: declared {declared}, calculated {calculated}")]
    DataArraySizeMismatch { declared: u64, calculated: u64 },
    #[error("Data array recursion depth exceeded: {0}")]
    DataArrayDepthExceeded(u32),
    #[error("Invalid sub-node block signature: 0x{0:02X}")]
    InvalidSubNodeSignature(u8),
    #[error("Invalid sub-node block level: 0x{0:02X}")]
    InvalidSubNodeLevel(u8),
    #[error("Invalid sub-node entry count: {0}")]
    InvalidSubNodeEntryCount(u16),
    #[error("Sub-node recursion depth exceeded: {0}")]
    SubNodeDepthExceeded(u32),
    #[error("Duplicate self-parented descriptor: {0:?}")]
    DuplicateRootFolder(NodeId),
    #[error("Item tree recursion depth exceeded: {0}")]
    ItemTreeDepthExceeded(u32),
    #[error("Buffer size out of bounds: {0}")]
    BufferSizeOutOfBounds(usize),
}

pub type NdbResult<T> = Result<T, NdbError>;

/// Recursion limit shared by index descent, data-array resolution, sub-node
/// lookup, and item-tree parent chasing. Deeper structures are always
/// corruption.
pub const MAXIMUM_RECURSION_DEPTH: u32 = 32;

/// Cross-cutting container state: the tolerated-corruption marker, the
/// sticky forced-decryption marker, and the abort input.
///
/// The abort flag is the only piece of state another thread may write; it is
/// cleared by whichever operation observes it, so the next call starts
/// fresh.
#[derive(Debug)]
pub struct ContainerFlags {
    corrupted: Cell<bool>,
    forced_decryption: Cell<bool>,
    abort: Arc<AtomicBool>,
}

impl ContainerFlags {
    pub fn new() -> Self {
        Self {
            corrupted: Cell::new(false),
            forced_decryption: Cell::new(false),
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn mark_corrupted(&self) {
        self.corrupted.set(true);
    }

    pub fn is_corrupted(&self) -> bool {
        self.corrupted.get()
    }

    pub fn set_forced_decryption(&self) {
        self.forced_decryption.set(true);
    }

    pub fn forced_decryption(&self) -> bool {
        self.forced_decryption.get()
    }

    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        self.abort.clone()
    }

    /// Observe the abort input. Observing a set flag clears it and cancels
    /// the current operation.
    pub fn check_abort(&self) -> NdbResult<()> {
        if self.abort.swap(false, Ordering::AcqRel) {
            return Err(NdbError::Cancelled);
        }
        Ok(())
    }
}

impl Default for ContainerFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// `wVer`: the three on-disk variants.
///
/// ### See also
/// [header::Header]
#[repr(u16)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum NdbVersion {
    /// 32-bit offsets, 512-byte pages.
    Ansi = 15,
    /// 64-bit offsets, 512-byte pages.
    Unicode = 23,
    /// 64-bit offsets, 4096-byte pages.
    Unicode4k = 36,
}

impl TryFrom<u16> for NdbVersion {
    type Error = NdbError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            14..=15 => Ok(NdbVersion::Ansi),
            21 | 23 => Ok(NdbVersion::Unicode),
            36 => Ok(NdbVersion::Unicode4k),
            _ => Err(NdbError::UnsupportedVersion(value)),
        }
    }
}

/// `bCryptMethod`
///
/// ### See also
/// [header::Header]
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
pub enum NdbCryptMethod {
    /// Data blocks are not encoded.
    #[default]
    None = 0x00,
    /// Keyed substitution passes, self-inverse.
    Compressible = 0x01,
    /// Keyed substitution around a nibble swap.
    High = 0x02,
}

impl TryFrom<u8> for NdbCryptMethod {
    type Error = NdbError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(NdbCryptMethod::None),
            0x01 => Ok(NdbCryptMethod::Compressible),
            0x02 => Ok(NdbCryptMethod::High),
            _ => Err(NdbError::UnsupportedCryptMethod(value)),
        }
    }
}

/// `wMagicClient`: PST or OST. The storage engine treats both identically.
pub(crate) const CONTENT_TYPE_PST: u16 = u16::from_le_bytes(*b"SM");
pub(crate) const CONTENT_TYPE_OST: u16 = u16::from_le_bytes(*b"SO");

#[repr(u16)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ContentType {
    PersonalStore = CONTENT_TYPE_PST,
    OfflineStore = CONTENT_TYPE_OST,
}

impl TryFrom<u16> for ContentType {
    type Error = NdbError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            CONTENT_TYPE_PST => Ok(ContentType::PersonalStore),
            CONTENT_TYPE_OST => Ok(ContentType::OfflineStore),
            _ => Err(NdbError::UnsupportedContentType(value)),
        }
    }
}
