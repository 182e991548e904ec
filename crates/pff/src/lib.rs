#![doc = include_str!("../README.md")]

use std::{
    cell::{Cell, RefCell},
    io,
    path::Path,
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use thiserror::Error;
use tracing::warn;

pub mod item;
pub mod ndb;
pub mod recover;

pub mod encode;

mod block_sig;
mod cache;
mod crc;
mod io_handle;

pub use io_handle::{FileHandle, PffReader};
pub use item::ItemDescriptor;
pub use ndb::{ContentType, NdbCryptMethod, NdbError, NdbVersion};
pub use recover::{RecoveredOffset, RecoveryFlags, UnallocatedBlockKind};

use cache::LruCache;
use item::ItemTree;
use ndb::{
    block::{read_data_block, BlockTrailer},
    block_id::*,
    block_ref::*,
    byte_index::*,
    data_tree::{DataArrayNode, DataSegment, DataStream, DATA_ARRAY_SIGNATURE},
    header::{AnsiHeader, Header, UnicodeHeader},
    node_id::NodeId,
    page::*,
    root::Root,
    sub_node::*,
    ContainerFlags, NdbResult, MAXIMUM_RECURSION_DEPTH,
};
use recover::{free_runs, merge_ranges, RecoveredItems};

/// The error taxonomy of the public interface. Clean lookup misses are not
/// errors; they surface as `Option`.
#[derive(Error, Debug)]
pub enum PffError {
    /// The caller passed a null or out-of-range value.
    #[error("Invalid argument: {0}")]
    Argument(String),
    /// The underlying stream failed or returned fewer bytes than requested.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// A file variant, encryption type, or structure signature this reader
    /// does not recognize.
    #[error("Unsupported format feature: {0}")]
    Unsupported(NdbError),
    /// Validation of a known structure failed.
    #[error("Corrupted container: {0}")]
    Corrupted(NdbError),
    /// An abort was observed mid-operation.
    #[error("Operation cancelled")]
    Cancelled,
}

pub type PffResult<T> = Result<T, PffError>;

impl From<NdbError> for PffError {
    fn from(err: NdbError) -> Self {
        match err {
            NdbError::Io(err) => Self::Io(err),
            NdbError::Cancelled => Self::Cancelled,
            NdbError::UnsupportedContentType(..)
            | NdbError::UnsupportedVersion(..)
            | NdbError::UnexpectedVersion(..)
            | NdbError::UnsupportedCryptMethod(..) => Self::Unsupported(err),
            err => Self::Corrupted(err),
        }
    }
}

/// Force a specific encryption mode instead of trusting the header.
#[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
pub enum EncryptionOverride {
    #[default]
    Auto,
    ForceNone,
    ForceCompressible,
    ForceHigh,
}

/// The Windows ANSI codepages a container may declare for 8-bit strings,
/// plus US-ASCII.
pub const RECOGNIZED_CODEPAGES: [u16; 15] = [
    874, 932, 936, 949, 950, 1250, 1251, 1252, 1253, 1254, 1255, 1256, 1257, 1258, 20127,
];

const DEFAULT_CODEPAGE: u16 = 1252;
const DEFAULT_NODE_PAGE_CACHE_SIZE: usize = 8;
const DEFAULT_BLOCK_CACHE_SIZE: usize = 64;

/// Open-time configuration.
#[derive(Clone, Debug)]
pub struct PffOptions {
    pub encryption_override: EncryptionOverride,
    pub recovery_flags: RecoveryFlags,
    pub codepage: u16,
    pub node_page_cache_size: usize,
    pub block_cache_size: usize,
    pub record_read_ranges: bool,
}

impl Default for PffOptions {
    fn default() -> Self {
        Self {
            encryption_override: EncryptionOverride::default(),
            recovery_flags: RecoveryFlags::default(),
            codepage: DEFAULT_CODEPAGE,
            node_page_cache_size: DEFAULT_NODE_PAGE_CACHE_SIZE,
            block_cache_size: DEFAULT_BLOCK_CACHE_SIZE,
            record_read_ranges: false,
        }
    }
}

/// Cancels in-flight container operations from any thread.
#[derive(Clone)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Request cancellation. The next recursion step of any in-flight
    /// operation observes the flag, clears it, and returns
    /// [`PffError::Cancelled`].
    pub fn signal(&self) {
        self.flag.store(true, Ordering::Release);
    }
}

/// One on-disk variant: the width-dependent primitive types and the fixed
/// geometry of its pages and blocks.
pub trait PffFile: Sized + 'static {
    type BlockId: BlockId;
    type ByteIndex: ByteIndex;
    type BlockRef: BlockRef<Block = Self::BlockId, Index = Self::ByteIndex>;
    type Root: Root<Index = Self::ByteIndex, BTreeRef = Self::BlockRef>;
    type Header: Header<Root = Self::Root>;
    type PageTrailer: PageTrailer<BlockId = Self::BlockId>;
    type BlockTrailer: BlockTrailer<BlockId = Self::BlockId>;
    type BranchEntry: BTreeBranchEntry<Ref = Self::BlockRef>;
    type NodeEntry: NodeBTreeEntry<Block = Self::BlockId>;
    type BlockEntry: BlockBTreeEntry<Ref = Self::BlockRef>;
    type SubLeafEntry: SubNodeLeafEntry<Block = Self::BlockId>;
    type SubBranchEntry: SubNodeBranchEntry<Block = Self::BlockId>;

    const VERSION: NdbVersion;
    const PAGE_SIZE: usize;
    const BTREE_ENTRIES_SIZE: usize;
    const PAGE_RESERVED_SIZE: usize;
    const MAP_BITS_SIZE: usize;
    const BRANCH_ENTRY_SIZE: usize;
    const NODE_ENTRY_SIZE: usize;
    const BLOCK_ENTRY_SIZE: usize;
    const SUB_HEADER_SIZE: usize;
    const SUB_LEAF_ENTRY_SIZE: usize;
    const SUB_BRANCH_ENTRY_SIZE: usize;
    const ARRAY_ENTRY_SIZE: usize;
    const BLOCK_ALIGN: u32;
    const MAX_BLOCK_SIZE: u32;
    const FIRST_AMAP_OFFSET: u64;
    const HAS_PAGE_MAP: bool;
}

/// Bytes of container space one allocation-map bit covers.
const AMAP_BIT_GRANULARITY: u64 = 64;

struct PffFileInner<Pff>
where
    Pff: PffFile,
{
    handle: Rc<FileHandle>,
    header: Pff::Header,
    options: PffOptions,
    flags: Rc<ContainerFlags>,
    codepage: Cell<u16>,
    closed: Cell<bool>,
    node_page_cache: RefCell<LruCache<u64, Rc<IndexPage<Pff, Pff::NodeEntry>>>>,
    block_page_cache: RefCell<LruCache<u64, Rc<IndexPage<Pff, Pff::BlockEntry>>>>,
    block_cache: Rc<RefCell<LruCache<u64, Rc<Vec<u8>>>>>,
    item_tree: ItemTree,
    recovered: RefCell<Option<RecoveredItems>>,
}

impl<Pff> PffFileInner<Pff>
where
    Pff: PffFile,
{
    fn read_from(handle: FileHandle, options: PffOptions) -> PffResult<Self> {
        validate_codepage(options.codepage)?;

        if options.record_read_ranges {
            handle.record_read_ranges(true);
        }

        let header = Pff::Header::read(&handle)?;
        if header.version() != Pff::VERSION {
            return Err(NdbError::UnexpectedVersion(header.version() as u16).into());
        }

        let flags = Rc::new(ContainerFlags::new());
        if header.is_corrupted() {
            flags.mark_corrupted();
        }

        let file_eof = header.root().file_eof_index().into_u64();
        if file_eof != handle.size() {
            warn!(
                name: "PffFileSizeMismatch",
                declared = file_eof,
                actual = handle.size(),
                "HEADER file size does not match the container size"
            );
            flags.mark_corrupted();
        }

        let codepage = Cell::new(options.codepage);
        let node_page_cache = RefCell::new(LruCache::new(options.node_page_cache_size));
        let block_page_cache = RefCell::new(LruCache::new(options.node_page_cache_size));
        let block_cache = Rc::new(RefCell::new(LruCache::new(options.block_cache_size)));

        let mut inner = Self {
            handle: Rc::new(handle),
            header,
            options,
            flags,
            codepage,
            closed: Cell::new(false),
            node_page_cache,
            block_page_cache,
            block_cache,
            item_tree: ItemTree::new(),
            recovered: RefCell::new(None),
        };

        let item_tree = inner.build_item_tree()?;
        inner.item_tree = item_tree;
        Ok(inner)
    }

    fn ensure_open(&self) -> PffResult<()> {
        if self.closed.get() {
            return Err(PffError::Argument("container is closed".into()));
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.set(true);
        self.node_page_cache.borrow_mut().clear();
        self.block_page_cache.borrow_mut().clear();
        self.block_cache.borrow_mut().clear();
    }

    fn effective_crypt_method(&self) -> NdbCryptMethod {
        match self.options.encryption_override {
            EncryptionOverride::Auto => self.header.crypt_method(),
            EncryptionOverride::ForceNone => NdbCryptMethod::None,
            EncryptionOverride::ForceCompressible => NdbCryptMethod::Compressible,
            EncryptionOverride::ForceHigh => NdbCryptMethod::High,
        }
    }

    fn read_page_buffer(&self, offset: u64) -> NdbResult<Vec<u8>> {
        let mut buffer = vec![0_u8; Pff::PAGE_SIZE];
        self.handle.read_exact_at(offset, &mut buffer)?;
        Ok(buffer)
    }

    fn read_node_page(
        &self,
        block: &Pff::BlockRef,
    ) -> NdbResult<Rc<IndexPage<Pff, Pff::NodeEntry>>> {
        let offset = block.index().into_u64();
        if let Some(page) = self.node_page_cache.borrow_mut().get(&offset) {
            return Ok(page);
        }

        let buffer = self.read_page_buffer(offset)?;
        let page = Rc::new(IndexPage::parse(
            &buffer,
            PageType::DescriptorsIndex,
            Some(block.block().into_u64()),
            offset,
            Pff::NODE_ENTRY_SIZE,
            false,
            &self.flags,
        )?);
        self.node_page_cache.borrow_mut().insert(offset, page.clone());
        Ok(page)
    }

    fn read_block_page(
        &self,
        block: &Pff::BlockRef,
    ) -> NdbResult<Rc<IndexPage<Pff, Pff::BlockEntry>>> {
        let offset = block.index().into_u64();
        if let Some(page) = self.block_page_cache.borrow_mut().get(&offset) {
            return Ok(page);
        }

        let buffer = self.read_page_buffer(offset)?;
        let page = Rc::new(IndexPage::parse(
            &buffer,
            PageType::OffsetsIndex,
            Some(block.block().into_u64()),
            offset,
            Pff::BLOCK_ENTRY_SIZE,
            false,
            &self.flags,
        )?);
        self.block_page_cache
            .borrow_mut()
            .insert(offset, page.clone());
        Ok(page)
    }

    /// Look a descriptor up by identifier. A clean miss is `None`.
    fn find_node(&self, node: NodeId) -> NdbResult<Option<Pff::NodeEntry>> {
        let root = *self.header.root().descriptors_index();
        if root.index().into_u64() == 0 {
            return Ok(None);
        }

        let key = u64::from(u32::from(node));
        let mut block = root;
        for _ in 0..MAXIMUM_RECURSION_DEPTH {
            self.flags.check_abort()?;
            let page = self.read_node_page(&block)?;
            if page.is_leaf() {
                return Ok(page.find_leaf(key));
            }
            match page.branch_child(key) {
                Some(child) => block = child,
                None => return Ok(None),
            }
        }
        Err(NdbError::IndexDepthExceeded(MAXIMUM_RECURSION_DEPTH))
    }

    /// Look an offsets value up by (masked) identifier. A clean miss is
    /// `None`.
    fn find_offsets(&self, key: u64) -> NdbResult<Option<Pff::BlockEntry>> {
        let root = *self.header.root().offsets_index();
        if root.index().into_u64() == 0 {
            return Ok(None);
        }

        let mut block = root;
        for _ in 0..MAXIMUM_RECURSION_DEPTH {
            self.flags.check_abort()?;
            let page = self.read_block_page(&block)?;
            if page.is_leaf() {
                return Ok(page.find_leaf(key));
            }
            match page.branch_child(key) {
                Some(child) => block = child,
                None => return Ok(None),
            }
        }
        Err(NdbError::IndexDepthExceeded(MAXIMUM_RECURSION_DEPTH))
    }

    /// Resolve a data identifier to `(stored identifier, file offset,
    /// stored size)`, consulting the recovered offsets map first for
    /// recovered items.
    fn resolve_block(
        &self,
        block: Pff::BlockId,
        use_recovered: bool,
    ) -> NdbResult<Option<(u64, u64, u16)>> {
        if use_recovered {
            if let Some(recovered) = self.recovered.borrow().as_ref() {
                if let Some(entry) = recovered.offsets.get(&block.search_key()) {
                    return Ok(Some((entry.identifier, entry.file_offset, entry.data_size)));
                }
            }
        }

        Ok(self.find_offsets(block.search_key())?.map(|entry| {
            (
                entry.block().block().into_u64(),
                entry.block().index().into_u64(),
                entry.size(),
            )
        }))
    }

    /// Resolve a descriptor's data identifier into the flat segment list of
    /// its payload.
    fn resolve_data_list(
        &self,
        node: NodeId,
        data: Pff::BlockId,
        use_recovered: bool,
    ) -> NdbResult<(Vec<DataSegment>, u64)> {
        let Some((bid, offset, size)) = self.resolve_block(data, use_recovered)? else {
            return Err(NdbError::MissingOffsetsIndexValue(data.into_u64()));
        };

        if size == 0 {
            return Ok((Vec::new(), 0));
        }

        let block_id = Pff::BlockId::from_u64(bid);
        let block = Pff::BlockRef::new(block_id, Pff::ByteIndex::from_u64(offset));
        let bytes = read_data_block::<Pff>(&self.handle, &block, size, false, &self.flags)?;

        if block_id.is_internal() && bytes.first() == Some(&DATA_ARRAY_SIGNATURE) {
            let mut segments = Vec::new();
            let mut mapped_offset = 0_u64;
            let total =
                self.resolve_data_array(&bytes, &mut segments, &mut mapped_offset, 0, use_recovered)?;
            Ok((segments, total))
        } else {
            let segments = vec![DataSegment {
                bid,
                offset,
                size,
                mapped_offset: 0,
            }];
            Ok((segments, u64::from(size)))
        }
    }

    fn resolve_data_array(
        &self,
        bytes: &[u8],
        segments: &mut Vec<DataSegment>,
        mapped_offset: &mut u64,
        depth: u32,
        use_recovered: bool,
    ) -> NdbResult<u64> {
        if depth >= MAXIMUM_RECURSION_DEPTH {
            return Err(NdbError::DataArrayDepthExceeded(depth));
        }
        self.flags.check_abort()?;

        let array = DataArrayNode::parse::<Pff>(bytes)?;
        let mut calculated = 0_u64;

        for &entry in array.entries() {
            let child_id = Pff::BlockId::from_u64(entry);
            let Some((child_bid, child_offset, child_size)) =
                self.resolve_block(child_id, use_recovered)?
            else {
                return Err(NdbError::MissingOffsetsIndexValue(entry));
            };

            if array.level() == 1 {
                segments.push(DataSegment {
                    bid: child_bid,
                    offset: child_offset,
                    size: child_size,
                    mapped_offset: *mapped_offset,
                });
                *mapped_offset += u64::from(child_size);
                calculated += u64::from(child_size);
            } else {
                let child = Pff::BlockRef::new(
                    Pff::BlockId::from_u64(child_bid),
                    Pff::ByteIndex::from_u64(child_offset),
                );
                let child_bytes =
                    read_data_block::<Pff>(&self.handle, &child, child_size, false, &self.flags)?;
                calculated += self.resolve_data_array(
                    &child_bytes,
                    segments,
                    mapped_offset,
                    depth + 1,
                    use_recovered,
                )?;
            }

            if calculated > array.total_size() {
                return Err(NdbError::DataArraySizeMismatch {
                    declared: array.total_size(),
                    calculated,
                });
            }
        }

        if calculated != array.total_size() {
            return Err(NdbError::DataArraySizeMismatch {
                declared: array.total_size(),
                calculated,
            });
        }

        Ok(calculated)
    }

    fn open_data_stream(
        &self,
        node: NodeId,
        data: u64,
        use_recovered: bool,
    ) -> NdbResult<DataStream<Pff>> {
        let (segments, total_size) = if data == 0 {
            (Vec::new(), 0)
        } else {
            self.resolve_data_list(node, Pff::BlockId::from_u64(data), use_recovered)?
        };

        Ok(DataStream::new(
            self.handle.clone(),
            self.block_cache.clone(),
            self.flags.clone(),
            self.effective_crypt_method(),
            node,
            segments,
            total_size,
        ))
    }

    /// Find one local descriptor in the sub-node tree rooted at `sub_node`.
    fn find_sub_node(
        &self,
        sub_node: u64,
        node: NodeId,
        use_recovered: bool,
    ) -> NdbResult<Option<Pff::SubLeafEntry>> {
        let key = u64::from(u32::from(node));
        let mut bid = Pff::BlockId::from_u64(sub_node);

        for _ in 0..MAXIMUM_RECURSION_DEPTH {
            self.flags.check_abort()?;

            let Some((raw, offset, size)) = self.resolve_block(bid, use_recovered)? else {
                return Err(NdbError::MissingOffsetsIndexValue(bid.into_u64()));
            };
            let block = Pff::BlockRef::new(
                Pff::BlockId::from_u64(raw),
                Pff::ByteIndex::from_u64(offset),
            );
            let bytes = read_data_block::<Pff>(&self.handle, &block, size, false, &self.flags)?;
            let tree = SubNodeBlock::<Pff>::parse(&bytes)?;

            if tree.is_leaf() {
                return Ok(tree.find_leaf(key));
            }
            match tree.branch_child(key) {
                Some(entry) => bid = entry.child(),
                None => return Ok(None),
            }
        }
        Err(NdbError::SubNodeDepthExceeded(MAXIMUM_RECURSION_DEPTH))
    }

    /// In-order traversal over every descriptors-index leaf.
    fn walk_node_leaves(
        &self,
        callback: &mut dyn FnMut(&Pff::NodeEntry) -> NdbResult<()>,
    ) -> NdbResult<()> {
        let root = *self.header.root().descriptors_index();
        if root.index().into_u64() == 0 {
            return Ok(());
        }
        self.walk_node_page(&root, callback, 0)
    }

    fn walk_node_page(
        &self,
        block: &Pff::BlockRef,
        callback: &mut dyn FnMut(&Pff::NodeEntry) -> NdbResult<()>,
        depth: u32,
    ) -> NdbResult<()> {
        if depth >= MAXIMUM_RECURSION_DEPTH {
            return Err(NdbError::IndexDepthExceeded(depth));
        }
        self.flags.check_abort()?;

        let page = self.read_node_page(block)?;
        if page.is_leaf() {
            for entry in page.leaf_entries() {
                callback(entry)?;
            }
        } else {
            for entry in page.branch_entries() {
                let child = entry.child();
                self.walk_node_page(&child, callback, depth + 1)?;
            }
        }
        Ok(())
    }

    fn build_item_tree(&self) -> NdbResult<ItemTree> {
        let mut tree = ItemTree::new();
        self.walk_node_leaves(&mut |entry| {
            let descriptor = descriptor_from_entry::<Pff>(entry, false);
            tree.insert(descriptor, &mut |parent| {
                Ok(self
                    .find_node(parent)?
                    .map(|entry| descriptor_from_entry::<Pff>(&entry, false)))
            })
        })?;
        if !tree.orphans().is_empty() {
            self.flags.mark_corrupted();
        }
        Ok(tree)
    }

    /// The unallocated `(data, page)` range lists, honoring the recovery
    /// flags and the allocation-map validity marker.
    fn unallocated_ranges(
        &self,
        flags: RecoveryFlags,
    ) -> NdbResult<(Vec<(u64, u64)>, Vec<(u64, u64)>)> {
        let file_size = self.handle.size();
        let start = Pff::FIRST_AMAP_OFFSET;
        let amap_valid: bool = self.header.root().amap_is_valid().into();

        if flags.contains(RecoveryFlags::IGNORE_ALLOCATION_TABLE) || !amap_valid {
            if !amap_valid {
                warn!(
                    name: "PffAllocationMapInvalid",
                    "allocation maps are marked invalid, sweeping the whole container"
                );
            }
            let whole = vec![(start, file_size.saturating_sub(start))];
            let pages = if Pff::HAS_PAGE_MAP {
                whole.clone()
            } else {
                Vec::new()
            };
            return Ok((whole, pages));
        }

        let coverage = Pff::MAP_BITS_SIZE as u64 * 8 * AMAP_BIT_GRANULARITY;
        let mut data_ranges = Vec::new();
        let mut offset = start;
        while offset < file_size {
            self.flags.check_abort()?;
            let Ok(buffer) = self.read_page_buffer(offset) else {
                break;
            };
            match parse_map_page::<Pff>(&buffer, PageType::AllocationMap, offset, &self.flags) {
                Ok(bits) => data_ranges.extend(free_runs(
                    &bits,
                    offset,
                    AMAP_BIT_GRANULARITY,
                    file_size,
                )),
                Err(err) => {
                    warn!(
                        name: "PffAllocationMapPageRejected",
                        offset,
                        error = %err,
                        "skipping unreadable allocation map page"
                    );
                    self.flags.mark_corrupted();
                }
            }
            offset += coverage;
        }

        let mut page_ranges = Vec::new();
        if Pff::HAS_PAGE_MAP {
            let page_coverage = Pff::MAP_BITS_SIZE as u64 * 8 * Pff::PAGE_SIZE as u64;
            let mut offset = start + Pff::PAGE_SIZE as u64;
            while offset < file_size {
                self.flags.check_abort()?;
                let Ok(buffer) = self.read_page_buffer(offset) else {
                    break;
                };
                match parse_map_page::<Pff>(
                    &buffer,
                    PageType::AllocationPageMap,
                    offset,
                    &self.flags,
                ) {
                    Ok(bits) => page_ranges.extend(free_runs(
                        &bits,
                        offset,
                        Pff::PAGE_SIZE as u64,
                        file_size,
                    )),
                    Err(err) => {
                        warn!(
                            name: "PffAllocationPageMapRejected",
                            offset,
                            error = %err,
                            "skipping unreadable page allocation map page"
                        );
                        self.flags.mark_corrupted();
                    }
                }
                offset += page_coverage;
            }
        }

        Ok((merge_ranges(data_ranges), merge_ranges(page_ranges)))
    }

    /// Scan unallocated space for index leaf pages and build the parallel
    /// recovered tree. The main item tree is never touched.
    fn recover_items(&self, flags: RecoveryFlags) -> NdbResult<usize> {
        let (data_ranges, page_ranges) = self.unallocated_ranges(flags)?;
        let mut recovered = RecoveredItems::new(data_ranges.clone(), page_ranges.clone());

        let file_size = self.handle.size();
        let scan_ranges = if flags.contains(RecoveryFlags::SCAN_ALLOCATED) {
            vec![(
                Pff::FIRST_AMAP_OFFSET,
                file_size.saturating_sub(Pff::FIRST_AMAP_OFFSET),
            )]
        } else {
            merge_ranges([data_ranges, page_ranges].concat())
        };

        let mut candidates: Vec<ItemDescriptor> = Vec::new();
        for (range_start, range_length) in scan_ranges {
            let range_end = (range_start + range_length).min(file_size);
            let mut offset = range_start.next_multiple_of(Pff::PAGE_SIZE as u64);
            while offset + Pff::PAGE_SIZE as u64 <= range_end {
                self.flags.check_abort()?;
                self.scan_page(offset, &mut candidates, &mut recovered)?;
                offset += Pff::PAGE_SIZE as u64;
            }
        }

        // Link candidates against each other only; parents outside the
        // recovered set stay orphans of the recovered tree.
        let lookup_set: std::collections::BTreeMap<u32, ItemDescriptor> = candidates
            .iter()
            .map(|descriptor| (u32::from(descriptor.node()), *descriptor))
            .collect();
        for descriptor in candidates {
            let result = recovered
                .tree
                .insert(descriptor, &mut |parent| {
                    Ok(lookup_set.get(&u32::from(parent)).copied())
                });
            match result {
                Ok(()) => {}
                Err(NdbError::DuplicateRootFolder(node)) => {
                    warn!(
                        name: "PffRecoveredDuplicateRootFolder",
                        node = ?node,
                        "recovered a second self-parented descriptor"
                    );
                    self.flags.mark_corrupted();
                }
                Err(err) => return Err(err),
            }
        }

        let count = recovered.tree.len();
        *self.recovered.borrow_mut() = Some(recovered);
        Ok(count)
    }

    /// Validate one page-aligned candidate during recovery. Non-index
    /// pages and invalid pages are silently skipped.
    fn scan_page(
        &self,
        offset: u64,
        candidates: &mut Vec<ItemDescriptor>,
        recovered: &mut RecoveredItems,
    ) -> NdbResult<()> {
        let Ok(buffer) = self.read_page_buffer(offset) else {
            return Ok(());
        };

        let trailer_offset = Pff::PAGE_SIZE - <Pff::PageTrailer as PageTrailer>::SIZE;
        let page_type = buffer[trailer_offset];
        if page_type != buffer[trailer_offset + 1] {
            return Ok(());
        }

        match page_type {
            0x81 => {
                let Ok(page) = IndexPage::<Pff, Pff::NodeEntry>::parse(
                    &buffer,
                    PageType::DescriptorsIndex,
                    None,
                    offset,
                    Pff::NODE_ENTRY_SIZE,
                    true,
                    &self.flags,
                ) else {
                    return Ok(());
                };
                if !page.is_leaf() {
                    return Ok(());
                }
                for entry in page.leaf_entries() {
                    if self.is_live_descriptor(entry)? {
                        continue;
                    }
                    candidates.push(descriptor_from_entry::<Pff>(entry, true));
                }
            }
            0x80 => {
                let Ok(page) = IndexPage::<Pff, Pff::BlockEntry>::parse(
                    &buffer,
                    PageType::OffsetsIndex,
                    None,
                    offset,
                    Pff::BLOCK_ENTRY_SIZE,
                    true,
                    &self.flags,
                ) else {
                    return Ok(());
                };
                if !page.is_leaf() {
                    return Ok(());
                }
                for entry in page.leaf_entries() {
                    let value = RecoveredOffset {
                        identifier: entry.block().block().into_u64(),
                        file_offset: entry.block().index().into_u64(),
                        data_size: entry.size(),
                        ref_count: entry.ref_count(),
                    };
                    let key = entry.block().block().search_key();
                    if recovered.offsets.contains_key(&key) {
                        // First candidate in file order wins; keep the rest
                        // for the caller to arbitrate.
                        recovered.ambiguous_offsets.push(value);
                    } else {
                        recovered.offsets.insert(key, value);
                    }
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Whether a scanned descriptor leaf matches the live index exactly.
    fn is_live_descriptor(&self, entry: &Pff::NodeEntry) -> NdbResult<bool> {
        let Some(live) = self.find_node(entry.node())? else {
            return Ok(false);
        };
        Ok(
            live.data().map(|bid| bid.into_u64()) == entry.data().map(|bid| bid.into_u64())
                && live.sub_node().map(|bid| bid.into_u64())
                    == entry.sub_node().map(|bid| bid.into_u64())
                && live.parent() == entry.parent(),
        )
    }
}

fn descriptor_from_entry<Pff: PffFile>(entry: &Pff::NodeEntry, recovered: bool) -> ItemDescriptor {
    ItemDescriptor::new(
        entry.node(),
        entry.data().map(|bid| bid.into_u64()).unwrap_or_default(),
        entry
            .sub_node()
            .map(|bid| bid.into_u64())
            .unwrap_or_default(),
        entry.parent(),
        recovered,
    )
}

fn validate_codepage(codepage: u16) -> PffResult<()> {
    if !RECOGNIZED_CODEPAGES.contains(&codepage) {
        return Err(PffError::Argument(format!(
            "unrecognized codepage: {codepage}"
        )));
    }
    Ok(())
}

pub struct AnsiPffFile {
    inner: PffFileInner<Self>,
}

impl std::fmt::Debug for AnsiPffFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnsiPffFile").finish_non_exhaustive()
    }
}

impl PffFile for AnsiPffFile {
    type BlockId = AnsiBlockId;
    type ByteIndex = AnsiByteIndex;
    type BlockRef = AnsiBlockRef;
    type Root = ndb::root::AnsiRoot;
    type Header = AnsiHeader;
    type PageTrailer = AnsiPageTrailer;
    type BlockTrailer = ndb::block::AnsiBlockTrailer;
    type BranchEntry = AnsiBTreeBranchEntry;
    type NodeEntry = AnsiNodeBTreeEntry;
    type BlockEntry = AnsiBlockBTreeEntry;
    type SubLeafEntry = AnsiSubNodeLeafEntry;
    type SubBranchEntry = AnsiSubNodeBranchEntry;

    const VERSION: NdbVersion = NdbVersion::Ansi;
    const PAGE_SIZE: usize = 512;
    const BTREE_ENTRIES_SIZE: usize = 496;
    const PAGE_RESERVED_SIZE: usize = 0;
    const MAP_BITS_SIZE: usize = 496;
    const BRANCH_ENTRY_SIZE: usize = 12;
    const NODE_ENTRY_SIZE: usize = 16;
    const BLOCK_ENTRY_SIZE: usize = 12;
    const SUB_HEADER_SIZE: usize = 4;
    const SUB_LEAF_ENTRY_SIZE: usize = 12;
    const SUB_BRANCH_ENTRY_SIZE: usize = 8;
    const ARRAY_ENTRY_SIZE: usize = 4;
    const BLOCK_ALIGN: u32 = 64;
    const MAX_BLOCK_SIZE: u32 = 8192;
    const FIRST_AMAP_OFFSET: u64 = 0x4400;
    const HAS_PAGE_MAP: bool = true;
}

impl AnsiPffFile {
    pub fn open(path: impl AsRef<Path>) -> PffResult<Self> {
        Self::open_with_options(path, PffOptions::default())
    }

    pub fn open_with_options(path: impl AsRef<Path>, options: PffOptions) -> PffResult<Self> {
        let handle = FileHandle::open(path)?;
        Ok(Self {
            inner: PffFileInner::read_from(handle, options)?,
        })
    }

    pub fn read_from(reader: Box<dyn PffReader>, options: PffOptions) -> PffResult<Self> {
        let handle = FileHandle::from_reader(reader)?;
        Ok(Self {
            inner: PffFileInner::read_from(handle, options)?,
        })
    }
}

pub struct UnicodePffFile {
    inner: PffFileInner<Self>,
}

impl std::fmt::Debug for UnicodePffFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnicodePffFile").finish_non_exhaustive()
    }
}

impl PffFile for UnicodePffFile {
    type BlockId = UnicodeBlockId;
    type ByteIndex = UnicodeByteIndex;
    type BlockRef = UnicodeBlockRef;
    type Root = ndb::root::UnicodeRoot;
    type Header = UnicodeHeader;
    type PageTrailer = UnicodePageTrailer;
    type BlockTrailer = ndb::block::UnicodeBlockTrailer;
    type BranchEntry = UnicodeBTreeBranchEntry;
    type NodeEntry = UnicodeNodeBTreeEntry;
    type BlockEntry = UnicodeBlockBTreeEntry;
    type SubLeafEntry = UnicodeSubNodeLeafEntry;
    type SubBranchEntry = UnicodeSubNodeBranchEntry;

    const VERSION: NdbVersion = NdbVersion::Unicode;
    const PAGE_SIZE: usize = 512;
    const BTREE_ENTRIES_SIZE: usize = 488;
    const PAGE_RESERVED_SIZE: usize = 0;
    const MAP_BITS_SIZE: usize = 496;
    const BRANCH_ENTRY_SIZE: usize = 24;
    const NODE_ENTRY_SIZE: usize = 32;
    const BLOCK_ENTRY_SIZE: usize = 24;
    const SUB_HEADER_SIZE: usize = 8;
    const SUB_LEAF_ENTRY_SIZE: usize = 24;
    const SUB_BRANCH_ENTRY_SIZE: usize = 16;
    const ARRAY_ENTRY_SIZE: usize = 8;
    const BLOCK_ALIGN: u32 = 64;
    const MAX_BLOCK_SIZE: u32 = 8192;
    const FIRST_AMAP_OFFSET: u64 = 0x4400;
    const HAS_PAGE_MAP: bool = false;
}

impl UnicodePffFile {
    pub fn open(path: impl AsRef<Path>) -> PffResult<Self> {
        Self::open_with_options(path, PffOptions::default())
    }

    pub fn open_with_options(path: impl AsRef<Path>, options: PffOptions) -> PffResult<Self> {
        let handle = FileHandle::open(path)?;
        Ok(Self {
            inner: PffFileInner::read_from(handle, options)?,
        })
    }

    pub fn read_from(reader: Box<dyn PffReader>, options: PffOptions) -> PffResult<Self> {
        let handle = FileHandle::from_reader(reader)?;
        Ok(Self {
            inner: PffFileInner::read_from(handle, options)?,
        })
    }
}

pub struct Unicode4kPffFile {
    inner: PffFileInner<Self>,
}

impl std::fmt::Debug for Unicode4kPffFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unicode4kPffFile").finish_non_exhaustive()
    }
}

impl PffFile for Unicode4kPffFile {
    type BlockId = UnicodeBlockId;
    type ByteIndex = UnicodeByteIndex;
    type BlockRef = UnicodeBlockRef;
    type Root = ndb::root::UnicodeRoot;
    type Header = UnicodeHeader;
    type PageTrailer = UnicodePageTrailer;
    type BlockTrailer = ndb::block::UnicodeBlockTrailer;
    type BranchEntry = UnicodeBTreeBranchEntry;
    type NodeEntry = UnicodeNodeBTreeEntry;
    type BlockEntry = UnicodeBlockBTreeEntry;
    type SubLeafEntry = UnicodeSubNodeLeafEntry;
    type SubBranchEntry = UnicodeSubNodeBranchEntry;

    const VERSION: NdbVersion = NdbVersion::Unicode4k;
    const PAGE_SIZE: usize = 4096;
    const BTREE_ENTRIES_SIZE: usize = 4056;
    const PAGE_RESERVED_SIZE: usize = 16;
    const MAP_BITS_SIZE: usize = 4064;
    const BRANCH_ENTRY_SIZE: usize = 24;
    const NODE_ENTRY_SIZE: usize = 32;
    const BLOCK_ENTRY_SIZE: usize = 24;
    const SUB_HEADER_SIZE: usize = 8;
    const SUB_LEAF_ENTRY_SIZE: usize = 24;
    const SUB_BRANCH_ENTRY_SIZE: usize = 16;
    const ARRAY_ENTRY_SIZE: usize = 8;
    const BLOCK_ALIGN: u32 = 512;
    const MAX_BLOCK_SIZE: u32 = 65536;
    const FIRST_AMAP_OFFSET: u64 = 0x4400;
    const HAS_PAGE_MAP: bool = false;
}

impl Unicode4kPffFile {
    pub fn open(path: impl AsRef<Path>) -> PffResult<Self> {
        Self::open_with_options(path, PffOptions::default())
    }

    pub fn open_with_options(path: impl AsRef<Path>, options: PffOptions) -> PffResult<Self> {
        let handle = FileHandle::open(path)?;
        Ok(Self {
            inner: PffFileInner::read_from(handle, options)?,
        })
    }

    pub fn read_from(reader: Box<dyn PffReader>, options: PffOptions) -> PffResult<Self> {
        let handle = FileHandle::from_reader(reader)?;
        Ok(Self {
            inner: PffFileInner::read_from(handle, options)?,
        })
    }
}

/// One item of the hierarchy, as handed to consumers. Cheap to copy; the
/// arena retains ownership.
#[derive(Copy, Clone, Debug)]
pub struct Item {
    descriptor: ItemDescriptor,
    synthetic: bool,
}

impl Item {
    fn synthetic_root() -> Self {
        Self {
            descriptor: ItemDescriptor::new(NodeId::from(0), 0, 0, NodeId::from(0), false),
            synthetic: true,
        }
    }

    fn real(descriptor: ItemDescriptor) -> Self {
        Self {
            descriptor,
            synthetic: false,
        }
    }

    pub fn node(&self) -> NodeId {
        self.descriptor.node()
    }

    pub fn identifier(&self) -> u32 {
        u32::from(self.descriptor.node())
    }

    pub fn data_identifier(&self) -> Option<u64> {
        self.descriptor.data_identifier()
    }

    pub fn sub_node_identifier(&self) -> Option<u64> {
        self.descriptor.sub_node_identifier()
    }

    pub fn parent(&self) -> NodeId {
        self.descriptor.parent()
    }

    pub fn is_recovered(&self) -> bool {
        self.descriptor.is_recovered()
    }

    /// Whether this is the synthetic root above the root folder.
    pub fn is_synthetic_root(&self) -> bool {
        self.synthetic
    }
}

/// A seekable, idempotent byte stream over one descriptor's payload.
#[derive(Debug)]
pub struct ItemStream {
    dispatch: StreamDispatch,
}

#[derive(Debug)]
enum StreamDispatch {
    Ansi(DataStream<AnsiPffFile>),
    Unicode(DataStream<UnicodePffFile>),
    Unicode4k(DataStream<Unicode4kPffFile>),
}

impl ItemStream {
    /// Copy up to `buf.len()` bytes starting at logical `offset`,
    /// returning the number of bytes copied.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> PffResult<usize> {
        let copied = match &self.dispatch {
            StreamDispatch::Ansi(stream) => stream.read(offset, buf)?,
            StreamDispatch::Unicode(stream) => stream.read(offset, buf)?,
            StreamDispatch::Unicode4k(stream) => stream.read(offset, buf)?,
        };
        Ok(copied)
    }

    /// The whole payload as one buffer.
    pub fn read_to_end(&self) -> PffResult<Vec<u8>> {
        let data = match &self.dispatch {
            StreamDispatch::Ansi(stream) => stream.read_to_end()?,
            StreamDispatch::Unicode(stream) => stream.read_to_end()?,
            StreamDispatch::Unicode4k(stream) => stream.read_to_end()?,
        };
        Ok(data)
    }

    pub fn total_size(&self) -> u64 {
        match &self.dispatch {
            StreamDispatch::Ansi(stream) => stream.total_size(),
            StreamDispatch::Unicode(stream) => stream.total_size(),
            StreamDispatch::Unicode4k(stream) => stream.total_size(),
        }
    }
}

#[derive(Debug)]
enum PffDispatch {
    Ansi(AnsiPffFile),
    Unicode(UnicodePffFile),
    Unicode4k(Unicode4kPffFile),
}

/// An open container.
#[derive(Debug)]
pub struct Pff {
    dispatch: PffDispatch,
}

macro_rules! with_inner {
    ($self:expr, $inner:ident => $body:expr) => {
        match &$self.dispatch {
            PffDispatch::Ansi(file) => {
                let $inner = &file.inner;
                $body
            }
            PffDispatch::Unicode(file) => {
                let $inner = &file.inner;
                $body
            }
            PffDispatch::Unicode4k(file) => {
                let $inner = &file.inner;
                $body
            }
        }
    };
}

impl Pff {
    /// Open a container file, sniffing the variant from the header.
    pub fn open(path: impl AsRef<Path>) -> PffResult<Self> {
        Self::open_with_options(path, PffOptions::default())
    }

    pub fn open_with_options(path: impl AsRef<Path>, options: PffOptions) -> PffResult<Self> {
        let handle = FileHandle::open(path)?;
        Self::from_handle(handle, options)
    }

    /// Adopt a caller-supplied stream.
    pub fn read_from(reader: Box<dyn PffReader>, options: PffOptions) -> PffResult<Self> {
        let handle = FileHandle::from_reader(reader)?;
        Self::from_handle(handle, options)
    }

    fn from_handle(handle: FileHandle, options: PffOptions) -> PffResult<Self> {
        let version = sniff_version(&handle)?;
        let dispatch = match version {
            NdbVersion::Ansi => PffDispatch::Ansi(AnsiPffFile {
                inner: PffFileInner::read_from(handle, options)?,
            }),
            NdbVersion::Unicode => PffDispatch::Unicode(UnicodePffFile {
                inner: PffFileInner::read_from(handle, options)?,
            }),
            NdbVersion::Unicode4k => PffDispatch::Unicode4k(Unicode4kPffFile {
                inner: PffFileInner::read_from(handle, options)?,
            }),
        };
        Ok(Self { dispatch })
    }

    /// The on-disk variant.
    pub fn version(&self) -> NdbVersion {
        with_inner!(self, inner => inner.header.version())
    }

    /// PST or OST.
    pub fn content_type(&self) -> ContentType {
        with_inner!(self, inner => inner.header.content_type())
    }

    /// The encryption mode declared by the header (before any override).
    pub fn crypt_method(&self) -> NdbCryptMethod {
        with_inner!(self, inner => inner.header.crypt_method())
    }

    /// The container size in bytes.
    pub fn size(&self) -> u64 {
        with_inner!(self, inner => inner.handle.size())
    }

    /// Whether tolerated damage has been seen anywhere so far.
    pub fn is_corrupted(&self) -> bool {
        with_inner!(self, inner => inner.flags.is_corrupted())
    }

    /// Whether the decryption heuristic concluded the declared encryption
    /// mode is wrong for this container.
    pub fn forced_decryption(&self) -> bool {
        with_inner!(self, inner => inner.flags.forced_decryption())
    }

    /// Release caches and refuse further operations. Idempotent; reopening
    /// requires a fresh instance.
    pub fn close(&self) {
        with_inner!(self, inner => inner.close())
    }

    /// Request cancellation of the in-flight operation.
    pub fn signal_abort(&self) {
        self.abort_handle().signal()
    }

    /// A `Send + Sync` handle other threads can use to cancel operations.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            flag: with_inner!(self, inner => inner.flags.abort_flag()),
        }
    }

    pub fn set_codepage(&self, codepage: u16) -> PffResult<()> {
        validate_codepage(codepage)?;
        with_inner!(self, inner => inner.codepage.set(codepage));
        Ok(())
    }

    pub fn codepage(&self) -> u16 {
        with_inner!(self, inner => inner.codepage.get())
    }

    /// The string coder for the access codepage, when `codepage-strings`
    /// models it (US-ASCII callers decode bytes directly).
    pub fn codepage_coding(&self) -> Option<codepage_strings::Coding> {
        codepage_strings::Coding::new(self.codepage()).ok()
    }

    /// The synthetic root above the root folder and the parentless
    /// specials.
    pub fn root_item(&self) -> Item {
        Item::synthetic_root()
    }

    /// The unique self-parented descriptor, if the container has one.
    pub fn root_folder(&self) -> Option<Item> {
        with_inner!(self, inner => inner.item_tree.root_folder().copied().map(Item::real))
    }

    /// Look an item up by identifier in the main tree, then among
    /// recovered items. A clean miss is `None`.
    pub fn item_by_identifier(&self, identifier: u32) -> Option<Item> {
        with_inner!(self, inner => {
            if let Some(descriptor) = inner.item_tree.get(identifier) {
                return Some(Item::real(*descriptor));
            }
            inner
                .recovered
                .borrow()
                .as_ref()
                .and_then(|recovered| recovered.tree().get(identifier).copied())
                .map(Item::real)
        })
    }

    /// Children of an item, ordered by identifier.
    pub fn children(&self, item: &Item) -> PffResult<Vec<Item>> {
        with_inner!(self, inner => {
            inner.ensure_open()?;
            let parent = (!item.is_synthetic_root()).then(|| item.identifier());
            let tree = if item.is_recovered() {
                let recovered = inner.recovered.borrow();
                let Some(recovered) = recovered.as_ref() else {
                    return Ok(Vec::new());
                };
                return Ok(collect_children(recovered.tree(), parent));
            } else {
                &inner.item_tree
            };
            Ok(collect_children(tree, parent))
        })
    }

    /// Descriptors whose parent was absent at link time.
    pub fn number_of_orphans(&self) -> usize {
        with_inner!(self, inner => inner.item_tree.orphans().len())
    }

    pub fn orphan(&self, index: usize) -> Option<Item> {
        with_inner!(self, inner => {
            let id = *inner.item_tree.orphans().get(index)?;
            inner.item_tree.get(id).copied().map(Item::real)
        })
    }

    /// Scan unallocated space for deleted items; returns how many were
    /// recovered. The main item tree is unchanged afterwards.
    pub fn recover_items(&self, flags: RecoveryFlags) -> PffResult<usize> {
        with_inner!(self, inner => {
            inner.ensure_open()?;
            Ok(inner.recover_items(flags.union(inner.options.recovery_flags))?)
        })
    }

    pub fn number_of_recovered_items(&self) -> usize {
        with_inner!(self, inner => {
            inner
                .recovered
                .borrow()
                .as_ref()
                .map(|recovered| recovered.number_of_items())
                .unwrap_or_default()
        })
    }

    /// Recovered items indexed in scan (file) order.
    pub fn recovered_item(&self, index: usize) -> Option<Item> {
        with_inner!(self, inner => {
            let recovered = inner.recovered.borrow();
            let recovered = recovered.as_ref()?;
            let id = *recovered.tree().insertion_order().get(index)?;
            recovered.tree().get(id).copied().map(Item::real)
        })
    }

    /// Recovered offsets-index values whose identifier collided with an
    /// earlier candidate; the earlier one is in effect.
    pub fn ambiguous_recovered_offsets(&self) -> Vec<RecoveredOffset> {
        with_inner!(self, inner => {
            inner
                .recovered
                .borrow()
                .as_ref()
                .map(|recovered| recovered.ambiguous_offsets().to_vec())
                .unwrap_or_default()
        })
    }

    /// Number of unallocated ranges of the given kind.
    pub fn number_of_unallocated_blocks(&self, kind: UnallocatedBlockKind) -> PffResult<usize> {
        Ok(self.unallocated_blocks(kind)?.len())
    }

    pub fn unallocated_block(
        &self,
        kind: UnallocatedBlockKind,
        index: usize,
    ) -> PffResult<Option<(u64, u64)>> {
        Ok(self.unallocated_blocks(kind)?.get(index).copied())
    }

    fn unallocated_blocks(&self, kind: UnallocatedBlockKind) -> PffResult<Vec<(u64, u64)>> {
        with_inner!(self, inner => {
            inner.ensure_open()?;
            if let Some(recovered) = inner.recovered.borrow().as_ref() {
                return Ok(recovered.unallocated_ranges(kind).to_vec());
            }
            let (data, page) = inner.unallocated_ranges(RecoveryFlags::default())?;
            Ok(match kind {
                UnallocatedBlockKind::Data => data,
                UnallocatedBlockKind::Page => page,
            })
        })
    }

    /// A byte stream over an item's payload.
    pub fn data_stream(&self, item: &Item) -> PffResult<ItemStream> {
        if item.is_synthetic_root() {
            return Err(PffError::Argument(
                "the synthetic root has no data stream".into(),
            ));
        }
        self.data_stream_inner(
            item.node(),
            item.data_identifier().unwrap_or_default(),
            item.is_recovered(),
        )
    }

    /// A byte stream over the payload of a descriptor looked up by
    /// identifier. A clean miss is `None`.
    pub fn data_stream_by_identifier(&self, identifier: u32) -> PffResult<Option<ItemStream>> {
        let Some(item) = self.item_by_identifier(identifier) else {
            return Ok(None);
        };
        self.data_stream(&item).map(Some)
    }

    /// A byte stream over a local descriptor's payload, looked up by
    /// sub-identifier in the item's local-descriptors tree. A clean miss is
    /// `None`.
    pub fn local_descriptor_stream(
        &self,
        item: &Item,
        sub_identifier: u32,
    ) -> PffResult<Option<ItemStream>> {
        let Some(sub_node) = item.sub_node_identifier() else {
            return Ok(None);
        };
        let use_recovered = item.is_recovered();
        let sub = NodeId::from(sub_identifier);

        with_inner!(self, inner => {
            inner.ensure_open()?;
            let Some(value) = inner.find_sub_node(sub_node, sub, use_recovered)? else {
                return Ok(None);
            };
            let data = value.data().map(|bid| bid.into_u64()).unwrap_or_default();
            self.data_stream_inner(sub, data, use_recovered).map(Some)
        })
    }

    fn data_stream_inner(
        &self,
        node: NodeId,
        data: u64,
        use_recovered: bool,
    ) -> PffResult<ItemStream> {
        match &self.dispatch {
            PffDispatch::Ansi(file) => {
                file.inner.ensure_open()?;
                let stream = file.inner.open_data_stream(node, data, use_recovered)?;
                Ok(ItemStream {
                    dispatch: StreamDispatch::Ansi(stream),
                })
            }
            PffDispatch::Unicode(file) => {
                file.inner.ensure_open()?;
                let stream = file.inner.open_data_stream(node, data, use_recovered)?;
                Ok(ItemStream {
                    dispatch: StreamDispatch::Unicode(stream),
                })
            }
            PffDispatch::Unicode4k(file) => {
                file.inner.ensure_open()?;
                let stream = file.inner.open_data_stream(node, data, use_recovered)?;
                Ok(ItemStream {
                    dispatch: StreamDispatch::Unicode4k(stream),
                })
            }
        }
    }

    /// Start or stop recording the byte ranges read from the container.
    pub fn record_read_ranges(&self, enable: bool) {
        with_inner!(self, inner => inner.handle.record_read_ranges(enable))
    }

    /// The `(offset, length)` pairs read since recording was enabled.
    pub fn read_ranges(&self) -> Vec<(u64, u64)> {
        with_inner!(self, inner => inner.handle.read_ranges())
    }
}

fn collect_children(tree: &ItemTree, parent: Option<u32>) -> Vec<Item> {
    tree.children(parent)
        .iter()
        .filter_map(|id| tree.get(*id).copied())
        .map(Item::real)
        .collect()
}

fn sniff_version(handle: &FileHandle) -> PffResult<NdbVersion> {
    if handle.size() < 12 {
        return Err(NdbError::TruncatedHeader(handle.size()).into());
    }

    let mut buffer = [0_u8; 12];
    handle.read_exact_at(0, &mut buffer)?;

    let magic = u32::from_le_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]);
    if magic != u32::from_le_bytes(*b"!BDN") {
        return Err(NdbError::InvalidHeaderMagicValue(magic).into());
    }

    let version = u16::from_le_bytes([buffer[10], buffer[11]]);
    Ok(NdbVersion::try_from(version)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codepage_validation() {
        assert!(validate_codepage(1252).is_ok());
        assert!(validate_codepage(932).is_ok());
        assert!(validate_codepage(20127).is_ok());
        assert!(matches!(
            validate_codepage(65001),
            Err(PffError::Argument(..))
        ));
    }

    #[test]
    fn test_error_classification() {
        assert!(matches!(
            PffError::from(NdbError::UnsupportedVersion(16)),
            PffError::Unsupported(..)
        ));
        assert!(matches!(
            PffError::from(NdbError::TruncatedHeader(10)),
            PffError::Corrupted(..)
        ));
        assert!(matches!(
            PffError::from(NdbError::Cancelled),
            PffError::Cancelled
        ));
        assert!(matches!(
            PffError::from(NdbError::InvalidIndexEntryCount(300)),
            PffError::Corrupted(..)
        ));
    }
}
