//! ## Sub-node trees (local descriptors)
//!
//! A small per-item tree stored in the data of a descriptor's sub-node
//! identifier. It maps sub-identifiers to the data of parts that hang off
//! the item (attachment bytes, embedded messages) and, recursively, to
//! further sub-node trees. Blocks carry signature 0x02; the same
//! branch/leaf discipline as an index applies, with the container driving
//! the descent.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

use super::{block_id::*, node_id::*, *};
use crate::PffFile;

pub const SUB_NODE_BLOCK_SIGNATURE: u8 = 0x02;

/// A leaf value: one local descriptor.
pub trait SubNodeLeafEntry: Sized + Copy + std::fmt::Debug {
    type Block: BlockId;

    fn read(f: &mut dyn Read) -> NdbResult<Self>;
    fn node(&self) -> NodeId;
    fn data(&self) -> Option<Self::Block>;
    fn sub_node(&self) -> Option<Self::Block>;

    fn key(&self) -> u64 {
        u64::from(u32::from(self.node()))
    }
}

/// A branch entry pointing at a child sub-node block.
pub trait SubNodeBranchEntry: Sized + Copy + std::fmt::Debug {
    type Block: BlockId;

    fn read(f: &mut dyn Read) -> NdbResult<Self>;
    fn key(&self) -> u64;
    fn child(&self) -> Self::Block;
}

#[derive(Copy, Clone, Debug)]
pub struct UnicodeSubNodeLeafEntry {
    node: NodeId,
    data: Option<UnicodeBlockId>,
    sub_node: Option<UnicodeBlockId>,
}

impl SubNodeLeafEntry for UnicodeSubNodeLeafEntry {
    type Block = UnicodeBlockId;

    fn read(f: &mut dyn Read) -> NdbResult<Self> {
        let node = f.read_u64::<LittleEndian>()?;
        let node = NodeId::from(node as u32);
        let data = UnicodeBlockId::read(f)?;
        let sub_node = UnicodeBlockId::read(f)?;

        Ok(Self {
            node,
            data: (data.into_u64() != 0).then_some(data),
            sub_node: (sub_node.into_u64() != 0).then_some(sub_node),
        })
    }

    fn node(&self) -> NodeId {
        self.node
    }

    fn data(&self) -> Option<UnicodeBlockId> {
        self.data
    }

    fn sub_node(&self) -> Option<UnicodeBlockId> {
        self.sub_node
    }
}

#[derive(Copy, Clone, Debug)]
pub struct AnsiSubNodeLeafEntry {
    node: NodeId,
    data: Option<AnsiBlockId>,
    sub_node: Option<AnsiBlockId>,
}

impl SubNodeLeafEntry for AnsiSubNodeLeafEntry {
    type Block = AnsiBlockId;

    fn read(f: &mut dyn Read) -> NdbResult<Self> {
        let node = NodeId::read(f)?;
        let data = AnsiBlockId::read(f)?;
        let sub_node = AnsiBlockId::read(f)?;

        Ok(Self {
            node,
            data: (data.into_u64() != 0).then_some(data),
            sub_node: (sub_node.into_u64() != 0).then_some(sub_node),
        })
    }

    fn node(&self) -> NodeId {
        self.node
    }

    fn data(&self) -> Option<AnsiBlockId> {
        self.data
    }

    fn sub_node(&self) -> Option<AnsiBlockId> {
        self.sub_node
    }
}

#[derive(Copy, Clone, Debug)]
pub struct UnicodeSubNodeBranchEntry {
    key: u64,
    child: UnicodeBlockId,
}

impl SubNodeBranchEntry for UnicodeSubNodeBranchEntry {
    type Block = UnicodeBlockId;

    fn read(f: &mut dyn Read) -> NdbResult<Self> {
        let key = f.read_u64::<LittleEndian>()?;
        let child = UnicodeBlockId::read(f)?;
        Ok(Self { key, child })
    }

    fn key(&self) -> u64 {
        self.key
    }

    fn child(&self) -> UnicodeBlockId {
        self.child
    }
}

#[derive(Copy, Clone, Debug)]
pub struct AnsiSubNodeBranchEntry {
    key: u32,
    child: AnsiBlockId,
}

impl SubNodeBranchEntry for AnsiSubNodeBranchEntry {
    type Block = AnsiBlockId;

    fn read(f: &mut dyn Read) -> NdbResult<Self> {
        let key = f.read_u32::<LittleEndian>()?;
        let child = AnsiBlockId::read(f)?;
        Ok(Self { key, child })
    }

    fn key(&self) -> u64 {
        u64::from(self.key)
    }

    fn child(&self) -> AnsiBlockId {
        self.child
    }
}

pub enum SubNodeBlock<Pff: PffFile> {
    Branch(Vec<Pff::SubBranchEntry>),
    Leaf(Vec<Pff::SubLeafEntry>),
}

impl<Pff: PffFile> SubNodeBlock<Pff> {
    /// Parse the payload of a sub-node block that has already passed block
    /// validation.
    pub fn parse(data: &[u8]) -> NdbResult<Self> {
        let mut cursor = Cursor::new(data);

        let signature = cursor.read_u8()?;
        if signature != SUB_NODE_BLOCK_SIGNATURE {
            return Err(NdbError::InvalidSubNodeSignature(signature));
        }

        let level = cursor.read_u8()?;
        if u32::from(level) >= MAXIMUM_RECURSION_DEPTH {
            return Err(NdbError::InvalidSubNodeLevel(level));
        }

        let entry_count = cursor.read_u16::<LittleEndian>()?;

        let entry_size = if level == 0 {
            Pff::SUB_LEAF_ENTRY_SIZE
        } else {
            Pff::SUB_BRANCH_ENTRY_SIZE
        };
        let entries_size = usize::from(entry_count)
            .checked_mul(entry_size)
            .ok_or(NdbError::InvalidSubNodeEntryCount(entry_count))?;
        if Pff::SUB_HEADER_SIZE + entries_size > data.len() {
            return Err(NdbError::InvalidSubNodeEntryCount(entry_count));
        }

        let mut cursor = Cursor::new(&data[Pff::SUB_HEADER_SIZE..]);
        if level == 0 {
            let entries = (0..entry_count)
                .map(|_| Pff::SubLeafEntry::read(&mut cursor))
                .collect::<NdbResult<Vec<_>>>()?;
            Ok(Self::Leaf(entries))
        } else {
            let entries = (0..entry_count)
                .map(|_| Pff::SubBranchEntry::read(&mut cursor))
                .collect::<NdbResult<Vec<_>>>()?;
            Ok(Self::Branch(entries))
        }
    }

    /// The child block to descend into for `key`.
    pub fn branch_child(&self, key: u64) -> Option<Pff::SubBranchEntry> {
        match self {
            Self::Branch(entries) => entries
                .iter()
                .take_while(|entry| entry.key() <= key)
                .last()
                .copied(),
            Self::Leaf(..) => None,
        }
    }

    /// The leaf value with exactly this key, if present.
    pub fn find_leaf(&self, key: u64) -> Option<Pff::SubLeafEntry> {
        match self {
            Self::Leaf(entries) => entries.iter().find(|entry| entry.key() == key).copied(),
            Self::Branch(..) => None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf(..))
    }

    pub fn leaf_entries(&self) -> &[Pff::SubLeafEntry] {
        match self {
            Self::Leaf(entries) => entries,
            Self::Branch(..) => &[],
        }
    }
}
