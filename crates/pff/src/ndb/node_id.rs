//! ## Node identifiers
//!
//! A descriptor identifier carries its node type in the low 5 bits and a
//! file-unique index above them. The 64-bit variants store identifiers as
//! 64-bit index keys, but only the low 32 bits are meaningful.

use byteorder::{LittleEndian, ReadBytesExt};
use std::{
    fmt::Debug,
    io::{self, Read},
};

use super::{NdbError, NdbResult};

/// `nidType`
///
/// ### See also
/// [NodeId]
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum NodeIdType {
    /// Heap node
    HeapNode = 0x00,
    /// Internal node (message store, name-to-id map, ...)
    Internal = 0x01,
    /// Normal Folder object
    NormalFolder = 0x02,
    /// Search Folder object
    SearchFolder = 0x03,
    /// Normal Message object
    NormalMessage = 0x04,
    /// Attachment object
    Attachment = 0x05,
    /// Queue of changed objects for search Folder objects
    SearchUpdateQueue = 0x06,
    /// Defines the search criteria for a search Folder object
    SearchCriteria = 0x07,
    /// Folder associated information Message object
    AssociatedMessage = 0x08,
    /// Internal, persisted view-related
    ContentsTableIndex = 0x0A,
    /// Receive Folder object (Inbox)
    ReceiveFolderTable = 0x0B,
    /// Outbound queue (Outbox)
    OutgoingQueueTable = 0x0C,
    /// Hierarchy table
    HierarchyTable = 0x0D,
    /// Contents table
    ContentsTable = 0x0E,
    /// Folder associated information contents table
    AssociatedContentsTable = 0x0F,
    /// Contents table of a search Folder object
    SearchContentsTable = 0x10,
    /// Attachment table
    AttachmentTable = 0x11,
    /// Recipient table
    RecipientTable = 0x12,
    /// Internal, persisted view-related
    SearchTableIndex = 0x13,
    /// Lists, tables, and properties
    ListsTablesProperties = 0x1F,
}

impl TryFrom<u8> for NodeIdType {
    type Error = NdbError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(NodeIdType::HeapNode),
            0x01 => Ok(NodeIdType::Internal),
            0x02 => Ok(NodeIdType::NormalFolder),
            0x03 => Ok(NodeIdType::SearchFolder),
            0x04 => Ok(NodeIdType::NormalMessage),
            0x05 => Ok(NodeIdType::Attachment),
            0x06 => Ok(NodeIdType::SearchUpdateQueue),
            0x07 => Ok(NodeIdType::SearchCriteria),
            0x08 => Ok(NodeIdType::AssociatedMessage),
            0x0A => Ok(NodeIdType::ContentsTableIndex),
            0x0B => Ok(NodeIdType::ReceiveFolderTable),
            0x0C => Ok(NodeIdType::OutgoingQueueTable),
            0x0D => Ok(NodeIdType::HierarchyTable),
            0x0E => Ok(NodeIdType::ContentsTable),
            0x0F => Ok(NodeIdType::AssociatedContentsTable),
            0x10 => Ok(NodeIdType::SearchContentsTable),
            0x11 => Ok(NodeIdType::AttachmentTable),
            0x12 => Ok(NodeIdType::RecipientTable),
            0x13 => Ok(NodeIdType::SearchTableIndex),
            0x1F => Ok(NodeIdType::ListsTablesProperties),
            _ => Err(NdbError::InvalidNodeIdType(value)),
        }
    }
}

pub const MAX_NODE_INDEX: u32 = 1_u32.rotate_right(5) - 1;

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub fn new(id_type: NodeIdType, index: u32) -> NdbResult<Self> {
        let id_type = id_type as u8;
        if id_type >> 5 != 0 {
            return Err(NdbError::InvalidNodeIdType(id_type));
        }

        let shifted_index = index.rotate_left(5);
        if shifted_index & 0x1F != 0 {
            return Err(NdbError::InvalidNodeIndex(index));
        };

        Ok(Self(shifted_index | u32::from(id_type)))
    }

    pub fn read(f: &mut dyn Read) -> io::Result<Self> {
        let value = f.read_u32::<LittleEndian>()?;
        Ok(Self(value))
    }

    pub fn id_type(&self) -> NdbResult<NodeIdType> {
        let nid_type = self.0 & 0x1F;
        NodeIdType::try_from(nid_type as u8)
    }

    pub fn index(&self) -> u32 {
        self.0 >> 5
    }

    /// Whether the node's payload is expected to start with a property table
    /// block. The decryption heuristic only trusts nodes on this list.
    pub fn is_property_table_node(&self) -> bool {
        if *self == NID_MESSAGE_STORE || *self == NID_NAME_TO_ID_MAP {
            return true;
        }

        matches!(
            self.id_type(),
            Ok(NodeIdType::NormalFolder
                | NodeIdType::SearchFolder
                | NodeIdType::NormalMessage
                | NodeIdType::AssociatedMessage
                | NodeIdType::Attachment
                | NodeIdType::RecipientTable
                | NodeIdType::AssociatedContentsTable)
        )
    }
}

impl Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Ok(id_type) = self.id_type() else {
            return write!(f, "NodeId {{ invalid: 0x{:08X} }}", u32::from(*self));
        };

        write!(f, "NodeId {{ {:?}: 0x{:X} }}", id_type, self.index())
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<NodeId> for u32 {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

/// Message store node.
pub const NID_MESSAGE_STORE: NodeId = NodeId(0x21);

/// Named properties map.
pub const NID_NAME_TO_ID_MAP: NodeId = NodeId(0x61);

/// Root mailbox Folder object.
pub const NID_ROOT_FOLDER: NodeId = NodeId(0x122);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nid_index_overflow() {
        let Err(NdbError::InvalidNodeIndex(value)) =
            NodeId::new(NodeIdType::HeapNode, MAX_NODE_INDEX + 1)
        else {
            panic!("NodeId should be out of range");
        };
        assert_eq!(value, MAX_NODE_INDEX + 1);
    }

    #[test]
    fn test_folder_type_tag() {
        let node = NodeId::new(NodeIdType::NormalFolder, 0x9).unwrap();
        assert_eq!(u32::from(node) & 0x1F, 0x02);
        assert_eq!(node.index(), 0x9);
    }

    #[test]
    fn test_property_table_nodes() {
        assert!(NID_MESSAGE_STORE.is_property_table_node());
        assert!(NID_NAME_TO_ID_MAP.is_property_table_node());
        assert!(NID_ROOT_FOLDER.is_property_table_node());
        let queue = NodeId::new(NodeIdType::SearchUpdateQueue, 0x10).unwrap();
        assert!(!queue.is_property_table_node());
    }
}
