//! ## Item tree
//!
//! The user-visible hierarchy: descriptors keyed by identifier and linked by
//! parent identifier, held in an arena so self-referential and cyclic parent
//! pointers cannot produce ownership cycles. A synthetic root collects the
//! unique self-parented descriptor (the root folder) and any parentless
//! specials; descriptors whose parent cannot be resolved go to the orphan
//! list and are adopted if their parent arrives later.

use std::collections::BTreeMap;
use tracing::warn;

use crate::ndb::{node_id::NodeId, NdbError, NdbResult, MAXIMUM_RECURSION_DEPTH};

/// One descriptor of the hierarchy, as the consumer sees it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ItemDescriptor {
    node: NodeId,
    data: u64,
    sub_node: u64,
    parent: NodeId,
    recovered: bool,
}

impl ItemDescriptor {
    pub fn new(node: NodeId, data: u64, sub_node: u64, parent: NodeId, recovered: bool) -> Self {
        Self {
            node,
            data,
            sub_node,
            parent,
            recovered,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The raw data identifier, if the descriptor has payload.
    pub fn data_identifier(&self) -> Option<u64> {
        (self.data != 0).then_some(self.data)
    }

    /// The raw sub-node (local descriptors) identifier, if any.
    pub fn sub_node_identifier(&self) -> Option<u64> {
        (self.sub_node != 0).then_some(self.sub_node)
    }

    pub fn parent(&self) -> NodeId {
        self.parent
    }

    pub fn is_recovered(&self) -> bool {
        self.recovered
    }
}

struct ItemNode {
    descriptor: ItemDescriptor,
    children: Vec<u32>,
}

/// The arena. Parent/child links are identifiers, never pointers.
pub struct ItemTree {
    nodes: BTreeMap<u32, ItemNode>,
    order: Vec<u32>,
    top_level: Vec<u32>,
    root_folder: Option<u32>,
    orphans: Vec<u32>,
}

impl ItemTree {
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            order: Vec::new(),
            top_level: Vec::new(),
            root_folder: None,
            orphans: Vec::new(),
        }
    }

    /// Insert one descriptor, resolving a missing parent at most once
    /// through `lookup` and chasing the parent chain no deeper than the
    /// recursion limit.
    pub fn insert(
        &mut self,
        descriptor: ItemDescriptor,
        lookup: &mut dyn FnMut(NodeId) -> NdbResult<Option<ItemDescriptor>>,
    ) -> NdbResult<()> {
        self.insert_inner(descriptor, lookup, 0)
    }

    fn insert_inner(
        &mut self,
        descriptor: ItemDescriptor,
        lookup: &mut dyn FnMut(NodeId) -> NdbResult<Option<ItemDescriptor>>,
        depth: u32,
    ) -> NdbResult<()> {
        if depth >= MAXIMUM_RECURSION_DEPTH {
            return Err(NdbError::ItemTreeDepthExceeded(depth));
        }

        let id = u32::from(descriptor.node());
        if self.nodes.contains_key(&id) {
            return Ok(());
        }

        let parent = u32::from(descriptor.parent());
        if parent == id {
            if self.root_folder.is_some() {
                return Err(NdbError::DuplicateRootFolder(descriptor.node()));
            }
            self.add_node(descriptor);
            self.root_folder = Some(id);
            sorted_insert(&mut self.top_level, id);
        } else if parent == 0 {
            self.add_node(descriptor);
            sorted_insert(&mut self.top_level, id);
        } else if self.nodes.contains_key(&parent) {
            self.add_node(descriptor);
            self.attach(parent, id);
        } else {
            match lookup(descriptor.parent())? {
                Some(parent_descriptor) => {
                    self.insert_inner(parent_descriptor, lookup, depth + 1)?;
                    self.add_node(descriptor);
                    if self.nodes.contains_key(&parent) {
                        self.attach(parent, id);
                    } else {
                        self.push_orphan(id);
                    }
                }
                None => {
                    self.add_node(descriptor);
                    self.push_orphan(id);
                }
            }
        }

        self.adopt_orphans(id);
        Ok(())
    }

    fn add_node(&mut self, descriptor: ItemDescriptor) {
        let id = u32::from(descriptor.node());
        self.nodes.insert(
            id,
            ItemNode {
                descriptor,
                children: Vec::new(),
            },
        );
        self.order.push(id);
    }

    fn attach(&mut self, parent: u32, child: u32) {
        if let Some(node) = self.nodes.get_mut(&parent) {
            sorted_insert(&mut node.children, child);
        }
    }

    fn push_orphan(&mut self, id: u32) {
        warn!(
            name: "PffOrphanDescriptor",
            descriptor = id,
            "descriptor parent not present, adding to orphan list"
        );
        self.orphans.push(id);
    }

    /// Adopt any orphans that were waiting for `id` to arrive.
    fn adopt_orphans(&mut self, id: u32) {
        let waiting: Vec<u32> = self
            .orphans
            .iter()
            .copied()
            .filter(|orphan| {
                self.nodes
                    .get(orphan)
                    .map(|node| u32::from(node.descriptor.parent()) == id)
                    .unwrap_or_default()
            })
            .collect();

        if waiting.is_empty() {
            return;
        }

        self.orphans.retain(|orphan| !waiting.contains(orphan));
        for orphan in waiting {
            self.attach(id, orphan);
        }
    }

    pub fn get(&self, id: u32) -> Option<&ItemDescriptor> {
        self.nodes.get(&id).map(|node| &node.descriptor)
    }

    /// The unique self-parented descriptor, if the container has one.
    pub fn root_folder(&self) -> Option<&ItemDescriptor> {
        self.root_folder.and_then(|id| self.get(id))
    }

    /// Children of a node, ordered by identifier. `None` addresses the
    /// synthetic root.
    pub fn children(&self, parent: Option<u32>) -> &[u32] {
        match parent {
            None => &self.top_level,
            Some(id) => self
                .nodes
                .get(&id)
                .map(|node| node.children.as_slice())
                .unwrap_or(&[]),
        }
    }

    pub fn orphans(&self) -> &[u32] {
        &self.orphans
    }

    /// Identifiers in insertion order (file order for a built tree).
    pub fn insertion_order(&self) -> &[u32] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ItemDescriptor> {
        self.nodes.values().map(|node| &node.descriptor)
    }
}

impl Default for ItemTree {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_insert(list: &mut Vec<u32>, value: u32) {
    if let Err(position) = list.binary_search(&value) {
        list.insert(position, value);
    }
}
