//! Annotation graph
//!
//! One annotator's (or the curator's) annotations over a document. Nodes live
//! in an arena and are referred to by [`Address`], an index that is only valid
//! in the graph that issued it. Links between annotations (relation endpoints,
//! slot fillers, chain successors) are stored as addresses, never as owning
//! edges.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::position::Position;
use crate::value::FeatureValue;
use crate::AnnotationError;

// ============================================================================
// Addresses and anchors
// ============================================================================

/// Graph-local address of an annotation node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(u32);

impl Address {
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where an annotation is attached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anchor {
    /// Text span `[begin, end)`
    Span { begin: usize, end: usize },
    /// Arc between two annotations of the same graph
    Relation { source: Address, target: Address },
    /// Member of a chain with an optional successor
    ChainLink {
        begin: usize,
        end: usize,
        #[serde(default)]
        next: Option<Address>,
    },
}

impl Anchor {
    pub fn span(begin: usize, end: usize) -> Self {
        assert!(begin <= end, "span begin {begin} is after end {end}");
        Self::Span { begin, end }
    }

    pub fn relation(source: Address, target: Address) -> Self {
        Self::Relation { source, target }
    }

    pub fn chain_link(begin: usize, end: usize) -> Self {
        assert!(begin <= end, "chain link begin {begin} is after end {end}");
        Self::ChainLink {
            begin,
            end,
            next: None,
        }
    }

    /// Text extent for span-like anchors
    pub fn extent(&self) -> Option<(usize, usize)> {
        match self {
            Self::Span { begin, end } | Self::ChainLink { begin, end, .. } => Some((*begin, *end)),
            Self::Relation { .. } => None,
        }
    }
}

/// An annotation node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationNode {
    /// Layer name
    pub layer: String,

    /// Attachment
    pub anchor: Anchor,

    /// Feature values by feature name; absent means null
    #[serde(default)]
    pub features: BTreeMap<String, FeatureValue>,
}

impl AnnotationNode {
    pub fn feature(&self, name: &str) -> Option<&FeatureValue> {
        self.features.get(name)
    }

    /// Successor of a chain link
    pub fn next(&self) -> Option<Address> {
        match self.anchor {
            Anchor::ChainLink { next, .. } => next,
            _ => None,
        }
    }
}

// ============================================================================
// Graph
// ============================================================================

/// Arena of annotation nodes over one document text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationGraph {
    /// Document text, if known
    #[serde(default)]
    text: String,

    /// Node slots; removed nodes leave a hole so addresses stay stable
    nodes: Vec<Option<AnnotationNode>>,
}

impl AnnotationGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty graph over a document text
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            nodes: Vec::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Covered text of a span-like node
    pub fn covered_text(&self, address: Address) -> Option<&str> {
        let (begin, end) = self.get(address)?.anchor.extent()?;
        self.text.get(begin..end)
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, address: Address) -> bool {
        self.get(address).is_some()
    }

    pub fn get(&self, address: Address) -> Option<&AnnotationNode> {
        self.nodes.get(address.index()).and_then(Option::as_ref)
    }

    fn get_mut(&mut self, address: Address) -> Option<&mut AnnotationNode> {
        self.nodes.get_mut(address.index()).and_then(Option::as_mut)
    }

    /// Iterate over live nodes in address order
    pub fn nodes(&self) -> impl Iterator<Item = (Address, &AnnotationNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|n| (Address::new(i as u32), n)))
    }

    /// Iterate over live nodes of one layer in address order
    pub fn nodes_on<'a>(
        &'a self,
        layer: &'a str,
    ) -> impl Iterator<Item = (Address, &'a AnnotationNode)> + 'a {
        self.nodes().filter(move |(_, n)| n.layer == layer)
    }

    /// Start building a new node
    pub fn annotate(&mut self, layer: impl Into<String>, anchor: Anchor) -> AnnotationBuilder<'_> {
        AnnotationBuilder {
            graph: self,
            node: AnnotationNode {
                layer: layer.into(),
                anchor,
                features: BTreeMap::new(),
            },
        }
    }

    /// Append a node and return its address
    pub fn add(&mut self, node: AnnotationNode) -> Address {
        let address = Address::new(self.nodes.len() as u32);
        self.nodes.push(Some(node));
        address
    }

    /// Remove a node. Links pointing at it are left dangling; diff skips
    /// dangling references and merge refuses to follow them.
    pub fn remove(&mut self, address: Address) -> Option<AnnotationNode> {
        self.nodes.get_mut(address.index()).and_then(Option::take)
    }

    /// Set or clear a feature value
    pub fn set_feature(
        &mut self,
        address: Address,
        name: &str,
        value: Option<FeatureValue>,
    ) -> Result<Option<FeatureValue>, AnnotationError> {
        let node = self
            .get_mut(address)
            .ok_or(AnnotationError::UnknownAddress(address))?;
        Ok(match value {
            Some(value) => node.features.insert(name.to_string(), value),
            None => node.features.remove(name),
        })
    }

    /// Set the successor of a chain link
    pub fn set_next(
        &mut self,
        address: Address,
        next: Option<Address>,
    ) -> Result<Option<Address>, AnnotationError> {
        if let Some(successor) = next {
            if !self.contains(successor) {
                return Err(AnnotationError::UnknownAddress(successor));
            }
        }
        let node = self
            .get_mut(address)
            .ok_or(AnnotationError::UnknownAddress(address))?;
        match &mut node.anchor {
            Anchor::ChainLink { next: slot, .. } => Ok(std::mem::replace(slot, next)),
            _ => Err(AnnotationError::InvalidChain(format!(
                "annotation {address} is not a chain link"
            ))),
        }
    }

    /// Position of a node, resolving relation endpoints. Returns `None` for
    /// unknown addresses and for relations with dangling or non-span
    /// endpoints.
    pub fn position_of(&self, address: Address) -> Option<Position> {
        let node = self.get(address)?;
        match node.anchor {
            Anchor::Span { begin, end } | Anchor::ChainLink { begin, end, .. } => {
                Some(Position::span(begin, end))
            }
            Anchor::Relation { source, target } => {
                let source = self.get(source)?.anchor.extent()?;
                let target = self.get(target)?.anchor.extent()?;
                Some(Position::relation(source, target))
            }
        }
    }

    /// Chain member whose successor is `address`
    pub fn chain_predecessor(&self, address: Address) -> Option<Address> {
        self.nodes()
            .find(|(_, n)| n.next() == Some(address))
            .map(|(a, _)| a)
    }

    /// Walk a chain starting at `address` (inclusive). Stops if a cycle is
    /// encountered.
    pub fn chain_from(&self, address: Address) -> Vec<Address> {
        let mut members = Vec::new();
        let mut current = Some(address);
        while let Some(member) = current {
            if members.contains(&member) || !self.contains(member) {
                break;
            }
            members.push(member);
            current = self.get(member).and_then(AnnotationNode::next);
        }
        members
    }

    /// Chains of a layer, each listed from its head
    pub fn chains(&self, layer: &str) -> Vec<Vec<Address>> {
        self.nodes_on(layer)
            .filter(|(a, n)| {
                matches!(n.anchor, Anchor::ChainLink { .. }) && self.chain_predecessor(*a).is_none()
            })
            .map(|(a, _)| self.chain_from(a))
            .collect()
    }

    /// Open a transaction. Changes made through it are undone when it is
    /// dropped without [`Transaction::commit`].
    pub fn transaction(&mut self) -> Transaction<'_> {
        let mark = self.nodes.len();
        Transaction {
            graph: self,
            mark,
            journal: Vec::new(),
            committed: false,
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder returned by [`AnnotationGraph::annotate`]
pub struct AnnotationBuilder<'g> {
    graph: &'g mut AnnotationGraph,
    node: AnnotationNode,
}

impl<'g> AnnotationBuilder<'g> {
    /// Set a feature value
    pub fn with_feature(mut self, name: impl Into<String>, value: impl Into<FeatureValue>) -> Self {
        self.node.features.insert(name.into(), value.into());
        self
    }

    /// Add the node to the graph
    pub fn add(self) -> Address {
        self.graph.add(self.node)
    }
}

// ============================================================================
// Transaction
// ============================================================================

enum Undo {
    Feature {
        address: Address,
        name: String,
        previous: Option<FeatureValue>,
    },
    Next {
        address: Address,
        previous: Option<Address>,
    },
}

/// All-or-nothing change set over a graph
///
/// Nodes created inside the transaction are appended after the mark taken
/// when it was opened; rollback truncates the arena back to that mark and
/// replays the journal backwards for everything else.
pub struct Transaction<'g> {
    graph: &'g mut AnnotationGraph,
    mark: usize,
    journal: Vec<Undo>,
    committed: bool,
}

impl<'g> Transaction<'g> {
    /// Read access to the graph including uncommitted changes
    pub fn graph(&self) -> &AnnotationGraph {
        &*self.graph
    }

    /// Append a node
    pub fn add(&mut self, node: AnnotationNode) -> Address {
        self.graph.add(node)
    }

    /// Set or clear a feature value
    pub fn set_feature(
        &mut self,
        address: Address,
        name: &str,
        value: Option<FeatureValue>,
    ) -> Result<(), AnnotationError> {
        let previous = self.graph.set_feature(address, name, value)?;
        if address.index() < self.mark {
            self.journal.push(Undo::Feature {
                address,
                name: name.to_string(),
                previous,
            });
        }
        Ok(())
    }

    /// Set the successor of a chain link
    pub fn set_next(&mut self, address: Address, next: Option<Address>) -> Result<(), AnnotationError> {
        let previous = self.graph.set_next(address, next)?;
        if address.index() < self.mark {
            self.journal.push(Undo::Next { address, previous });
        }
        Ok(())
    }

    /// Whether anything was changed so far
    pub fn is_dirty(&self) -> bool {
        !self.journal.is_empty() || self.graph.nodes.len() > self.mark
    }

    /// Keep all changes
    pub fn commit(mut self) {
        self.committed = true;
    }

    fn rollback(&mut self) {
        while let Some(undo) = self.journal.pop() {
            // Journal entries only reference nodes that existed before the
            // transaction, so these calls cannot fail.
            match undo {
                Undo::Feature {
                    address,
                    name,
                    previous,
                } => {
                    let _ = self.graph.set_feature(address, &name, previous);
                }
                Undo::Next { address, previous } => {
                    if let Some(node) = self.graph.get_mut(address) {
                        if let Anchor::ChainLink { next, .. } = &mut node.anchor {
                            *next = previous;
                        }
                    }
                }
            }
        }
        self.graph.nodes.truncate(self.mark);
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.rollback();
        }
    }
}
