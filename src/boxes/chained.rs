//! Refinement chains of boxes
//!
//! Nodes live in an arena and point at their parent by index, so a chain
//! serializes as a flat list and rebuilds without reconstructing a graph.
//! A parent index always refers to an earlier node, which keeps the parent
//! relation acyclic.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ParameterBox;
use crate::value::Assignment;
use crate::{Error, Result};

/// Index of a node inside a [`ChainedBox`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(usize);

impl NodeId {
    /// Arena position.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Serialized form of one chain node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainNode {
    #[serde(rename = "box")]
    bx: ParameterBox,
    parent: Option<NodeId>,
}

/// Forest of boxes where each child refines its ancestors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ChainNode>", into = "Vec<ChainNode>")]
pub struct ChainedBox {
    nodes: Vec<ChainNode>,
}

impl TryFrom<Vec<ChainNode>> for ChainedBox {
    type Error = Error;

    fn try_from(nodes: Vec<ChainNode>) -> Result<Self> {
        let mut chain = Self::new();
        for node in nodes {
            match node.parent {
                None => {
                    chain.add_root(node.bx)?;
                }
                Some(parent) => {
                    chain.add_child(parent, node.bx)?;
                }
            }
        }
        Ok(chain)
    }
}

impl From<ChainedBox> for Vec<ChainNode> {
    fn from(chain: ChainedBox) -> Self {
        chain.nodes
    }
}

impl ChainedBox {
    /// Empty forest.
    #[must_use]
    pub const fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Add a box with no parent.
    ///
    /// # Errors
    ///
    /// `ScopeFormat` if a node with the same name exists.
    pub fn add_root(&mut self, bx: ParameterBox) -> Result<NodeId> {
        self.ensure_unique(bx.name())?;
        self.nodes.push(ChainNode { bx, parent: None });
        Ok(NodeId(self.nodes.len() - 1))
    }

    /// Add a refinement of `parent`.
    ///
    /// The new node's effective bounds are checked immediately.
    ///
    /// # Errors
    ///
    /// `Scope` for an unknown parent or a child whose bounds cannot overlap
    /// its ancestors; `ScopeFormat` for a duplicate name or inconsistent kind.
    pub fn add_child(&mut self, parent: NodeId, bx: ParameterBox) -> Result<NodeId> {
        if parent.0 >= self.nodes.len() {
            return Err(Error::scope(format!(
                "parent {parent} of box '{}' does not exist",
                bx.name()
            )));
        }
        self.ensure_unique(bx.name())?;
        self.nodes.push(ChainNode {
            bx,
            parent: Some(parent),
        });
        let id = NodeId(self.nodes.len() - 1);
        if let Err(e) = self.effective(id) {
            self.nodes.pop();
            return Err(e);
        }
        Ok(id)
    }

    fn ensure_unique(&self, name: &str) -> Result<()> {
        if self.find(name).is_some() {
            return Err(Error::format(format!("duplicate box name '{name}' in chain")));
        }
        Ok(())
    }

    /// Node by box name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.bx.name() == name)
            .map(NodeId)
    }

    /// The node's own box (not intersected with ancestors).
    #[must_use]
    pub fn own(&self, node: NodeId) -> Option<&ParameterBox> {
        self.nodes.get(node.0).map(|n| &n.bx)
    }

    /// Parent of a node.
    #[must_use]
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0).and_then(|n| n.parent)
    }

    /// Path from `node` up to its root, `node` first.
    #[must_use]
    pub fn ancestry(&self, node: NodeId) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut cursor = (node.0 < self.nodes.len()).then_some(node);
        while let Some(id) = cursor {
            path.push(id);
            cursor = self.nodes[id.0].parent;
        }
        path
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the forest has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Effective box of a node: its own bounds intersected, dimension by
    /// dimension, with every ancestor's.
    ///
    /// # Errors
    ///
    /// `Scope` if the node does not exist or any pairwise intersection along
    /// the chain is empty; an empty refinement is a malformed chain, not an
    /// empty result.
    pub fn effective(&self, node: NodeId) -> Result<ParameterBox> {
        let own = self
            .own(node)
            .ok_or_else(|| Error::scope(format!("box node {node} does not exist")))?;
        let mut effective = own.clone();
        for ancestor in self.ancestry(node).into_iter().skip(1) {
            let ancestor_box = &self.nodes[ancestor.0].bx;
            for bounds in ancestor_box.iter() {
                effective = effective.restrict(bounds)?.ok_or_else(|| {
                    Error::scope(format!(
                        "box '{}' does not overlap ancestor '{}' on '{}'",
                        own.name(),
                        ancestor_box.name(),
                        bounds.name()
                    ))
                })?;
            }
        }
        Ok(effective)
    }

    /// Point membership in a node's effective box.
    ///
    /// # Errors
    ///
    /// Same as [`ChainedBox::effective`].
    pub fn contains(&self, node: NodeId, point: &Assignment) -> Result<bool> {
        Ok(self.effective(node)?.contains(point))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::Bounds;
    use crate::value::assignment;

    fn bx(name: &str, dim: &str, lo: f64, hi: f64) -> ParameterBox {
        ParameterBox::new(name)
            .with_bounds(Bounds::continuous(dim, lo, hi).unwrap())
            .unwrap()
    }

    #[test]
    fn test_effective_intersects_ancestors() {
        let mut chain = ChainedBox::new();
        let root = chain.add_root(bx("root", "x", 0.0, 10.0)).unwrap();
        let a = chain.add_child(root, bx("a", "x", 2.0, 12.0)).unwrap();
        let b = chain.add_child(a, bx("b", "y", 0.0, 1.0)).unwrap();

        let eff = chain.effective(b).unwrap();
        assert_eq!(eff.name(), "b");
        assert_eq!(eff.bounds("x").unwrap().numeric_range(), Some((2.0, 10.0)));
        assert_eq!(eff.bounds("y").unwrap().numeric_range(), Some((0.0, 1.0)));
        assert_eq!(chain.ancestry(b), vec![b, a, root]);
    }

    #[test]
    fn test_contains_uses_effective_bounds() {
        let mut chain = ChainedBox::new();
        let root = chain.add_root(bx("root", "x", 0.0, 5.0)).unwrap();
        let child = chain.add_child(root, bx("child", "y", 0.0, 1.0)).unwrap();
        let point = assignment([("x", 7.0.into()), ("y", 0.5.into())]);
        assert!(!chain.contains(child, &point).unwrap());
        assert!(chain.own(child).unwrap().contains(&point));
    }

    #[test]
    fn test_disjoint_child_is_rejected() {
        let mut chain = ChainedBox::new();
        let root = chain.add_root(bx("root", "x", 0.0, 5.0)).unwrap();
        let err = chain.add_child(root, bx("bad", "x", 6.0, 9.0)).unwrap_err();
        assert!(matches!(err, Error::Scope(_)));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_unknown_parent() {
        let mut chain = ChainedBox::new();
        assert!(chain.add_child(NodeId(3), bx("a", "x", 0.0, 1.0)).is_err());
        assert!(chain.effective(NodeId(0)).is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut chain = ChainedBox::new();
        chain.add_root(bx("a", "x", 0.0, 1.0)).unwrap();
        assert!(chain.add_root(bx("a", "x", 0.0, 1.0)).is_err());
    }

    #[test]
    fn test_serde_roundtrip_rebuilds_chain() {
        let mut chain = ChainedBox::new();
        let root = chain.add_root(bx("root", "x", 0.0, 10.0)).unwrap();
        chain.add_child(root, bx("a", "x", 1.0, 2.0)).unwrap();

        let json = serde_json::to_string(&chain).unwrap();
        let back: ChainedBox = serde_json::from_str(&json).unwrap();
        assert_eq!(back, chain);
    }

    #[test]
    fn test_deserialize_rejects_forward_parent() {
        let root = bx("root", "x", 0.0, 10.0);
        let json = serde_json::json!([
            { "box": root, "parent": 1 },
        ]);
        assert!(serde_json::from_value::<ChainedBox>(json).is_err());
    }
}
