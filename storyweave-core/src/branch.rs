//! The story's branch map.
//!
//! An arena of nodes addressed by integer id. Node 0 is the root (the story's
//! opening); every accepted choice mints a child of the current position.
//! Ids equal arena indices and are never reused.

use serde::{Deserialize, Serialize};

/// Index of a node in the [`BranchTree`].
pub type NodeId = usize;

/// One point in the story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchNode {
    pub id: NodeId,
    /// `None` only for the root.
    pub parent: Option<NodeId>,
    /// Choice text on the edge from the parent.
    pub choice: Option<String>,
    pub children: Vec<NodeId>,
}

/// Tree of story positions and the choices connecting them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchTree {
    nodes: Vec<BranchNode>,
    position: NodeId,
}

impl Default for BranchTree {
    fn default() -> Self {
        Self::new()
    }
}

impl BranchTree {
    /// A tree holding only the root, positioned at the root.
    pub fn new() -> Self {
        Self {
            nodes: vec![BranchNode {
                id: 0,
                parent: None,
                choice: None,
                children: Vec::new(),
            }],
            position: 0,
        }
    }

    /// Current story position.
    pub fn position(&self) -> NodeId {
        self.position
    }

    /// Id the next minted node will receive.
    pub fn next_id(&self) -> NodeId {
        self.nodes.len()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&BranchNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> &[BranchNode] {
        &self.nodes
    }

    /// Mint a child of the current position along `choice` and move to it.
    pub fn advance(&mut self, choice: impl Into<String>) -> NodeId {
        let id = self.next_id();
        let parent = self.position;
        self.nodes.push(BranchNode {
            id,
            parent: Some(parent),
            choice: Some(choice.into()),
            children: Vec::new(),
        });
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children.push(id);
        }
        self.position = id;
        id
    }

    /// Outgoing edges of `node` as `(choice, child)` pairs.
    pub fn edges_from(&self, node: NodeId) -> Vec<(&str, NodeId)> {
        self.node(node)
            .map(|n| {
                n.children
                    .iter()
                    .filter_map(|&c| {
                        let child = self.nodes.get(c)?;
                        Some((child.choice.as_deref().unwrap_or_default(), c))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Choices on the path from the root to the current position.
    pub fn path_choices(&self) -> Vec<&str> {
        let mut choices = Vec::new();
        let mut cursor = self.node(self.position);
        while let Some(node) = cursor {
            if let Some(choice) = &node.choice {
                choices.push(choice.as_str());
            }
            cursor = node.parent.and_then(|p| self.node(p));
        }
        choices.reverse();
        choices
    }

    /// Whether the arena is a well-formed tree: ids match indices, every
    /// non-root node has one parent that lists it as a child, and parents
    /// precede their children.
    pub fn is_consistent(&self) -> bool {
        let Some(root) = self.nodes.first() else {
            return false;
        };
        if root.parent.is_some() || self.position >= self.nodes.len() {
            return false;
        }

        self.nodes.iter().enumerate().all(|(index, node)| {
            if node.id != index {
                return false;
            }
            let parent_ok = match node.parent {
                None => index == 0,
                Some(p) => {
                    p < index
                        && self
                            .nodes
                            .get(p)
                            .map(|parent| parent.children.iter().filter(|&&c| c == index).count() == 1)
                            .unwrap_or(false)
                }
            };
            let children_ok = node
                .children
                .iter()
                .all(|&c| self.nodes.get(c).and_then(|child| child.parent) == Some(index));
            parent_ok && children_ok
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tree_has_root() {
        let tree = BranchTree::new();
        assert_eq!(tree.position(), 0);
        assert_eq!(tree.next_id(), 1);
        assert!(tree.node(0).unwrap().parent.is_none());
        assert!(tree.is_consistent());
    }

    #[test]
    fn test_advance_mints_increasing_ids() {
        let mut tree = BranchTree::new();
        let a = tree.advance("Open the door");
        let b = tree.advance("Step inside");
        assert_eq!((a, b), (1, 2));
        assert_eq!(tree.position(), 2);
        assert_eq!(tree.edges_from(0), vec![("Open the door", 1)]);
        assert_eq!(tree.edges_from(1), vec![("Step inside", 2)]);
        assert_eq!(tree.path_choices(), vec!["Open the door", "Step inside"]);
        assert!(tree.is_consistent());
    }

    #[test]
    fn test_same_choice_text_still_mints_new_node() {
        let mut tree = BranchTree::new();
        tree.advance("Wait");
        tree.advance("Wait");
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.node(2).unwrap().parent, Some(1));
        assert!(tree.is_consistent());
    }

    #[test]
    fn test_serde_round_trip_keeps_position() {
        let mut tree = BranchTree::new();
        tree.advance("Run");
        let json = serde_json::to_string(&tree).unwrap();
        let back: BranchTree = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tree);
        assert_eq!(back.next_id(), 2);
    }

    #[test]
    fn test_detects_corruption() {
        let json = r#"{"nodes":[{"id":0,"parent":null,"choice":null,"children":[1]},
                                {"id":1,"parent":0,"choice":"a","children":[]},
                                {"id":2,"parent":0,"choice":"b","children":[]}],
                       "position":2}"#;
        let tree: BranchTree = serde_json::from_str(json).unwrap();
        assert!(!tree.is_consistent());
    }
}
