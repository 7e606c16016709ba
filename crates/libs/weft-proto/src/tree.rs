use serde::{Deserialize, Serialize};

/// Recursive subtree-of-a-node view exchanged during node-sync.
///
/// Equality is structural and includes `has_time_authority`, so a neighbor
/// toggling its time source counts as a layout change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTree {
    #[serde(rename = "nodeId", default)]
    pub node_id: u32,

    #[serde(default, skip_serializing_if = "is_false")]
    pub root: bool,

    #[serde(
        rename = "hasTimeAuthority",
        default,
        skip_serializing_if = "is_false"
    )]
    pub has_time_authority: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subs: Vec<NodeTree>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl NodeTree {
    pub fn new(node_id: u32) -> Self {
        Self { node_id, ..Self::default() }
    }

    /// Reset to the unassigned state `{0, false, false, []}`.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Whether `node_id` appears anywhere in this tree, the top included.
    pub fn contains(&self, node_id: u32) -> bool {
        self.node_id == node_id || self.subs.iter().any(|sub| sub.contains(node_id))
    }

    /// Whether any node in the tree declares itself root.
    pub fn is_rooted(&self) -> bool {
        self.root || self.subs.iter().any(NodeTree::is_rooted)
    }

    /// Total number of nodes in the tree, the top included.
    pub fn size(&self) -> usize {
        1 + self.subs.iter().map(NodeTree::size).sum::<usize>()
    }

    /// Flatten all node ids in depth-first order.
    pub fn flatten(&self, include_self: bool) -> Vec<u32> {
        let mut ids = Vec::with_capacity(self.size());
        if include_self {
            ids.push(self.node_id);
        }
        for sub in &self.subs {
            ids.push(sub.node_id);
            for sub_of_sub in &sub.subs {
                collect(sub_of_sub, &mut ids);
            }
        }
        ids
    }

    /// Depth of `node_id` below the top of this tree; the top itself is 0,
    /// its direct subs are 1. `None` when the id is absent.
    pub fn depth_of(&self, node_id: u32) -> Option<usize> {
        if self.node_id == node_id {
            return Some(0);
        }
        self.subs
            .iter()
            .filter_map(|sub| sub.depth_of(node_id))
            .min()
            .map(|depth| depth + 1)
    }
}

fn collect(tree: &NodeTree, ids: &mut Vec<u32>) {
    ids.push(tree.node_id);
    for sub in &tree.subs {
        collect(sub, ids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NodeTree {
        NodeTree {
            node_id: 1,
            root: true,
            has_time_authority: false,
            subs: vec![
                NodeTree { node_id: 2, subs: vec![NodeTree::new(4)], ..NodeTree::default() },
                NodeTree::new(3),
            ],
        }
    }

    #[test]
    fn contains_walks_the_whole_tree() {
        let tree = sample();
        assert!(tree.contains(1));
        assert!(tree.contains(4));
        assert!(!tree.contains(5));
    }

    #[test]
    fn flatten_excludes_self_by_default() {
        let tree = sample();
        assert_eq!(tree.flatten(false), vec![2, 4, 3]);
        assert_eq!(tree.flatten(true), vec![1, 2, 4, 3]);
    }

    #[test]
    fn size_counts_every_node() {
        assert_eq!(sample().size(), 4);
        assert_eq!(NodeTree::new(7).size(), 1);
    }

    #[test]
    fn depth_of_reports_hops() {
        let tree = sample();
        assert_eq!(tree.depth_of(1), Some(0));
        assert_eq!(tree.depth_of(2), Some(1));
        assert_eq!(tree.depth_of(4), Some(2));
        assert_eq!(tree.depth_of(99), None);
    }

    #[test]
    fn wire_shape_omits_empty_and_false_fields() {
        let json = serde_json::to_string(&NodeTree::new(42)).expect("serialize");
        assert_eq!(json, r#"{"nodeId":42}"#);
    }

    #[test]
    fn wire_roundtrip_preserves_authority_flag() {
        let mut tree = sample();
        tree.subs[1].has_time_authority = true;
        let json = serde_json::to_string(&tree).expect("serialize");
        let back: NodeTree = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, tree);
    }

    #[test]
    fn equality_is_structural_including_authority() {
        let a = sample();
        let mut b = sample();
        assert_eq!(a, b);
        b.subs[0].has_time_authority = true;
        assert_ne!(a, b);
    }

    #[test]
    fn clear_resets_to_unassigned() {
        let mut tree = sample();
        tree.clear();
        assert_eq!(tree, NodeTree::default());
        assert_eq!(tree.node_id, 0);
    }
}
