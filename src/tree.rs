//! Name tree of an archive's entries.
//!
//! Nodes live in an arena owned by [`ArchiveTree`] and refer to each other by
//! [`NodeId`]. Children keep insertion order, which is the display order.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
pub struct TreeNode {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl TreeNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveTree {
    nodes: Vec<TreeNode>,
}

impl ArchiveTree {
    pub fn new(root_name: impl Into<String>) -> Self {
        Self {
            nodes: vec![TreeNode {
                name: root_name.into(),
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    pub fn child_named(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.node(parent)
            .children
            .iter()
            .copied()
            .find(|c| self.node(*c).name == name)
    }

    /// Inserts `segments` below the root, reusing nodes that already exist.
    /// Returns the node of the last segment.
    pub fn insert_path<S: AsRef<str>>(&mut self, segments: &[S]) -> NodeId {
        let mut current = self.root();
        for segment in segments {
            let segment = segment.as_ref();
            current = match self.child_named(current, segment) {
                Some(existing) => existing,
                None => self.push_child(current, segment),
            };
        }
        current
    }

    fn push_child(&mut self, parent: NodeId, name: &str) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(TreeNode {
            name: name.to_string(),
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Looks up a node by its names below the root.
    pub fn find<S: AsRef<str>>(&self, segments: &[S]) -> Option<NodeId> {
        let mut current = self.root();
        for segment in segments {
            current = self.child_named(current, segment.as_ref())?;
        }
        Some(current)
    }

    /// Names from the root down to `id`, root included.
    pub fn path_of(&self, id: NodeId) -> Vec<String> {
        let mut names = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let node = self.node(current);
            names.push(node.name.clone());
            cursor = node.parent;
        }
        names.reverse();
        names
    }

    /// Slash-joined paths of every leaf, in display order.
    pub fn leaf_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut prefix = Vec::new();
        for child in self.node(self.root()).children.iter() {
            self.collect_leaves(*child, &mut prefix, &mut out);
        }
        out
    }

    fn collect_leaves<'a>(&'a self, id: NodeId, prefix: &mut Vec<&'a str>, out: &mut Vec<String>) {
        let node = self.node(id);
        prefix.push(&node.name);
        if node.is_leaf() {
            out.push(prefix.join("/"));
        } else {
            for child in node.children.iter() {
                self.collect_leaves(*child, prefix, out);
            }
        }
        prefix.pop();
    }

    /// Indented text rendering, two spaces per level.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_node(self.root(), 0, &mut out);
        out
    }

    fn render_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let node = self.node(id);
        for _ in 0..depth {
            out.push_str("  ");
        }
        out.push_str(&node.name);
        if !node.is_leaf() {
            out.push('/');
        }
        out.push('\n');
        for child in node.children.iter() {
            self.render_node(*child, depth + 1, out);
        }
    }

    pub fn to_view(&self) -> TreeView {
        self.view_of(self.root())
    }

    fn view_of(&self, id: NodeId) -> TreeView {
        let node = self.node(id);
        TreeView {
            name: node.name.clone(),
            children: node.children.iter().map(|c| self.view_of(*c)).collect(),
        }
    }
}

/// Owned, serializable snapshot of a subtree.
#[derive(Debug, Clone, Serialize)]
pub struct TreeView {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeView>,
}
