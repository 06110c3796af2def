//! Hierarchical, filterable view of a catalog generation.
//!
//! The tree is `library → package → type → signature`. Expansion state is
//! tracked by [`TreePath`] (labels from the root), so it survives both
//! re-filtering and rebuilding from a new generation as long as the path
//! still exists.

use super::cache::CatalogSnapshot;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Label used for types declared outside any package.
pub const DEFAULT_PACKAGE: &str = "(default)";

/// Node identity: labels from the root down.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TreePath(Vec<String>);

impl TreePath {
    /// Build a path from its labels.
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(labels.into_iter().map(Into::into).collect())
    }

    /// Path of a child node.
    pub fn child(&self, label: &str) -> Self {
        let mut labels = self.0.clone();
        labels.push(label.to_string());
        Self(labels)
    }

    /// Labels from the root.
    pub fn labels(&self) -> &[String] {
        &self.0
    }

    /// Depth below the root (the root has depth 0).
    pub fn depth(&self) -> usize {
        self.0.len().saturating_sub(1)
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" / "))
    }
}

/// Kind of tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// The library.
    Root,
    /// A package.
    Package,
    /// An owning type.
    Type,
    /// An operation signature.
    Operation,
}

/// A node of the projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    label: String,
    kind: NodeKind,
    children: Vec<TreeNode>,
}

impl TreeNode {
    fn new(label: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            label: label.into(),
            kind,
            children: Vec::new(),
        }
    }

    /// Display label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Node kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Children, sorted by label.
    pub fn children(&self) -> &[TreeNode] {
        &self.children
    }

    /// Returns true for operation nodes.
    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Operation
    }

    // `filter` is already lowercased.
    fn is_visible(&self, filter: &str) -> bool {
        if filter.is_empty() {
            return true;
        }
        if self.is_leaf() {
            self.label.to_lowercase().contains(filter)
        } else {
            self.children.iter().any(|c| c.is_visible(filter))
        }
    }

    fn find(&self, labels: &[String]) -> Option<&TreeNode> {
        match labels.split_first() {
            Some((head, rest)) if *head == self.label => {
                if rest.is_empty() {
                    Some(self)
                } else {
                    self.children.iter().find_map(|c| c.find(rest))
                }
            }
            _ => None,
        }
    }
}

fn build(snapshot: &CatalogSnapshot) -> TreeNode {
    let mut packages: BTreeMap<String, BTreeMap<String, BTreeSet<String>>> = BTreeMap::new();
    for handle in snapshot.operations() {
        let owner = handle.owner();
        let package = match owner.package() {
            "" => DEFAULT_PACKAGE.to_string(),
            p => p.to_string(),
        };
        packages
            .entry(package)
            .or_default()
            .entry(owner.name().to_string())
            .or_default()
            .insert(handle.signature().to_string());
    }

    let mut root = TreeNode::new(snapshot.library().unwrap_or_default(), NodeKind::Root);
    for (package, types) in packages {
        let mut package_node = TreeNode::new(package, NodeKind::Package);
        for (type_name, signatures) in types {
            let mut type_node = TreeNode::new(type_name, NodeKind::Type);
            type_node.children = signatures
                .into_iter()
                .map(|s| TreeNode::new(s, NodeKind::Operation))
                .collect();
            package_node.children.push(type_node);
        }
        root.children.push(package_node);
    }
    root
}

/// Filterable tree over one catalog generation.
#[derive(Debug, Clone)]
pub struct CatalogTree {
    root: TreeNode,
    filter: String,
    expanded: BTreeSet<TreePath>,
}

impl CatalogTree {
    /// Project `snapshot`. Only the root starts expanded.
    pub fn new(snapshot: &CatalogSnapshot) -> Self {
        let root = build(snapshot);
        let mut expanded = BTreeSet::new();
        expanded.insert(TreePath::new([root.label.clone()]));
        Self {
            root,
            filter: String::new(),
            expanded,
        }
    }

    /// Re-project from a new generation, keeping the filter and every
    /// expanded path that still exists.
    pub fn rebuild(&mut self, snapshot: &CatalogSnapshot) {
        let root = build(snapshot);
        let old_root = TreePath::new([self.root.label.clone()]);
        let was_root_expanded = self.expanded.contains(&old_root);
        self.root = root;
        let root = &self.root;
        self.expanded.retain(|path| root.find(path.labels()).is_some());
        if was_root_expanded {
            self.expanded.insert(TreePath::new([self.root.label.clone()]));
        }
    }

    /// Root node.
    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    /// Node at `path`.
    pub fn node(&self, path: &TreePath) -> Option<&TreeNode> {
        self.root.find(path.labels())
    }

    /// Returns true if `path` names a node of the tree.
    pub fn contains(&self, path: &TreePath) -> bool {
        self.node(path).is_some()
    }

    /// Apply a case-insensitive substring filter. The expanded set is kept.
    pub fn set_filter(&mut self, filter: &str) {
        self.filter = filter.to_string();
    }

    /// Current filter text.
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Expand a node. Returns false if the path does not exist.
    pub fn expand(&mut self, path: &TreePath) -> bool {
        if !self.contains(path) {
            return false;
        }
        self.expanded.insert(path.clone());
        true
    }

    /// Collapse a node. Returns true if it was expanded.
    pub fn collapse(&mut self, path: &TreePath) -> bool {
        self.expanded.remove(path)
    }

    /// Returns true if `path` is expanded.
    pub fn is_expanded(&self, path: &TreePath) -> bool {
        self.expanded.contains(path)
    }

    /// Expanded paths, sorted.
    pub fn expanded_paths(&self) -> Vec<TreePath> {
        self.expanded.iter().cloned().collect()
    }

    /// Every node that passes the filter, in pre-order.
    pub fn visible_paths(&self) -> Vec<TreePath> {
        let filter = self.filter.to_lowercase();
        let mut out = Vec::new();
        self.walk(&self.root, TreePath::new([self.root.label.clone()]), &filter, false, &mut out);
        out
    }

    /// Nodes a view would draw: visible, with every ancestor expanded.
    pub fn displayed_paths(&self) -> Vec<TreePath> {
        let filter = self.filter.to_lowercase();
        let mut out = Vec::new();
        self.walk(&self.root, TreePath::new([self.root.label.clone()]), &filter, true, &mut out);
        out
    }

    /// Signatures of the visible leaves, in tree order.
    pub fn visible_signatures(&self) -> Vec<String> {
        self.visible_paths()
            .into_iter()
            .filter_map(|p| {
                self.node(&p)
                    .filter(|n| n.is_leaf())
                    .map(|n| n.label.clone())
            })
            .collect()
    }

    fn walk(
        &self,
        node: &TreeNode,
        path: TreePath,
        filter: &str,
        respect_expansion: bool,
        out: &mut Vec<TreePath>,
    ) {
        if !node.is_visible(filter) {
            return;
        }
        let descend = !respect_expansion || self.expanded.contains(&path);
        out.push(path.clone());
        if descend {
            for child in &node.children {
                self.walk(child, path.child(&child.label), filter, respect_expansion, out);
            }
        }
    }
}
