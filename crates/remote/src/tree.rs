//! Remote snapshot arena.

use crate::error::{ErrorKind, Result};
use crate::node::{RemoteContent, RemoteNode};
use std::collections::HashMap;

/// A full remote snapshot: nodes indexed by id plus child lists by parent.
///
/// Built root first, then each node once its parent is present, which is
/// the order a breadth- or depth-first listing of the remote yields them in.
#[derive(Debug, Clone)]
pub struct RemoteTree {
    root_id: String,
    nodes: HashMap<String, RemoteNode>,
    children: HashMap<String, Vec<String>>,
}

impl RemoteTree {
    /// Start a tree at `root`, which must be a directory.
    ///
    /// The root's `parent_id` is cleared: whatever it is attached to on the
    /// remote side is outside the mirror.
    pub fn new(mut root: RemoteNode) -> Result<Self> {
        if !matches!(root.content, RemoteContent::Directory) {
            exn::bail!(ErrorKind::InvalidTree(format!("root {} is not a directory", root.id())));
        }
        root.meta.parent_id = None;
        let root_id = root.id().to_string();
        let mut nodes = HashMap::new();
        nodes.insert(root_id.clone(), root);
        Ok(Self { root_id, nodes, children: HashMap::new() })
    }

    /// Add a node under an existing directory.
    pub fn insert(&mut self, node: RemoteNode) -> Result<()> {
        let Some(parent_id) = node.meta.parent_id.clone() else {
            exn::bail!(ErrorKind::InvalidTree(format!("node {} has no parent", node.id())));
        };
        match self.nodes.get(&parent_id) {
            Some(parent) if matches!(parent.content, RemoteContent::Directory) => {},
            Some(_) => exn::bail!(ErrorKind::InvalidTree(format!("parent {parent_id} is not a directory"))),
            None => exn::bail!(ErrorKind::InvalidTree(format!("unknown parent {parent_id}"))),
        }
        if self.nodes.contains_key(node.id()) {
            exn::bail!(ErrorKind::InvalidTree(format!("duplicate id {}", node.id())));
        }
        self.children.entry(parent_id).or_default().push(node.id().to_string());
        self.nodes.insert(node.id().to_string(), node);
        Ok(())
    }

    /// Remove a node and everything below it. Removing the root is refused.
    pub fn remove(&mut self, id: &str) -> Option<RemoteNode> {
        if id == self.root_id {
            return None;
        }
        let node = self.nodes.remove(id)?;
        if let Some(parent_id) = &node.meta.parent_id
            && let Some(siblings) = self.children.get_mut(parent_id)
        {
            siblings.retain(|s| s != id);
        }
        let mut stack = self.children.remove(id).unwrap_or_default();
        while let Some(descendant) = stack.pop() {
            self.nodes.remove(&descendant);
            stack.extend(self.children.remove(&descendant).unwrap_or_default());
        }
        Some(node)
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn get(&self, id: &str) -> Option<&RemoteNode> {
        self.nodes.get(id)
    }

    /// Mutable access to a node's metadata and content.
    ///
    /// Changing `id` or `parent_id` through this reference desynchronizes
    /// the child index; re-parenting goes through [`remove`](Self::remove)
    /// and [`insert`](Self::insert).
    pub fn get_mut(&mut self, id: &str) -> Option<&mut RemoteNode> {
        self.nodes.get_mut(id)
    }

    /// Ids of the direct children of `id`, in insertion order.
    pub fn children(&self, id: &str) -> &[String] {
        self.children.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every node reachable from the root, in pre-order.
    pub fn flatten(&self) -> Vec<&RemoteNode> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root_id.as_str()];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            out.push(node);
            // Reverse so the first child is visited first.
            stack.extend(self.children(id).iter().rev().map(String::as_str));
        }
        out
    }
}
