//! 虚拟文件系统：以 id 为键的节点 arena
//!
//! 父子关系全部通过 `NodeId` 表达，不持有对象引用；路径在重命名/移动时整棵子树重算。

use compact_str::CompactString;
use rustc_hash::FxHashSet;
use slotmap::{new_key_type, SlotMap};
use std::fmt;

use super::blob::StoreId;
use super::path_table::{self, PathError, PathTable, ROOT_PATH};
use crate::kernel::language::LanguageId;

new_key_type! { pub struct NodeId; }

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    File,
    Folder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VfsError {
    NotFound,
    NameConflict,
    CycleDetected,
    TypeMismatch,
    InvalidName(String),
    InvalidBlob(String),
}

impl fmt::Display for VfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VfsError::NotFound => write!(f, "node not found"),
            VfsError::NameConflict => write!(f, "name already exists in parent"),
            VfsError::CycleDetected => write!(f, "cannot move node into its own subtree"),
            VfsError::TypeMismatch => write!(f, "operation not valid for this node kind"),
            VfsError::InvalidName(reason) => write!(f, "invalid name: {reason}"),
            VfsError::InvalidBlob(reason) => write!(f, "invalid tree blob: {reason}"),
        }
    }
}

impl std::error::Error for VfsError {}

impl From<PathError> for VfsError {
    fn from(e: PathError) -> Self {
        VfsError::InvalidName(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VfsError>;

#[derive(Debug, Clone)]
pub enum NodeData {
    File {
        /// `None` until fetched from the store.
        content: Option<String>,
        language: LanguageId,
    },
    Folder {
        /// Insertion order is display order.
        children: Vec<NodeId>,
        is_expanded: bool,
    },
}

#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    name: CompactString,
    path: String,
    parent: Option<NodeId>,
    store_id: Option<StoreId>,
    data: NodeData,
}

impl Node {
    fn new_file(name: CompactString, parent: NodeId, content: Option<String>) -> Self {
        let language = LanguageId::from_name(&name);
        Self {
            id: NodeId::default(),
            name,
            path: String::new(),
            parent: Some(parent),
            store_id: None,
            data: NodeData::File { content, language },
        }
    }

    fn new_folder(name: CompactString, parent: Option<NodeId>) -> Self {
        Self {
            id: NodeId::default(),
            name,
            path: String::new(),
            parent,
            store_id: None,
            data: NodeData::Folder {
                children: Vec::new(),
                is_expanded: false,
            },
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn store_id(&self) -> Option<&StoreId> {
        self.store_id.as_ref()
    }

    pub fn kind(&self) -> NodeKind {
        match self.data {
            NodeData::File { .. } => NodeKind::File,
            NodeData::Folder { .. } => NodeKind::Folder,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind() == NodeKind::Folder
    }

    pub fn data(&self) -> &NodeData {
        &self.data
    }

    pub fn content(&self) -> Option<&str> {
        match &self.data {
            NodeData::File { content, .. } => content.as_deref(),
            NodeData::Folder { .. } => None,
        }
    }

    pub fn language(&self) -> Option<LanguageId> {
        match self.data {
            NodeData::File { language, .. } => Some(language),
            NodeData::Folder { .. } => None,
        }
    }

    pub fn children(&self) -> &[NodeId] {
        match &self.data {
            NodeData::Folder { children, .. } => children,
            NodeData::File { .. } => &[],
        }
    }

    pub fn is_expanded(&self) -> bool {
        matches!(
            self.data,
            NodeData::Folder {
                is_expanded: true,
                ..
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeRow {
    pub id: NodeId,
    pub depth: u16,
    pub name: CompactString,
    pub kind: NodeKind,
    pub is_expanded: bool,
}

#[derive(Debug, Clone)]
pub struct Vfs {
    arena: SlotMap<NodeId, Node>,
    root: NodeId,
    paths: PathTable,
}

impl Vfs {
    pub fn new(root_name: &str) -> Self {
        let mut arena = SlotMap::with_key();
        let root = arena.insert(Node::new_folder(root_name.into(), None));
        if let Some(node) = arena.get_mut(root) {
            node.id = root;
            node.path = ROOT_PATH.to_string();
            if let NodeData::Folder { is_expanded, .. } = &mut node.data {
                *is_expanded = true;
            }
        }

        let mut paths = PathTable::new();
        paths.insert(ROOT_PATH.to_string(), root);

        Self { arena, root, paths }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn root_name(&self) -> &str {
        self.arena.get(self.root).map(|n| n.name()).unwrap_or_default()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.arena.get(id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.arena.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        // the root always exists
        self.arena.len() <= 1
    }

    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        self.paths.get(path)
    }

    pub fn path_table(&self) -> &PathTable {
        &self.paths
    }

    /// Validates a `create_node` without touching the tree.
    pub fn check_create(&self, parent: NodeId, name: &str) -> Result<()> {
        path_table::validate_name(name)?;
        let parent_node = self.arena.get(parent).ok_or(VfsError::NotFound)?;
        if !parent_node.is_folder() {
            return Err(VfsError::NotFound);
        }
        if self.child_named(parent, name).is_some() {
            return Err(VfsError::NameConflict);
        }
        Ok(())
    }

    pub fn check_rename(&self, id: NodeId, new_name: &str) -> Result<()> {
        if id == self.root {
            return Err(VfsError::TypeMismatch);
        }
        let node = self.arena.get(id).ok_or(VfsError::NotFound)?;
        path_table::validate_name(new_name)?;
        if node.name == new_name {
            return Ok(());
        }
        let parent = node.parent.ok_or(VfsError::TypeMismatch)?;
        if self.child_named(parent, new_name).is_some() {
            return Err(VfsError::NameConflict);
        }
        Ok(())
    }

    pub fn check_move(&self, id: NodeId, new_parent: NodeId) -> Result<()> {
        if id == self.root {
            return Err(VfsError::TypeMismatch);
        }
        let node = self.arena.get(id).ok_or(VfsError::NotFound)?;
        let target = self.arena.get(new_parent).ok_or(VfsError::NotFound)?;
        if !target.is_folder() {
            return Err(VfsError::NotFound);
        }
        if new_parent == id || self.is_ancestor(id, new_parent) {
            return Err(VfsError::CycleDetected);
        }
        if node.parent == Some(new_parent) {
            return Ok(());
        }
        if self.child_named(new_parent, &node.name).is_some() {
            return Err(VfsError::NameConflict);
        }
        Ok(())
    }

    pub fn create_node(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: NodeKind,
        initial_content: Option<String>,
    ) -> Result<NodeId> {
        self.check_create(parent, name)?;
        let parent_path = self.arena[parent].path.clone();

        let mut node = match kind {
            NodeKind::File => Node::new_file(name.into(), parent, initial_content),
            NodeKind::Folder => Node::new_folder(name.into(), Some(parent)),
        };
        let path = path_table::join(&parent_path, name);
        node.path = path.clone();

        let id = self.arena.insert(node);
        if let Some(node) = self.arena.get_mut(id) {
            node.id = id;
        }
        if let Some(NodeData::Folder { children, .. }) =
            self.arena.get_mut(parent).map(|n| &mut n.data)
        {
            children.push(id);
        }
        self.paths.insert(path, id);

        tracing::debug!(path = %self.arena[id].path, ?kind, "vfs node created");
        Ok(id)
    }

    pub fn rename(&mut self, id: NodeId, new_name: &str) -> Result<()> {
        self.check_rename(id, new_name)?;
        let node = &self.arena[id];
        let old_name = node.name.clone();
        if old_name == new_name {
            return Ok(());
        }
        let parent = node.parent.ok_or(VfsError::TypeMismatch)?;

        let parent_path = self.arena[parent].path.clone();
        let staged = self.stage_subtree_paths(id, path_table::join(&parent_path, new_name));

        let node = &mut self.arena[id];
        node.name = new_name.into();
        if let NodeData::File { language, .. } = &mut node.data {
            *language = LanguageId::from_name(new_name);
        }
        self.commit_paths(staged);

        tracing::debug!(from = %old_name, to = %new_name, "vfs node renamed");
        Ok(())
    }

    pub fn move_node(&mut self, id: NodeId, new_parent: NodeId) -> Result<()> {
        self.check_move(id, new_parent)?;
        let (name, old_parent) = {
            let node = &self.arena[id];
            (node.name.clone(), node.parent)
        };
        if old_parent == Some(new_parent) {
            return Ok(());
        }

        let target_path = self.arena[new_parent].path.clone();
        let staged = self.stage_subtree_paths(id, path_table::join(&target_path, &name));

        if let Some(old_parent_id) = old_parent {
            if let NodeData::Folder { children, .. } = &mut self.arena[old_parent_id].data {
                children.retain(|c| *c != id);
            }
        }
        if let NodeData::Folder { children, .. } = &mut self.arena[new_parent].data {
            children.push(id);
        }
        self.arena[id].parent = Some(new_parent);
        self.commit_paths(staged);

        tracing::debug!(path = %self.arena[id].path, "vfs node moved");
        Ok(())
    }

    /// Removes `id` and its whole subtree. Returns every removed id; empty if
    /// `id` was already gone.
    pub fn delete(&mut self, id: NodeId) -> Result<Vec<NodeId>> {
        if id == self.root {
            return Err(VfsError::TypeMismatch);
        }
        let Some(parent) = self.arena.get(id).map(|n| n.parent) else {
            return Ok(Vec::new());
        };

        if let Some(NodeData::Folder { children, .. }) =
            parent.and_then(|p| self.arena.get_mut(p)).map(|n| &mut n.data)
        {
            children.retain(|c| *c != id);
        }

        let mut removed = Vec::new();
        let mut stack = vec![id];
        while let Some(node_id) = stack.pop() {
            if let Some(node) = self.arena.remove(node_id) {
                self.paths.remove(&node.path);
                if let NodeData::Folder { children, .. } = node.data {
                    stack.extend(children);
                }
                removed.push(node_id);
            }
        }

        tracing::debug!(count = removed.len(), "vfs subtree deleted");
        Ok(removed)
    }

    pub fn update_content(&mut self, id: NodeId, new_content: String) -> Result<()> {
        let node = self.arena.get_mut(id).ok_or(VfsError::NotFound)?;
        match &mut node.data {
            NodeData::File { content, .. } => {
                *content = Some(new_content);
                Ok(())
            }
            NodeData::Folder { .. } => Err(VfsError::TypeMismatch),
        }
    }

    pub fn bind_store_id(&mut self, id: NodeId, store_id: StoreId) -> Result<()> {
        let node = self.arena.get_mut(id).ok_or(VfsError::NotFound)?;
        node.store_id = Some(store_id);
        Ok(())
    }

    pub fn find_by_store_id(&self, store_id: &StoreId) -> Option<NodeId> {
        self.find(|n| n.store_id.as_ref() == Some(store_id))
            .next()
            .map(|n| n.id)
    }

    pub fn child_named(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.arena
            .get(parent)?
            .children()
            .iter()
            .copied()
            .find(|c| self.arena.get(*c).is_some_and(|n| n.name == name))
    }

    /// Depth-first, pre-order. Every call starts a fresh traversal.
    pub fn find<P>(&self, predicate: P) -> Find<'_, P>
    where
        P: FnMut(&Node) -> bool,
    {
        Find {
            vfs: self,
            stack: vec![self.root],
            predicate,
        }
    }

    pub fn iter(&self) -> Find<'_, fn(&Node) -> bool> {
        self.find(keep_all as fn(&Node) -> bool)
    }

    /// Ids kept by the explorer filter: a node stays if its name contains
    /// `query` (case-insensitive), or if it is a folder with a kept descendant.
    /// The root is always kept.
    pub fn filter(&self, query: &str) -> FxHashSet<NodeId> {
        let needle = query.to_lowercase();
        let mut kept = FxHashSet::default();
        kept.insert(self.root);

        // post-order: children are decided before their parent
        let mut stack = vec![(self.root, false)];
        while let Some((id, visited)) = stack.pop() {
            let Some(node) = self.arena.get(id) else {
                continue;
            };
            if !visited {
                stack.push((id, true));
                for &child in node.children().iter().rev() {
                    stack.push((child, false));
                }
                continue;
            }
            if id == self.root {
                continue;
            }
            let matches = node.name.to_lowercase().contains(&needle);
            let has_kept_child = node.children().iter().any(|c| kept.contains(c));
            if matches || has_kept_child {
                kept.insert(id);
            }
        }
        kept
    }

    pub fn toggle_expand(&mut self, id: NodeId) {
        if let Some(NodeData::Folder { is_expanded, .. }) =
            self.arena.get_mut(id).map(|n| &mut n.data)
        {
            *is_expanded = !*is_expanded;
        }
    }

    pub fn expand(&mut self, id: NodeId) {
        self.set_expanded(id, true);
    }

    pub fn collapse(&mut self, id: NodeId) {
        self.set_expanded(id, false);
    }

    fn set_expanded(&mut self, id: NodeId, value: bool) {
        if let Some(NodeData::Folder { is_expanded, .. }) =
            self.arena.get_mut(id).map(|n| &mut n.data)
        {
            *is_expanded = value;
        }
    }

    /// Explorer rows in display order. With a filter, only kept nodes are
    /// listed and kept folders are shown open.
    pub fn flatten_for_view(&self, filter: Option<&str>) -> Vec<TreeRow> {
        let kept = filter.filter(|q| !q.is_empty()).map(|q| self.filter(q));
        let mut rows = Vec::new();
        let mut stack: Vec<(NodeId, u16)> = vec![(self.root, 0)];

        while let Some((id, depth)) = stack.pop() {
            let Some(node) = self.arena.get(id) else {
                continue;
            };
            if id != self.root {
                rows.push(TreeRow {
                    id,
                    depth,
                    name: node.name.clone(),
                    kind: node.kind(),
                    is_expanded: node.is_expanded() || kept.is_some(),
                });
            }

            let open = id == self.root || node.is_expanded() || kept.is_some();
            if !open {
                continue;
            }
            for &child in node.children().iter().rev() {
                if kept.as_ref().is_some_and(|k| !k.contains(&child)) {
                    continue;
                }
                stack.push((child, depth + 1));
            }
        }
        rows
    }

    fn is_ancestor(&self, ancestor: NodeId, mut descendant: NodeId) -> bool {
        while let Some(node) = self.arena.get(descendant) {
            match node.parent {
                Some(parent) if parent == ancestor => return true,
                Some(parent) => descendant = parent,
                None => break,
            }
        }
        false
    }

    /// Computes new paths for `id` and its subtree without touching the tree.
    fn stage_subtree_paths(&self, id: NodeId, new_path: String) -> Vec<(NodeId, String)> {
        let mut staged = Vec::new();
        let mut stack = vec![(id, new_path)];
        while let Some((node_id, path)) = stack.pop() {
            let Some(node) = self.arena.get(node_id) else {
                continue;
            };
            for &child in node.children() {
                if let Some(c) = self.arena.get(child) {
                    stack.push((child, path_table::join(&path, &c.name)));
                }
            }
            staged.push((node_id, path));
        }
        staged
    }

    fn commit_paths(&mut self, staged: Vec<(NodeId, String)>) {
        for (id, _) in &staged {
            if let Some(node) = self.arena.get(*id) {
                self.paths.remove(&node.path);
            }
        }
        for (id, path) in staged {
            if let Some(node) = self.arena.get_mut(id) {
                node.path = path.clone();
                self.paths.insert(path, id);
            }
        }
    }

    /// Recomputes every path from the ancestor chain and compares with the
    /// cached one; also checks sibling-name uniqueness and the path index.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        for (id, node) in &self.arena {
            let mut names = Vec::new();
            let mut current = id;
            let mut hops = 0usize;
            while let Some(n) = self.arena.get(current) {
                match n.parent {
                    Some(parent) => {
                        names.push(n.name.as_str());
                        current = parent;
                    }
                    None => break,
                }
                hops += 1;
                if hops > self.arena.len() {
                    return Err(format!("cycle through {}", node.path));
                }
            }
            if current != self.root {
                return Err(format!("{} is detached from the root", node.path));
            }
            let mut expected = ROOT_PATH.to_string();
            for name in names.iter().rev() {
                expected = path_table::join(&expected, name);
            }
            if expected != node.path {
                return Err(format!("path {} should be {}", node.path, expected));
            }
            if self.paths.get(&node.path) != Some(id) {
                return Err(format!("path index misses {}", node.path));
            }

            let mut seen = FxHashSet::default();
            for child in node.children() {
                let Some(c) = self.arena.get(*child) else {
                    return Err(format!("{} lists a missing child", node.path));
                };
                if c.parent != Some(id) {
                    return Err(format!("{} has a wrong parent", c.path));
                }
                if !seen.insert(c.name.as_str()) {
                    return Err(format!("duplicate name {} in {}", c.name, node.path));
                }
            }
        }
        if self.paths.len() != self.arena.len() {
            return Err("path index has stale entries".to_string());
        }
        for (path, id) in self.paths.iter() {
            if !self.arena.contains_key(id) {
                return Err(format!("path index points {path} at a removed node"));
            }
        }
        Ok(())
    }

    pub(super) fn insert_loaded(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: NodeKind,
        content: Option<String>,
        store_id: Option<StoreId>,
        is_expanded: bool,
    ) -> Result<NodeId> {
        let id = self.create_node(parent, name, kind, content)?;
        let node = &mut self.arena[id];
        node.store_id = store_id;
        if let NodeData::Folder {
            is_expanded: expanded,
            ..
        } = &mut node.data
        {
            *expanded = is_expanded;
        }
        Ok(id)
    }

    pub(super) fn set_root_store_id(&mut self, store_id: Option<StoreId>) {
        if let Some(root) = self.arena.get_mut(self.root) {
            root.store_id = store_id;
        }
    }
}

fn keep_all(_: &Node) -> bool {
    true
}

pub struct Find<'a, P> {
    vfs: &'a Vfs,
    stack: Vec<NodeId>,
    predicate: P,
}

impl<'a, P> Iterator for Find<'a, P>
where
    P: FnMut(&Node) -> bool,
{
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let vfs = self.vfs;
        while let Some(id) = self.stack.pop() {
            let Some(node) = vfs.arena.get(id) else {
                continue;
            };
            self.stack.extend(node.children().iter().rev().copied());
            if (self.predicate)(node) {
                return Some(node);
            }
        }
        None
    }
}

#[cfg(test)]
#[path = "../../tests/unit/models/vfs.rs"]
mod tests;
