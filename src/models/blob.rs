//! 树的传输格式：`{ id, name, kind, path, content?, children? }`
//!
//! children 的顺序就是显示顺序。反序列化遇到不合法的结构直接拒绝，不做修补。

use compact_str::CompactString;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use slotmap::Key;
use std::fmt;

use super::path_table::{self, ROOT_PATH};
use super::vfs::{Node, NodeId, NodeKind, Vfs, VfsError};

/// Prefix of ids minted for nodes the store has not acknowledged yet.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Authoritative id assigned by the persistence store. Never confused with a
/// local [`NodeId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(CompactString);

impl StoreId {
    pub fn new(raw: impl Into<CompactString>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobKind {
    File,
    Folder,
}

impl From<NodeKind> for BlobKind {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::File => BlobKind::File,
            NodeKind::Folder => BlobKind::Folder,
        }
    }
}

impl From<BlobKind> for NodeKind {
    fn from(kind: BlobKind) -> Self {
        match kind {
            BlobKind::File => NodeKind::File,
            BlobKind::Folder => NodeKind::Folder,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeBlob {
    pub id: String,
    pub name: String,
    pub kind: BlobKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TreeBlob>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_expanded: Option<bool>,
}

impl TreeBlob {
    pub fn folder(id: impl Into<String>, name: impl Into<String>, children: Vec<TreeBlob>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: BlobKind::Folder,
            path: None,
            content: None,
            children: Some(children),
            is_expanded: None,
        }
    }

    pub fn file(id: impl Into<String>, name: impl Into<String>, content: Option<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: BlobKind::File,
            path: None,
            content,
            children: None,
            is_expanded: None,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }
}

fn local_id(id: NodeId) -> String {
    format!("{LOCAL_ID_PREFIX}{}", id.data().as_ffi())
}

fn store_id_of(raw: &str) -> Option<StoreId> {
    if raw.is_empty() || raw.starts_with(LOCAL_ID_PREFIX) {
        None
    } else {
        Some(StoreId::new(raw))
    }
}

fn invalid(reason: impl Into<String>) -> VfsError {
    VfsError::InvalidBlob(reason.into())
}

impl Vfs {
    pub fn serialize(&self) -> TreeBlob {
        self.blob_for(self.root())
            .unwrap_or_else(|| TreeBlob::folder(String::new(), String::new(), Vec::new()))
    }

    /// Blob for a single subtree, `None` if `id` is gone.
    pub fn blob_for(&self, id: NodeId) -> Option<TreeBlob> {
        self.get(id)?;
        // post-order: (node, next child to visit, blobs of visited children)
        let mut stack: Vec<(NodeId, usize, Vec<TreeBlob>)> = vec![(id, 0, Vec::new())];
        loop {
            let (current, next, _) = stack.last_mut()?;
            let current = *current;
            let node = self.get(current)?;
            if let Some(&child) = node.children().get(*next) {
                *next += 1;
                if self.contains(child) {
                    stack.push((child, 0, Vec::new()));
                }
                continue;
            }

            let (_, _, children) = stack.pop()?;
            let blob = node_blob(node, current, children);
            match stack.last_mut() {
                Some((_, _, siblings)) => siblings.push(blob),
                None => return Some(blob),
            }
        }
    }

    /// Builds a fresh tree. Duplicate sibling names, a node listed twice,
    /// children under a file or a `path` that disagrees with the nesting are
    /// all rejected.
    pub fn deserialize(blob: &TreeBlob) -> Result<Vfs, VfsError> {
        if blob.kind != BlobKind::Folder {
            return Err(invalid("root must be a folder"));
        }
        if let Some(path) = blob.path.as_deref() {
            if path != ROOT_PATH {
                return Err(invalid(format!("root path is {path}, expected /")));
            }
        }

        let mut vfs = Vfs::new(&blob.name);
        vfs.set_root_store_id(store_id_of(&blob.id));
        if blob.is_expanded == Some(false) {
            vfs.collapse(vfs.root());
        }

        let mut seen_ids: FxHashSet<&str> = FxHashSet::default();
        if !blob.id.is_empty() {
            seen_ids.insert(blob.id.as_str());
        }

        let mut stack: Vec<(NodeId, &TreeBlob)> = Vec::new();
        for child in blob.children.iter().flatten().rev() {
            stack.push((vfs.root(), child));
        }

        // children are pushed reversed so siblings are inserted in blob order
        while let Some((parent, entry)) = stack.pop() {
            if !entry.id.is_empty() && !seen_ids.insert(entry.id.as_str()) {
                return Err(invalid(format!("id {} appears more than once", entry.id)));
            }
            if entry.kind == BlobKind::File
                && entry.children.as_ref().is_some_and(|c| !c.is_empty())
            {
                return Err(invalid(format!("file {} has children", entry.name)));
            }

            let kind = NodeKind::from(entry.kind);
            let id = vfs
                .insert_loaded(
                    parent,
                    &entry.name,
                    kind,
                    entry.content.clone(),
                    store_id_of(&entry.id),
                    entry.is_expanded.unwrap_or(false),
                )
                .map_err(|e| match e {
                    VfsError::NameConflict => {
                        invalid(format!("duplicate name {} among siblings", entry.name))
                    }
                    VfsError::InvalidName(reason) => invalid(reason),
                    other => other,
                })?;

            if let Some(path) = entry.path.as_deref() {
                let actual = vfs.get(id).map(|n| n.path()).unwrap_or_default();
                if path_table::normalize(path, ROOT_PATH) != actual {
                    return Err(invalid(format!("path {path} does not match {actual}")));
                }
            }

            for child in entry.children.iter().flatten().rev() {
                stack.push((id, child));
            }
        }

        tracing::debug!(nodes = vfs.len(), "vfs deserialized");
        Ok(vfs)
    }
}

fn node_blob(node: &Node, id: NodeId, children: Vec<TreeBlob>) -> TreeBlob {
    let id_text = node
        .store_id()
        .map(|s| s.to_string())
        .unwrap_or_else(|| local_id(id));

    match node.kind() {
        NodeKind::File => TreeBlob {
            id: id_text,
            name: node.name().to_string(),
            kind: BlobKind::File,
            path: Some(node.path().to_string()),
            content: node.content().map(str::to_string),
            children: None,
            is_expanded: None,
        },
        NodeKind::Folder => TreeBlob {
            id: id_text,
            name: node.name().to_string(),
            kind: BlobKind::Folder,
            path: Some(node.path().to_string()),
            content: None,
            children: Some(children),
            is_expanded: Some(node.is_expanded()),
        },
    }
}

#[cfg(test)]
#[path = "../../tests/unit/models/blob.rs"]
mod tests;
