//! In-process model of the remote project store, shared by both adapters.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::kernel::services::ports::StoreError;
use crate::models::{path_table, BlobKind, StoreId, TreeBlob, ROOT_PATH};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredNode {
    pub name: String,
    pub kind: BlobKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<StoreId>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub children: Vec<StoreId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreState {
    /// project id -> root folder id
    projects: FxHashMap<String, StoreId>,
    nodes: FxHashMap<StoreId, StoredNode>,
    next_id: u64,
}

fn not_found(id: &StoreId) -> StoreError {
    StoreError::NotFound(id.to_string())
}

impl StoreState {
    fn mint(&mut self) -> StoreId {
        self.next_id += 1;
        StoreId::new(format!("f-{}", self.next_id))
    }

    pub fn project_root(&self, project_id: &str) -> Option<&StoreId> {
        self.projects.get(project_id)
    }

    /// Returns the root of `project_id`, creating an empty project first if
    /// needed.
    pub fn ensure_project(&mut self, project_id: &str, root_name: &str) -> StoreId {
        if let Some(root) = self.project_root(project_id) {
            return root.clone();
        }
        let root = self.mint();
        self.nodes.insert(
            root.clone(),
            StoredNode {
                name: root_name.to_string(),
                kind: BlobKind::Folder,
                parent: None,
                content: String::new(),
                children: Vec::new(),
            },
        );
        self.projects.insert(project_id.to_string(), root.clone());
        root
    }

    pub fn structure(&self, project_id: &str) -> Result<TreeBlob, StoreError> {
        let root = self
            .project_root(project_id)
            .ok_or_else(|| StoreError::NotFound(format!("project {project_id}")))?;
        self.blob_for(root, ROOT_PATH)
    }

    fn blob_for(&self, root: &StoreId, root_path: &str) -> Result<TreeBlob, StoreError> {
        // post-order: (node, its path, next child to visit, finished children)
        let mut stack: Vec<(&StoreId, String, usize, Vec<TreeBlob>)> =
            vec![(root, root_path.to_string(), 0, Vec::new())];
        while let Some((id, path, next, _)) = stack.last_mut() {
            let node = self.nodes.get(*id).ok_or_else(|| not_found(*id))?;
            if node.kind == BlobKind::Folder {
                if let Some(child) = node.children.get(*next) {
                    *next += 1;
                    let child_name = self
                        .nodes
                        .get(child)
                        .map(|c| c.name.as_str())
                        .ok_or_else(|| not_found(child))?;
                    let child_path = path_table::join(path, child_name);
                    stack.push((child, child_path, 0, Vec::new()));
                    continue;
                }
            }

            let Some((id, path, _, children)) = stack.pop() else {
                break;
            };
            let mut blob = match node.kind {
                BlobKind::Folder => TreeBlob::folder(id.as_str(), node.name.as_str(), children),
                // contents stay behind until fetched
                BlobKind::File => TreeBlob::file(id.as_str(), node.name.as_str(), None),
            };
            blob.path = Some(path);
            match stack.last_mut() {
                Some((_, _, _, siblings)) => siblings.push(blob),
                None => return Ok(blob),
            }
        }
        Err(not_found(root))
    }

    pub fn content(&self, id: &StoreId) -> Result<String, StoreError> {
        match self.nodes.get(id) {
            Some(node) if node.kind == BlobKind::File => Ok(node.content.clone()),
            _ => Err(not_found(id)),
        }
    }

    fn check_name_free(&self, parent: &StoreId, name: &str) -> Result<(), StoreError> {
        let folder = self.nodes.get(parent).ok_or_else(|| not_found(parent))?;
        if folder.kind != BlobKind::Folder {
            return Err(not_found(parent));
        }
        let taken = folder
            .children
            .iter()
            .filter_map(|c| self.nodes.get(c))
            .any(|c| c.name == name);
        if taken {
            return Err(StoreError::Conflict(format!("{name} already exists")));
        }
        Ok(())
    }

    pub fn create(
        &mut self,
        parent: &StoreId,
        name: &str,
        kind: BlobKind,
        content: String,
    ) -> Result<StoreId, StoreError> {
        self.check_name_free(parent, name)?;
        let id = self.mint();
        self.nodes.insert(
            id.clone(),
            StoredNode {
                name: name.to_string(),
                kind,
                parent: Some(parent.clone()),
                content,
                children: Vec::new(),
            },
        );
        if let Some(folder) = self.nodes.get_mut(parent) {
            folder.children.push(id.clone());
        }
        Ok(id)
    }

    pub fn update(&mut self, id: &StoreId, content: String) -> Result<(), StoreError> {
        match self.nodes.get_mut(id) {
            Some(node) if node.kind == BlobKind::File => {
                node.content = content;
                Ok(())
            }
            _ => Err(not_found(id)),
        }
    }

    pub fn delete(&mut self, id: &StoreId, kind: BlobKind) -> Result<(), StoreError> {
        let node = self.nodes.get(id).ok_or_else(|| not_found(id))?;
        if node.kind != kind {
            return Err(not_found(id));
        }
        let Some(parent) = node.parent.clone() else {
            return Err(StoreError::Conflict("project root cannot be deleted".into()));
        };
        if let Some(folder) = self.nodes.get_mut(&parent) {
            folder.children.retain(|c| c != id);
        }

        let mut stack = vec![id.clone()];
        while let Some(next) = stack.pop() {
            if let Some(removed) = self.nodes.remove(&next) {
                stack.extend(removed.children);
            }
        }
        Ok(())
    }

    pub fn rename(&mut self, id: &StoreId, kind: BlobKind, name: &str) -> Result<(), StoreError> {
        let node = self.nodes.get(id).ok_or_else(|| not_found(id))?;
        if node.kind != kind {
            return Err(not_found(id));
        }
        if node.name == name {
            return Ok(());
        }
        if let Some(parent) = node.parent.clone() {
            self.check_name_free(&parent, name)?;
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.name = name.to_string();
        }
        Ok(())
    }

    pub fn relocate(&mut self, id: &StoreId, new_parent: &StoreId) -> Result<(), StoreError> {
        let node = self.nodes.get(id).ok_or_else(|| not_found(id))?;
        let Some(old_parent) = node.parent.clone() else {
            return Err(StoreError::Conflict("project root cannot be moved".into()));
        };
        if &old_parent == new_parent {
            return Ok(());
        }
        let name = node.name.clone();

        let mut cursor = Some(new_parent.clone());
        while let Some(current) = cursor {
            if &current == id {
                return Err(StoreError::Conflict("cannot move into own subtree".into()));
            }
            cursor = self.nodes.get(&current).and_then(|n| n.parent.clone());
        }
        self.check_name_free(new_parent, &name)?;

        if let Some(folder) = self.nodes.get_mut(&old_parent) {
            folder.children.retain(|c| c != id);
        }
        if let Some(folder) = self.nodes.get_mut(new_parent) {
            folder.children.push(id.clone());
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.parent = Some(new_parent.clone());
        }
        Ok(())
    }
}
