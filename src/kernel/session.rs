//! 编辑会话：打开的标签页、当前活动标签、以及相对已保存内容的脏状态
//!
//! 标签按 `NodeId` 去重；缓冲区用 `Rope` 保存，保存时先写存储再更新 VFS，
//! 存储失败时标签保持脏状态。

use std::fmt;

use ropey::Rope;
use rustc_hash::FxHashMap;

use crate::kernel::services::ports::{ProjectStore, StoreError};
use crate::models::{NodeId, Vfs, VfsError};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TabId(u64);

impl TabId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Tab {
    id: TabId,
    file_id: NodeId,
    buffer: Rope,
    dirty: bool,
}

impl Tab {
    pub fn id(&self) -> TabId {
        self.id
    }

    pub fn file_id(&self) -> NodeId {
        self.file_id
    }

    pub fn buffer(&self) -> &Rope {
        &self.buffer
    }

    pub fn text(&self) -> String {
        self.buffer.to_string()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    UnknownTab,
    Vfs(VfsError),
    Persistence(StoreError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::UnknownTab => write!(f, "no such tab"),
            SessionError::Vfs(e) => write!(f, "{e}"),
            SessionError::Persistence(e) => write!(f, "persistence unavailable: {e}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::UnknownTab => None,
            SessionError::Vfs(e) => Some(e),
            SessionError::Persistence(e) => Some(e),
        }
    }
}

impl From<VfsError> for SessionError {
    fn from(e: VfsError) -> Self {
        SessionError::Vfs(e)
    }
}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        SessionError::Persistence(e)
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Default)]
pub struct SessionManager {
    tabs: FxHashMap<TabId, Tab>,
    /// Open order, which is also the display order.
    order: Vec<TabId>,
    active: Option<TabId>,
    by_file: FxHashMap<NodeId, TabId>,
    next_id: u64,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens `file`, or activates its existing tab. Content missing from the
    /// VFS is fetched from `store` and cached on the node.
    pub async fn open(
        &mut self,
        vfs: &mut Vfs,
        store: &dyn ProjectStore,
        file: NodeId,
    ) -> Result<TabId> {
        if let Some(&existing) = self.by_file.get(&file) {
            self.active = Some(existing);
            return Ok(existing);
        }

        let node = vfs.get(file).ok_or(VfsError::NotFound)?;
        if node.is_folder() {
            return Err(VfsError::TypeMismatch.into());
        }
        let cached = node.content().map(str::to_string);
        let store_id = node.store_id().cloned();
        let content = match (cached, store_id) {
            (Some(content), _) => content,
            (None, Some(store_id)) => {
                let fetched = store.fetch_content(store_id).await.map_err(|e| {
                    tracing::warn!(file = %vfs.get(file).map_or("", |n| n.path()), error = %e, "content fetch failed");
                    e
                })?;
                vfs.update_content(file, fetched.clone())?;
                fetched
            }
            (None, None) => String::new(),
        };

        self.next_id += 1;
        let id = TabId(self.next_id);
        self.tabs.insert(
            id,
            Tab {
                id,
                file_id: file,
                buffer: Rope::from_str(&content),
                dirty: false,
            },
        );
        self.order.push(id);
        self.by_file.insert(file, id);
        self.active = Some(id);
        tracing::debug!(tab = id.0, path = %vfs.get(file).map_or("", |n| n.path()), "tab opened");
        Ok(id)
    }

    /// Replaces the buffer. The tab is dirty exactly when the new text differs
    /// from the node's persisted content.
    pub fn edit(&mut self, vfs: &Vfs, tab: TabId, text: &str) -> Result<()> {
        let tab = self.tabs.get_mut(&tab).ok_or(SessionError::UnknownTab)?;
        let persisted = vfs
            .get(tab.file_id)
            .and_then(|n| n.content())
            .unwrap_or_default();
        tab.buffer = Rope::from_str(text);
        tab.dirty = text != persisted;
        Ok(())
    }

    /// Writes the buffer to the store, then to the VFS. A file the store has
    /// never seen is created under its parent and bound to the new store id.
    pub async fn save(&mut self, vfs: &mut Vfs, store: &dyn ProjectStore, tab: TabId) -> Result<()> {
        let tab_ref = self.tabs.get(&tab).ok_or(SessionError::UnknownTab)?;
        let file = tab_ref.file_id;
        let text = tab_ref.buffer.to_string();
        let node = vfs.get(file).ok_or(VfsError::NotFound)?;
        let path = node.path().to_string();

        let written = match node.store_id().cloned() {
            Some(store_id) => store.update_file(store_id, text.clone()).await.map(|_| None),
            None => {
                let parent_id = node
                    .parent()
                    .and_then(|p| vfs.get(p))
                    .and_then(|p| p.store_id().cloned())
                    .ok_or_else(|| {
                        SessionError::Persistence(StoreError::NotFound(format!(
                            "parent of {path} is not persisted"
                        )))
                    })?;
                store
                    .create_file(parent_id, node.name().to_string(), text.clone())
                    .await
                    .map(Some)
            }
        };

        let bound = match written {
            Ok(bound) => bound,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "save failed, tab stays dirty");
                return Err(e.into());
            }
        };
        vfs.update_content(file, text)?;
        if let Some(store_id) = bound {
            vfs.bind_store_id(file, store_id)?;
        }
        if let Some(tab) = self.tabs.get_mut(&tab) {
            tab.dirty = false;
        }
        tracing::info!(path = %path, "file saved");
        Ok(())
    }

    /// Removes the tab without saving. If it was active, the tab that took
    /// its place in the open order becomes active, else the one before it.
    pub fn close(&mut self, tab: TabId) -> Result<Tab> {
        let closed = self.tabs.remove(&tab).ok_or(SessionError::UnknownTab)?;
        self.by_file.remove(&closed.file_id);
        let index = self.order.iter().position(|t| *t == tab).unwrap_or(0);
        self.order.retain(|t| *t != tab);

        if self.active == Some(tab) {
            self.active = self
                .order
                .get(index)
                .or_else(|| index.checked_sub(1).and_then(|i| self.order.get(i)))
                .copied();
        }
        tracing::debug!(tab = tab.0, dirty = closed.dirty, "tab closed");
        Ok(closed)
    }

    pub fn close_file(&mut self, file: NodeId) -> Option<Tab> {
        let tab = self.by_file.get(&file).copied()?;
        self.close(tab).ok()
    }

    pub fn switch_to(&mut self, tab: TabId) -> Result<()> {
        if !self.tabs.contains_key(&tab) {
            return Err(SessionError::UnknownTab);
        }
        self.active = Some(tab);
        Ok(())
    }

    pub fn active_id(&self) -> Option<TabId> {
        self.active
    }

    pub fn active_tab(&self) -> Option<&Tab> {
        self.tabs.get(&self.active?)
    }

    pub fn open_tabs(&self) -> impl Iterator<Item = &Tab> + '_ {
        self.order.iter().filter_map(|id| self.tabs.get(id))
    }

    pub fn is_dirty(&self, tab: TabId) -> Result<bool> {
        self.tabs
            .get(&tab)
            .map(Tab::is_dirty)
            .ok_or(SessionError::UnknownTab)
    }

    pub fn tab(&self, tab: TabId) -> Option<&Tab> {
        self.tabs.get(&tab)
    }

    pub fn tab_for_file(&self, file: NodeId) -> Option<TabId> {
        self.by_file.get(&file).copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/kernel/session.rs"]
mod tests;
