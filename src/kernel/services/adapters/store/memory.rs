use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use super::state::StoreState;
use crate::kernel::services::ports::{ProjectStore, StoreError, StoreFuture};
use crate::models::{BlobKind, StoreId, TreeBlob};

/// In-process store. `set_available(false)` makes every call fail with
/// [`StoreError::Unavailable`] until switched back on.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty project (or returns the existing root).
    pub fn create_project(&self, project_id: &str, root_name: &str) -> StoreId {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ensure_project(project_id, root_name)
    }

    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    /// Stored content, bypassing the availability switch.
    pub fn content_of(&self, id: &StoreId) -> Option<String> {
        self.state.lock().ok()?.content(id).ok()
    }

    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".into()));
        }
        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::Unavailable("store state poisoned".into()))?;
        f(&mut state)
    }
}

impl ProjectStore for MemoryStore {
    fn fetch_structure(&self, project_id: String) -> StoreFuture<'_, TreeBlob> {
        Box::pin(async move { self.with_state(|s| s.structure(&project_id)) })
    }

    fn fetch_content(&self, file_id: StoreId) -> StoreFuture<'_, String> {
        Box::pin(async move { self.with_state(|s| s.content(&file_id)) })
    }

    fn create_file(
        &self,
        parent: StoreId,
        name: String,
        content: String,
    ) -> StoreFuture<'_, StoreId> {
        Box::pin(async move {
            self.with_state(|s| s.create(&parent, &name, BlobKind::File, content))
        })
    }

    fn create_folder(&self, parent: StoreId, name: String) -> StoreFuture<'_, StoreId> {
        Box::pin(async move {
            self.with_state(|s| s.create(&parent, &name, BlobKind::Folder, String::new()))
        })
    }

    fn update_file(&self, file_id: StoreId, content: String) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.with_state(|s| s.update(&file_id, content)) })
    }

    fn delete_file(&self, file_id: StoreId) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.with_state(|s| s.delete(&file_id, BlobKind::File)) })
    }

    fn delete_folder(&self, folder_id: StoreId) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.with_state(|s| s.delete(&folder_id, BlobKind::Folder)) })
    }

    fn rename_file(&self, file_id: StoreId, name: String) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.with_state(|s| s.rename(&file_id, BlobKind::File, &name)) })
    }

    fn rename_folder(&self, folder_id: StoreId, name: String) -> StoreFuture<'_, ()> {
        Box::pin(
            async move { self.with_state(|s| s.rename(&folder_id, BlobKind::Folder, &name)) },
        )
    }

    fn move_node(&self, id: StoreId, new_parent: StoreId) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.with_state(|s| s.relocate(&id, &new_parent)) })
    }
}

#[cfg(test)]
#[path = "../../../../../tests/unit/kernel/services/adapters/store/memory.rs"]
mod tests;
