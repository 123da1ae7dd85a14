use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use super::state::StoreState;
use crate::kernel::services::ports::{ProjectStore, StoreError, StoreFuture};
use crate::models::{BlobKind, StoreId, TreeBlob};

/// Store backed by a single JSON snapshot, rewritten after every mutation.
/// A failed write rolls the in-memory state back.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

fn io_error(path: &Path, e: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(format!("{}: {e}", path.display()))
}

impl JsonFileStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(data) => serde_json::from_str(&data).map_err(|e| io_error(&path, e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(io_error(&path, e)),
        };
        tracing::info!(path = %path.display(), "json store opened");
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn create_project(
        &self,
        project_id: &str,
        root_name: &str,
    ) -> Result<StoreId, StoreError> {
        let project_id = project_id.to_string();
        let root_name = root_name.to_string();
        self.mutate(move |s| Ok(s.ensure_project(&project_id, &root_name)))
            .await
    }

    async fn read<T>(
        &self,
        f: impl FnOnce(&StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let state = self.state.lock().await;
        f(&state)
    }

    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.clone();
        let value = f(&mut state)?;

        if let Err(e) = self.persist(&state).await {
            tracing::warn!(path = %self.path.display(), error = %e, "json store write failed");
            *state = before;
            return Err(e);
        }
        Ok(value)
    }

    async fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(state).map_err(|e| io_error(&self.path, e))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| io_error(&self.path, e))?;
            }
        }
        tokio::fs::write(&self.path, data)
            .await
            .map_err(|e| io_error(&self.path, e))
    }
}

impl ProjectStore for JsonFileStore {
    fn fetch_structure(&self, project_id: String) -> StoreFuture<'_, TreeBlob> {
        Box::pin(async move { self.read(|s| s.structure(&project_id)).await })
    }

    fn fetch_content(&self, file_id: StoreId) -> StoreFuture<'_, String> {
        Box::pin(async move { self.read(|s| s.content(&file_id)).await })
    }

    fn create_file(
        &self,
        parent: StoreId,
        name: String,
        content: String,
    ) -> StoreFuture<'_, StoreId> {
        Box::pin(async move {
            self.mutate(|s| s.create(&parent, &name, BlobKind::File, content))
                .await
        })
    }

    fn create_folder(&self, parent: StoreId, name: String) -> StoreFuture<'_, StoreId> {
        Box::pin(async move {
            self.mutate(|s| s.create(&parent, &name, BlobKind::Folder, String::new()))
                .await
        })
    }

    fn update_file(&self, file_id: StoreId, content: String) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.mutate(|s| s.update(&file_id, content)).await })
    }

    fn delete_file(&self, file_id: StoreId) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.mutate(|s| s.delete(&file_id, BlobKind::File)).await })
    }

    fn delete_folder(&self, folder_id: StoreId) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.mutate(|s| s.delete(&folder_id, BlobKind::Folder)).await })
    }

    fn rename_file(&self, file_id: StoreId, name: String) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.mutate(|s| s.rename(&file_id, BlobKind::File, &name))
                .await
        })
    }

    fn rename_folder(&self, folder_id: StoreId, name: String) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.mutate(|s| s.rename(&folder_id, BlobKind::Folder, &name))
                .await
        })
    }

    fn move_node(&self, id: StoreId, new_parent: StoreId) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.mutate(|s| s.relocate(&id, &new_parent)).await })
    }
}

#[cfg(test)]
#[path = "../../../../../tests/unit/kernel/services/adapters/store/json_file.rs"]
mod tests;
