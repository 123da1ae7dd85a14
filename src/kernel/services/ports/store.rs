//! Persistence collaborator contract.
//!
//! The store is authoritative on load and a write-through target afterwards.
//! All arguments are owned so implementations can move them into the future.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::models::{StoreId, TreeBlob};

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Unavailable(String),
    NotFound(String),
    Conflict(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(reason) => write!(f, "store unavailable: {reason}"),
            StoreError::NotFound(what) => write!(f, "not found in store: {what}"),
            StoreError::Conflict(what) => write!(f, "store conflict: {what}"),
        }
    }
}

impl std::error::Error for StoreError {}

pub trait ProjectStore: Send + Sync {
    /// Whole tree of a project. File contents may be left out and fetched
    /// later with [`ProjectStore::fetch_content`].
    fn fetch_structure(&self, project_id: String) -> StoreFuture<'_, TreeBlob>;

    fn fetch_content(&self, file_id: StoreId) -> StoreFuture<'_, String>;

    fn create_file(
        &self,
        parent: StoreId,
        name: String,
        content: String,
    ) -> StoreFuture<'_, StoreId>;

    fn create_folder(&self, parent: StoreId, name: String) -> StoreFuture<'_, StoreId>;

    fn update_file(&self, file_id: StoreId, content: String) -> StoreFuture<'_, ()>;

    fn delete_file(&self, file_id: StoreId) -> StoreFuture<'_, ()>;

    fn delete_folder(&self, folder_id: StoreId) -> StoreFuture<'_, ()>;

    fn rename_file(&self, file_id: StoreId, name: String) -> StoreFuture<'_, ()>;

    fn rename_folder(&self, folder_id: StoreId, name: String) -> StoreFuture<'_, ()>;

    fn move_node(&self, id: StoreId, new_parent: StoreId) -> StoreFuture<'_, ()>;
}
