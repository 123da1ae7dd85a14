//! 工作区：顶层状态容器，把 VFS、会话、shell 和运行器接到项目存储上
//!
//! - 结构变更（创建/重命名/移动/删除）先写存储，成功后才改本地树
//! - shell 产生的变更先改本地树，再尽力同步到存储，失败只记入 transcript
//! - 整个工作区只有一棵 `Vfs`，各组件通过引用访问

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::kernel::sandbox::{LogEvent, RunReport, SandboxRunner};
use crate::kernel::search::{self, FileMatches, SearchError, SearchOptions};
use crate::kernel::services::ports::{ProjectStore, StoreError};
use crate::kernel::session::{SessionError, SessionManager, Tab, TabId};
use crate::kernel::shell::{CommandInterpreter, ShellConfig, ShellEffect, ShellOutcome};
use crate::models::{NodeId, NodeKind, StoreId, TreeRow, Vfs, VfsError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceError {
    Vfs(VfsError),
    Store(StoreError),
    Session(SessionError),
    Search(SearchError),
    NoActiveTab,
    NotRunnable(String),
}

impl fmt::Display for WorkspaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkspaceError::Vfs(e) => write!(f, "{e}"),
            WorkspaceError::Store(e) => write!(f, "{e}"),
            WorkspaceError::Session(e) => write!(f, "{e}"),
            WorkspaceError::Search(e) => write!(f, "{e}"),
            WorkspaceError::NoActiveTab => write!(f, "no file is open"),
            WorkspaceError::NotRunnable(path) => write!(f, "{path} is not a runnable script"),
        }
    }
}

impl std::error::Error for WorkspaceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorkspaceError::Vfs(e) => Some(e),
            WorkspaceError::Store(e) => Some(e),
            WorkspaceError::Session(e) => Some(e),
            WorkspaceError::Search(e) => Some(e),
            WorkspaceError::NoActiveTab | WorkspaceError::NotRunnable(_) => None,
        }
    }
}

impl From<VfsError> for WorkspaceError {
    fn from(e: VfsError) -> Self {
        WorkspaceError::Vfs(e)
    }
}

impl From<StoreError> for WorkspaceError {
    fn from(e: StoreError) -> Self {
        WorkspaceError::Store(e)
    }
}

impl From<SessionError> for WorkspaceError {
    fn from(e: SessionError) -> Self {
        WorkspaceError::Session(e)
    }
}

impl From<SearchError> for WorkspaceError {
    fn from(e: SearchError) -> Self {
        WorkspaceError::Search(e)
    }
}

pub type Result<T> = std::result::Result<T, WorkspaceError>;

pub struct Workspace {
    project_id: String,
    store: Arc<dyn ProjectStore>,
    runner: Arc<SandboxRunner>,
    vfs: Vfs,
    sessions: SessionManager,
    shell: CommandInterpreter,
}

impl Workspace {
    /// Fetches the project tree and rejects it if it breaks any tree
    /// invariant.
    pub async fn load(
        store: Arc<dyn ProjectStore>,
        project_id: &str,
        runner: Arc<SandboxRunner>,
        shell: ShellConfig,
    ) -> Result<Self> {
        let blob = store.fetch_structure(project_id.to_string()).await?;
        let vfs = Vfs::deserialize(&blob)?;
        tracing::info!(project_id, nodes = vfs.len(), "workspace loaded");
        Ok(Self {
            project_id: project_id.to_string(),
            store,
            runner,
            vfs,
            sessions: SessionManager::new(),
            shell: CommandInterpreter::new(shell),
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn shell(&self) -> &CommandInterpreter {
        &self.shell
    }

    pub fn runner(&self) -> &Arc<SandboxRunner> {
        &self.runner
    }

    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        self.vfs.lookup(path)
    }

    fn persisted_id(&self, id: NodeId) -> Result<StoreId> {
        let node = self.vfs.get(id).ok_or(VfsError::NotFound)?;
        node.store_id().cloned().ok_or_else(|| {
            WorkspaceError::Store(StoreError::NotFound(format!(
                "{} is not persisted",
                node.path()
            )))
        })
    }

    pub async fn create_file(
        &mut self,
        parent: NodeId,
        name: &str,
        content: String,
    ) -> Result<NodeId> {
        self.vfs.check_create(parent, name)?;
        let parent_sid = self.persisted_id(parent)?;
        let sid = self
            .store
            .create_file(parent_sid, name.to_string(), content.clone())
            .await?;
        let id = self
            .vfs
            .create_node(parent, name, NodeKind::File, Some(content))?;
        self.vfs.bind_store_id(id, sid)?;
        Ok(id)
    }

    pub async fn create_folder(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        self.vfs.check_create(parent, name)?;
        let parent_sid = self.persisted_id(parent)?;
        let sid = self
            .store
            .create_folder(parent_sid, name.to_string())
            .await?;
        let id = self.vfs.create_node(parent, name, NodeKind::Folder, None)?;
        self.vfs.bind_store_id(id, sid)?;
        Ok(id)
    }

    pub async fn rename(&mut self, id: NodeId, new_name: &str) -> Result<()> {
        self.vfs.check_rename(id, new_name)?;
        let Some(node) = self.vfs.get(id) else {
            return Err(VfsError::NotFound.into());
        };
        if node.name() == new_name {
            return Ok(());
        }
        if let Some(sid) = node.store_id().cloned() {
            match node.kind() {
                NodeKind::File => self.store.rename_file(sid, new_name.to_string()).await?,
                NodeKind::Folder => self.store.rename_folder(sid, new_name.to_string()).await?,
            }
        }
        self.vfs.rename(id, new_name)?;
        Ok(())
    }

    pub async fn move_node(&mut self, id: NodeId, new_parent: NodeId) -> Result<()> {
        self.vfs.check_move(id, new_parent)?;
        if self.vfs.get(id).and_then(|n| n.parent()) == Some(new_parent) {
            return Ok(());
        }
        if let Some(sid) = self.vfs.get(id).and_then(|n| n.store_id().cloned()) {
            let parent_sid = self.persisted_id(new_parent)?;
            self.store.move_node(sid, parent_sid).await?;
        }
        self.vfs.move_node(id, new_parent)?;
        Ok(())
    }

    /// Deletes `id` and its subtree, closing any tabs on them. Deleting a
    /// node that is already gone, locally or in the store, is not an error.
    pub async fn delete(&mut self, id: NodeId) -> Result<()> {
        if id == self.vfs.root() {
            return Err(VfsError::TypeMismatch.into());
        }
        let Some(node) = self.vfs.get(id) else {
            return Ok(());
        };
        if let Some(sid) = node.store_id().cloned() {
            let deleted = match node.kind() {
                NodeKind::File => self.store.delete_file(sid).await,
                NodeKind::Folder => self.store.delete_folder(sid).await,
            };
            match deleted {
                Ok(()) | Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        let removed = self.vfs.delete(id)?;
        self.close_tabs_for(&removed);
        Ok(())
    }

    fn close_tabs_for(&mut self, removed: &[NodeId]) {
        for id in removed {
            self.sessions.close_file(*id);
        }
    }

    pub async fn open(&mut self, file: NodeId) -> Result<TabId> {
        Ok(self
            .sessions
            .open(&mut self.vfs, self.store.as_ref(), file)
            .await?)
    }

    pub fn edit(&mut self, tab: TabId, text: &str) -> Result<()> {
        Ok(self.sessions.edit(&self.vfs, tab, text)?)
    }

    pub async fn save(&mut self, tab: TabId) -> Result<()> {
        Ok(self
            .sessions
            .save(&mut self.vfs, self.store.as_ref(), tab)
            .await?)
    }

    pub fn close(&mut self, tab: TabId) -> Result<Tab> {
        Ok(self.sessions.close(tab)?)
    }

    pub fn switch_to(&mut self, tab: TabId) -> Result<()> {
        Ok(self.sessions.switch_to(tab)?)
    }

    pub fn active_tab(&self) -> Option<&Tab> {
        self.sessions.active_tab()
    }

    pub fn is_dirty(&self, tab: TabId) -> Result<bool> {
        Ok(self.sessions.is_dirty(tab)?)
    }

    /// Runs one shell line and mirrors the resulting tree change into the
    /// store. A failed mirror is reported as an extra transcript line.
    pub async fn execute(&mut self, line: &str) -> ShellOutcome {
        let mut outcome = self.shell.execute(&mut self.vfs, line);
        let synced = match &outcome.effect {
            Some(ShellEffect::Created { id }) => self.sync_created(*id).await,
            Some(ShellEffect::Removed {
                kind,
                store_id,
                removed,
                ..
            }) => {
                self.close_tabs_for(removed);
                match store_id {
                    Some(sid) => self.sync_removed(*kind, sid.clone()).await,
                    None => Ok(()),
                }
            }
            None => Ok(()),
        };
        if let Err(e) = synced {
            tracing::warn!(line, error = %e, "shell change not written to store");
            let note = format!("warning: change kept locally only: {e}");
            self.shell.annotate(note.clone());
            outcome.lines.push(note);
        }
        outcome
    }

    async fn sync_created(&mut self, id: NodeId) -> Result<()> {
        let Some(node) = self.vfs.get(id) else {
            return Ok(());
        };
        let name = node.name().to_string();
        let kind = node.kind();
        let content = node.content().unwrap_or_default().to_string();
        let parent = node.parent().ok_or(VfsError::TypeMismatch)?;
        let parent_sid = self.persisted_id(parent)?;
        let sid = match kind {
            NodeKind::File => self.store.create_file(parent_sid, name, content).await?,
            NodeKind::Folder => self.store.create_folder(parent_sid, name).await?,
        };
        self.vfs.bind_store_id(id, sid)?;
        Ok(())
    }

    async fn sync_removed(&self, kind: NodeKind, sid: StoreId) -> Result<()> {
        let deleted = match kind {
            NodeKind::File => self.store.delete_file(sid).await,
            NodeKind::Folder => self.store.delete_folder(sid).await,
        };
        match deleted {
            Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn run_active(&self) -> Result<RunReport> {
        self.run_active_with_sink(None).await
    }

    /// Runs the active tab's buffer, saved or not.
    pub async fn run_active_with_sink(
        &self,
        sink: Option<mpsc::UnboundedSender<LogEvent>>,
    ) -> Result<RunReport> {
        let tab = self.sessions.active_tab().ok_or(WorkspaceError::NoActiveTab)?;
        let node = self.vfs.get(tab.file_id()).ok_or(VfsError::NotFound)?;
        if !node.language().is_some_and(|l| l.is_runnable()) {
            return Err(WorkspaceError::NotRunnable(node.path().to_string()));
        }
        tracing::info!(path = %node.path(), tab = %tab.id(), "running active tab");
        let source = tab.text();
        Ok(self.runner.run_with_sink(&source, sink).await)
    }

    pub fn search(&self, query: &str, options: SearchOptions) -> Result<Vec<FileMatches>> {
        Ok(search::search_workspace(&self.vfs, query, options)?)
    }

    pub fn explorer_rows(&self, filter: Option<&str>) -> Vec<TreeRow> {
        self.vfs.flatten_for_view(filter)
    }

    pub fn toggle_expand(&mut self, id: NodeId) {
        self.vfs.toggle_expand(id);
    }
}

#[cfg(test)]
#[path = "../../tests/unit/kernel/workspace.rs"]
mod tests;
