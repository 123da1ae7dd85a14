use super::*;
use crate::kernel::compiler::CompilePipeline;
use crate::kernel::sandbox::{RunOutcome, RunnerConfig};
use crate::kernel::services::adapters::MemoryStore;

async fn setup() -> (Arc<MemoryStore>, Workspace) {
    let store = Arc::new(MemoryStore::new());
    let root = store.create_project("p", "demo");
    let src = store.create_folder(root, "src".into()).await.unwrap();
    store
        .create_file(src, "main.ts".into(), "console.log('hi');".into())
        .await
        .unwrap();

    let runner = Arc::new(SandboxRunner::new(
        Arc::new(CompilePipeline::default()),
        RunnerConfig::default(),
    ));
    let ws = Workspace::load(store.clone(), "p", runner, ShellConfig::default())
        .await
        .unwrap();
    (store, ws)
}

/// The tree as the store currently sees it.
async fn remote(store: &MemoryStore) -> Vfs {
    let blob = store.fetch_structure("p".into()).await.unwrap();
    Vfs::deserialize(&blob).unwrap()
}

#[tokio::test]
async fn test_load_unknown_project_fails() {
    let store: Arc<dyn ProjectStore> = Arc::new(MemoryStore::new());
    let runner = Arc::new(SandboxRunner::new(
        Arc::new(CompilePipeline::default()),
        RunnerConfig::default(),
    ));
    let err = Workspace::load(store, "missing", runner, ShellConfig::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, WorkspaceError::Store(StoreError::NotFound(_))));
}

#[tokio::test]
async fn test_structure_changes_write_through() {
    let (store, mut ws) = setup().await;
    let src = ws.lookup("/src").unwrap();

    let lib = ws.create_folder(src, "lib").await.unwrap();
    let util = ws
        .create_file(lib, "util.ts", "export const x = 1;".into())
        .await
        .unwrap();
    assert!(ws.vfs().get(util).unwrap().store_id().is_some());
    assert!(remote(&store).await.lookup("/src/lib/util.ts").is_some());

    ws.rename(util, "helpers.ts").await.unwrap();
    ws.move_node(lib, ws.vfs().root()).await.unwrap();
    assert_eq!(ws.vfs().get(util).unwrap().path(), "/lib/helpers.ts");
    let seen = remote(&store).await;
    assert!(seen.lookup("/lib/helpers.ts").is_some());
    assert!(seen.lookup("/src/lib").is_none());

    ws.delete(lib).await.unwrap();
    assert!(ws.lookup("/lib").is_none());
    assert!(remote(&store).await.lookup("/lib").is_none());
    ws.vfs().check_invariants().unwrap();
}

#[tokio::test]
async fn test_store_failure_leaves_tree_untouched() {
    let (store, mut ws) = setup().await;
    let src = ws.lookup("/src").unwrap();
    let main = ws.lookup("/src/main.ts").unwrap();
    let before = ws.vfs().serialize();

    store.set_available(false);
    assert!(matches!(
        ws.create_file(src, "new.ts", String::new()).await,
        Err(WorkspaceError::Store(StoreError::Unavailable(_)))
    ));
    assert!(ws.rename(main, "other.ts").await.is_err());
    assert!(ws.delete(src).await.is_err());
    assert_eq!(ws.vfs().serialize(), before);
}

#[tokio::test]
async fn test_structural_errors_come_before_the_store() {
    let (store, mut ws) = setup().await;
    let root = ws.vfs().root();
    let src = ws.lookup("/src").unwrap();
    let main = ws.lookup("/src/main.ts").unwrap();
    store.set_available(false);

    assert_eq!(
        ws.rename(root, "x").await,
        Err(WorkspaceError::Vfs(VfsError::TypeMismatch))
    );
    assert_eq!(
        ws.create_folder(root, "src").await,
        Err(WorkspaceError::Vfs(VfsError::NameConflict))
    );
    assert_eq!(
        ws.move_node(src, src).await,
        Err(WorkspaceError::Vfs(VfsError::CycleDetected))
    );
    assert_eq!(
        ws.create_file(main, "x.ts", String::new()).await,
        Err(WorkspaceError::Vfs(VfsError::NotFound))
    );
    // renaming to the current name needs no store round trip
    assert_eq!(ws.rename(main, "main.ts").await, Ok(()));
}

#[tokio::test]
async fn test_delete_closes_tabs_and_is_idempotent() {
    let (_store, mut ws) = setup().await;
    let src = ws.lookup("/src").unwrap();
    let main = ws.lookup("/src/main.ts").unwrap();
    ws.open(main).await.unwrap();
    assert_eq!(ws.sessions().len(), 1);

    ws.delete(src).await.unwrap();
    assert!(ws.sessions().is_empty());
    assert!(ws.active_tab().is_none());
    ws.delete(src).await.unwrap();
}

#[tokio::test]
async fn test_shell_changes_are_mirrored() {
    let (store, mut ws) = setup().await;
    let outcome = ws.execute("mkdir docs").await;
    assert!(matches!(outcome.effect, Some(ShellEffect::Created { .. })));
    let docs = ws.lookup("/docs").unwrap();
    assert!(ws.vfs().get(docs).unwrap().store_id().is_some());
    assert!(remote(&store).await.lookup("/docs").is_some());

    ws.execute("rm docs").await;
    assert!(remote(&store).await.lookup("/docs").is_none());
}

#[tokio::test]
async fn test_shell_mirror_failure_is_reported_not_thrown() {
    let (store, mut ws) = setup().await;
    store.set_available(false);
    let outcome = ws.execute("touch notes.md").await;
    assert!(ws.lookup("/notes.md").is_some());
    let note = outcome.lines.last().unwrap();
    assert!(note.starts_with("warning: change kept locally only"), "{note}");
    assert_eq!(
        ws.shell().transcript().last().unwrap().output.last(),
        Some(note)
    );
}

#[tokio::test]
async fn test_shell_rm_closes_open_tabs() {
    let (_store, mut ws) = setup().await;
    let main = ws.lookup("/src/main.ts").unwrap();
    ws.open(main).await.unwrap();
    ws.execute("rm /src/main.ts").await;
    assert!(ws.sessions().is_empty());
}

#[tokio::test]
async fn test_run_active_uses_unsaved_buffer() {
    let (_store, mut ws) = setup().await;
    assert_eq!(
        ws.run_active().await.err(),
        Some(WorkspaceError::NoActiveTab)
    );

    let main = ws.lookup("/src/main.ts").unwrap();
    let tab = ws.open(main).await.unwrap();
    ws.edit(tab, "console.log('edited'); return 40 + 2;").unwrap();
    let report = ws.run_active().await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.logs[0].message, "edited");
    assert_eq!(report.value.as_deref(), Some("42"));
    assert!(ws.is_dirty(tab).unwrap());
}

#[tokio::test]
async fn test_only_scripts_are_runnable() {
    let (_store, mut ws) = setup().await;
    let root = ws.vfs().root();
    let readme = ws
        .create_file(root, "README.md", "# hi".into())
        .await
        .unwrap();
    ws.open(readme).await.unwrap();
    assert_eq!(
        ws.run_active().await.err(),
        Some(WorkspaceError::NotRunnable("/README.md".into()))
    );
}

#[tokio::test]
async fn test_search_and_explorer() {
    let (_store, mut ws) = setup().await;
    let main = ws.lookup("/src/main.ts").unwrap();
    // content is fetched lazily, so nothing matches before the file is opened
    assert!(ws.search("console", SearchOptions::default()).unwrap().is_empty());
    ws.open(main).await.unwrap();
    let found = ws.search("console", SearchOptions::default()).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].matches[0].line, 1);

    let rows = ws.explorer_rows(Some("main"));
    let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
    assert!(names.contains(&"src"));
    assert!(names.contains(&"main.ts"));
}
