use super::*;
use crate::kernel::services::adapters::MemoryStore;
use crate::models::NodeKind;

struct Fixture {
    store: MemoryStore,
    vfs: Vfs,
    src: NodeId,
    a: NodeId,
    b: NodeId,
}

async fn fixture() -> Fixture {
    let store = MemoryStore::new();
    let root = store.create_project("p", "demo");
    let src = store.create_folder(root, "src".into()).await.unwrap();
    store
        .create_file(src.clone(), "a.ts".into(), "let a = 1;".into())
        .await
        .unwrap();
    store
        .create_file(src, "b.ts".into(), "b".into())
        .await
        .unwrap();

    let blob = store.fetch_structure("p".into()).await.unwrap();
    let vfs = Vfs::deserialize(&blob).unwrap();
    let src = vfs.lookup("/src").unwrap();
    let a = vfs.lookup("/src/a.ts").unwrap();
    let b = vfs.lookup("/src/b.ts").unwrap();
    Fixture {
        store,
        vfs,
        src,
        a,
        b,
    }
}

#[tokio::test]
async fn test_open_fetches_content_lazily() {
    let mut f = fixture().await;
    let mut sessions = SessionManager::new();
    assert_eq!(f.vfs.get(f.a).unwrap().content(), None);

    let tab = sessions.open(&mut f.vfs, &f.store, f.a).await.unwrap();
    assert_eq!(sessions.tab(tab).unwrap().text(), "let a = 1;");
    assert_eq!(f.vfs.get(f.a).unwrap().content(), Some("let a = 1;"));
    assert_eq!(sessions.active_id(), Some(tab));
    assert!(!sessions.is_dirty(tab).unwrap());
}

#[tokio::test]
async fn test_open_twice_then_close() {
    let mut f = fixture().await;
    let mut sessions = SessionManager::new();

    let first = sessions.open(&mut f.vfs, &f.store, f.a).await.unwrap();
    let other = sessions.open(&mut f.vfs, &f.store, f.b).await.unwrap();
    assert_eq!(sessions.active_id(), Some(other));

    let again = sessions.open(&mut f.vfs, &f.store, f.a).await.unwrap();
    assert_eq!(first, again);
    assert_eq!(sessions.active_id(), Some(first));
    assert_eq!(
        sessions.open_tabs().filter(|t| t.file_id() == f.a).count(),
        1
    );

    sessions.close(other).unwrap();
    sessions.close(first).unwrap();
    assert!(sessions.is_empty());
    assert_eq!(sessions.active_id(), None);
    assert!(sessions.active_tab().is_none());
}

#[tokio::test]
async fn test_dirty_tracks_persisted_content() {
    let mut f = fixture().await;
    let mut sessions = SessionManager::new();
    let tab = sessions.open(&mut f.vfs, &f.store, f.a).await.unwrap();

    sessions.edit(&f.vfs, tab, "let a = 2;").unwrap();
    assert!(sessions.is_dirty(tab).unwrap());
    sessions.edit(&f.vfs, tab, "let a = 1;").unwrap();
    assert!(!sessions.is_dirty(tab).unwrap());

    sessions.edit(&f.vfs, tab, "let a = 3;").unwrap();
    sessions.save(&mut f.vfs, &f.store, tab).await.unwrap();
    assert!(!sessions.is_dirty(tab).unwrap());
    assert_eq!(f.vfs.get(f.a).unwrap().content(), Some("let a = 3;"));
    let store_id = f.vfs.get(f.a).unwrap().store_id().cloned().unwrap();
    assert_eq!(f.store.content_of(&store_id).as_deref(), Some("let a = 3;"));

    // the saved text is now the reference point
    sessions.edit(&f.vfs, tab, "let a = 1;").unwrap();
    assert!(sessions.is_dirty(tab).unwrap());
}

#[tokio::test]
async fn test_failed_save_leaves_tab_dirty() {
    let mut f = fixture().await;
    let mut sessions = SessionManager::new();
    let tab = sessions.open(&mut f.vfs, &f.store, f.a).await.unwrap();
    sessions.edit(&f.vfs, tab, "changed").unwrap();

    f.store.set_available(false);
    let err = sessions.save(&mut f.vfs, &f.store, tab).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Persistence(StoreError::Unavailable(_))
    ));
    assert!(sessions.is_dirty(tab).unwrap());
    assert_eq!(sessions.tab(tab).unwrap().text(), "changed");
    assert_eq!(f.vfs.get(f.a).unwrap().content(), Some("let a = 1;"));

    f.store.set_available(true);
    sessions.save(&mut f.vfs, &f.store, tab).await.unwrap();
    assert!(!sessions.is_dirty(tab).unwrap());
}

#[tokio::test]
async fn test_failed_fetch_opens_nothing() {
    let mut f = fixture().await;
    let mut sessions = SessionManager::new();
    f.store.set_available(false);
    let err = sessions.open(&mut f.vfs, &f.store, f.a).await.unwrap_err();
    assert!(matches!(err, SessionError::Persistence(_)));
    assert!(sessions.is_empty());
    assert_eq!(f.vfs.get(f.a).unwrap().content(), None);
}

#[tokio::test]
async fn test_save_creates_unpersisted_file() {
    let mut f = fixture().await;
    let mut sessions = SessionManager::new();
    let fresh = f
        .vfs
        .create_node(f.src, "fresh.ts", NodeKind::File, Some(String::new()))
        .unwrap();

    let tab = sessions.open(&mut f.vfs, &f.store, fresh).await.unwrap();
    sessions.edit(&f.vfs, tab, "console.log(1)").unwrap();
    sessions.save(&mut f.vfs, &f.store, tab).await.unwrap();

    let store_id = f.vfs.get(fresh).unwrap().store_id().cloned().unwrap();
    assert_eq!(
        f.store.content_of(&store_id).as_deref(),
        Some("console.log(1)")
    );
}

#[tokio::test]
async fn test_save_under_unpersisted_parent_fails() {
    let mut f = fixture().await;
    let mut sessions = SessionManager::new();
    let dir = f
        .vfs
        .create_node(f.src, "local", NodeKind::Folder, None)
        .unwrap();
    let file = f
        .vfs
        .create_node(dir, "x.ts", NodeKind::File, None)
        .unwrap();

    let tab = sessions.open(&mut f.vfs, &f.store, file).await.unwrap();
    assert_eq!(sessions.tab(tab).unwrap().text(), "");
    sessions.edit(&f.vfs, tab, "x").unwrap();
    let err = sessions.save(&mut f.vfs, &f.store, tab).await.unwrap_err();
    assert!(matches!(err, SessionError::Persistence(StoreError::NotFound(_))));
    assert!(sessions.is_dirty(tab).unwrap());
}

#[tokio::test]
async fn test_close_active_falls_to_adjacent_tab() {
    let mut f = fixture().await;
    let mut sessions = SessionManager::new();
    let c = f
        .vfs
        .create_node(f.src, "c.ts", NodeKind::File, Some("c".into()))
        .unwrap();

    let ta = sessions.open(&mut f.vfs, &f.store, f.a).await.unwrap();
    let tb = sessions.open(&mut f.vfs, &f.store, f.b).await.unwrap();
    let tc = sessions.open(&mut f.vfs, &f.store, c).await.unwrap();

    sessions.switch_to(tb).unwrap();
    sessions.close(tb).unwrap();
    assert_eq!(sessions.active_id(), Some(tc));

    sessions.close(tc).unwrap();
    assert_eq!(sessions.active_id(), Some(ta));

    let td = sessions.open(&mut f.vfs, &f.store, f.b).await.unwrap();
    sessions.switch_to(ta).unwrap();
    sessions.close(td).unwrap();
    assert_eq!(sessions.active_id(), Some(ta));
    let order: Vec<TabId> = sessions.open_tabs().map(Tab::id).collect();
    assert_eq!(order, vec![ta]);
}

#[tokio::test]
async fn test_close_does_not_save() {
    let mut f = fixture().await;
    let mut sessions = SessionManager::new();
    let tab = sessions.open(&mut f.vfs, &f.store, f.a).await.unwrap();
    sessions.edit(&f.vfs, tab, "unsaved").unwrap();
    let closed = sessions.close(tab).unwrap();
    assert!(closed.is_dirty());
    assert_eq!(f.vfs.get(f.a).unwrap().content(), Some("let a = 1;"));

    let reopened = sessions.open(&mut f.vfs, &f.store, f.a).await.unwrap();
    assert_ne!(reopened, tab);
    assert_eq!(sessions.tab(reopened).unwrap().text(), "let a = 1;");
}

#[tokio::test]
async fn test_invalid_targets() {
    let mut f = fixture().await;
    let mut sessions = SessionManager::new();
    assert_eq!(
        sessions.open(&mut f.vfs, &f.store, f.src).await.unwrap_err(),
        SessionError::Vfs(VfsError::TypeMismatch)
    );

    let tab = sessions.open(&mut f.vfs, &f.store, f.a).await.unwrap();
    sessions.close(tab).unwrap();
    assert_eq!(sessions.switch_to(tab), Err(SessionError::UnknownTab));
    assert_eq!(sessions.edit(&f.vfs, tab, "x"), Err(SessionError::UnknownTab));
    assert_eq!(sessions.is_dirty(tab), Err(SessionError::UnknownTab));
    assert!(sessions.close(tab).is_err());
    assert!(sessions.close_file(f.a).is_none());
}
