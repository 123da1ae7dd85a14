use super::*;

fn sample() -> (Vfs, NodeId, NodeId) {
    let mut vfs = Vfs::new("project");
    let root = vfs.root();
    let src = vfs.create_node(root, "src", NodeKind::Folder, None).unwrap();
    let main = vfs
        .create_node(src, "main.ts", NodeKind::File, Some("a".to_string()))
        .unwrap();
    (vfs, src, main)
}

fn paths(vfs: &Vfs) -> Vec<String> {
    vfs.iter().map(|n| n.path().to_string()).collect()
}

#[test]
fn test_new_tree() {
    let vfs = Vfs::new("project");
    let root = vfs.get(vfs.root()).unwrap();
    assert!(root.is_folder());
    assert!(root.is_expanded());
    assert_eq!(root.path(), "/");
    assert_eq!(vfs.root_name(), "project");
    assert!(vfs.is_empty());
}

#[test]
fn test_create_node() {
    let (vfs, src, main) = sample();
    assert_eq!(vfs.get(src).unwrap().path(), "/src");
    let file = vfs.get(main).unwrap();
    assert_eq!(file.path(), "/src/main.ts");
    assert_eq!(file.content(), Some("a"));
    assert_eq!(file.language(), Some(LanguageId::TypeScript));
    assert_eq!(vfs.lookup("/src/main.ts"), Some(main));
    vfs.check_invariants().unwrap();
}

#[test]
fn create_appends_children_in_insertion_order() {
    let mut vfs = Vfs::new("p");
    let root = vfs.root();
    for name in ["zeta", "alpha", "mid"] {
        vfs.create_node(root, name, NodeKind::File, None).unwrap();
    }
    let names: Vec<_> = vfs
        .get(root)
        .unwrap()
        .children()
        .iter()
        .map(|c| vfs.get(*c).unwrap().name().to_string())
        .collect();
    assert_eq!(names, vec!["zeta", "alpha", "mid"]);
}

#[test]
fn create_rejects_sibling_name_conflict_across_kinds() {
    let (mut vfs, src, _) = sample();
    assert_eq!(
        vfs.create_node(src, "main.ts", NodeKind::File, None),
        Err(VfsError::NameConflict)
    );
    assert_eq!(
        vfs.create_node(src, "main.ts", NodeKind::Folder, None),
        Err(VfsError::NameConflict)
    );
}

#[test]
fn create_under_file_or_missing_parent_is_not_found() {
    let (mut vfs, src, main) = sample();
    assert_eq!(
        vfs.create_node(main, "x", NodeKind::File, None),
        Err(VfsError::NotFound)
    );
    vfs.delete(src).unwrap();
    assert_eq!(
        vfs.create_node(src, "x", NodeKind::File, None),
        Err(VfsError::NotFound)
    );
}

#[test]
fn create_rejects_invalid_names() {
    let mut vfs = Vfs::new("p");
    let root = vfs.root();
    assert!(matches!(
        vfs.create_node(root, "a/b", NodeKind::File, None),
        Err(VfsError::InvalidName(_))
    ));
    assert!(matches!(
        vfs.create_node(root, "", NodeKind::Folder, None),
        Err(VfsError::InvalidName(_))
    ));
}

#[test]
fn rename_folder_cascades_paths() {
    let (mut vfs, src, main) = sample();
    let lib = vfs.create_node(src, "lib", NodeKind::Folder, None).unwrap();
    let util = vfs.create_node(lib, "util.ts", NodeKind::File, None).unwrap();

    vfs.rename(src, "app").unwrap();

    assert_eq!(vfs.get(main).unwrap().path(), "/app/main.ts");
    assert_eq!(vfs.get(util).unwrap().path(), "/app/lib/util.ts");
    assert_eq!(vfs.lookup("/src/main.ts"), None);
    assert_eq!(vfs.lookup("/app/lib/util.ts"), Some(util));
    vfs.check_invariants().unwrap();
}

#[test]
fn rename_updates_language_tag() {
    let (mut vfs, _, main) = sample();
    vfs.rename(main, "main.json").unwrap();
    assert_eq!(vfs.get(main).unwrap().language(), Some(LanguageId::Json));
}

#[test]
fn rename_conflict_leaves_tree_untouched() {
    let (mut vfs, src, main) = sample();
    vfs.create_node(src, "other.ts", NodeKind::File, None).unwrap();
    let before = paths(&vfs);

    assert_eq!(vfs.rename(main, "other.ts"), Err(VfsError::NameConflict));
    assert_eq!(paths(&vfs), before);
    vfs.check_invariants().unwrap();
}

#[test]
fn rename_to_same_name_is_noop() {
    let (mut vfs, _, main) = sample();
    vfs.rename(main, "main.ts").unwrap();
    assert_eq!(vfs.get(main).unwrap().path(), "/src/main.ts");
}

#[test]
fn rename_and_move_of_root_are_type_mismatch() {
    let (mut vfs, src, _) = sample();
    let root = vfs.root();
    assert_eq!(vfs.rename(root, "x"), Err(VfsError::TypeMismatch));
    assert_eq!(vfs.move_node(root, src), Err(VfsError::TypeMismatch));
}

#[test]
fn move_node_recomputes_subtree() {
    let (mut vfs, src, main) = sample();
    let root = vfs.root();
    let dest = vfs.create_node(root, "dest", NodeKind::Folder, None).unwrap();

    vfs.move_node(src, dest).unwrap();

    assert_eq!(vfs.get(src).unwrap().parent(), Some(dest));
    assert_eq!(vfs.get(main).unwrap().path(), "/dest/src/main.ts");
    assert!(vfs.get(root).unwrap().children().iter().all(|c| *c != src));
    vfs.check_invariants().unwrap();
}

#[test]
fn move_into_self_or_descendant_is_cycle() {
    let (mut vfs, src, _) = sample();
    let inner = vfs.create_node(src, "inner", NodeKind::Folder, None).unwrap();
    let deeper = vfs.create_node(inner, "deeper", NodeKind::Folder, None).unwrap();
    let before = paths(&vfs);

    assert_eq!(vfs.move_node(src, src), Err(VfsError::CycleDetected));
    assert_eq!(vfs.move_node(src, inner), Err(VfsError::CycleDetected));
    assert_eq!(vfs.move_node(src, deeper), Err(VfsError::CycleDetected));
    assert_eq!(paths(&vfs), before);
    vfs.check_invariants().unwrap();
}

#[test]
fn move_into_file_is_not_found() {
    let (mut vfs, src, main) = sample();
    let other = vfs.create_node(src, "other", NodeKind::Folder, None).unwrap();
    assert_eq!(vfs.move_node(other, main), Err(VfsError::NotFound));
}

#[test]
fn move_conflict_is_rejected() {
    let (mut vfs, src, _) = sample();
    let root = vfs.root();
    vfs.create_node(root, "main.ts", NodeKind::File, None).unwrap();
    let main = vfs.lookup("/src/main.ts").unwrap();
    assert_eq!(vfs.move_node(main, root), Err(VfsError::NameConflict));
    assert_eq!(vfs.get(main).unwrap().parent(), Some(src));
}

#[test]
fn delete_removes_subtree_and_is_idempotent() {
    let (mut vfs, src, main) = sample();
    let removed = vfs.delete(src).unwrap();
    assert_eq!(removed.len(), 2);
    assert!(removed.contains(&main));
    assert!(vfs.get(main).is_none());
    assert_eq!(vfs.lookup("/src"), None);

    assert_eq!(vfs.delete(src).unwrap(), Vec::<NodeId>::new());
    vfs.check_invariants().unwrap();
}

#[test]
fn update_content_is_file_only() {
    let (mut vfs, src, main) = sample();
    vfs.update_content(main, "b".to_string()).unwrap();
    assert_eq!(vfs.get(main).unwrap().content(), Some("b"));
    assert_eq!(
        vfs.update_content(src, "x".to_string()),
        Err(VfsError::TypeMismatch)
    );
}

#[test]
fn find_is_preorder_and_restartable() {
    let (mut vfs, src, _) = sample();
    let root = vfs.root();
    vfs.create_node(src, "b.ts", NodeKind::File, None).unwrap();
    vfs.create_node(root, "README.md", NodeKind::File, None).unwrap();

    let order = paths(&vfs);
    assert_eq!(
        order,
        vec!["/", "/src", "/src/main.ts", "/src/b.ts", "/README.md"]
    );

    let mut files = vfs.find(|n| !n.is_folder());
    assert_eq!(files.next().unwrap().path(), "/src/main.ts");
    let again: Vec<_> = vfs.find(|n| !n.is_folder()).map(|n| n.name()).collect();
    assert_eq!(again, vec!["main.ts", "b.ts", "README.md"]);
}

#[test]
fn filter_keeps_matching_nodes_and_their_ancestors() {
    let (mut vfs, src, main) = sample();
    let root = vfs.root();
    let docs = vfs.create_node(root, "docs", NodeKind::Folder, None).unwrap();
    vfs.create_node(docs, "guide.md", NodeKind::File, None).unwrap();

    let kept = vfs.filter("MAIN");
    assert!(kept.contains(&main));
    assert!(kept.contains(&src));
    assert!(!kept.contains(&docs));

    // the tree is untouched
    assert_eq!(vfs.get(docs).unwrap().children().len(), 1);
}

#[test]
fn flatten_for_view_respects_expansion() {
    let (mut vfs, src, _) = sample();
    let root = vfs.root();
    vfs.create_node(root, "README.md", NodeKind::File, None).unwrap();

    let rows = vfs.flatten_for_view(None);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].name, "src");
    assert!(!rows[0].is_expanded);

    vfs.toggle_expand(src);
    let rows = vfs.flatten_for_view(None);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1].name, "main.ts");
    assert_eq!(rows[1].depth, 2);

    vfs.collapse(src);
    assert_eq!(vfs.flatten_for_view(None).len(), 2);
}

#[test]
fn flatten_for_view_with_filter_opens_kept_folders() {
    let (mut vfs, _, _) = sample();
    let root = vfs.root();
    vfs.create_node(root, "README.md", NodeKind::File, None).unwrap();

    let rows = vfs.flatten_for_view(Some("main"));
    let names: Vec<_> = rows.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["src", "main.ts"]);
    assert!(rows[0].is_expanded);
}

#[test]
fn invariants_hold_after_mixed_operations() {
    let mut vfs = Vfs::new("p");
    let root = vfs.root();
    let a = vfs.create_node(root, "a", NodeKind::Folder, None).unwrap();
    let b = vfs.create_node(a, "b", NodeKind::Folder, None).unwrap();
    let c = vfs.create_node(root, "c", NodeKind::Folder, None).unwrap();
    let f = vfs.create_node(b, "f.ts", NodeKind::File, None).unwrap();

    vfs.move_node(b, c).unwrap();
    vfs.rename(c, "renamed").unwrap();
    let _ = vfs.move_node(c, b);
    vfs.move_node(f, a).unwrap();
    let _ = vfs.rename(f, "..");
    vfs.delete(b).unwrap();

    assert_eq!(vfs.get(f).unwrap().path(), "/a/f.ts");
    vfs.check_invariants().unwrap();
}
