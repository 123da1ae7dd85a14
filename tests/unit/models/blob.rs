use super::*;

fn nested_blob() -> TreeBlob {
    TreeBlob::folder(
        "root-1",
        "project",
        vec![
            TreeBlob::folder(
                "f-1",
                "src",
                vec![
                    TreeBlob::file("f-2", "main.ts", Some("let x = 1;".to_string())),
                    TreeBlob::file("f-3", "util.ts", None),
                ],
            ),
            TreeBlob::file("f-4", "README.md", Some("# hi".to_string())),
        ],
    )
}

#[test]
fn deserialize_builds_tree_in_blob_order() {
    let vfs = Vfs::deserialize(&nested_blob()).unwrap();
    let paths: Vec<_> = vfs.iter().map(|n| n.path().to_string()).collect();
    assert_eq!(
        paths,
        vec!["/", "/src", "/src/main.ts", "/src/util.ts", "/README.md"]
    );
    assert_eq!(vfs.root_name(), "project");

    let main = vfs.lookup("/src/main.ts").unwrap();
    let node = vfs.get(main).unwrap();
    assert_eq!(node.content(), Some("let x = 1;"));
    assert_eq!(node.store_id(), Some(&StoreId::new("f-2")));

    let util = vfs.lookup("/src/util.ts").unwrap();
    assert_eq!(vfs.get(util).unwrap().content(), None);
    vfs.check_invariants().unwrap();
}

#[test]
fn serialize_then_deserialize_keeps_structure() {
    let vfs = Vfs::deserialize(&nested_blob()).unwrap();
    let blob = vfs.serialize();
    let again = Vfs::deserialize(&blob).unwrap();

    assert_eq!(again.serialize(), blob);
    let src = blob.children.as_ref().unwrap()[0].clone();
    assert_eq!(src.path.as_deref(), Some("/src"));
    assert_eq!(src.kind, BlobKind::Folder);
}

#[test]
fn serialize_uses_local_ids_for_unbound_nodes() {
    let mut vfs = Vfs::new("p");
    let root = vfs.root();
    vfs.create_node(root, "a.ts", NodeKind::File, None).unwrap();

    let blob = vfs.serialize();
    let child = &blob.children.as_ref().unwrap()[0];
    assert!(child.id.starts_with(LOCAL_ID_PREFIX));

    // local ids never become store ids on the way back
    let again = Vfs::deserialize(&blob).unwrap();
    let id = again.lookup("/a.ts").unwrap();
    assert_eq!(again.get(id).unwrap().store_id(), None);
}

#[test]
fn json_uses_camel_case_and_lowercase_kind() {
    let mut vfs = Vfs::new("p");
    let root = vfs.root();
    vfs.create_node(root, "src", NodeKind::Folder, None).unwrap();

    let json = vfs.serialize().to_json().unwrap();
    assert!(json.contains("\"isExpanded\""));
    assert!(json.contains("\"kind\": \"folder\""));

    let parsed = TreeBlob::from_json(&json).unwrap();
    assert_eq!(parsed, vfs.serialize());
}

#[test]
fn deserialize_accepts_blob_without_paths() {
    let json = r#"{
        "id": "r",
        "name": "p",
        "kind": "folder",
        "children": [
            { "id": "a", "name": "index.js", "kind": "file", "content": "1" }
        ]
    }"#;
    let vfs = Vfs::deserialize(&TreeBlob::from_json(json).unwrap()).unwrap();
    assert!(vfs.lookup("/index.js").is_some());
}

#[test]
fn deserialize_rejects_duplicate_sibling_names() {
    let blob = TreeBlob::folder(
        "r",
        "p",
        vec![
            TreeBlob::file("a", "x.ts", None),
            TreeBlob::folder("b", "x.ts", Vec::new()),
        ],
    );
    assert!(matches!(
        Vfs::deserialize(&blob),
        Err(VfsError::InvalidBlob(_))
    ));
}

#[test]
fn deserialize_rejects_repeated_ids() {
    let blob = TreeBlob::folder(
        "r",
        "p",
        vec![
            TreeBlob::file("a", "x.ts", None),
            TreeBlob::file("a", "y.ts", None),
        ],
    );
    assert!(matches!(
        Vfs::deserialize(&blob),
        Err(VfsError::InvalidBlob(_))
    ));
}

#[test]
fn deserialize_rejects_children_under_file() {
    let mut file = TreeBlob::file("a", "x.ts", None);
    file.children = Some(vec![TreeBlob::file("b", "y.ts", None)]);
    let blob = TreeBlob::folder("r", "p", vec![file]);
    assert!(matches!(
        Vfs::deserialize(&blob),
        Err(VfsError::InvalidBlob(_))
    ));
}

#[test]
fn deserialize_rejects_mismatched_path_and_file_root() {
    let mut file = TreeBlob::file("a", "x.ts", None);
    file.path = Some("/elsewhere/x.ts".to_string());
    let blob = TreeBlob::folder("r", "p", vec![file]);
    assert!(matches!(
        Vfs::deserialize(&blob),
        Err(VfsError::InvalidBlob(_))
    ));

    let root_file = TreeBlob::file("r", "p", None);
    assert!(matches!(
        Vfs::deserialize(&root_file),
        Err(VfsError::InvalidBlob(_))
    ));
}

#[test]
fn deserialize_rejects_invalid_names() {
    let blob = TreeBlob::folder("r", "p", vec![TreeBlob::file("a", "a/b", None)]);
    assert!(matches!(
        Vfs::deserialize(&blob),
        Err(VfsError::InvalidBlob(_))
    ));
}

#[test]
fn deep_folder_chain_serializes_without_recursion() {
    let mut vfs = Vfs::new("p");
    let mut parent = vfs.root();
    for _ in 0..2000 {
        parent = vfs.create_node(parent, "d", NodeKind::Folder, None).unwrap();
    }
    vfs.create_node(parent, "leaf.ts", NodeKind::File, Some("1".into()))
        .unwrap();

    let blob = vfs.serialize();
    let mut depth = 0;
    let mut cursor = &blob;
    while let Some(next) = cursor.children.as_ref().and_then(|c| c.first()) {
        depth += 1;
        cursor = next;
    }
    assert_eq!(depth, 2001);
    assert_eq!(cursor.name, "leaf.ts");
    assert_eq!(cursor.content.as_deref(), Some("1"));

    let again = Vfs::deserialize(&blob).unwrap();
    assert_eq!(again.len(), vfs.len());
    let sub = again.lookup("/d/d/d").unwrap();
    let partial = again.blob_for(sub).unwrap();
    assert_eq!(partial.path.as_deref(), Some("/d/d/d"));
    assert_eq!(partial.children.as_ref().map(Vec::len), Some(1));
}
