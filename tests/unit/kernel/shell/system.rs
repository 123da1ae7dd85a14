use super::*;
use crate::models::{NodeKind, Vfs};

fn vfs() -> Vfs {
    let mut vfs = Vfs::new("demo");
    let root = vfs.root();
    let src = vfs.create_node(root, "src", NodeKind::Folder, None).unwrap();
    vfs.create_node(src, "main.ts", NodeKind::File, Some("line 1\nline 2".into()))
        .unwrap();
    vfs.create_node(src, "lazy.ts", NodeKind::File, None).unwrap();
    vfs.create_node(root, "README.md", NodeKind::File, Some("# demo".into()))
        .unwrap();
    vfs
}

fn run(vfs: &Vfs, cwd: &str, verb: &str, args: &[&str]) -> Reply {
    handle(verb, args, &ShellContext { vfs, cwd })
}

#[test]
fn test_ls() {
    let vfs = vfs();
    assert_eq!(run(&vfs, "/", "ls", &[]).lines, vec!["src/", "README.md"]);
    assert_eq!(run(&vfs, "/src", "ls", &[]).lines, vec!["main.ts", "lazy.ts"]);
    assert_eq!(run(&vfs, "/src", "ls", &["../README.md"]).lines, vec!["README.md"]);
    assert_eq!(
        run(&vfs, "/", "ls", &["nope"]).lines,
        vec!["ls: cannot access 'nope': no such file or directory"]
    );
}

#[test]
fn test_cd() {
    let vfs = vfs();
    assert_eq!(run(&vfs, "/", "cd", &["src"]).cwd.as_deref(), Some("/src"));
    assert_eq!(run(&vfs, "/src", "cd", &[".."]).cwd.as_deref(), Some("/"));
    assert_eq!(run(&vfs, "/src", "cd", &[]).cwd.as_deref(), Some("/"));

    let file = run(&vfs, "/", "cd", &["README.md"]);
    assert_eq!(file.cwd, None);
    assert_eq!(file.lines, vec!["cd: not a directory: README.md"]);
    assert_eq!(run(&vfs, "/", "cd", &["x"]).cwd, None);
}

#[test]
fn test_cat() {
    let vfs = vfs();
    assert_eq!(run(&vfs, "/src", "cat", &["main.ts"]).lines, vec!["line 1", "line 2"]);
    assert!(run(&vfs, "/src", "cat", &["lazy.ts"]).lines[0].contains("not loaded"));
    assert_eq!(run(&vfs, "/", "cat", &["src"]).lines, vec!["cat: src: is a directory"]);
    assert_eq!(run(&vfs, "/", "cat", &[]).lines, vec!["usage: cat <file>"]);
}

#[test]
fn test_mkdir_and_touch_validate_first() {
    let vfs = vfs();
    let ok = run(&vfs, "/src", "mkdir", &["util"]);
    assert_eq!(
        ok.mutation,
        Some(Mutation::CreateFolder {
            path: "/src/util".into()
        })
    );

    let taken = run(&vfs, "/", "mkdir", &["src"]);
    assert!(taken.mutation.is_none());
    assert!(taken.lines[0].starts_with("mkdir: cannot create 'src'"));

    let orphan = run(&vfs, "/", "touch", &["missing/a.ts"]);
    assert!(orphan.mutation.is_none());
    assert_eq!(
        orphan.lines,
        vec!["touch: cannot create 'missing/a.ts': no such file or directory"]
    );

    let existing = run(&vfs, "/", "touch", &["README.md"]);
    assert!(existing.lines.is_empty());
    assert!(existing.mutation.is_none());

    let under_file = run(&vfs, "/", "touch", &["README.md/x"]);
    assert!(under_file.mutation.is_none());
}

#[test]
fn test_rm() {
    let vfs = vfs();
    assert_eq!(
        run(&vfs, "/src", "rm", &["main.ts"]).mutation,
        Some(Mutation::Remove {
            path: "/src/main.ts".into()
        })
    );
    assert!(run(&vfs, "/", "rm", &["/"]).mutation.is_none());
    assert!(run(&vfs, "/src", "rm", &[".."]).mutation.is_none());
    assert!(run(&vfs, "/", "rm", &["ghost"]).lines[0].contains("no such file"));
}

#[test]
fn test_find_and_tree() {
    let vfs = vfs();
    assert_eq!(
        run(&vfs, "/", "find", &[".TS"]).lines,
        vec!["/src/main.ts", "/src/lazy.ts"]
    );
    assert_eq!(
        run(&vfs, "/", "find", &["zzz"]).lines,
        vec!["find: no matches for 'zzz'"]
    );
    assert_eq!(run(&vfs, "/", "find", &[]).lines.len(), 4);

    assert_eq!(
        run(&vfs, "/", "tree", &[]).lines,
        vec!["/", "  src/", "    main.ts", "    lazy.ts", "  README.md"]
    );
}

#[test]
fn test_help_and_unknown() {
    let vfs = vfs();
    assert!(run(&vfs, "/", "help", &[]).lines.len() > 10);
    assert!(run(&vfs, "/", "sudo", &[]).lines[0].contains("not recognized"));
}
