use super::*;
use crate::models::Vfs;

fn lines(args: &[&str]) -> Vec<String> {
    let vfs = Vfs::new("demo");
    handle(args, &ShellContext { vfs: &vfs, cwd: "/src" }).lines
}

#[test]
fn test_status_report() {
    let report = lines(&["status"]);
    assert_eq!(report[0], "On branch main");
    assert_eq!(report.len(), STATUS_REPORT.len());
}

#[test]
fn test_commit_message_parsing() {
    assert_eq!(
        commit_message(&["-m", "\"fix", "the", "thing\""]).as_deref(),
        Some("fix the thing")
    );
    assert_eq!(commit_message(&["-m", "'wip'"]).as_deref(), Some("wip"));
    assert_eq!(commit_message(&["-m"]), None);
    assert_eq!(commit_message(&[]), None);

    assert_eq!(lines(&["commit", "-m", "hello"])[0], "[main 1a2b3c4] hello");
    assert_eq!(
        lines(&["commit"]),
        vec!["Aborting commit due to empty commit message."]
    );
}

#[test]
fn test_subcommands_with_arguments() {
    assert_eq!(lines(&["add", "."]), vec!["staged all changes"]);
    assert_eq!(lines(&["add", "src/a.ts"]), vec!["staged 'src/a.ts'"]);
    assert_eq!(lines(&["checkout", "dev"]), vec!["Switched to branch 'dev'"]);
    assert_eq!(
        lines(&["clone", "https://example.com/team/app.git"])[0],
        "Cloning into 'app'..."
    );
    assert_eq!(
        lines(&["init"]),
        vec!["Initialized empty Git repository in /src/.git/"]
    );
}

#[test]
fn test_unknown_subcommand() {
    assert_eq!(lines(&["rebase"]), vec!["git: 'rebase' is not recognized"]);
}
