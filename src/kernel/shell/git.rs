use super::{Reply, ShellContext};

const USAGE: &str = "usage: git <init|status|add|commit|push|pull|branch|checkout|clone>";

const STATUS_REPORT: [&str; 8] = [
    "On branch main",
    "Your branch is up to date with 'origin/main'.",
    "",
    "Changes not staged for commit:",
    "  modified:   src/main.ts",
    "",
    "Untracked files:",
    "  notes.md",
];

/// `-m <msg>` with the message possibly split over several tokens and quoted.
fn commit_message(rest: &[&str]) -> Option<String> {
    let at = rest.iter().position(|a| *a == "-m")?;
    let message = rest[at + 1..].join(" ");
    let message = message.trim_matches(|c| c == '"' || c == '\'').trim();
    (!message.is_empty()).then(|| message.to_string())
}

fn repo_name(url: &str) -> &str {
    let last = url.trim_end_matches('/').rsplit('/').next().unwrap_or(url);
    last.strip_suffix(".git").unwrap_or(last)
}

pub(super) fn handle(args: &[&str], ctx: &ShellContext<'_>) -> Reply {
    let Some((sub, rest)) = args.split_first() else {
        return Reply::line(USAGE);
    };

    match *sub {
        "init" => Reply::line(format!(
            "Initialized empty Git repository in {}.git/",
            match ctx.cwd {
                "/" => "/".to_string(),
                cwd => format!("{cwd}/"),
            }
        )),
        "status" => Reply::lines(STATUS_REPORT),
        "add" => match rest.first().copied() {
            Some(".") => Reply::line("staged all changes"),
            Some(path) => Reply::line(format!("staged '{path}'")),
            None => Reply::line("Nothing specified, nothing added."),
        },
        "commit" => match commit_message(rest) {
            Some(message) => Reply::lines([
                format!("[main 1a2b3c4] {message}"),
                "1 file changed".to_string(),
            ]),
            None => Reply::line("Aborting commit due to empty commit message."),
        },
        "push" => Reply::lines([
            "To origin",
            "   1a2b3c4..5d6e7f8  main -> main",
        ]),
        "pull" => Reply::line("Already up to date."),
        "branch" => Reply::lines(["* main", "  development", "  feature/new-editor"]),
        "checkout" => match rest.first() {
            Some(branch) => Reply::line(format!("Switched to branch '{branch}'")),
            None => Reply::line("usage: git checkout <branch>"),
        },
        "clone" => match rest.first() {
            Some(url) => Reply::lines([
                format!("Cloning into '{}'...", repo_name(url)),
                "done.".to_string(),
            ]),
            None => Reply::line("usage: git clone <url>"),
        },
        other => Reply::line(format!("git: '{other}' is not recognized")),
    }
}

#[cfg(test)]
#[path = "../../../tests/unit/kernel/shell/git.rs"]
mod tests;
