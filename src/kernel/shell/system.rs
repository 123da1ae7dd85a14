//! 通用 shell 命令：浏览、查看、创建和删除 VFS 节点

use super::{Mutation, Reply, ShellContext};
use crate::models::{path_table, Node, NodeId, ROOT_PATH};

const HELP: [&str; 15] = [
    "available commands:",
    "  help                 show this list",
    "  ls [path]            list a folder",
    "  pwd                  print the working directory",
    "  cd [path]            change the working directory",
    "  echo <text>          print text",
    "  cat <file>           print a file",
    "  mkdir <path>         create a folder",
    "  touch <path>         create an empty file",
    "  rm <path>            remove a file or folder",
    "  find [fragment]      list paths whose name contains fragment",
    "  tree                 show the tree below the working directory",
    "  clear                clear the transcript",
    "  npm <install|start|run|init|update|audit>",
    "  git <init|status|add|commit|push|pull|branch|checkout|clone>",
];

pub(super) fn handle(verb: &str, args: &[&str], ctx: &ShellContext<'_>) -> Reply {
    match verb {
        "help" => Reply::lines(HELP),
        "pwd" => Reply::line(ctx.cwd),
        "echo" => Reply::line(args.join(" ")),
        "ls" => ls(args.first().copied(), ctx),
        "cd" => cd(args.first().copied(), ctx),
        "cat" => cat(args.first().copied(), ctx),
        "mkdir" => mkdir(args.first().copied(), ctx),
        "touch" => touch(args.first().copied(), ctx),
        "rm" => rm(args.first().copied(), ctx),
        "find" => find(args.first().copied(), ctx),
        "tree" => tree(ctx),
        other => Reply::line(format!(
            "'{other}' is not recognized as a command; type 'help' for a list"
        )),
    }
}

fn node_at<'a>(ctx: &ShellContext<'a>, path: &str) -> Option<&'a Node> {
    ctx.vfs.lookup(path).and_then(|id| ctx.vfs.get(id))
}

fn display_name(node: &Node) -> String {
    if node.is_folder() {
        format!("{}/", node.name())
    } else {
        node.name().to_string()
    }
}

fn ls(arg: Option<&str>, ctx: &ShellContext<'_>) -> Reply {
    let path = ctx.resolve(arg.unwrap_or("."));
    let Some(node) = node_at(ctx, &path) else {
        return Reply::line(format!(
            "ls: cannot access '{}': no such file or directory",
            arg.unwrap_or(&path)
        ));
    };
    if !node.is_folder() {
        return Reply::line(node.name());
    }
    Reply::lines(
        node.children()
            .iter()
            .filter_map(|c| ctx.vfs.get(*c))
            .map(display_name),
    )
}

fn cd(arg: Option<&str>, ctx: &ShellContext<'_>) -> Reply {
    let Some(raw) = arg else {
        return Reply {
            cwd: Some(ROOT_PATH.to_string()),
            ..Reply::default()
        };
    };
    let path = ctx.resolve(raw);
    match node_at(ctx, &path) {
        Some(node) if node.is_folder() => Reply {
            cwd: Some(path),
            ..Reply::default()
        },
        Some(_) => Reply::line(format!("cd: not a directory: {raw}")),
        None => Reply::line(format!("cd: no such file or directory: {raw}")),
    }
}

fn cat(arg: Option<&str>, ctx: &ShellContext<'_>) -> Reply {
    let Some(raw) = arg else {
        return Reply::line("usage: cat <file>");
    };
    match node_at(ctx, &ctx.resolve(raw)) {
        Some(node) if node.is_folder() => Reply::line(format!("cat: {raw}: is a directory")),
        Some(node) => match node.content() {
            Some(content) => Reply::lines(content.lines()),
            None => Reply::line(format!("cat: {raw}: content not loaded, open the file first")),
        },
        None => Reply::line(format!("cat: {raw}: no such file or directory")),
    }
}

/// Checks that `path` could be created, reporting the problem as text.
fn creatable(verb: &str, raw: &str, path: &str, ctx: &ShellContext<'_>) -> Result<(), Reply> {
    let Some((parent, name)) = path_table::split(path) else {
        return Err(Reply::line(format!("{verb}: cannot create '{raw}': invalid path")));
    };
    let Some(parent_id) = ctx.vfs.lookup(parent) else {
        return Err(Reply::line(format!(
            "{verb}: cannot create '{raw}': no such file or directory"
        )));
    };
    ctx.vfs
        .check_create(parent_id, name)
        .map_err(|e| Reply::line(format!("{verb}: cannot create '{raw}': {e}")))
}

fn mkdir(arg: Option<&str>, ctx: &ShellContext<'_>) -> Reply {
    let Some(raw) = arg else {
        return Reply::line("usage: mkdir <path>");
    };
    let path = ctx.resolve(raw);
    if let Err(reply) = creatable("mkdir", raw, &path, ctx) {
        return reply;
    }
    Reply::line(format!("created folder {path}")).with_mutation(Mutation::CreateFolder { path })
}

fn touch(arg: Option<&str>, ctx: &ShellContext<'_>) -> Reply {
    let Some(raw) = arg else {
        return Reply::line("usage: touch <path>");
    };
    let path = ctx.resolve(raw);
    // touching something that exists changes nothing here
    if ctx.vfs.lookup(&path).is_some() {
        return Reply::default();
    }
    if let Err(reply) = creatable("touch", raw, &path, ctx) {
        return reply;
    }
    Reply::line(format!("created file {path}")).with_mutation(Mutation::CreateFile {
        path,
        content: String::new(),
    })
}

fn rm(arg: Option<&str>, ctx: &ShellContext<'_>) -> Reply {
    let Some(raw) = arg else {
        return Reply::line("usage: rm <path>");
    };
    let path = ctx.resolve(raw);
    if path == ROOT_PATH {
        return Reply::line("rm: refusing to remove '/'");
    }
    if ctx.vfs.lookup(&path).is_none() {
        return Reply::line(format!("rm: cannot remove '{raw}': no such file or directory"));
    }
    Reply::line(format!("removed {path}")).with_mutation(Mutation::Remove { path })
}

fn find(arg: Option<&str>, ctx: &ShellContext<'_>) -> Reply {
    let needle = arg.unwrap_or_default().to_lowercase();
    let root = ctx.vfs.root();
    let paths: Vec<String> = ctx
        .vfs
        .find(|n| n.id() != root && n.name().to_lowercase().contains(&needle))
        .map(|n| n.path().to_string())
        .collect();
    if paths.is_empty() {
        return Reply::line(format!("find: no matches for '{}'", arg.unwrap_or_default()));
    }
    Reply::lines(paths)
}

fn tree(ctx: &ShellContext<'_>) -> Reply {
    let Some(start) = ctx.vfs.lookup(ctx.cwd) else {
        return Reply::line(format!("tree: {}: no such directory", ctx.cwd));
    };
    let mut lines = vec![ctx.cwd.to_string()];
    let mut stack: Vec<(NodeId, usize)> = children_rev(ctx, start, 1);
    while let Some((id, depth)) = stack.pop() {
        let Some(node) = ctx.vfs.get(id) else {
            continue;
        };
        lines.push(format!("{}{}", "  ".repeat(depth), display_name(node)));
        stack.extend(children_rev(ctx, id, depth + 1));
    }
    Reply::lines(lines)
}

fn children_rev(ctx: &ShellContext<'_>, id: NodeId, depth: usize) -> Vec<(NodeId, usize)> {
    ctx.vfs
        .get(id)
        .map(|n| n.children().iter().rev().map(|c| (*c, depth)).collect())
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "../../../tests/unit/kernel/shell/system.rs"]
mod tests;
