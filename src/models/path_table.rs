//! 路径表：规范化 + 索引
//!
//! 所有路径都是以 `/` 开头的绝对路径，根目录就是 `/`。

use rustc_hash::FxHashMap;
use std::fmt;

use super::vfs::NodeId;

pub const ROOT_PATH: &str = "/";
pub const SEPARATOR: char = '/';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    Empty,
    Reserved(String),
    Separator(String),
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathError::Empty => write!(f, "name is empty"),
            PathError::Reserved(name) => write!(f, "name '{name}' is reserved"),
            PathError::Separator(name) => write!(f, "name '{name}' contains a path separator"),
        }
    }
}

impl std::error::Error for PathError {}

pub fn validate_name(name: &str) -> Result<(), PathError> {
    if name.trim().is_empty() {
        return Err(PathError::Empty);
    }
    if name == "." || name == ".." {
        return Err(PathError::Reserved(name.to_string()));
    }
    if name.contains(SEPARATOR) || name.contains('\\') {
        return Err(PathError::Separator(name.to_string()));
    }
    Ok(())
}

/// Resolves `raw` against `cwd` and collapses `.`, `..` and repeated separators.
///
/// `..` at the root stays at the root, the way a shell does it.
pub fn normalize(raw: &str, cwd: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if !raw.starts_with(SEPARATOR) {
        parts.extend(components(cwd));
    }
    for comp in raw.split(SEPARATOR) {
        match comp {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return ROOT_PATH.to_string();
    }
    let mut out = String::with_capacity(raw.len() + cwd.len());
    for part in parts {
        out.push(SEPARATOR);
        out.push_str(part);
    }
    out
}

pub fn join(parent: &str, name: &str) -> String {
    if parent == ROOT_PATH {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Splits a normalized path into `(parent, name)`. The root has neither.
pub fn split(path: &str) -> Option<(&str, &str)> {
    if path == ROOT_PATH || path.is_empty() {
        return None;
    }
    let idx = path.rfind(SEPARATOR)?;
    let name = &path[idx + 1..];
    if name.is_empty() {
        return None;
    }
    let parent = if idx == 0 { ROOT_PATH } else { &path[..idx] };
    Some((parent, name))
}

pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split(SEPARATOR).filter(|c| !c.is_empty())
}

pub fn depth(path: &str) -> usize {
    components(path).count()
}

/// Canonical path -> node index. Kept in lockstep with the tree by [`super::Vfs`].
#[derive(Debug, Default, Clone)]
pub struct PathTable {
    by_path: FxHashMap<String, NodeId>,
}

impl PathTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<NodeId> {
        self.by_path.get(path).copied()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.by_path.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    pub(crate) fn insert(&mut self, path: String, id: NodeId) {
        self.by_path.insert(path, id);
    }

    pub(crate) fn remove(&mut self, path: &str) -> Option<NodeId> {
        self.by_path.remove(path)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, NodeId)> {
        self.by_path.iter().map(|(p, id)| (p.as_str(), *id))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/models/path_table.rs"]
mod tests;
