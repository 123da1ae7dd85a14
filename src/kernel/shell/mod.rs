//! Simulated shell: one input line in, transcript lines out.
//!
//! The first token picks a domain (`npm`, `git`, or the generic commands).
//! Domain handlers only read the tree; any change they ask for comes back as
//! a [`Mutation`] that the interpreter applies to the [`Vfs`].

mod git;
mod npm;
mod system;

use std::collections::VecDeque;

use crate::models::{path_table, NodeId, NodeKind, StoreId, Vfs, VfsError, ROOT_PATH};

pub const DEFAULT_TRANSCRIPT_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShellConfig {
    /// Entries kept before the oldest are evicted.
    pub transcript_capacity: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            transcript_capacity: DEFAULT_TRANSCRIPT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub input: String,
    pub output: Vec<String>,
}

/// Tree change requested by a command. Paths are normalized and absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreateFolder { path: String },
    CreateFile { path: String, content: String },
    Remove { path: String },
}

/// What an applied [`Mutation`] did, for callers that mirror the tree
/// elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEffect {
    Created {
        id: NodeId,
    },
    Removed {
        path: String,
        kind: NodeKind,
        /// Store id of the removed node itself, captured before removal.
        store_id: Option<StoreId>,
        removed: Vec<NodeId>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellOutcome {
    pub lines: Vec<String>,
    pub effect: Option<ShellEffect>,
}

/// Read-only view handed to the domain handlers.
pub(crate) struct ShellContext<'a> {
    pub vfs: &'a Vfs,
    pub cwd: &'a str,
}

impl ShellContext<'_> {
    pub fn resolve(&self, raw: &str) -> String {
        path_table::normalize(raw, self.cwd)
    }
}

#[derive(Debug, Default)]
pub(crate) struct Reply {
    pub lines: Vec<String>,
    pub mutation: Option<Mutation>,
    pub cwd: Option<String>,
}

impl Reply {
    pub fn line(line: impl Into<String>) -> Self {
        Self {
            lines: vec![line.into()],
            ..Self::default()
        }
    }

    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_mutation(mut self, mutation: Mutation) -> Self {
        self.mutation = Some(mutation);
        self
    }
}

#[derive(Debug)]
pub struct CommandInterpreter {
    cwd: String,
    transcript: VecDeque<TranscriptEntry>,
    capacity: usize,
}

impl Default for CommandInterpreter {
    fn default() -> Self {
        Self::new(ShellConfig::default())
    }
}

impl CommandInterpreter {
    pub fn new(config: ShellConfig) -> Self {
        Self {
            cwd: ROOT_PATH.to_string(),
            transcript: VecDeque::new(),
            capacity: config.transcript_capacity.max(1),
        }
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    /// Oldest entry first.
    pub fn transcript(&self) -> impl Iterator<Item = &TranscriptEntry> + '_ {
        self.transcript.iter()
    }

    pub fn transcript_len(&self) -> usize {
        self.transcript.len()
    }

    /// Appends a line to the newest transcript entry.
    pub fn annotate(&mut self, line: impl Into<String>) {
        if let Some(last) = self.transcript.back_mut() {
            last.output.push(line.into());
        }
    }

    pub fn execute(&mut self, vfs: &mut Vfs, line: &str) -> ShellOutcome {
        let input = line.trim();
        let tokens: Vec<&str> = input.split_whitespace().collect();
        let Some((first, args)) = tokens.split_first() else {
            return ShellOutcome::default();
        };
        let verb = first.to_lowercase();

        if verb == "clear" {
            self.transcript.clear();
            return ShellOutcome::default();
        }

        let reply = {
            let ctx = ShellContext {
                vfs,
                cwd: &self.cwd,
            };
            match verb.as_str() {
                "npm" => npm::handle(args, &ctx),
                "git" => git::handle(args, &ctx),
                _ => system::handle(&verb, args, &ctx),
            }
        };

        let mut lines = reply.lines;
        if let Some(cwd) = reply.cwd {
            self.cwd = cwd;
        }
        let effect = match reply.mutation {
            Some(mutation) => match self.apply(vfs, mutation) {
                Ok(effect) => Some(effect),
                Err(e) => {
                    lines.push(format!("{verb}: {e}"));
                    None
                }
            },
            None => None,
        };

        tracing::debug!(verb = %verb, lines = lines.len(), "shell command executed");
        self.record(input, lines.clone());
        ShellOutcome { lines, effect }
    }

    fn apply(&mut self, vfs: &mut Vfs, mutation: Mutation) -> Result<ShellEffect, VfsError> {
        match mutation {
            Mutation::CreateFolder { path } => {
                let (parent, name) = parent_and_name(vfs, &path)?;
                let id = vfs.create_node(parent, name, NodeKind::Folder, None)?;
                Ok(ShellEffect::Created { id })
            }
            Mutation::CreateFile { path, content } => {
                let (parent, name) = parent_and_name(vfs, &path)?;
                let id = vfs.create_node(parent, name, NodeKind::File, Some(content))?;
                Ok(ShellEffect::Created { id })
            }
            Mutation::Remove { path } => {
                let id = vfs.lookup(&path).ok_or(VfsError::NotFound)?;
                let (kind, store_id) = match vfs.get(id) {
                    Some(node) => (node.kind(), node.store_id().cloned()),
                    None => return Err(VfsError::NotFound),
                };
                let removed = vfs.delete(id)?;
                if vfs.lookup(&self.cwd).is_none() {
                    self.cwd = ROOT_PATH.to_string();
                }
                Ok(ShellEffect::Removed {
                    path,
                    kind,
                    store_id,
                    removed,
                })
            }
        }
    }

    fn record(&mut self, input: &str, output: Vec<String>) {
        while self.transcript.len() >= self.capacity {
            self.transcript.pop_front();
        }
        self.transcript.push_back(TranscriptEntry {
            input: input.to_string(),
            output,
        });
    }
}

fn parent_and_name<'p>(vfs: &Vfs, path: &'p str) -> Result<(NodeId, &'p str), VfsError> {
    let (parent, name) = path_table::split(path).ok_or(VfsError::TypeMismatch)?;
    let parent = vfs.lookup(parent).ok_or(VfsError::NotFound)?;
    Ok((parent, name))
}

#[cfg(test)]
#[path = "../../../tests/unit/kernel/shell/interpreter.rs"]
mod tests;
