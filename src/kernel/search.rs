//! 全局搜索：扫描 VFS 中已加载的文件内容
//!
//! - Literal 大小写敏感：memchr `memmem::Finder`
//! - Literal 忽略大小写 / Regex：`regex::Regex`
//!
//! 只读 VFS，不触发内容拉取；未加载内容的文件只参与文件名匹配。

use std::fmt;

use memchr::memmem::Finder;

use crate::models::{NodeId, Vfs};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchOptions {
    pub case_sensitive: bool,
    pub regex: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineMatch {
    /// 1-based.
    pub line: usize,
    /// 1-based, in chars.
    pub column: usize,
    pub line_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMatches {
    pub file: NodeId,
    pub path: String,
    pub name_match: bool,
    pub matches: Vec<LineMatch>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    InvalidPattern(String),
}

impl fmt::Display for SearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchError::InvalidPattern(e) => write!(f, "invalid pattern: {e}"),
        }
    }
}

impl std::error::Error for SearchError {}

enum Matcher {
    Literal(Finder<'static>),
    Regex(regex::Regex),
}

impl Matcher {
    fn new(query: &str, options: SearchOptions) -> Result<Self, SearchError> {
        if options.regex {
            return regex::RegexBuilder::new(query)
                .case_insensitive(!options.case_sensitive)
                .build()
                .map(Matcher::Regex)
                .map_err(|e| SearchError::InvalidPattern(e.to_string()));
        }
        if options.case_sensitive {
            return Ok(Matcher::Literal(Finder::new(query.as_bytes()).into_owned()));
        }
        regex::RegexBuilder::new(&regex::escape(query))
            .case_insensitive(true)
            .build()
            .map(Matcher::Regex)
            .map_err(|e| SearchError::InvalidPattern(e.to_string()))
    }

    fn is_match(&self, text: &str) -> bool {
        match self {
            Matcher::Literal(finder) => finder.find(text.as_bytes()).is_some(),
            Matcher::Regex(regex) => regex.is_match(text),
        }
    }

    /// Byte offsets of non-empty matches within `line`.
    fn offsets(&self, line: &str) -> Vec<usize> {
        match self {
            Matcher::Literal(finder) => finder.find_iter(line.as_bytes()).collect(),
            Matcher::Regex(regex) => regex
                .find_iter(line)
                .filter(|m| !m.is_empty())
                .map(|m| m.start())
                .collect(),
        }
    }
}

/// Searches every file in `vfs`, in tree order. An empty query matches nothing.
pub fn search_workspace(
    vfs: &Vfs,
    query: &str,
    options: SearchOptions,
) -> Result<Vec<FileMatches>, SearchError> {
    if query.is_empty() {
        return Ok(Vec::new());
    }
    let matcher = Matcher::new(query, options)?;

    let mut results = Vec::new();
    for node in vfs.find(|n| !n.is_folder()) {
        let name_match = matcher.is_match(node.name());
        let mut matches = Vec::new();
        if let Some(content) = node.content() {
            for (index, line) in content.lines().enumerate() {
                for offset in matcher.offsets(line) {
                    matches.push(LineMatch {
                        line: index + 1,
                        column: line[..offset].chars().count() + 1,
                        line_text: line.to_string(),
                    });
                }
            }
        }
        if name_match || !matches.is_empty() {
            results.push(FileMatches {
                file: node.id(),
                path: node.path().to_string(),
                name_match,
                matches,
            });
        }
    }

    tracing::debug!(
        query,
        files = results.len(),
        regex = options.regex,
        "workspace search finished"
    );
    Ok(results)
}

#[cfg(test)]
#[path = "../../tests/unit/kernel/search.rs"]
mod tests;
