use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageId {
    TypeScript,
    JavaScript,
    Json,
    Html,
    Css,
    Markdown,
    #[default]
    PlainText,
}

impl LanguageId {
    pub fn from_name(name: &str) -> Self {
        let Some((stem, ext)) = name.rsplit_once('.') else {
            return Self::PlainText;
        };
        if stem.is_empty() {
            // dotfiles such as `.gitignore`
            return Self::PlainText;
        }
        match ext.to_ascii_lowercase().as_str() {
            "ts" | "mts" | "cts" => Self::TypeScript,
            "js" | "mjs" | "cjs" => Self::JavaScript,
            "json" => Self::Json,
            "html" | "htm" => Self::Html,
            "css" => Self::Css,
            "md" | "markdown" => Self::Markdown,
            _ => Self::PlainText,
        }
    }

    pub fn language_id(self) -> &'static str {
        match self {
            Self::TypeScript => "typescript",
            Self::JavaScript => "javascript",
            Self::Json => "json",
            Self::Html => "html",
            Self::Css => "css",
            Self::Markdown => "markdown",
            Self::PlainText => "plaintext",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::TypeScript => "TypeScript",
            Self::JavaScript => "JavaScript",
            Self::Json => "JSON",
            Self::Html => "HTML",
            Self::Css => "CSS",
            Self::Markdown => "Markdown",
            Self::PlainText => "Plain Text",
        }
    }

    /// Only script sources go through the compile pipeline.
    pub fn is_runnable(self) -> bool {
        matches!(self, Self::TypeScript | Self::JavaScript)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/kernel/language.rs"]
mod tests;
