//! Macro definitions: the persisted unit of the store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

/// Separator between path segments (`a/b/c`).
pub const PATH_SEPARATOR: char = '/';

/// A reusable, parameterized sequence of outbound chat lines.
///
/// Identity is the `path`: two macros with the same path are the same
/// entity regardless of content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Macro {
    /// Display name (not unique).
    #[serde(default)]
    pub name: String,
    /// Hierarchical unique key.
    pub path: String,
    /// Optional invocation alias, unique among macros when non-empty.
    #[serde(default)]
    pub command: String,
    /// Default argument string used when no explicit arguments are given.
    #[serde(default)]
    pub args: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Newline-delimited outbound lines.
    #[serde(default)]
    pub content: String,
    /// Re-run the content until cancelled.
    #[serde(default, rename = "loop")]
    pub looping: bool,
}

impl Macro {
    /// Create an empty macro at `path`, named after its last segment.
    pub fn new(path: &str) -> Self {
        let mut m = Self {
            path: path.to_string(),
            ..Self::default()
        };
        m.name = m.file_name().to_string();
        m
    }

    pub fn with_content(mut self, content: &str) -> Self {
        self.content = content.to_string();
        self
    }

    pub fn with_command(mut self, command: &str) -> Self {
        self.command = command.to_string();
        self
    }

    pub fn with_args(mut self, args: &str) -> Self {
        self.args = args.to_string();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Non-empty path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split(PATH_SEPARATOR).filter(|s| !s.is_empty())
    }

    /// Last path segment.
    pub fn file_name(&self) -> &str {
        self.segments().last().unwrap_or("")
    }

    /// Path without the last segment (`""` for top-level macros).
    pub fn parent_path(&self) -> &str {
        let trimmed = self.path.trim_end_matches(PATH_SEPARATOR);
        match trimmed.rfind(PATH_SEPARATOR) {
            Some(idx) => &trimmed[..idx],
            None => "",
        }
    }

    /// Whether the macro has a dispatch alias.
    pub fn has_command(&self) -> bool {
        !self.command.trim().is_empty()
    }

    /// Tags joined by a single space (search text).
    pub fn joined_tags(&self) -> String {
        self.tags.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
    }
}

impl PartialEq for Macro {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Macro {}

impl Hash for Macro {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

/// Columns of the macro table that can be targeted by `find_by`/`update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacroColumn {
    Name,
    Path,
    Command,
    Args,
    Tags,
    Content,
    Loop,
}

impl MacroColumn {
    pub const ALL: [MacroColumn; 7] = [
        MacroColumn::Name,
        MacroColumn::Path,
        MacroColumn::Command,
        MacroColumn::Args,
        MacroColumn::Tags,
        MacroColumn::Content,
        MacroColumn::Loop,
    ];

    /// Physical column name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MacroColumn::Name => "name",
            MacroColumn::Path => "path",
            MacroColumn::Command => "command",
            MacroColumn::Args => "args",
            MacroColumn::Tags => "tags",
            MacroColumn::Content => "content",
            MacroColumn::Loop => "loop",
        }
    }

    /// Whether the column takes part in the full-text index.
    pub fn is_indexed(&self) -> bool {
        matches!(
            self,
            MacroColumn::Name | MacroColumn::Path | MacroColumn::Command | MacroColumn::Tags
        )
    }
}

impl std::fmt::Display for MacroColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
