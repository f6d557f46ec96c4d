//! In-memory working set of macros, unique by path.
//!
//! Not thread-safe by contract: one logical owner mutates it and mirrors
//! every change into the [`MacroQueue`](crate::MacroQueue) itself. Nothing
//! reconciles the two automatically.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chatmacro_core::error::{MacroError, Result};
use chatmacro_core::macros::{Macro, PATH_SEPARATOR};

use crate::table::MacroTable;

#[derive(Debug, Clone, Default)]
pub struct MacroSet {
    macros: HashSet<Macro>,
}

impl MacroSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the working set with the table's current contents.
    pub fn reload(&mut self, table: &MacroTable) -> Result<()> {
        self.macros = table.list()?.into_iter().collect();
        tracing::debug!("🔁 Working set reloaded ({} macros)", self.macros.len());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Macro> {
        self.macros.iter()
    }

    pub fn get(&self, path: &str) -> Option<&Macro> {
        self.macros.get(&Macro::new(path))
    }

    /// Look up a macro by its invocation alias (case-insensitive).
    pub fn find_by_command(&self, command: &str) -> Option<&Macro> {
        let command = command.trim();
        if command.is_empty() {
            return None;
        }
        self.macros
            .iter()
            .find(|m| m.has_command() && m.command.trim().eq_ignore_ascii_case(command))
    }

    /// Insert or replace by path. Returns the previous version, if any.
    pub fn upsert(&mut self, m: Macro) -> Option<Macro> {
        self.macros.replace(m)
    }

    pub fn remove(&mut self, path: &str) -> Option<Macro> {
        let probe = Macro::new(path);
        self.macros.take(&probe)
    }

    /// Move a macro to a new path: a remove plus reinsert, since path is identity.
    pub fn rename(&mut self, old_path: &str, updated: Macro) -> Result<()> {
        if updated.path != old_path && self.get(&updated.path).is_some() {
            return Err(MacroError::PathCollision(updated.path));
        }
        if self.remove(old_path).is_none() {
            return Err(MacroError::NotFound(old_path.to_string()));
        }
        self.macros.insert(updated);
        Ok(())
    }

    /// Check path and command uniqueness before accepting `candidate`.
    ///
    /// `previous_path` is the path the candidate is stored under today
    /// (`None` for a brand-new macro).
    pub fn validate(&self, candidate: &Macro, previous_path: Option<&str>) -> Result<()> {
        let own_path = previous_path.unwrap_or(&candidate.path);
        let moving = previous_path.is_none_or(|p| p != candidate.path);
        if moving && self.get(&candidate.path).is_some() {
            return Err(MacroError::PathCollision(candidate.path.clone()));
        }
        if let Some(other) = self.find_by_command(&candidate.command)
            && other.path != own_path
        {
            return Err(MacroError::CommandCollision {
                command: candidate.command.clone(),
                path: other.path.clone(),
            });
        }
        Ok(())
    }

    /// Direct children of `prefix` for tree-style browsing: `(segment, is_leaf)`.
    pub fn children(&self, prefix: &str) -> Vec<(String, bool)> {
        let prefix = prefix.trim_matches(PATH_SEPARATOR);
        let mut nodes: BTreeMap<String, bool> = BTreeMap::new();
        for m in &self.macros {
            let path = m.path.trim_matches(PATH_SEPARATOR);
            let rest = if prefix.is_empty() {
                path
            } else {
                match path.strip_prefix(prefix).and_then(|r| r.strip_prefix(PATH_SEPARATOR)) {
                    Some(rest) => rest,
                    None => continue,
                }
            };
            let mut parts = rest.splitn(2, PATH_SEPARATOR);
            let Some(head) = parts.next().filter(|h| !h.is_empty()) else {
                continue;
            };
            let is_leaf = parts.next().is_none();
            let entry = nodes.entry(head.to_string()).or_insert(is_leaf);
            *entry = *entry && is_leaf;
        }
        nodes.into_iter().collect()
    }

    /// All tags in use, sorted.
    pub fn tags(&self) -> BTreeSet<String> {
        self.macros.iter().flat_map(|m| m.tags.iter().cloned()).collect()
    }

    /// Macros carrying `tag`, sorted by path.
    pub fn with_tag(&self, tag: &str) -> Vec<&Macro> {
        let mut tagged: Vec<&Macro> = self.macros.iter().filter(|m| m.tags.contains(tag)).collect();
        tagged.sort_by(|a, b| a.path.cmp(&b.path));
        tagged
    }

    /// Snapshot as an owned vector (e.g. for ranking or bulk writes).
    pub fn to_vec(&self) -> Vec<Macro> {
        self.macros.iter().cloned().collect()
    }
}

impl FromIterator<Macro> for MacroSet {
    fn from_iter<I: IntoIterator<Item = Macro>>(iter: I) -> Self {
        let mut set = MacroSet::new();
        for m in iter {
            set.upsert(m);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_replaces_same_path() {
        let mut set = MacroSet::new();
        set.upsert(Macro::new("a/b").with_content("/say one"));
        let previous = set.upsert(Macro::new("a/b").with_content("/say two"));
        assert_eq!(previous.unwrap().content, "/say one");
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("a/b").unwrap().content, "/say two");
    }

    #[test]
    fn test_rename_is_remove_and_reinsert() {
        let mut set: MacroSet = [Macro::new("a"), Macro::new("b")].into_iter().collect();
        let mut moved = Macro::new("a");
        moved.path = "c".into();
        set.rename("a", moved).unwrap();
        assert!(set.get("a").is_none());
        assert!(set.get("c").is_some());

        let mut clash = Macro::new("c");
        clash.path = "b".into();
        assert!(matches!(set.rename("c", clash), Err(MacroError::PathCollision(_))));
        assert!(matches!(set.rename("zzz", Macro::new("q")), Err(MacroError::NotFound(_))));
    }

    #[test]
    fn test_validate_collisions() {
        let set: MacroSet = [Macro::new("x/one").with_command("pull")].into_iter().collect();

        let dup_path = Macro::new("x/one");
        assert!(matches!(set.validate(&dup_path, None), Err(MacroError::PathCollision(_))));

        let dup_cmd = Macro::new("x/two").with_command("PULL");
        assert!(matches!(
            set.validate(&dup_cmd, None),
            Err(MacroError::CommandCollision { .. })
        ));

        // Re-saving the same macro keeps its own command.
        let same = Macro::new("x/one").with_command("pull");
        assert!(set.validate(&same, Some("x/one")).is_ok());
    }

    #[test]
    fn test_children_tree() {
        let set: MacroSet = [Macro::new("raid/pull"), Macro::new("raid/wipe/reset"), Macro::new("hello")]
            .into_iter()
            .collect();
        assert_eq!(
            set.children(""),
            vec![("hello".to_string(), true), ("raid".to_string(), false)]
        );
        assert_eq!(
            set.children("raid"),
            vec![("pull".to_string(), true), ("wipe".to_string(), false)]
        );
    }

    #[test]
    fn test_tags_grouping() {
        let set: MacroSet = [
            Macro::new("b").with_tags(["raid"]),
            Macro::new("a").with_tags(["raid", "fun"]),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.tags().into_iter().collect::<Vec<_>>(), vec!["fun", "raid"]);
        let raid: Vec<&str> = set.with_tag("raid").iter().map(|m| m.path.as_str()).collect();
        assert_eq!(raid, vec!["a", "b"]);
    }

    #[test]
    fn test_reload_from_table() {
        let table = MacroTable::open_in_memory().unwrap();
        table.insert_all(&[Macro::new("one"), Macro::new("two")]).unwrap();
        let mut set = MacroSet::new();
        set.reload(&table).unwrap();
        assert_eq!(set.len(), 2);
    }
}
