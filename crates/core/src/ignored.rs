//! Ignored-file rules
//!
//! Rules come from the project's persisted state and from explicit API calls:
//! 1. File rules (one exact path)
//! 2. Directory rules (a directory and everything below it)
//! 3. Mask rules (gitignore-style globs, e.g. `*.log` or `build/`)
//!
//! Masks are compiled with the `ignore` crate's gitignore matcher rooted at
//! the project base directory, so a mask without a slash matches file names
//! at any depth.

use crate::path::is_ancestor;
use anyhow::{Context, Result};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A single ignored-file rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IgnoreRule {
    /// Exactly this file
    File(PathBuf),
    /// This directory and all of its descendants
    Directory(PathBuf),
    /// Gitignore-style glob
    Mask(String),
}

/// Compiled set of ignored-file rules for one project
#[derive(Debug, Clone)]
pub struct IgnoredFileRules {
    /// Project base directory masks are anchored to
    base: PathBuf,

    /// Rules in insertion order
    rules: Vec<IgnoreRule>,

    /// Compiled mask matcher (None when there are no masks)
    masks: Option<Gitignore>,
}

impl IgnoredFileRules {
    /// Create an empty rule set anchored at `base`
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            rules: Vec::new(),
            masks: None,
        }
    }

    /// Add rules, skipping ones already present
    ///
    /// Returns true if any rule was added.
    pub fn add(&mut self, rules: impl IntoIterator<Item = IgnoreRule>) -> Result<bool> {
        let mut added = false;
        for rule in rules {
            if !self.rules.contains(&rule) {
                self.rules.push(rule);
                added = true;
            }
        }
        if added {
            self.rebuild_masks()?;
        }
        Ok(added)
    }

    /// Replace all rules
    pub fn set(&mut self, rules: impl IntoIterator<Item = IgnoreRule>) -> Result<()> {
        self.rules.clear();
        for rule in rules {
            if !self.rules.contains(&rule) {
                self.rules.push(rule);
            }
        }
        self.rebuild_masks()
    }

    /// Remove all rules
    pub fn clear(&mut self) {
        self.rules.clear();
        self.masks = None;
    }

    /// Current rules in insertion order
    pub fn rules(&self) -> &[IgnoreRule] {
        &self.rules
    }

    /// Project base directory
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Check whether no rules are configured
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Check if `path` is ignored by any rule
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        for rule in &self.rules {
            match rule {
                IgnoreRule::File(file) if file == path => return true,
                IgnoreRule::Directory(dir) if is_ancestor(dir, path, false) => return true,
                _ => {}
            }
        }

        let Some(masks) = &self.masks else {
            return false;
        };

        if is_ancestor(&self.base, path, true) {
            masks.matched_path_or_any_parents(path, is_dir).is_ignore()
        } else {
            // Outside the base only the file name can be matched
            match path.file_name() {
                Some(name) => masks.matched(Path::new(name), is_dir).is_ignore(),
                None => false,
            }
        }
    }

    fn rebuild_masks(&mut self) -> Result<()> {
        let patterns: Vec<&str> = self
            .rules
            .iter()
            .filter_map(|rule| match rule {
                IgnoreRule::Mask(mask) => Some(mask.as_str()),
                _ => None,
            })
            .collect();

        if patterns.is_empty() {
            self.masks = None;
            return Ok(());
        }

        let mut builder = GitignoreBuilder::new(&self.base);
        for pattern in patterns {
            builder
                .add_line(None, pattern)
                .with_context(|| format!("Invalid ignore mask: {}", pattern))?;
        }
        self.masks = Some(builder.build().context("Failed to compile ignore masks")?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(list: Vec<IgnoreRule>) -> IgnoredFileRules {
        let mut rules = IgnoredFileRules::new("/project");
        rules.set(list).unwrap();
        rules
    }

    #[test]
    fn test_file_rule_matches_exact_path_only() {
        let rules = rules(vec![IgnoreRule::File("/project/notes.txt".into())]);

        assert!(rules.is_ignored(Path::new("/project/notes.txt"), false));
        assert!(!rules.is_ignored(Path::new("/project/notes.txt.bak"), false));
        assert!(!rules.is_ignored(Path::new("/project/sub/notes.txt"), false));
    }

    #[test]
    fn test_directory_rule_covers_descendants() {
        let rules = rules(vec![IgnoreRule::Directory("/project/out".into())]);

        assert!(rules.is_ignored(Path::new("/project/out"), true));
        assert!(rules.is_ignored(Path::new("/project/out/deep/file.o"), false));
        assert!(!rules.is_ignored(Path::new("/project/output.txt"), false));
    }

    #[test]
    fn test_masks() {
        let rules = rules(vec![
            IgnoreRule::Mask("*.log".into()),
            IgnoreRule::Mask("build/".into()),
        ]);

        assert!(rules.is_ignored(Path::new("/project/debug.log"), false));
        assert!(rules.is_ignored(Path::new("/project/a/b/trace.log"), false));
        assert!(rules.is_ignored(Path::new("/project/build"), true));
        assert!(rules.is_ignored(Path::new("/project/build/output.txt"), false));
        assert!(!rules.is_ignored(Path::new("/project/src/main.rs"), false));
    }

    #[test]
    fn test_mask_outside_base_matches_file_name() {
        let rules = rules(vec![IgnoreRule::Mask("*.tmp".into())]);

        assert!(rules.is_ignored(Path::new("/elsewhere/cache.tmp"), false));
        assert!(!rules.is_ignored(Path::new("/elsewhere/cache.txt"), false));
    }

    #[test]
    fn test_add_skips_duplicates() {
        let mut rules = IgnoredFileRules::new("/project");
        assert!(rules.add(vec![IgnoreRule::Mask("*.log".into())]).unwrap());
        assert!(!rules.add(vec![IgnoreRule::Mask("*.log".into())]).unwrap());
        assert_eq!(rules.rules().len(), 1);

        rules.clear();
        assert!(rules.is_empty());
        assert!(!rules.is_ignored(Path::new("/project/a.log"), false));
    }
}
