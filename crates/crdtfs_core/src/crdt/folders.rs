//! Add-only replicated set of folder paths.

use std::collections::BTreeSet;

/// Folder paths known to the document.
///
/// Replicated members come from `AddFolder` operations and merge by union.
/// Seed folders come from local configuration; they are listed but never
/// replicated.
#[derive(Debug, Clone, Default)]
pub struct FolderSet {
    replicated: BTreeSet<String>,
    seeds: BTreeSet<String>,
}

impl FolderSet {
    /// A set reporting `seeds` in addition to replicated members.
    pub fn with_seeds<I, S>(seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replicated: BTreeSet::new(),
            seeds: seeds.into_iter().map(Into::into).collect(),
        }
    }

    /// Add a replicated member. Returns true if the listing changed.
    pub fn insert(&mut self, path: &str) -> bool {
        let was_listed = self.contains(path);
        self.replicated.insert(path.to_string());
        !was_listed
    }

    /// Whether an `AddFolder` operation for `path` has been integrated.
    pub fn is_replicated(&self, path: &str) -> bool {
        self.replicated.contains(path)
    }

    /// Whether `path` is listed (replicated or seeded).
    pub fn contains(&self, path: &str) -> bool {
        self.replicated.contains(path) || self.seeds.contains(path)
    }

    /// All listed folders, sorted.
    pub fn list(&self) -> Vec<String> {
        self.replicated.union(&self.seeds).cloned().collect()
    }
}
