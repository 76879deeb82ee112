//! Path <-> watch-descriptor bookkeeping.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::backend::WatchDescriptor;

/// Bidirectional map between watched paths and their descriptors.
///
/// The registry enforces a bijection for the lifetime of each watch: no two
/// paths share a descriptor and no two descriptors share a path. Entries are
/// never mutated in place; a replacement is a remove followed by an insert.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    by_path: HashMap<PathBuf, WatchDescriptor>,
    by_wd: HashMap<WatchDescriptor, PathBuf>,
}

impl WatchRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `path <-> wd`. The caller checks for duplicates first;
    /// inserting over a live entry would break the bijection.
    pub fn insert(&mut self, path: PathBuf, wd: WatchDescriptor) {
        debug_assert!(!self.by_path.contains_key(&path));
        debug_assert!(!self.by_wd.contains_key(&wd));
        self.by_wd.insert(wd, path.clone());
        self.by_path.insert(path, wd);
    }

    /// Descriptor registered for `path`, if any.
    #[must_use]
    pub fn wd_for(&self, path: &Path) -> Option<WatchDescriptor> {
        self.by_path.get(path).copied()
    }

    /// Path registered for `wd`, if any.
    #[must_use]
    pub fn path_for(&self, wd: WatchDescriptor) -> Option<&Path> {
        self.by_wd.get(&wd).map(PathBuf::as_path)
    }

    #[must_use]
    pub fn contains_path(&self, path: &Path) -> bool {
        self.by_path.contains_key(path)
    }

    /// Drop the entry for `path`, returning its descriptor.
    pub fn remove_by_path(&mut self, path: &Path) -> Option<WatchDescriptor> {
        let wd = self.by_path.remove(path)?;
        self.by_wd.remove(&wd);
        Some(wd)
    }

    /// Drop the entry for `wd`, returning its path.
    pub fn remove_by_wd(&mut self, wd: WatchDescriptor) -> Option<PathBuf> {
        let path = self.by_wd.remove(&wd)?;
        self.by_path.remove(&path);
        Some(path)
    }

    /// All currently registered paths, in no particular order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.by_path.keys().map(PathBuf::as_path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bijection_holds_until_removal() {
        let mut registry = WatchRegistry::new();
        registry.insert(PathBuf::from("/a"), 1);
        registry.insert(PathBuf::from("/a/b"), 2);

        assert_eq!(registry.wd_for(Path::new("/a")), Some(1));
        assert_eq!(registry.wd_for(Path::new("/a/b")), Some(2));
        assert_eq!(registry.path_for(1), Some(Path::new("/a")));
        assert_eq!(registry.path_for(2), Some(Path::new("/a/b")));
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.remove_by_path(Path::new("/a")), Some(1));
        assert_eq!(registry.wd_for(Path::new("/a")), None);
        assert_eq!(registry.path_for(1), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_by_wd_clears_both_directions() {
        let mut registry = WatchRegistry::new();
        registry.insert(PathBuf::from("/x"), 7);

        assert_eq!(registry.remove_by_wd(7), Some(PathBuf::from("/x")));
        assert!(!registry.contains_path(Path::new("/x")));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_absent_is_none() {
        let mut registry = WatchRegistry::new();
        assert_eq!(registry.remove_by_path(Path::new("/nope")), None);
        assert_eq!(registry.remove_by_wd(99), None);
    }
}
