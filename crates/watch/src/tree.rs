//! Recursive tree watching: keeps the watch set aligned with a live,
//! mutating directory tree.
//!
//! The tree watcher owns a [`Watcher`] exclusively and forwards its stream
//! unchanged; on every directory event it first adds or removes watches so
//! that every live directory under the roots stays covered. The races are
//! real and accounted for: a directory can be created and deleted before its
//! watch is installed, or moved away before the removal runs.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use treenotify_protocol::{EventKind, EventMask};

use crate::backend::{KernelBackend, WatchBackend};
use crate::error::StreamError;
use crate::stream::{Event, StreamItem, StreamOptions, StreamState};
use crate::watcher::{RemovalMode, Watcher};

/// Flags the synchronizer itself depends on to curate the watch set. They
/// are OR-ed into every mask this module installs, whatever the caller asked
/// to see.
const TREE_MASK: EventMask = EventMask::ISDIR
    .union(EventMask::CREATE)
    .union(EventMask::MOVED_TO)
    .union(EventMask::DELETE)
    .union(EventMask::MOVED_FROM);

/// Recursively watches one or more directory trees.
pub struct TreeWatcher<B: WatchBackend = KernelBackend> {
    watcher: Watcher<B>,
    mask: EventMask,
    skip_existence_check: bool,
}

impl TreeWatcher<KernelBackend> {
    /// Recursively watch the tree rooted at `root` for all events.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        Self::with_mask(root, EventMask::ALL_EVENTS)
    }

    /// Recursively watch the tree rooted at `root` for `mask` events.
    pub fn with_mask(root: impl AsRef<Path>, mask: EventMask) -> io::Result<Self> {
        Self::with_backend(KernelBackend::new()?, &[root.as_ref()], mask)
    }

    /// Recursively watch several trees at once for all events.
    pub fn with_roots<P: AsRef<Path>>(roots: &[P]) -> io::Result<Self> {
        Self::with_roots_and_mask(roots, EventMask::ALL_EVENTS)
    }

    /// Recursively watch several trees at once for `mask` events.
    pub fn with_roots_and_mask<P: AsRef<Path>>(roots: &[P], mask: EventMask) -> io::Result<Self> {
        Self::with_backend(KernelBackend::new()?, roots, mask)
    }
}

impl<B: WatchBackend> TreeWatcher<B> {
    /// Build a tree watcher over an explicit backend and seed it with an
    /// initial walk of `roots`.
    pub fn with_backend<P: AsRef<Path>>(
        backend: B,
        roots: &[P],
        mask: EventMask,
    ) -> io::Result<Self> {
        let mut tree = Self {
            watcher: Watcher::with_backend(backend),
            mask: mask | TREE_MASK,
            skip_existence_check: false,
        };
        tree.load_trees(roots)?;
        Ok(tree)
    }

    /// Install watches on new directories without first verifying they still
    /// exist. Useful when events are known to queue up behind renames and
    /// the verification would race anyway.
    #[must_use]
    pub fn with_skip_existence_check(mut self, skip: bool) -> Self {
        self.skip_existence_check = skip;
        self
    }

    /// Breadth-first walk over the roots, installing a watch on every
    /// directory found, roots included. One-shot: directories appearing
    /// later are picked up from live create/move events instead.
    fn load_trees<P: AsRef<Path>>(&mut self, roots: &[P]) -> io::Result<()> {
        let mut found = Vec::new();
        let mut queue: VecDeque<PathBuf> =
            roots.iter().map(|root| root.as_ref().to_path_buf()).collect();

        while let Some(dir) = queue.pop_front() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    queue.push_back(entry.path());
                }
            }
            found.push(dir);
        }

        tracing::debug!(count = found.len(), "seeding initial watches");
        for path in found {
            self.watcher.add_watch(&path, self.mask)?;
        }
        Ok(())
    }

    /// Open a blocking event stream over the whole tree.
    ///
    /// Yields exactly what the underlying [`Watcher`] stream yields; watch
    /// housekeeping happens as a side effect before each directory event is
    /// forwarded.
    pub fn events(&mut self, opts: StreamOptions) -> TreeEventStream<'_, B> {
        self.watcher.reset_last_stop();
        TreeEventStream {
            tree: self,
            state: StreamState::new(opts),
        }
    }

    /// The kind and event a filter stopped the last stream on, if that is
    /// how it ended.
    #[must_use]
    pub fn last_stop(&self) -> Option<&(EventKind, Event)> {
        self.watcher.last_stop()
    }

    /// The wrapped event source.
    #[must_use]
    pub fn watcher(&self) -> &Watcher<B> {
        &self.watcher
    }

    /// Mutable access to the wrapped event source, e.g. to graft extra
    /// watches onto the tree.
    pub fn watcher_mut(&mut self) -> &mut Watcher<B> {
        &mut self.watcher
    }

    /// Bring the watch set back in line after a directory event.
    fn synchronize(&mut self, event: &Event) -> io::Result<()> {
        let full_path = event.full_path();
        let kinds = &event.kinds;

        if kinds.contains(&EventKind::Create) || kinds.contains(&EventKind::MovedTo) {
            // The event may be processed long after the directory appeared;
            // by now it can be gone again. Watching a vanished path is
            // wasted work, so verify first unless the caller opted out.
            if self.skip_existence_check || full_path.is_dir() {
                tracing::debug!(path = %full_path.display(), "directory appeared, adding watch");
                match self.watcher.add_watch(&full_path, self.mask) {
                    Ok(_) => {}
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {
                        tracing::debug!(
                            path = %full_path.display(),
                            "directory vanished before its watch was added"
                        );
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        if kinds.contains(&EventKind::Delete) {
            // The kernel dropped the watch together with the directory;
            // only the bookkeeping is left to clean up.
            tracing::debug!(path = %full_path.display(), "directory removed, dropping watch entry");
            self.watcher.remove_watch(&full_path, RemovalMode::RegistryOnly)?;
        } else if kinds.contains(&EventKind::MovedFrom) {
            // A rename does not invalidate the watch; tear it down fully.
            tracing::debug!(path = %full_path.display(), "directory moved away, removing watch");
            if let Err(err) = self.watcher.remove_watch(&full_path, RemovalMode::Full) {
                // The directory was deleted out from under the rename before
                // the removal ran.
                tracing::debug!(
                    path = %full_path.display(),
                    error = %err,
                    "watch vanished before removal"
                );
            }
        }

        Ok(())
    }
}

/// Blocking iterator over the events of a [`TreeWatcher`].
///
/// Identical contract to [`EventStream`](crate::stream::EventStream); each
/// directory event additionally adjusts the watch set before it is yielded.
pub struct TreeEventStream<'a, B: WatchBackend> {
    tree: &'a mut TreeWatcher<B>,
    state: StreamState,
}

impl<B: WatchBackend> Iterator for TreeEventStream<'_, B> {
    type Item = Result<StreamItem, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.state.next_item(&mut self.tree.watcher)?;

        if let Ok(StreamItem::Event(event)) = &item {
            if event.is_dir() {
                if let Err(err) = self.tree.synchronize(event) {
                    self.state.abort();
                    return Some(Err(err.into()));
                }
            }
        }

        Some(item)
    }
}
