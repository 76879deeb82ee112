//! The event source: watch lifecycle plus the blocking event stream.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use treenotify_protocol::{EventDecoder, EventKind, EventMask};

use crate::backend::{KernelBackend, Readiness, WatchBackend, WatchDescriptor};
use crate::registry::WatchRegistry;
use crate::stream::{Event, EventStream, StreamOptions};

/// How much of a watch to tear down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalMode {
    /// Drop the bookkeeping entry and deregister the kernel watch.
    Full,
    /// Drop the bookkeeping entry only. Used when the kernel has already
    /// invalidated the watch itself, e.g. because the watched directory was
    /// deleted; a kernel-level removal call would act on a dead descriptor.
    RegistryOnly,
    /// Deregister the kernel watch but keep the bookkeeping entry, so the
    /// final `IN_IGNORED` event for the descriptor can still be resolved to
    /// its path. Follow up with [`RemovalMode::RegistryOnly`] once it
    /// arrives.
    KernelOnly,
}

/// Watch registry and event source over one inotify instance.
///
/// Single-threaded by construction: all registry mutation and decoding runs
/// to completion between readiness waits, so no synchronization is needed.
pub struct Watcher<B: WatchBackend = KernelBackend> {
    backend: B,
    registry: WatchRegistry,
    decoder: EventDecoder,
    last_stop: Option<(EventKind, Event)>,
}

impl Watcher<KernelBackend> {
    /// Create a watcher over a fresh kernel inotify instance.
    pub fn new() -> io::Result<Self> {
        Ok(Self::with_backend(KernelBackend::new()?))
    }
}

impl<B: WatchBackend> Watcher<B> {
    /// Create a watcher over an explicit backend.
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend,
            registry: WatchRegistry::new(),
            decoder: EventDecoder::new(),
            last_stop: None,
        }
    }

    /// Install a watch on `path`.
    ///
    /// Watching an already-watched path is a warned no-op returning the
    /// existing descriptor: recursive discovery can race the live event
    /// stream, and both sides may legitimately try to register the same
    /// directory.
    pub fn add_watch(
        &mut self,
        path: impl AsRef<Path>,
        mask: EventMask,
    ) -> io::Result<WatchDescriptor> {
        let path = path.as_ref();

        if let Some(wd) = self.registry.wd_for(path) {
            tracing::warn!(path = %path.display(), "path already being watched");
            return Ok(wd);
        }

        let wd = self.backend.add_watch(path, mask)?;
        tracing::debug!(wd, path = %path.display(), "watch added");
        self.registry.insert(path.to_path_buf(), wd);
        Ok(wd)
    }

    /// Tear down the watch on `path` according to `mode`.
    ///
    /// Removing an unknown path is a warned no-op: the same directory's
    /// disappearance can be observed from two signals (its delete event and
    /// the tree synchronizer's housekeeping), and removal must be idempotent
    /// across them.
    pub fn remove_watch(&mut self, path: impl AsRef<Path>, mode: RemovalMode) -> io::Result<()> {
        let path = path.as_ref();
        let Some(wd) = self.registry.wd_for(path) else {
            tracing::warn!(path = %path.display(), "path not in watch list");
            return Ok(());
        };
        self.remove_entry(wd, mode)
    }

    /// Same as [`remove_watch`](Self::remove_watch), keyed by descriptor.
    pub fn remove_watch_by_id(&mut self, wd: WatchDescriptor, mode: RemovalMode) -> io::Result<()> {
        if self.registry.path_for(wd).is_none() {
            tracing::warn!(wd, "watch descriptor not in watch list");
            return Ok(());
        }
        self.remove_entry(wd, mode)
    }

    fn remove_entry(&mut self, wd: WatchDescriptor, mode: RemovalMode) -> io::Result<()> {
        tracing::debug!(wd, ?mode, "removing watch");
        if mode != RemovalMode::KernelOnly {
            self.registry.remove_by_wd(wd);
        }
        if mode == RemovalMode::RegistryOnly {
            return Ok(());
        }
        self.backend.remove_watch(wd)
    }

    /// Whether `path` currently has a registered watch.
    #[must_use]
    pub fn is_watched(&self, path: impl AsRef<Path>) -> bool {
        self.registry.contains_path(path.as_ref())
    }

    /// All currently watched paths.
    #[must_use]
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.registry.paths().map(Path::to_path_buf).collect()
    }

    /// Open a blocking event stream configured by `opts`.
    ///
    /// Any previously recorded filter stop is cleared.
    pub fn events(&mut self, opts: StreamOptions) -> EventStream<'_, B> {
        self.last_stop = None;
        EventStream::new(self, opts)
    }

    /// The kind and event a filter stopped the last stream on, if that is
    /// how it ended.
    #[must_use]
    pub fn last_stop(&self) -> Option<&(EventKind, Event)> {
        self.last_stop.as_ref()
    }

    pub(crate) fn set_last_stop(&mut self, kind: EventKind, event: Event) {
        self.last_stop = Some((kind, event));
    }

    pub(crate) fn reset_last_stop(&mut self) {
        self.last_stop = None;
    }

    pub(crate) fn backend_wait(&mut self, timeout: Duration) -> io::Result<Readiness> {
        self.backend.wait(timeout)
    }

    #[cfg(test)]
    pub(crate) fn backend_ref(&self) -> &B {
        &self.backend
    }

    #[cfg(test)]
    pub(crate) fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Read whatever the descriptor has, decode complete records, resolve
    /// them against the registry, and queue the resulting events.
    pub(crate) fn drain_into(&mut self, pending: &mut VecDeque<Event>) -> io::Result<usize> {
        let mut buf = Vec::new();
        if self.backend.read_events(&mut buf)? == 0 {
            return Ok(0);
        }
        self.decoder.extend(&buf);

        let mut queued = 0;
        while let Some(record) = self.decoder.next_record() {
            let kinds = record.header.kinds();

            let path = if record.header.wd < 0 {
                // Queue-overflow records carry wd -1; there is no watch to
                // resolve, and dropping them would hide a terminal kind.
                PathBuf::new()
            } else {
                match self.registry.path_for(record.header.wd) {
                    Some(path) => path.to_path_buf(),
                    None => {
                        // The watch was removed after this record was queued.
                        tracing::debug!(
                            wd = record.header.wd,
                            "dropping event for unknown watch descriptor"
                        );
                        continue;
                    }
                }
            };

            tracing::debug!(wd = record.header.wd, kinds = ?kinds, "event decoded");
            pending.push_back(Event {
                header: record.header,
                kinds,
                path,
                name: record.name,
            });
            queued += 1;
        }
        Ok(queued)
    }
}

#[cfg(test)]
mod tests {
    use std::ops::ControlFlow;
    use std::time::Instant;

    use treenotify_protocol::EventHeader;

    use super::*;
    use crate::backend::testing::{ScriptedBackend, Step};
    use crate::error::StreamError;
    use crate::stream::StreamItem;

    fn record(wd: WatchDescriptor, mask: EventMask, name: &str) -> Vec<u8> {
        EventHeader::new(wd, mask.bits(), 0).to_bytes_with_name(name.as_bytes())
    }

    fn overflow() -> Vec<u8> {
        EventHeader::new(-1, EventMask::Q_OVERFLOW.bits(), 0)
            .header_to_bytes()
            .to_vec()
    }

    fn quick_opts() -> StreamOptions {
        StreamOptions::new()
            .with_timeout(Duration::from_millis(60))
            .with_block(Duration::from_millis(5))
            .with_idle_markers(false)
    }

    #[test]
    fn test_duplicate_add_is_noop() {
        let mut watcher = Watcher::with_backend(ScriptedBackend::new());
        let first = watcher.add_watch("/srv/data", EventMask::ALL_EVENTS).unwrap();
        let second = watcher.add_watch("/srv/data", EventMask::ALL_EVENTS).unwrap();

        assert_eq!(first, second);
        assert_eq!(watcher.backend.added.len(), 1);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut watcher = Watcher::with_backend(ScriptedBackend::new());
        watcher.remove_watch("/never/added", RemovalMode::Full).unwrap();
        watcher.remove_watch_by_id(42, RemovalMode::Full).unwrap();
        assert!(watcher.backend.removed.is_empty());
    }

    #[test]
    fn test_removal_modes() {
        let mut watcher = Watcher::with_backend(ScriptedBackend::new());

        let wd = watcher.add_watch("/a", EventMask::ALL_EVENTS).unwrap();
        watcher.remove_watch("/a", RemovalMode::Full).unwrap();
        assert!(!watcher.is_watched("/a"));
        assert_eq!(watcher.backend.removed, vec![wd]);

        let wd = watcher.add_watch("/b", EventMask::ALL_EVENTS).unwrap();
        watcher.remove_watch("/b", RemovalMode::RegistryOnly).unwrap();
        assert!(!watcher.is_watched("/b"));
        assert!(!watcher.backend.removed.contains(&wd));

        let wd = watcher.add_watch("/c", EventMask::ALL_EVENTS).unwrap();
        watcher.remove_watch("/c", RemovalMode::KernelOnly).unwrap();
        assert!(watcher.is_watched("/c"));
        assert!(watcher.backend.removed.contains(&wd));
    }

    #[test]
    fn test_stream_delivers_resolved_events() {
        let mut watcher = Watcher::with_backend(ScriptedBackend::new());
        let wd = watcher.add_watch("/srv/data", EventMask::ALL_EVENTS).unwrap();
        watcher
            .backend
            .push(Step::Deliver(record(wd, EventMask::CREATE, "report.csv")));

        let items: Vec<_> = watcher.events(quick_opts()).collect();
        assert_eq!(items.len(), 1);

        match &items[0] {
            Ok(StreamItem::Event(event)) => {
                assert_eq!(event.kinds, vec![EventKind::Create]);
                assert_eq!(event.path, PathBuf::from("/srv/data"));
                assert_eq!(event.name, "report.csv");
                assert_eq!(event.full_path(), PathBuf::from("/srv/data/report.csv"));
            }
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_descriptor_is_dropped() {
        let mut watcher = Watcher::with_backend(ScriptedBackend::new());
        watcher.add_watch("/srv/data", EventMask::ALL_EVENTS).unwrap();
        watcher
            .backend
            .push(Step::Deliver(record(99, EventMask::CREATE, "ghost")));

        let items: Vec<_> = watcher.events(quick_opts()).collect();
        assert!(items.is_empty());
    }

    #[test]
    fn test_terminal_event_ends_stream() {
        let mut watcher = Watcher::with_backend(ScriptedBackend::new());
        let wd = watcher.add_watch("/srv/data", EventMask::ALL_EVENTS).unwrap();

        // One chunk: a normal event, the overflow, and an event that must
        // never surface.
        let mut chunk = record(wd, EventMask::CREATE, "before");
        chunk.extend_from_slice(&overflow());
        chunk.extend_from_slice(&record(wd, EventMask::CREATE, "after"));
        watcher.backend.push(Step::Deliver(chunk));

        let mut stream = watcher.events(quick_opts());

        match stream.next() {
            Some(Ok(StreamItem::Event(event))) => assert_eq!(event.name, "before"),
            other => panic!("expected event, got {other:?}"),
        }
        match stream.next() {
            Some(Err(StreamError::Terminal { kind, event })) => {
                assert_eq!(kind, EventKind::QueueOverflow);
                assert_eq!(event.kinds, vec![EventKind::QueueOverflow]);
                assert_eq!(event.header.wd, -1);
            }
            other => panic!("expected terminal error, got {other:?}"),
        }
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_filter_stop_records_reason() {
        let mut watcher = Watcher::with_backend(ScriptedBackend::new());
        let wd = watcher.add_watch("/srv/data", EventMask::ALL_EVENTS).unwrap();
        watcher
            .backend
            .push(Step::Deliver(record(wd, EventMask::MODIFY, "keep.log")));
        watcher
            .backend
            .push(Step::Deliver(record(wd, EventMask::CREATE, "stop-here")));

        let opts = quick_opts().with_filter(|kind, _event| {
            if kind == EventKind::Create {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        let items: Vec<_> = watcher.events(opts).collect();

        // The modify event is delivered; the create event stops the stream
        // without surfacing and without an error.
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Ok(StreamItem::Event(e)) if e.name == "keep.log"));

        let (kind, event) = watcher.last_stop().expect("stop reason recorded");
        assert_eq!(*kind, EventKind::Create);
        assert_eq!(event.name, "stop-here");

        // Opening a new stream clears the recorded stop.
        let _ = watcher.events(quick_opts());
        assert!(watcher.last_stop().is_none());
    }

    #[test]
    fn test_timeout_elapses_without_events() {
        let mut watcher = Watcher::with_backend(ScriptedBackend::new());
        watcher.add_watch("/srv/data", EventMask::ALL_EVENTS).unwrap();

        let timeout = Duration::from_millis(80);
        let started = Instant::now();
        let items: Vec<_> = watcher
            .events(
                StreamOptions::new()
                    .with_timeout(timeout)
                    .with_block(Duration::from_millis(10))
                    .with_idle_markers(false),
            )
            .collect();
        let elapsed = started.elapsed();

        assert!(items.is_empty());
        assert!(elapsed >= timeout, "ended early after {elapsed:?}");
        assert!(elapsed < timeout * 10, "ended far too late after {elapsed:?}");
    }

    #[test]
    fn test_interrupted_wait_is_retried() {
        let mut watcher = Watcher::with_backend(ScriptedBackend::new());
        let wd = watcher.add_watch("/srv/data", EventMask::ALL_EVENTS).unwrap();
        watcher.backend.push(Step::Interrupt);
        watcher.backend.push(Step::Interrupt);
        watcher
            .backend
            .push(Step::Deliver(record(wd, EventMask::ATTRIB, "touched")));

        let items: Vec<_> = watcher.events(quick_opts()).collect();
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Ok(StreamItem::Event(e)) if e.name == "touched"));
    }

    #[test]
    fn test_idle_markers_on_quiet_intervals() {
        let mut watcher = Watcher::with_backend(ScriptedBackend::new());
        watcher.add_watch("/srv/data", EventMask::ALL_EVENTS).unwrap();

        let opts = StreamOptions::new()
            .with_timeout(Duration::from_millis(60))
            .with_block(Duration::from_millis(10));
        let items: Vec<_> = watcher.events(opts).collect();

        assert!(!items.is_empty());
        assert!(items
            .iter()
            .all(|item| matches!(item, Ok(StreamItem::Idle))));
    }

    #[test]
    fn test_partial_record_survives_across_reads() {
        let mut watcher = Watcher::with_backend(ScriptedBackend::new());
        let wd = watcher.add_watch("/srv/data", EventMask::ALL_EVENTS).unwrap();

        let bytes = record(wd, EventMask::CLOSE_WRITE, "chunked.bin");
        let split = EventHeader::SIZE + 2;
        watcher.backend.push(Step::Deliver(bytes[..split].to_vec()));
        watcher.backend.push(Step::Deliver(bytes[split..].to_vec()));

        let items: Vec<_> = watcher.events(quick_opts()).collect();
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Ok(StreamItem::Event(e)) if e.name == "chunked.bin"));
    }
}
