//! The event stream: readiness loop, filtering, and termination logic.
//!
//! A stream is a blocking iterator over [`StreamItem`]s. Suspension happens
//! exactly at the readiness wait; decoding, registry lookups, and delivery
//! run to completion in between, so no two events are ever in flight at
//! once.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fmt;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use treenotify_protocol::{EventHeader, EventKind};

use crate::backend::{Readiness, WatchBackend};
use crate::error::StreamError;
use crate::watcher::Watcher;

/// How long one readiness wait blocks when no override is given.
pub const DEFAULT_BLOCK_DURATION: Duration = Duration::from_secs(1);

/// A decoded filesystem event, resolved against the watch registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// The raw record header as read off the wire.
    pub header: EventHeader,
    /// The header's mask expanded into kinds, in a fixed order.
    pub kinds: Vec<EventKind>,
    /// Directory the originating watch covers. Empty for queue-overflow
    /// records, which carry no watch descriptor.
    pub path: PathBuf,
    /// Entry within `path` the event refers to; empty when the event is
    /// about the watched directory itself.
    pub name: OsString,
}

impl Event {
    /// Absolute path of the entry the event refers to.
    #[must_use]
    pub fn full_path(&self) -> PathBuf {
        if self.name.is_empty() {
            self.path.clone()
        } else {
            self.path.join(&self.name)
        }
    }

    /// Whether the subject of the event is a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kinds.contains(&EventKind::IsDir)
    }
}

/// One element yielded by an event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    /// A delivered filesystem event.
    Event(Event),
    /// No event arrived within one poll interval. Lets callers run periodic
    /// bookkeeping without a separate timer; does not reset the inactivity
    /// clock.
    Idle,
}

/// Poll duration policy: a fixed value, or a closure producing a fresh value
/// each loop iteration (for adaptive backoff).
pub enum BlockDuration {
    Fixed(Duration),
    Every(Box<dyn FnMut() -> Duration + Send>),
}

impl BlockDuration {
    /// Resolve the duration for the upcoming wait.
    pub(crate) fn next(&mut self) -> Duration {
        match self {
            Self::Fixed(duration) => *duration,
            Self::Every(produce) => produce(),
        }
    }
}

impl Default for BlockDuration {
    fn default() -> Self {
        Self::Fixed(DEFAULT_BLOCK_DURATION)
    }
}

impl From<Duration> for BlockDuration {
    fn from(duration: Duration) -> Self {
        Self::Fixed(duration)
    }
}

impl fmt::Debug for BlockDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(duration) => f.debug_tuple("Fixed").field(duration).finish(),
            Self::Every(_) => f.debug_tuple("Every").field(&"..").finish(),
        }
    }
}

/// Per-kind stop predicate. `Break` ends the stream cleanly; the stopping
/// kind and event stay inspectable via [`Watcher::last_stop`].
pub type EventFilter = Box<dyn FnMut(EventKind, &Event) -> ControlFlow<()> + Send>;

/// Configuration for one call to [`Watcher::events`] or
/// [`TreeWatcher::events`].
///
/// [`TreeWatcher::events`]: crate::tree::TreeWatcher::events
pub struct StreamOptions {
    pub(crate) timeout: Option<Duration>,
    pub(crate) idle_markers: bool,
    pub(crate) terminal_kinds: Vec<EventKind>,
    pub(crate) block: BlockDuration,
    pub(crate) filter: Option<EventFilter>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            idle_markers: true,
            terminal_kinds: vec![EventKind::QueueOverflow, EventKind::Unmount],
            block: BlockDuration::default(),
            filter: None,
        }
    }
}

impl StreamOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// End the stream after this much wall-clock time without a delivered
    /// event. Unset means the stream only ends on a filter stop or terminal
    /// event.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether to yield [`StreamItem::Idle`] on poll intervals that saw no
    /// event (default: true).
    #[must_use]
    pub fn with_idle_markers(mut self, idle_markers: bool) -> Self {
        self.idle_markers = idle_markers;
        self
    }

    /// Kinds that abort the stream with [`StreamError::Terminal`]
    /// (default: queue overflow and unmount).
    #[must_use]
    pub fn with_terminal_kinds(mut self, kinds: impl Into<Vec<EventKind>>) -> Self {
        self.terminal_kinds = kinds.into();
        self
    }

    /// Override the per-iteration poll duration.
    #[must_use]
    pub fn with_block(mut self, block: impl Into<BlockDuration>) -> Self {
        self.block = block.into();
        self
    }

    /// Install a per-kind stop predicate.
    #[must_use]
    pub fn with_filter(
        mut self,
        filter: impl FnMut(EventKind, &Event) -> ControlFlow<()> + Send + 'static,
    ) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }
}

/// Drives one stream's loop. Shared between [`EventStream`] and the tree
/// stream so the synchronizer can interleave its housekeeping between
/// delivery and re-yield.
pub(crate) struct StreamState {
    opts: StreamOptions,
    pending: VecDeque<Event>,
    last_hit: Instant,
    done: bool,
}

impl StreamState {
    pub(crate) fn new(opts: StreamOptions) -> Self {
        Self {
            opts,
            pending: VecDeque::new(),
            last_hit: Instant::now(),
            done: false,
        }
    }

    /// Fuse the stream; subsequent calls yield nothing.
    pub(crate) fn abort(&mut self) {
        self.done = true;
    }

    fn timed_out(&self) -> bool {
        self.opts
            .timeout
            .is_some_and(|timeout| self.last_hit.elapsed() > timeout)
    }

    pub(crate) fn next_item<B: WatchBackend>(
        &mut self,
        watcher: &mut Watcher<B>,
    ) -> Option<Result<StreamItem, StreamError>> {
        if self.done {
            return None;
        }

        loop {
            // Deliver decoded events before waiting again. Kind checks run
            // here, at delivery time, so a terminal record also cuts off
            // anything decoded after it in the same read.
            if let Some(event) = self.pending.pop_front() {
                for i in 0..event.kinds.len() {
                    let kind = event.kinds[i];
                    if self.opts.terminal_kinds.contains(&kind) {
                        self.done = true;
                        return Some(Err(StreamError::Terminal { kind, event }));
                    }
                    if let Some(filter) = self.opts.filter.as_mut() {
                        if filter(kind, &event).is_break() {
                            watcher.set_last_stop(kind, event);
                            self.done = true;
                            return None;
                        }
                    }
                }
                self.last_hit = Instant::now();
                return Some(Ok(StreamItem::Event(event)));
            }

            let block = self.opts.block.next();
            match watcher.backend_wait(block) {
                Err(err) => {
                    self.done = true;
                    return Some(Err(err.into()));
                }
                Ok(Readiness::Interrupted) => {
                    // A signal is a retry point, not a cancellation; only the
                    // inactivity timeout ends the stream.
                    if self.timed_out() {
                        self.done = true;
                        return None;
                    }
                }
                Ok(Readiness::TimedOut) => {
                    if self.timed_out() {
                        self.done = true;
                        return None;
                    }
                    if self.opts.idle_markers {
                        return Some(Ok(StreamItem::Idle));
                    }
                }
                Ok(Readiness::Ready) => {
                    match watcher.drain_into(&mut self.pending) {
                        Ok(_) => {}
                        Err(err) => {
                            self.done = true;
                            return Some(Err(err.into()));
                        }
                    }
                    // Bytes arrived but completed no record (or every record
                    // belonged to a removed watch): not an idle iteration,
                    // but the timeout still applies.
                    if self.pending.is_empty() && self.timed_out() {
                        self.done = true;
                        return None;
                    }
                }
            }
        }
    }
}

/// Blocking iterator over the events of a [`Watcher`].
///
/// Ends (`None`) on inactivity timeout or filter stop; yields
/// `Err(StreamError::Terminal)` exactly once and then fuses when the kernel
/// reports an unrecoverable state.
pub struct EventStream<'a, B: WatchBackend> {
    watcher: &'a mut Watcher<B>,
    state: StreamState,
}

impl<'a, B: WatchBackend> EventStream<'a, B> {
    pub(crate) fn new(watcher: &'a mut Watcher<B>, opts: StreamOptions) -> Self {
        Self {
            watcher,
            state: StreamState::new(opts),
        }
    }
}

impl<B: WatchBackend> Iterator for EventStream<'_, B> {
    type Item = Result<StreamItem, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.state.next_item(self.watcher)
    }
}
