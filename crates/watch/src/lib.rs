//! TreeNotify - recursive filesystem change notification over Linux inotify.
//!
//! This crate turns raw kernel notifications into a blocking, timeout-aware
//! stream of structured events, and keeps the set of watched directories
//! aligned with a live, mutating tree:
//!
//! - [`Watcher`] owns one inotify instance, the path-to-descriptor
//!   bookkeeping, and the event stream itself
//! - [`TreeWatcher`] wraps a [`Watcher`], seeds it with a breadth-first walk
//!   of the root directories, and installs/removes watches as directories
//!   come and go
//! - [`StreamOptions`] configures a stream: inactivity timeout, poll
//!   duration (fixed or adaptive), idle markers, a per-kind stop filter,
//!   and which kinds are terminal
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use treenotify::{StreamItem, StreamOptions, TreeWatcher};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut tree = TreeWatcher::new("/var/spool/incoming")?;
//!
//!     let opts = StreamOptions::new().with_timeout(Duration::from_secs(30));
//!     for item in tree.events(opts) {
//!         match item? {
//!             StreamItem::Event(event) => {
//!                 println!("{:?}: {}", event.kinds, event.full_path().display());
//!             }
//!             StreamItem::Idle => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Error model
//!
//! Streams end silently on inactivity timeout or a filter stop (the stopping
//! kind and event remain readable via [`Watcher::last_stop`]). A kernel
//! queue overflow or unmount ends the stream with
//! [`StreamError::Terminal`]; the session is unrecoverable at that point and
//! must be rebuilt from scratch. Double registration and removal of unknown
//! watches are warned no-ops, which keeps the recursive housekeeping immune
//! to the inherent create/delete/rename races.

mod backend;
mod error;
mod registry;
mod stream;
mod tree;
mod watcher;

pub use backend::{KernelBackend, Readiness, WatchBackend, WatchDescriptor};
pub use error::StreamError;
pub use registry::WatchRegistry;
pub use stream::{
    BlockDuration, Event, EventFilter, EventStream, StreamItem, StreamOptions,
    DEFAULT_BLOCK_DURATION,
};
pub use tree::{TreeEventStream, TreeWatcher};
pub use watcher::{RemovalMode, Watcher};

pub use treenotify_protocol as protocol;
pub use treenotify_protocol::{EventDecoder, EventHeader, EventKind, EventMask, RawRecord};
