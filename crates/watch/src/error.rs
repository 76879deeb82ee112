//! Error type for a running event stream.

use std::io;

use thiserror::Error;
use treenotify_protocol::EventKind;

use crate::stream::Event;

/// Why an event stream stopped yielding with an error.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The kernel reported a state the stream cannot continue past (queue
    /// overflow, unmount). The watch session is no longer trustworthy and
    /// must be rebuilt from scratch by the caller.
    #[error("terminal event {kind}")]
    Terminal {
        /// The kind that ended the stream.
        kind: EventKind,
        /// The full event carrying that kind.
        event: Event,
    },

    /// The underlying descriptor failed mid-stream.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}
