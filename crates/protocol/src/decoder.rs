//! Incremental decoder for the raw inotify byte stream.
//!
//! Bytes read from the event descriptor arrive in arbitrary chunks; a single
//! read may end mid-header or mid-name. The decoder accumulates bytes and
//! hands out only complete records, keeping any trailing partial record for
//! the next feed.

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;

use crate::event::EventHeader;

/// One complete event record sliced out of the stream.
///
/// The name has its NUL padding stripped; it is empty for events on the
/// watched path itself and for queue-overflow records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub header: EventHeader,
    pub name: OsString,
}

/// Stateful byte accumulator and record parser.
///
/// Parsing is transactional per record: a record is consumed only once all of
/// its `EventHeader::SIZE + len` bytes are buffered. Partial trailing bytes
/// (even a partial header) are retained untouched.
#[derive(Debug, Default)]
pub struct EventDecoder {
    buf: Vec<u8>,
    cursor: usize,
}

impl EventDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes to the pending buffer.
    pub fn extend(&mut self, bytes: &[u8]) {
        if self.cursor == self.buf.len() {
            self.buf.clear();
            self.cursor = 0;
        } else if self.cursor > 0 {
            self.buf.drain(..self.cursor);
            self.cursor = 0;
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet consumed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len() - self.cursor
    }

    /// Pop the next complete record, or `None` if the buffer holds less than
    /// one full record. Nothing is consumed on `None`.
    pub fn next_record(&mut self) -> Option<RawRecord> {
        let avail = &self.buf[self.cursor..];
        let header = EventHeader::from_bytes(avail)?;
        let total = header.record_len();
        if avail.len() < total {
            return None;
        }

        // The name is written NUL-terminated and padded to the kernel's
        // alignment; everything from the first NUL on is padding.
        let name_bytes = &avail[EventHeader::SIZE..total];
        let end = name_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(name_bytes.len());
        let name = OsStr::from_bytes(&name_bytes[..end]).to_os_string();

        self.cursor += total;
        Some(RawRecord { header, name })
    }

    /// Lazily drain all currently complete records.
    pub fn records(&mut self) -> impl Iterator<Item = RawRecord> + '_ {
        std::iter::from_fn(move || self.next_record())
    }
}
