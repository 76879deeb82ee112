//! inotify event masks and the binary event record format.
//!
//! The kernel delivers events as a fixed 16-byte header followed by a
//! NUL-padded filename. This module provides the mask constants, the header
//! codec, and the expansion of a delivered mask into its canonical event
//! kinds.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// inotify event mask flags.
    ///
    /// These match the kernel's inotify mask values exactly.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventMask: u32 {
        /// File was accessed (e.g., read).
        const ACCESS = 0x0000_0001;
        /// File was modified.
        const MODIFY = 0x0000_0002;
        /// Metadata changed (permissions, timestamps, ownership).
        const ATTRIB = 0x0000_0004;
        /// Writable file was closed.
        const CLOSE_WRITE = 0x0000_0008;
        /// Unwritable file was closed.
        const CLOSE_NOWRITE = 0x0000_0010;
        /// File was opened.
        const OPEN = 0x0000_0020;
        /// Entry moved out of the watched directory.
        const MOVED_FROM = 0x0000_0040;
        /// Entry moved into the watched directory.
        const MOVED_TO = 0x0000_0080;
        /// Entry created in the watched directory.
        const CREATE = 0x0000_0100;
        /// Entry deleted from the watched directory.
        const DELETE = 0x0000_0200;
        /// The watched path itself was deleted.
        const DELETE_SELF = 0x0000_0400;
        /// The watched path itself was moved.
        const MOVE_SELF = 0x0000_0800;

        // Convenience combinations
        /// Close event (write or no-write).
        const CLOSE = Self::CLOSE_WRITE.bits() | Self::CLOSE_NOWRITE.bits();
        /// Move event (from or to).
        const MOVE = Self::MOVED_FROM.bits() | Self::MOVED_TO.bits();

        /// All events that can be watched for.
        const ALL_EVENTS = Self::ACCESS.bits()
            | Self::MODIFY.bits()
            | Self::ATTRIB.bits()
            | Self::CLOSE_WRITE.bits()
            | Self::CLOSE_NOWRITE.bits()
            | Self::OPEN.bits()
            | Self::MOVED_FROM.bits()
            | Self::MOVED_TO.bits()
            | Self::CREATE.bits()
            | Self::DELETE.bits()
            | Self::DELETE_SELF.bits()
            | Self::MOVE_SELF.bits();

        // Additional flags accepted when adding a watch
        /// Only watch the path if it is a directory.
        const ONLYDIR = 0x0100_0000;
        /// Don't follow symlinks.
        const DONT_FOLLOW = 0x0200_0000;
        /// Add to an existing watch mask rather than replacing it.
        const MASK_ADD = 0x2000_0000;
        /// Deliver one event, then remove the watch.
        const ONESHOT = 0x8000_0000;

        // Flags only the kernel sets on delivered events
        /// Watch was removed (explicitly or automatically).
        const IGNORED = 0x0000_8000;
        /// Subject of the event is a directory.
        const ISDIR = 0x4000_0000;
        /// Event queue overflowed.
        const Q_OVERFLOW = 0x0000_4000;
        /// Filesystem containing the watched path was unmounted.
        const UNMOUNT = 0x0000_2000;
    }
}

/// Canonical kind of a delivered event.
///
/// A single raw event can carry several kinds at once (a directory creation
/// is both [`EventKind::Create`] and [`EventKind::IsDir`]). [`Display`]
/// renders the kernel constant name, e.g. `IN_CREATE`.
///
/// [`Display`]: fmt::Display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Access,
    Modify,
    Attrib,
    CloseWrite,
    CloseNowrite,
    Open,
    MovedFrom,
    MovedTo,
    Create,
    Delete,
    DeleteSelf,
    MoveSelf,
    Unmount,
    QueueOverflow,
    Ignored,
    IsDir,
}

/// Mask-bit-to-kind table, in ascending bit order. Expansion iterates this
/// table, which fixes the order kinds appear in for a multi-kind event.
const KIND_TABLE: &[(EventMask, EventKind)] = &[
    (EventMask::ACCESS, EventKind::Access),
    (EventMask::MODIFY, EventKind::Modify),
    (EventMask::ATTRIB, EventKind::Attrib),
    (EventMask::CLOSE_WRITE, EventKind::CloseWrite),
    (EventMask::CLOSE_NOWRITE, EventKind::CloseNowrite),
    (EventMask::OPEN, EventKind::Open),
    (EventMask::MOVED_FROM, EventKind::MovedFrom),
    (EventMask::MOVED_TO, EventKind::MovedTo),
    (EventMask::CREATE, EventKind::Create),
    (EventMask::DELETE, EventKind::Delete),
    (EventMask::DELETE_SELF, EventKind::DeleteSelf),
    (EventMask::MOVE_SELF, EventKind::MoveSelf),
    (EventMask::UNMOUNT, EventKind::Unmount),
    (EventMask::Q_OVERFLOW, EventKind::QueueOverflow),
    (EventMask::IGNORED, EventKind::Ignored),
    (EventMask::ISDIR, EventKind::IsDir),
];

impl EventKind {
    /// The kernel constant name for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Access => "IN_ACCESS",
            Self::Modify => "IN_MODIFY",
            Self::Attrib => "IN_ATTRIB",
            Self::CloseWrite => "IN_CLOSE_WRITE",
            Self::CloseNowrite => "IN_CLOSE_NOWRITE",
            Self::Open => "IN_OPEN",
            Self::MovedFrom => "IN_MOVED_FROM",
            Self::MovedTo => "IN_MOVED_TO",
            Self::Create => "IN_CREATE",
            Self::Delete => "IN_DELETE",
            Self::DeleteSelf => "IN_DELETE_SELF",
            Self::MoveSelf => "IN_MOVE_SELF",
            Self::Unmount => "IN_UNMOUNT",
            Self::QueueOverflow => "IN_Q_OVERFLOW",
            Self::Ignored => "IN_IGNORED",
            Self::IsDir => "IN_ISDIR",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EventMask {
    /// Expand a delivered mask into its kinds, in ascending bit order.
    ///
    /// # Panics
    ///
    /// Panics if the mask carries a bit with no corresponding [`EventKind`].
    /// The kernel only stamps documented flags on delivered events, so a
    /// leftover bit means the kind table is out of sync with the kernel and
    /// continuing would silently misreport events.
    #[must_use]
    pub fn kinds(self) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        let mut residue = self;
        for &(flag, kind) in KIND_TABLE {
            if self.contains(flag) {
                kinds.push(kind);
                residue.remove(flag);
            }
        }
        assert!(
            residue.is_empty(),
            "event mask {:#010x} carries bits with no known kind",
            self.bits()
        );
        kinds
    }
}

/// Expand a raw mask word into its kinds.
///
/// # Panics
///
/// Panics if the word carries bits outside the known flag set, or bits that
/// have no [`EventKind`]. See [`EventMask::kinds`].
#[must_use]
pub fn expand_mask(mask: u32) -> Vec<EventKind> {
    let mask = EventMask::from_bits(mask)
        .unwrap_or_else(|| panic!("event mask {mask:#010x} has bits outside the known flag set"));
    mask.kinds()
}

/// Fixed-size header of a raw inotify event record.
///
/// Binary-compatible with the kernel's `struct inotify_event`; the
/// variable-length name follows the header in the byte stream.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    /// Watch descriptor the event belongs to (`-1` for queue overflow).
    pub wd: i32,
    /// Event mask.
    pub mask: u32,
    /// Correlates the two halves of a rename within the watched scope.
    pub cookie: u32,
    /// Length of the name field in bytes, padding included.
    pub len: u32,
}

impl EventHeader {
    /// Size of the fixed portion of an event record. Always 16 bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Create a header with no name.
    #[must_use]
    pub const fn new(wd: i32, mask: u32, cookie: u32) -> Self {
        Self {
            wd,
            mask,
            cookie,
            len: 0,
        }
    }

    /// Expand this header's mask into its kinds.
    ///
    /// # Panics
    ///
    /// See [`expand_mask`].
    #[must_use]
    pub fn kinds(&self) -> Vec<EventKind> {
        expand_mask(self.mask)
    }

    /// The mask as typed flags, unknown bits dropped.
    #[must_use]
    pub fn event_mask(&self) -> EventMask {
        EventMask::from_bits_truncate(self.mask)
    }

    /// Total record length, name included.
    #[must_use]
    pub const fn record_len(&self) -> usize {
        Self::SIZE + self.len as usize
    }

    /// Serialize the header in the kernel's native-endian layout.
    #[must_use]
    pub fn header_to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.wd.to_ne_bytes());
        buf[4..8].copy_from_slice(&self.mask.to_ne_bytes());
        buf[8..12].copy_from_slice(&self.cookie.to_ne_bytes());
        buf[12..16].copy_from_slice(&self.len.to_ne_bytes());
        buf
    }

    /// Serialize a full record carrying `name`.
    ///
    /// The name is NUL-terminated and padded to the next 4-byte boundary,
    /// matching what the kernel writes; `len` in the emitted header is the
    /// padded length.
    #[must_use]
    pub fn to_bytes_with_name(&self, name: &[u8]) -> Vec<u8> {
        let padded_len = (name.len() + 1 + 3) & !3;

        let header = Self {
            wd: self.wd,
            mask: self.mask,
            cookie: self.cookie,
            len: padded_len as u32,
        };

        let mut buf = Vec::with_capacity(Self::SIZE + padded_len);
        buf.extend_from_slice(&header.header_to_bytes());
        buf.extend_from_slice(name);
        buf.resize(Self::SIZE + padded_len, 0);
        buf
    }

    /// Parse a header from the front of `buf`.
    ///
    /// Returns `None` if fewer than [`Self::SIZE`] bytes are available.
    #[must_use]
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }

        Some(Self {
            wd: i32::from_ne_bytes(buf[0..4].try_into().ok()?),
            mask: u32::from_ne_bytes(buf[4..8].try_into().ok()?),
            cookie: u32::from_ne_bytes(buf[8..12].try_into().ok()?),
            len: u32::from_ne_bytes(buf[12..16].try_into().ok()?),
        })
    }
}

/// Total encoded size of a record whose name is `name_len` bytes long,
/// NUL terminator and alignment padding included.
#[must_use]
pub const fn event_size_with_name(name_len: usize) -> usize {
    EventHeader::SIZE + ((name_len + 1 + 3) & !3)
}
