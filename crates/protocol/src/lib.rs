//! TreeNotify Protocol - the kernel inotify wire format.
//!
//! This crate provides:
//! - [`EventMask`] bitflags for inotify watch and event masks
//! - [`EventKind`] canonical event-kind labels and total mask expansion
//! - [`EventHeader`] matching the kernel's binary event layout
//! - [`EventDecoder`] for reassembling records from arbitrary byte chunks
//!
//! # Wire Format
//!
//! Each record is a fixed 16-byte native-endian header — watch descriptor
//! (i32), mask (u32), cookie (u32), name length (u32) — followed by exactly
//! `name length` bytes of filename, NUL-padded to the kernel's alignment.
//! Padding is stripped on decode and carries no meaning.
//!
//! # Example
//!
//! ```rust
//! use treenotify_protocol::{EventDecoder, EventHeader, EventKind, EventMask};
//!
//! let mask = EventMask::CREATE | EventMask::ISDIR;
//! let bytes = EventHeader::new(1, mask.bits(), 0).to_bytes_with_name(b"logs");
//!
//! let mut decoder = EventDecoder::new();
//! decoder.extend(&bytes);
//!
//! let record = decoder.next_record().unwrap();
//! assert_eq!(record.header.kinds(), vec![EventKind::Create, EventKind::IsDir]);
//! assert_eq!(record.name, "logs");
//! ```

mod decoder;
mod event;

// Re-export main types at crate root
pub use decoder::{EventDecoder, RawRecord};
pub use event::{event_size_with_name, expand_mask, EventHeader, EventKind, EventMask};
