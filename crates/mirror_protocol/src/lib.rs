//! # Mirror Protocol
//!
//! Data types shared by every part of the device state mirror.
//!
//! This crate provides:
//! - `Value` / `Map`, the tagged state tree
//! - `Event`, `EventKind` and `EventBatch` for snapshot and delta events
//! - Wire decoding of raw events (`RawEvent`, `EventsResponse`)
//! - `merge`, which folds a delta payload into a cached tree
//!
//! This is a pure data crate with no I/O operations.
//!
//! ## Merge rules
//!
//! Keys are processed one at a time over the patch:
//! 1. Keys starting with `@` carry transport metadata and are ignored
//! 2. `name[index]` addresses an element of the sequence stored under `name`
//! 3. A mapping merged onto a mapping recurses
//! 4. Anything else overwrites the target key

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod event;
mod merge;
mod value;

pub use error::{ProtocolError, ProtocolResult};
pub use event::{
    Cursor, DeviceId, Event, EventBatch, EventKind, EventsResponse, FetchMode, RawEvent,
};
pub use merge::{merge, parse_indexed_key, MAX_SEQUENCE_INDEX, METADATA_SIGIL};
pub use value::{Map, Value};
