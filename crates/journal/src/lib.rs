//! Blackbox journal - crash-resilient journaled document store
//!
//! This crate provides:
//! - MappedStream: fixed-capacity append-only sink over a mapped file
//! - Journal: ordered command list with a typed header
//! - Snapshot I/O for the document root
//! - JournaledDocument: the mutation/snapshot/close state machine
//! - The recovery loader for every crash state

pub mod document;
pub mod journal;
pub mod recovery;
pub mod snapshot;
pub mod stream;

// Re-exports
pub use document::{DocumentOptions, JournaledDocument, DEFAULT_CAPACITY};
pub use journal::Journal;
pub use recovery::load_document;
pub use stream::MappedStream;

pub use blackbox_core::{Command, Directive, Result, StoreError, Value, MAX_SAFE_INTEGER, SENTINEL};
