//! Blackbox core - document model and mutation language for the blackbox
//! crash-state store
//!
//! This crate provides the pure (no-I/O) half of the store:
//! - The recursive document value type on concurrent containers
//! - The dotted-path language and its directive machinery
//! - Commands: the only legal mutation, plus their journal frame encoding
//! - The shared error taxonomy

pub mod command;
pub mod error;
pub mod path;
pub mod value;

// Re-export main types for convenience
pub use command::{Command, SENTINEL};
pub use error::{Result, StoreError};
pub use path::{Directive, Directives};
pub use value::{Value, MAX_SAFE_INTEGER};
