//! Stash Types - Pure type definitions
//!
//! This crate contains only plain data types shared by the store and its
//! front ends. It has no async runtime dependencies.

pub mod event;
pub mod record;

pub use event::*;
pub use record::*;
