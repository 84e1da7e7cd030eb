//! This crate implements the core functionality of zenpak
//!
//! This mostly includes zen package parsing, export-graph loading, and
//! byte-exact repacking after name-table edits.

#![allow(clippy::uninlined_format_args)]

pub mod format;
pub mod object;
