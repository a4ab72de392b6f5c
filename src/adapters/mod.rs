//! Store Bindings
//!
//! Concrete implementations of the store binding port. Only SQLite ships
//! here; other engines implement the same traits out of tree.

pub mod sqlite;
