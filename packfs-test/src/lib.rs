//! Test support for `packfs`: an in-memory ZIP writer for fixtures and a
//! virtual tree walker.
pub mod builder;
pub mod traverse;

pub use builder::{EntryOptions, Method, ZipBuilder};
