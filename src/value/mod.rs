//! Key/File value model
//!
//! The untyped core stores ordered [`Key`]s mapped to arrays of immutable [`File`]s.
//! Typed code goes through the handle layer, which converts at the boundary.

pub mod file;
pub mod key;

pub use file::File;
pub use key::{Key, KeyRange};
