//! Exasol data types.

mod mapping;

pub use mapping::{ExasolType, TypeMapper};
