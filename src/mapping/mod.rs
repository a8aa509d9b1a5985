//! Source-to-destination column mapping.
//!
//! Renames record columns to their destination names and shapes the set so
//! that its columns are exactly the mapping's destination columns (plus the
//! geometry, which always survives).

mod columns;

pub use columns::{MappingReport, map_columns};
