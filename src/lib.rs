//! Survey export ingestion: KML/CSV extraction, semantic typing, column
//! mapping, validation against a live table, and transactional PostGIS load.

pub mod coerce;
pub mod config;
pub mod error;
pub mod extract;
pub mod load;
pub mod mapping;
pub mod pipeline;
pub mod record;
pub mod sinks;
pub mod validate;

pub use error::PipelineError;
pub use record::{RecordSet, Value};
