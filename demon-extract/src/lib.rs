//! Game-data extraction pipeline
//!
//! Decoded records → typed objects (via the type registry) → relational
//! store, plus the template location index and run reporting.

pub mod error;
pub mod location;
pub mod materializer;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod schema_loader;
pub mod source;
pub mod stats;
pub mod store;
pub mod value;

pub use error::{ExtractError, Result};
pub use materializer::{Materialization, MaterializeStatus, Materialized, MaterializedObject, Materializer};
pub use registry::{FieldDecl, FieldType, SchemaDefinition, TypeRegistry};
pub use value::{TaggedRecord, TypeRef, TypeTag, Value};
