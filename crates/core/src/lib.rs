//! `bqjob-core`: foundation types for remote query jobs.
//!
//! This crate contains **pure** building blocks (no remote calls, no threads):
//! the unified error type, identifiers, the result schema model and the
//! coercion of wire values into typed rows.

pub mod coerce;
pub mod error;
pub mod id;
pub mod schema;
pub mod value;

pub use coerce::{coerce, coerce_text, coerce_wire, materialize_row};
pub use error::{QueryError, QueryResult};
pub use id::{JobId, JobReference, TableReference};
pub use schema::{Field, FieldType, Schema};
pub use value::{RawRow, TypedRow, TypedValue};
