//! Columnar encoding of aircraft batches.
//!
//! A batch becomes a single Parquet file (LZ4) with a fixed aviation
//! schema. Files are written to tmpfs when available and deleted as soon as
//! the bytes are resident; the pipeline only ever holds the in-memory
//! buffer.

mod sanitize;
mod schema;
mod writer;

pub use sanitize::{safe_boolean, safe_i32, safe_i64, safe_number, safe_string};
pub use schema::{aviation_schema, SCHEMA_TYPE, SCHEMA_VERSION};
pub use writer::{encode_batch, EncodedBatch};
