//! mschema core library.
//!
//! Schema management for MongoDB collections: sampling-based schema
//! inference, schema-to-schema diffing, schema-to-live drift
//! detection, validator projection, migration planning, and a
//! resumable batched migration executor — all behind a narrow
//! database adapter that is the crate's only source of I/O.

pub mod adapter;
pub mod config;
pub mod diff;
pub mod drift;
pub mod errors;
pub mod executor;
pub mod history;
pub mod indexes;
pub mod infer;
pub mod monitor;
pub mod path;
pub mod plan;
pub mod schema;
pub mod schema_io;
pub mod types;
pub mod validator;

pub use adapter::{
    DatabaseAdapter, MemoryAdapter, MongoAdapter, MutationSet, UpdateOutcome, ValidationAction,
    ValidationLevel,
};
pub use diff::{diff_schemas, Change, ChangeSet};
pub use drift::{detect_collection_drift, detect_drift, DriftReport, Severity};
pub use errors::{AdapterError, Error, Result};
pub use executor::{execute_plan, ExecOptions, ExecutionReport, Progress, ProgressSink};
pub use history::{record_analysis, HistoryKeys};
pub use infer::{analyze_collection, infer_from_documents, Analysis, Anomaly};
pub use path::FieldPath;
pub use plan::{compile_plan, Plan, PlanOp};
pub use schema::{FieldEntry, SchemaDoc, SchemaNode};
pub use types::{BsonType, TypeSet};

// Re-export the driver's document types so callers don't need to pin
// a matching bson version themselves.
pub use bson;
pub use bson::{Bson, Document};
