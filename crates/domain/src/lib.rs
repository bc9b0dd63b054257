//! Domain-level building blocks shared by the guardian engine and its
//! connection-context providers: exact fixed-point arithmetic, argument
//! schemas, chain-state value types, configuration and telemetry.

pub mod config;
pub mod fixed_point;
pub mod model;
pub mod schema;
pub mod services;
pub mod source;

pub use fixed_point::{FixedPoint, FixedPointError};
pub use schema::{ArgumentSchema, FieldKind, FieldSpec, ValidationError};
pub use source::{SourceError, SourceResult};
