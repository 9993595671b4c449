//! Domain models for covmerge.
//!
//! - `Environment`: unit vs instrumented test context
//! - `TraceArtifact`: a raw trace file from one of the environments
//! - error taxonomy shared by the core modules

pub mod artifact;
pub mod environment;
pub mod error;

pub use artifact::{list_staged, TraceArtifact, EXTERNAL_PRODUCER};
pub use environment::Environment;
pub use error::{CovError, Result, TraceError};
