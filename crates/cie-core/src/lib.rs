//! Cascade Inference Engine — shared contract types.
//!
//! Leaf crate: the `Result`/`Level`/error/fingerprint/metric vocabulary
//! used by `cie-cache`, `cie-llm`, and `cie-engine`. Contains no I/O.

pub mod error;
pub mod fingerprint;
pub mod level;
pub mod metrics;
pub mod result;

pub use error::{Error, Result};
pub use fingerprint::Fingerprint;
pub use level::{FailureKind, Level, LevelId, LevelOutcome};
pub use result::{CascadeResult, LevelKind, Metadata};
