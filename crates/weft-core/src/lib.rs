//! # weft-core
//!
//! Core abstractions for the weft job-orchestration layer.
//!
//! This crate provides the foundational types and traits used across all weft
//! components:
//!
//! - **Identifiers**: Strongly-typed ids for projects, job specs, jobs, and
//!   queue leases
//! - **Storage Trait**: Abstract blob-storage interface for externalized
//!   values and scratch artifacts
//! - **Path Helpers**: Typed layout of persisted artifacts
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Logging initialization helpers
//!
//! ## Crate Boundary
//!
//! `weft-core` is the only crate allowed to define shared primitives. All
//! cross-component interaction happens via the contracts defined here.
//!
//! ## Example
//!
//! ```rust
//! use weft_core::prelude::*;
//!
//! let project = ProjectId::new("acme-media").unwrap();
//! let job = JobId::new("summarize-q3").unwrap();
//! let child = job.child("fetch").unwrap();
//! assert_eq!(child.as_str(), "summarize-q3/fetch");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod observability;
pub mod paths;
pub mod storage;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use weft_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::{JobId, LeaseToken, ProjectId, SpecName};
    pub use crate::paths::JobPaths;
    pub use crate::storage::{MemoryBackend, StorageBackend};
}

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use id::{JobId, LeaseToken, ProjectId, SpecName};
pub use observability::{LogFormat, init_logging};
pub use paths::JobPaths;
pub use storage::{MemoryBackend, StorageBackend};
