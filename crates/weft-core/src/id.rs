//! Strongly-typed identifiers for weft entities.
//!
//! All identifiers in weft are:
//! - **Strongly typed**: Prevents mixing up different id kinds at compile time
//! - **Validated on construction**: Path- and queue-safe character sets
//! - **Deterministic where it matters**: Child job ids derive from the parent
//!   id so re-spawns on retry address the same child
//!
//! # Example
//!
//! ```rust
//! use weft_core::id::{JobId, ProjectId, SpecName};
//!
//! let project = ProjectId::new("acme-media").unwrap();
//! let spec = SpecName::new("resize").unwrap();
//! let job = JobId::new("j1").unwrap();
//!
//! // Child ids live in the parent's namespace.
//! let child = job.child("thumbnail").unwrap();
//! assert_eq!(child.as_str(), "j1/thumbnail");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::{Error, Result};

/// A unique identifier for a project.
///
/// Projects are the top-level isolation unit: job logs, dependency edges,
/// stream channels, and externalized blobs are all namespaced by project.
///
/// Project ids must be:
/// - Non-empty
/// - Lowercase alphanumeric with hyphens
/// - Between 3 and 63 characters (compatible with bucket naming)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    /// Creates a new project id after validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the project id is invalid.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Creates a project id without validation.
    ///
    /// The caller must ensure the id is valid. Intended for ids that have
    /// already been validated (e.g., read back from storage).
    #[must_use]
    pub fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the project id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> Result<()> {
        if id.len() < 3 {
            return Err(Error::InvalidId {
                message: format!("project id '{id}' is too short (minimum 3 characters)"),
            });
        }
        if id.len() > 63 {
            return Err(Error::InvalidId {
                message: format!("project id '{id}' is too long (maximum 63 characters)"),
            });
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(Error::InvalidId {
                message: format!(
                    "project id '{id}' contains invalid characters (lowercase alphanumeric and hyphens only)"
                ),
            });
        }
        if id.starts_with('-') || id.ends_with('-') {
            return Err(Error::InvalidId {
                message: format!("project id '{id}' cannot start or end with a hyphen"),
            });
        }
        Ok(())
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// The name of a job specification, unique within a project's pipelines.
///
/// Spec names key queue routing, job-log entries, and stream channels, so
/// they share the segment character set of [`JobId`]: alphanumeric plus
/// `-`, `_`, and `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpecName(String);

impl SpecName {
    /// Creates a new spec name after validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, longer than 128 characters, or
    /// contains characters outside alphanumerics plus `-`, `_`, and `.`.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidId {
                message: "spec name cannot be empty".to_string(),
            });
        }
        if name.len() > 128 {
            return Err(Error::InvalidId {
                message: format!("spec name '{name}' is too long (maximum 128 characters)"),
            });
        }
        if !is_valid_segment(&name) {
            return Err(Error::InvalidId {
                message: format!(
                    "spec name '{name}' contains invalid characters (alphanumeric, '-', '_', '.' only)"
                ),
            });
        }
        Ok(Self(name))
    }

    /// Returns the spec name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpecName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SpecName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// A globally addressable job identifier within a project namespace.
///
/// Job ids are caller-chosen rather than generated: a producer that enqueues
/// the same id twice addresses the same logical job, which is what makes
/// idempotent resume work under at-least-once delivery.
///
/// Ids are `/`-separated sequences of non-empty segments. A child job spawned
/// by a parent derives its id as `{parent}/{suffix}`, so the derivation is
/// deterministic and re-spawning on retry is idempotent. Since `/` cannot
/// appear inside a segment, two distinct parents can never derive the same
/// child id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Creates a new job id after validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is empty, longer than 512 characters, has
    /// empty segments, or contains characters outside alphanumerics plus
    /// `-`, `_`, and `.`.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidId {
                message: "job id cannot be empty".to_string(),
            });
        }
        if id.len() > 512 {
            return Err(Error::InvalidId {
                message: format!("job id '{id}' is too long (maximum 512 characters)"),
            });
        }
        if !id.split('/').all(|seg| !seg.is_empty() && is_valid_segment(seg)) {
            return Err(Error::InvalidId {
                message: format!(
                    "job id '{id}' must be '/'-separated non-empty segments of alphanumerics, '-', '_', '.'"
                ),
            });
        }
        Ok(Self(id))
    }

    /// Derives the deterministic child id `{self}/{suffix}`.
    ///
    /// # Errors
    ///
    /// Returns an error if `suffix` is not a valid single segment or the
    /// derived id exceeds the length limit.
    pub fn child(&self, suffix: impl AsRef<str>) -> Result<Self> {
        let suffix = suffix.as_ref();
        if suffix.is_empty() || !is_valid_segment(suffix) {
            return Err(Error::InvalidId {
                message: format!(
                    "child suffix '{suffix}' must be a non-empty segment of alphanumerics, '-', '_', '.'"
                ),
            });
        }
        Self::new(format!("{}/{suffix}", self.0))
    }

    /// Returns the parent id for a derived child id, or `None` for root jobs.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0.rsplit_once('/').map(|(p, _)| Self(p.to_string()))
    }

    /// Returns the job id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Proof of exclusive ownership of a dequeued job, granted by the queue.
///
/// The holder may settle the job (`ack`, `nack`, `mark_completed`); a queue
/// that redelivers the job invalidates earlier leases, and operations with a
/// stale lease surface as lock contention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseToken(Ulid);

impl LeaseToken {
    /// Generates a new unique lease token.
    ///
    /// Uses ULID generation: lexicographically sortable by creation time and
    /// globally unique without coordination.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Creates a lease token from a raw ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }

    /// Returns the creation timestamp encoded in the token.
    #[must_use]
    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        let ms = self.0.timestamp_ms();
        chrono::DateTime::from_timestamp_millis(ms as i64).unwrap_or_else(chrono::Utc::now)
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LeaseToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s).map(Self).map_err(|e| Error::InvalidId {
            message: format!("invalid lease token '{s}': {e}"),
        })
    }
}

/// Returns true if `seg` contains only alphanumerics, `-`, `_`, or `.`.
fn is_valid_segment(seg: &str) -> bool {
    seg.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}
