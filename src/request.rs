//! The request record and the outcomes a cache engine can return for one.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The sentinel used on the wire (and internally) for "no group assigned".
pub const UNGROUPED: i64 = -1;

/// An opaque cache key. Traces may key objects by a numeric id or by a
/// string (e.g. a URL path); both are accepted without the engine caring
/// which.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObjectId {
    Int(i64),
    Str(String),
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectId::Int(i) => write!(f, "{i}"),
            ObjectId::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for ObjectId {
    fn from(v: i64) -> Self {
        ObjectId::Int(v)
    }
}

impl From<&str> for ObjectId {
    fn from(v: &str) -> Self {
        ObjectId::Str(v.to_string())
    }
}

/// One request in the replayed trace.
///
/// `maxage` and `group_id` are coerced at the ingestion boundary
/// ([`crate::trace_source`]) before a `Request` is ever constructed: missing
/// `maxage` becomes the configured default, missing `group_id` becomes
/// [`UNGROUPED`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub timestamp: f64,
    pub object_id: ObjectId,
    pub size: u64,
    pub maxage: u64,
    pub group_id: i64,
    pub trace_position: u64,
}

/// The result of replaying one [`Request`] against a cache engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The object was present and unexpired; served from cache.
    Hit,
    /// The object was absent (or expired) and the admission gate accepted it.
    Miss,
    /// The object was absent and the admission gate refused it; cache state
    /// is unchanged.
    Pass,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Hit => "HIT",
            Outcome::Miss => "MISS",
            Outcome::Pass => "PASS",
        };
        f.write_str(s)
    }
}

/// An entry resident in a simulator's storage.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub request: Request,
    pub admitted_at: f64,
}

impl StoredEntry {
    pub fn is_expired(&self, now: f64) -> bool {
        now - self.admitted_at > self.request.maxage as f64
    }
}
