//! # cachesim
//!
//! A trace-driven HTTP object cache simulator. Replays an ordered stream of
//! request records against one or more admission/replacement policies and
//! reports, per policy and per cache size, how often the cache would have
//! served (HIT), admitted (MISS), or refused (PASS) each request.
//!
//! ## What this crate is
//!
//! - A policy-agnostic cache engine ([`engine::CacheEngine`]) implementing
//!   the common TTL/admission/eviction lifecycle.
//! - Seven policy families ([`policies`]): FIFO, LRU, LFU, LSO, SSO, RAN,
//!   and the offline-optimal Bélády baseline, each with a size-protected
//!   variant.
//! - A parallel replay driver ([`driver`]) that fans a single ordered
//!   trace out across many (policy, capacity) instances.
//! - An analyzer ([`analyzer`]) producing cache-hit-ratio time series as
//!   CSV.
//!
//! It is not a cache server, a network proxy, or a storage engine: object
//! payloads are never read or written, only accounted for by size.
//!
//! ## Example
//!
//! ```rust,no_run
//! use cachesim::config::RunConfigBuilder;
//! use cachesim::trace_source::InMemoryTraceSource;
//!
//! # async fn run() -> cachesim::Result<()> {
//! let config = RunConfigBuilder::new()
//!     .policy("lru", 1000, false)
//!     .policy("belady", 1000, false)
//!     .output_dir("results")
//!     .build()?;
//!
//! let source = Box::new(InMemoryTraceSource::new(vec![], config.chunk_size));
//! let _ = config.instances()?;
//! let _ = source;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]

pub mod analyzer;
pub mod config;
pub mod driver;
pub mod engine;
pub mod logging;
pub mod oracle;
pub mod policies;
pub mod request;
pub mod trace_source;

mod error;
pub use error::{Result, SimError};

pub use engine::CacheEngine;
pub use request::{ObjectId, Outcome, Request, UNGROUPED};

/// Default maximum-age applied to a request whose trace record omits
/// `maxage`.
pub const DEFAULT_MAXAGE_SECS: u64 = 300;
/// Default number of records batched into one replay [`trace_source::Chunk`].
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Fraction of capacity above which a "protected" policy refuses admission.
pub const PROTECTED_ADMISSION_FRACTION: f64 = 0.1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_sane() {
        assert!(DEFAULT_MAXAGE_SECS > 0);
        assert!(DEFAULT_CHUNK_SIZE > 0);
        assert!(PROTECTED_ADMISSION_FRACTION > 0.0 && PROTECTED_ADMISSION_FRACTION < 1.0);
    }
}
