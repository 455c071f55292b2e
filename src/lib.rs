#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Module Overview
//!
//! - [`byte_lru`]: bounded byte-size LRU cache (C1).
//! - [`lru_freq`]: Byte-LRU overlaid with a frequency index (C2).
//! - [`protocol`]: the framed `CONF`/`REQ `/`CHK `/... transport (C3).
//! - [`node`]: the satellite cache node state machine (C4).
//! - [`recommender`]: the ground-station prefetch recommender (C5).
//! - [`policy`]: the pluggable per-request handling policies (C6).
//! - [`topology`]: the fixed inter-satellite neighbor table.
//! - [`trace`]: per-satellite trace replay.
//! - [`error`]: the crate-wide `CoreError` type.
//!
//! ## Example
//!
//! ```
//! use orbitcache::byte_lru::ByteLru;
//!
//! let mut cache = ByteLru::new(100);
//! cache.admit("A", 40);
//! cache.admit("B", 40);
//! cache.admit("A", 10); // touch: A becomes most-recent, shrinks to 10 bytes
//! assert!(cache.contains("A"));
//! assert_eq!(cache.byte_size(), 50);
//! ```

pub mod byte_lru;
pub mod error;
pub mod lru_freq;
pub mod node;
pub mod policy;
pub mod protocol;
pub mod recommender;
pub mod topology;
pub mod trace;

pub use byte_lru::ByteLru;
pub use error::{CoreError, CoreResult};
pub use lru_freq::LruFreq;
