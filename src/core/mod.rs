// src/core/mod.rs

/// The facade that turns a submitted URL into a scored response.
pub mod analyzer;

/// TTL cache abstraction and the cache-through wrapper used by probes.
pub mod cache;

pub mod error;

/// Static reputation tables: trusted and risky TLDs, shorteners, keywords,
/// brands, RDAP servers and blacklisted certificates.
pub mod knowledge_base;

/// Request input, probe fragments, the merged output and the response envelope.
pub mod models;

pub mod rank;

/// Concurrent probe execution under a shared deadline.
pub mod runner;

/// The individual probes.
pub mod scanner;

/// The rule table that folds the merged output into scores and a verdict.
pub mod scoring;

/// URL validation and domain extraction.
pub mod target;
