//! Typed, in-process builders with build-time validation (§9a).
//!
//! File/environment-driven configuration loading is out of scope (§1); these
//! builders are the replacement surface the specification calls for instead
//! — "a clean implementation should present a small set of builders (one per
//! sink kind) whose options are the enumerated set in §6; unrecognised
//! options are rejected at build time" (§9).

pub mod builders;

pub use builders::*;
