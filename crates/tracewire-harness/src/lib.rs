//! Tracewire Harness
//!
//! Host-side counterpart of `tracewire-core` for tests and local tooling:
//! builds request frames the way a host tool would, parses response frames,
//! and drives a core instance through an in-memory byte link with no real
//! transport underneath.

pub mod frames;
pub mod link;

pub use frames::*;
pub use link::*;
