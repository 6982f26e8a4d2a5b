//! Integration test crate for the hybrid node attestor.
//!
//! This crate exists solely to run integration tests that span the hybrid
//! crates. It has no public API - all functionality is in the test modules.

#![forbid(unsafe_code)]
