//! Integration tests for the Lodestar control plane live in `tests/`.
//!
//! This crate intentionally exports nothing.

#![deny(unsafe_code)]
