//! Deterministic, pure logic shared by the environment.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod action;
pub mod analyzer;
pub mod patterns;
pub mod source;
pub mod types;
