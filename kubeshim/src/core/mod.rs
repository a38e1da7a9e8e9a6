//! Deterministic, pure logic shared by the invoker, selectors and the apply loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod classifier;
pub mod kind;
pub mod matcher;
pub mod model;
pub mod path;
pub mod types;
