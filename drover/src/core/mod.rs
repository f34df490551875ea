//! Deterministic, pure logic shared by the interpreter.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod booleans;
pub mod directive;
pub mod graph;
pub mod looping;
pub mod path;
pub mod resolution;
pub mod session;
pub mod types;
