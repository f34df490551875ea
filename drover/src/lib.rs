//! Directive-driven build automation for TeX documents and friends.
//!
//! Source files declare what should happen to them in special comments
//! (`% arara: pdflatex`). The runner extracts those directives, resolves each
//! against a YAML rule, evaluates its arguments and conditionals, and runs
//! the resulting commands. The layout keeps a strict separation:
//!
//! - **[`core`]**: Pure logic (directive parsing, parameter resolution, the
//!   per-directive state machine, dependency ordering). No I/O.
//! - **[`io`]**: Side effects (configuration, rule files, the change
//!   database, project lists, process execution).
//!
//! [`interpreter`] and [`schedule`] tie the two together; [`report`] turns
//! the results into output and an exit code.

pub mod builder;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod expr;
pub mod interpreter;
pub mod io;
pub mod logging;
pub mod report;
pub mod schedule;
pub mod sources;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
