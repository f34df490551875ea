//! Stable exit codes for the drover CLI.

/// Every directive succeeded (or was skipped).
pub const SUCCESS: i32 = 0;
/// An external command returned an unsuccessful exit status.
pub const EXTERNAL_CALL_FAILED: i32 = 1;
/// A parse, resolution, evaluation, or configuration error stopped work.
pub const CAUGHT_EXCEPTION: i32 = 2;
/// Sentinel exit value recorded when a process could not be run or waited on.
///
/// Distinct from any real process exit code.
pub const ERROR_EXIT_STATUS: i32 = -99;
