//! Stable exit codes for the `vulnenv` and `eval` binaries.

/// Command succeeded.
pub const OK: i32 = 0;
/// Command failed due to invalid input, config or other errors.
pub const INVALID: i32 = 1;
