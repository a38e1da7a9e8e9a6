//! Stable exit codes for kubeshim CLI commands.

use crate::error::Error;

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid arguments, configuration, launch or transport failure, or any other error.
pub const ERROR: i32 = 1;
/// A named resource does not exist.
pub const NOT_FOUND: i32 = 2;
/// A write conflicted, or modify-and-apply gave up after repeated conflicts.
pub const CONFLICT: i32 = 3;
/// A bulk verb failed for some resources and succeeded for the rest.
pub const PARTIAL: i32 = 4;

/// Exit code for a library error.
pub fn for_error(err: &Error) -> i32 {
    match err {
        Error::Bulk(_) => PARTIAL,
        Error::RetriesExhausted { .. } => CONFLICT,
        err if err.is_conflict() => CONFLICT,
        err if err.is_not_found() => NOT_FOUND,
        _ => ERROR,
    }
}
