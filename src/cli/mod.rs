//! CLI module for runctl - command-line interface and exit codes.

pub mod commands;

pub use commands::Cli;

use runctl::RunctlError;

/// Process exit code for a failed operation, keyed by the error's stable code.
pub fn exit_code(err: &RunctlError) -> i32 {
    match err.code() {
        "invalid" | "config" => 2,
        "not_found" => 3,
        "ambiguous" => 4,
        "locked" => 5,
        "broken_entity" => 6,
        "name_conflict" | "already_exists" => 7,
        "collaborator" => 8,
        "exec" => 9,
        _ => 10,
    }
}

/// Exit code when an operation ran but its verdict was negative.
pub const EXIT_NEGATIVE: i32 = 1;
