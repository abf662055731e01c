//! Exercises the global budget exactly the way the environment configured it.
//!
//! `alloc_probe <size>`:
//! 1. `malloc(size)` must succeed, else exit 2;
//! 2. `malloc(1)` must fail, else exit 3;
//! 3. the first block is freed and `malloc(size)` tried again: exit 0 if
//!    it succeeds (peak budget), exit 1 if it fails (total budget).
//!
//! A malformed budget variable makes the first allocation exit with 254.
use std::process::ExitCode;

use checkrt_alloc::{free, malloc, parse_limit};

fn main() -> ExitCode {
    let Some(size) = std::env::args()
        .nth(1)
        .and_then(|arg| parse_limit(arg.as_bytes()).ok().flatten())
    else {
        eprintln!("usage: alloc_probe <size>");
        return ExitCode::from(64);
    };

    unsafe {
        let first = malloc(size);
        if first.is_null() {
            return ExitCode::from(2);
        }
        let extra = malloc(1);
        if !extra.is_null() {
            free(extra);
            free(first);
            return ExitCode::from(3);
        }
        free(first);

        let again = malloc(size);
        if again.is_null() {
            ExitCode::from(1)
        } else {
            free(again);
            ExitCode::SUCCESS
        }
    }
}
