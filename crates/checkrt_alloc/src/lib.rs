/*!
A budgeted allocator for tests that want to see a program run out of memory.

The budget has two flavours:
- **total**: every byte ever granted counts, freeing gives nothing back;
- **peak**: only bytes live at the same time count.

Refused requests return null with `errno` set to `ENOMEM`, exactly like
real exhaustion. Set the mode from code with [`set_total`] / [`set_peak`] /
[`set_no_limit`], or leave it to the environment:

| variable | meaning |
|---|---|
| `CHECKRT_ALLOC_LIMIT_TOTAL` (`CHECKRT_ALLOC_LIMIT`) | total budget |
| `CHECKRT_ALLOC_LIMIT_PEAK` (`CHECKRT_HEAP_LIMIT`) | peak budget |
| `CHECKRT_TRACE` | file path or `&<fd>` receiving one line per call |

Values are decimal byte counts with an optional `b`, `k`, `m` or `g` unit.
A total limit wins over a peak limit. A malformed value ends the process
with exit code 254.
*/
#![cfg_attr(not(test), warn(
    missing_debug_implementations,
    missing_docs,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
))]

pub mod backend;
pub mod budget;
pub mod config;
pub mod global;
#[cfg(feature = "hooks")]
#[allow(missing_docs)]
pub mod hooks;
pub mod ledger;
pub mod trace;

pub use backend::{LibcAlloc, RawAlloc};
pub use budget::{Budget, BudgetState, Mode};
pub use config::{LimitConfig, LimitParseError, parse_limit};
pub use global::{
    BudgetedAlloc, GLOBAL_BUDGET, calloc, free, malloc, mode, realloc, reallocf, remaining,
    set_no_limit, set_peak, set_total,
};
