//! CLI Exit Code Registry
//!
//! Single source of truth for `tractmap` exit codes. Scripts rely on them.
//!
//! | Code | Meaning                                                   |
//! |------|-----------------------------------------------------------|
//! | 0    | Success                                                   |
//! | 1    | General error (unspecified)                               |
//! | 2    | Usage error (bad args; raised by clap)                    |
//! | 3    | Invalid config (parse, validation, unknown field)         |
//! | 4    | Input file unreadable or unparseable, output not writable |
//! | 5    | Conservation delta differs from the expected delta        |
//! | 6    | Input data rejected (projection, geometry, keys, values)  |

use tractmap_realloc::ReallocError;

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
#[allow(dead_code)]
pub const EXIT_USAGE: u8 = 2;

/// Config file failed to parse or validate.
pub const EXIT_INVALID_CONFIG: u8 = 3;

/// Cannot read an input, cannot parse it, or cannot write an output.
pub const EXIT_IO: u8 = 4;

/// Observed conservation delta is not the expected one.
pub const EXIT_CONSERVATION: u8 = 5;

/// Input data rejected before any reallocation happened.
pub const EXIT_DATA_REJECTED: u8 = 6;

/// Map an engine error to its exit code.
pub fn realloc_exit_code(err: &ReallocError) -> u8 {
    match err {
        e if e.is_data_error() => EXIT_DATA_REJECTED,
        ReallocError::ConservationMismatch { .. } => EXIT_CONSERVATION,
        ReallocError::Parse { .. } | ReallocError::MissingColumn { .. } | ReallocError::Export(_) => {
            EXIT_IO
        }
        ReallocError::ConfigParse(_)
        | ReallocError::ConfigValidation(_)
        | ReallocError::IntensiveAttribute(_)
        | ReallocError::UnknownField { .. }
        | ReallocError::DuplicateColumn(_) => EXIT_INVALID_CONFIG,
        _ => EXIT_ERROR,
    }
}
