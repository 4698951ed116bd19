//! Custom macros for reducing code repetition in primeplane

/// Log an error and continue execution (non-fatal error handling)
///
/// # Example
/// ```ignore
/// log_and_continue!(frame.release(device), "release evicted frame");
/// ```
#[macro_export]
macro_rules! log_and_continue {
    ($expr:expr, $context:expr) => {
        if let Err(e) = $expr {
            log::error!("Failed to {}: {}", $context, e);
        }
    };
}

/// Log a message only the first time the guard flag is seen unset
///
/// # Example
/// ```ignore
/// log_once!(self.hdr_skip_logged, debug, "HDR signalling needs an atomic request");
/// ```
#[macro_export]
macro_rules! log_once {
    ($flag:expr, $level:ident, $($arg:tt)+) => {
        if !$flag {
            $flag = true;
            log::$level!($($arg)+);
        }
    };
}

/// Validate an enum-like string value
///
/// # Example
/// ```ignore
/// validate_enum!(commit, "atomic", "legacy");
/// validate_enum!(backend, "drm", "wayland");
/// ```
#[macro_export]
macro_rules! validate_enum {
    ($value:expr, $($variant:expr),+) => {
        match $value {
            $($variant)|+ => Ok(()),
            _ => anyhow::bail!("Invalid value: {} (expected one of: {})", $value, [$($variant),+].join(", ")),
        }
    };
}
