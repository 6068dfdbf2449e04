//! Panic containment for engine callbacks.
//!
//! Engine trampolines are `extern "C"` and must never unwind into the
//! engine. Every trampoline body runs inside [`callback_boundary`], which
//! catches panics, logs them and hands the engine a neutral return value.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Runs an engine callback body, returning `default` if it panics.
///
/// `AssertUnwindSafe` holds because surface state sits behind
/// `parking_lot` locks, which do not poison and are released on unwind.
pub(crate) fn callback_boundary<T, F>(callback: &'static str, default: T, f: F) -> T
where
    F: FnOnce() -> T,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(panic) => {
            let msg = panic_message(&*panic);
            tracing::error!("Engine callback `{callback}` panicked: {msg}");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;

    #[test]
    fn passes_through_the_value() {
        assert_eq!(callback_boundary("format", 0u32, || 3), 3);
    }

    #[test]
    #[traced_test]
    fn panic_yields_default() {
        let planes = callback_boundary("format", 0u32, || panic!("boom"));
        assert_eq!(planes, 0);
        assert!(logs_contain("Engine callback `format` panicked: boom"));
    }
}
