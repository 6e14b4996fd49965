/// Panics in debug builds; logs via `tracing::error!` in release builds.
#[macro_export]
macro_rules! safe_panic {
    ($($arg:tt)*) => {
        if cfg!(debug_assertions) {
            panic!($($arg)*);
        } else {
            tracing::error!($($arg)*);
        }
    };
}

/// Like `debug_assert!` in debug builds. In release builds a failed
/// condition is logged via `tracing::error!` instead of aborting.
#[macro_export]
macro_rules! safe_assert {
    ($cond:expr $(,)?) => {
        if !$cond {
            $crate::safe_panic!("ASSERT FAILED: {}", stringify!($cond));
        }
    };

    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::safe_panic!("ASSERT FAILED: {}", format!($($arg)+));
        }
    };
}
