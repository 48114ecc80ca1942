/// Report a broken code cache invariant and abort.
///
/// Continuing after an accounting mismatch risks executing corrupted machine code, so the
/// message is logged at error level before panicking. Builds that set `panic = "abort"`
/// terminate the process here.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)+) => {{
        let msg = format!($($arg)+);
        error!("{}", msg);
        panic!("code cache invariant violated: {}", msg)
    }};
}

/// Check an invariant that must hold in all builds. Failure is [`fatal!`].
#[macro_export]
macro_rules! guarantee {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            fatal!($($arg)+);
        }
    };
}
