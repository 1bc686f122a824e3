//! Feature-gated logging macros.
//!
//! The crate never requires a logger. Enable exactly one of the `log`, `defmt`
//! or `esp32-log` features to route these macros to a backend; without any of
//! them the arguments are evaluated by reference and discarded.

#![allow(unused_macros)]

macro_rules! __log_dispatch {
    ($level:ident, $s:literal $(, $x:expr)* $(,)?) => {{
        #[cfg(feature = "defmt")]
        ::defmt::$level!($s $(, $x)*);
        #[cfg(all(feature = "log", not(feature = "defmt")))]
        ::log::$level!($s $(, $x)*);
        #[cfg(all(feature = "esp32-log", not(any(feature = "log", feature = "defmt"))))]
        ::esp_println::println!(concat!("[", stringify!($level), "] ", $s) $(, $x)*);
        #[cfg(not(any(feature = "log", feature = "defmt", feature = "esp32-log")))]
        let _ = ($( &$x, )*);
    }};
}

macro_rules! trace {
    ($($arg:tt)*) => { __log_dispatch!(trace, $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { __log_dispatch!(debug, $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { __log_dispatch!(info, $($arg)*) };
}

macro_rules! warn {
    ($($arg:tt)*) => { __log_dispatch!(warn, $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { __log_dispatch!(error, $($arg)*) };
}
