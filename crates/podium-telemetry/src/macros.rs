// re-export so that they need not be imported by downstream users.
// hidden because they shouldn't be imported.
#[doc(hidden)]
pub use const_format::{
    concatcp as __concatcp,
    map_ascii_case as __map_ascii_case,
    Case as __Case,
};

/// Declare a `const` string slice, using the declaring crate's name as a
/// prefix and the variable name as a suffix.
///
/// This macro essentially performs this declaration:
/// ```text
/// METRIC_NAME := ${CARGO_CRATE_NAME}_metric_name;
/// ```
///
/// # Examples
/// ```
/// use podium_telemetry::metric_name;
/// metric_name!(pub const EXAMPLE_COUNTER);
/// assert_eq!(EXAMPLE_COUNTER, "podium_telemetry_example_counter");
/// ```
#[macro_export]
macro_rules! metric_name {
    ($vis:vis const $($tt:tt)*) => {
        $crate::__metric_name_internal!(
            $vis [$($tt)*] [::core::stringify!($($tt)*)]
        );
    }
}

/// Declares several metric names at once, see [`metric_name!`].
///
/// # Examples
/// ```
/// use podium_telemetry::metric_names;
/// metric_names!(pub const FIRST, SECOND);
/// assert_eq!(FIRST, "podium_telemetry_first");
/// assert_eq!(SECOND, "podium_telemetry_second");
/// ```
#[macro_export]
macro_rules! metric_names {
    ($vis:vis const $($name:ident),+ $(,)?) => {
        $(
            $crate::metric_name!($vis const $name);
        )+
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __metric_name_internal {
    ($vis:vis [$name:ident][$suffix:expr]) => {
        $vis const $name: &str = $crate::macros::__concatcp!(
            ::core::env!("CARGO_CRATE_NAME"),
            "_",
            $crate::macros::__map_ascii_case!($crate::macros::__Case::Lower, $suffix),
        );
    };
}
