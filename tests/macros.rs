//! Common test macros.

/// Check that a floating-point value is within an acceptable tolerance.
///
/// # Usage
/// ```
/// assert_approx_eq!(actual, expected);
/// assert_approx_eq!(actual, expected, epsilon);
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($actual:expr, $expected:expr) => {
        assert_approx_eq!($actual, $expected, 1e-10)
    };
    ($actual:expr, $expected:expr, $epsilon:expr) => {
        let actual: f64 = $actual;
        let expected: f64 = $expected;
        let diff = (actual - expected).abs();
        assert!(
            diff <= $epsilon,
            "assertion failed: `(left ≈ right)`\n  left: `{actual:?}`,\n right: `{expected:?}`,\n  diff: `{diff:?}`"
        );
    };
}

/// Check that a `Result` failed with an error of the given [`ErrorKind`].
///
/// # Usage
/// ```
/// assert_error_kind!(interpreter.execute(), ErrorKind::Configuration);
/// ```
#[macro_export]
macro_rules! assert_error_kind {
    ($result:expr, $kind:expr) => {
        match $result {
            Ok(_) => panic!("expected an error of kind {:?}, got a result", $kind),
            Err(e) => assert_eq!(e.kind(), $kind, "unexpected error: {e}"),
        }
    };
}

/// Settings with the given fields changed.
///
/// # Usage
/// ```
/// let settings = settings! { max_threads: 2, extremes: true };
/// ```
#[macro_export]
macro_rules! settings {
    ($($field:ident : $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut s = blockflow::Settings::default();
        $(s.$field = $value;)*
        s
    }};
}
