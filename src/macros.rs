//! Small helper macros used throughout the crate.

/// Join path components with `/`. Each component can be anything that implements `Display`.
///
/// ```rust,ignore
/// let lat_dir = dir!(home_dir, "CHIME", "us_lat");
/// ```
#[macro_export]
macro_rules! dir {
    ($first:expr $(, $part:expr)* $(,)?) => {{
        let mut path = format!("{}", $first);
        $(
            path.push('/');
            path.push_str(&format!("{}", $part));
        )*
        path
    }};
}

/// Time the given expression, pushing `(label, duration)` onto `timers` and evaluating to the
/// value of the expression.
///
/// ```rust,ignore
/// let mut timers = vec![];
/// let record = time!(timers, "Campaign", campaign.run()?);
/// ```
#[macro_export]
macro_rules! time {
    ($timers:ident, $label:expr, $e:expr) => {{
        let start = std::time::Instant::now();
        let result = $e;
        let duration = std::time::Instant::now() - start;
        $timers.push(($label, duration));
        result
    }};
}
