//! Some routines for adding common CLI options in a consistent, less boilerplatey way.

/// Validators for `clap` arguments.
pub mod validator {
    use std::str::FromStr;

    /// Accepts any value that parses as a `T`.
    pub fn is<T: FromStr>(s: String) -> Result<(), String> {
        s.parse::<T>()
            .map(|_| ())
            .map_err(|_| format!("{:?} is not a valid {}", s, std::any::type_name::<T>()))
    }
}

/// CLI options for locating parameter and result directories.
pub mod params {
    use std::path::PathBuf;

    use clap::{App, Arg, ArgMatches};

    pub const DEFAULT_PARAMS_DIR: &str = "./params";
    pub const DEFAULT_OUTPUT_DIR: &str = "./results";

    pub fn add_cli_options<'a, 'b>(app: App<'a, 'b>) -> App<'a, 'b> {
        app.arg(
            Arg::with_name("PARAMS_DIR")
                .long("params")
                .takes_value(true)
                .help("The directory containing common.json and fig_<NAME>.json (default ./params)"),
        )
        .arg(
            Arg::with_name("OUTPUT_DIR")
                .long("output")
                .takes_value(true)
                .help("The directory to write results and time.log to (default ./results)"),
        )
    }

    /// Returns `(params directory, output directory)`.
    pub fn parse_cli_options(sub_m: &ArgMatches<'_>) -> (PathBuf, PathBuf) {
        (
            PathBuf::from(sub_m.value_of("PARAMS_DIR").unwrap_or(DEFAULT_PARAMS_DIR)),
            PathBuf::from(sub_m.value_of("OUTPUT_DIR").unwrap_or(DEFAULT_OUTPUT_DIR)),
        )
    }
}

/// CLI options that override the retry policy of the parameter files.
pub mod retry {
    use clap::{App, Arg, ArgMatches};

    use crate::measure::RetryPolicy;

    use super::validator;

    pub fn add_cli_options<'a, 'b>(app: App<'a, 'b>) -> App<'a, 'b> {
        app.arg(
            Arg::with_name("RETRY_FOREVER")
                .long("retry_forever")
                .conflicts_with("MAX_ATTEMPTS")
                .help("Never give up on a point, no matter how often it fails"),
        )
        .arg(
            Arg::with_name("MAX_ATTEMPTS")
                .long("max_attempts")
                .takes_value(true)
                .validator(validator::is::<u32>)
                .help("Give up on a point after this many failed attempts"),
        )
    }

    pub fn parse_cli_options(sub_m: &ArgMatches<'_>, policy: RetryPolicy) -> RetryPolicy {
        if sub_m.is_present("RETRY_FOREVER") {
            policy.forever()
        } else if let Some(max) = sub_m.value_of("MAX_ATTEMPTS") {
            RetryPolicy {
                max_attempts: Some(max.parse::<u32>().unwrap()),
                ..policy
            }
        } else {
            policy
        }
    }

}
