//! This program runs benchmark campaigns on a cluster of index servers and reduces their logs.
//! Which routine is chosen by passing different command line arguments.

fn run() -> Result<(), failure::Error> {
    let matches = clap::App::new("runner")
        .about(
            "This program runs benchmark campaigns on a cluster of index servers and reduces \
             their logs. Which routine is chosen by passing different command line arguments.",
        )
        .subcommand(sweep_runner::campaign::cli_options())
        .subcommand(sweep_runner::inspect::cli_options())
        .setting(clap::AppSettings::SubcommandRequiredElseHelp)
        .setting(clap::AppSettings::DisableVersion)
        .get_matches();

    match matches.subcommand() {
        ("campaign", Some(sub_m)) => sweep_runner::campaign::run(sub_m),
        ("inspect", Some(sub_m)) => sweep_runner::inspect::run(sub_m),

        _ => {
            unreachable!();
        }
    }
}

fn main() {
    use console::style;

    env_logger::init();

    // Always get backtraces. Runs are dominated by the cluster, not by us.
    std::env::set_var("RUST_BACKTRACE", "1");

    // On failure, print what we know about the cause before bailing.
    if let Err(err) = run() {
        const MESSAGE: &str = r#"== ERROR ==================================================================================
The campaign was aborted. Every dispatched command is logged at debug level, so rerunning with
RUST_LOG=debug shows what the cluster was asked to do. Parameter errors are reported before anything
runs on the cluster; fix the parameter files and rerun.
"#;

        println!("{}", style(MESSAGE).red().bold());

        // Transport failures
        if err.downcast_ref::<spurs::SshError>().is_some() {
            println!("An error occurred while attempting to run a command over SSH");
        }

        if err.downcast_ref::<sweep_runner::config::ConfigError>().is_some() {
            println!("The parameter files are invalid");
        }

        println!(
            "{}\n{}",
            err.as_fail(),
            err.backtrace(),
        );

        std::process::exit(101);
    }
}
