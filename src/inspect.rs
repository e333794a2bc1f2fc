//! Reduce saved workload logs offline, exactly as a campaign would.

use std::path::Path;

use clap::clap_app;

use failure::ResultExt;

use crate::{
    cli::validator,
    measure::PointMetrics,
    stats::{self, event::is_throughput_relevant, LogBundle, Mode},
};

pub fn cli_options() -> clap::App<'static, 'static> {
    clap_app! { inspect =>
        (about: "Extract the statistics of an epoch from saved workload logs.")
        (@setting ArgRequiredElseHelp)
        (@setting DisableVersion)
        (@arg EPOCH: +required +takes_value {validator::is::<u64>}
         "The target epoch")
        (@arg LOGS: +required +takes_value +multiple
         "The stdout of each node, in rank order")
        (@arg AVERAGED: --averaged
         "Average over the window ending at EPOCH instead of taking EPOCH alone")
        (@arg ONLY_THROUGHPUT: --only_throughput
         "Drop everything but the throughput lines first, like a throughput-only run")
        (@arg JSON: --json "Print the result as JSON")
    }
}

pub fn run(sub_m: &clap::ArgMatches<'_>) -> Result<(), failure::Error> {
    let epoch = sub_m.value_of("EPOCH").unwrap().parse::<u64>().unwrap();
    let logs: Vec<&Path> = sub_m.values_of("LOGS").unwrap().map(Path::new).collect();
    let mode = if sub_m.is_present("AVERAGED") {
        Mode::Windowed
    } else {
        Mode::Snapshot
    };

    let metrics = inspect_files(&logs, epoch, mode, sub_m.is_present("ONLY_THROUGHPUT"))?;

    if sub_m.is_present("JSON") {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
    } else {
        let e = &metrics.epoch;
        println!("throughput:           {} Mops", e.throughput);
        println!("cache hit rate:       {}", e.cache_hit_rate);
        println!("lock/cas fail count:  {}", e.lock_fail_count);
        println!("invalid leaf rate:    {}%", e.invalid_leaf_rate);
        println!("speculative ratio:    {}%", e.speculative_ratio);
        println!("speculative accuracy: {}%", e.speculative_accuracy);
        println!("buffer hit ratio:     {}%", e.buffer_hit_ratio());
        println!("leaf load factor:     {}%", e.load_factor);
        if let Some(cache) = &metrics.cache {
            println!("consumed cache:       {} MB", cache.consumed_cache_mb);
            println!("consumed hotspot buf: {} MB", cache.consumed_hotspot_buffer_mb);
        }
    }

    Ok(())
}

/// Read one log file per node and extract the statistics of `epoch`.
pub fn inspect_files<P: AsRef<Path>>(
    paths: &[P],
    epoch: u64,
    mode: Mode,
    only_throughput: bool,
) -> Result<PointMetrics, failure::Error> {
    let mut logs = vec![];
    for path in paths {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|_| format!("unable to read {}", path.display()))?;
        let lines = contents
            .lines()
            .filter(|line| !only_throughput || is_throughput_relevant(line))
            .map(str::to_owned)
            .collect();
        logs.push((path.display().to_string(), lines));
    }
    let bundle: LogBundle = logs.into_iter().collect();

    let cache = if only_throughput {
        None
    } else {
        Some(stats::cache_statistics(&bundle))
    };

    Ok(PointMetrics {
        epoch: stats::extract(&bundle, epoch, mode)?,
        latency: None,
        cache,
        scalar: None,
    })
}
