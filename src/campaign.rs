//! Run one experiment: every method at every value of the swept variable.
//!
//! All points are planned up front, so a bad parameter file fails before anything touches the
//! cluster. Points then run strictly one after another. The project is rebuilt on every node
//! whenever the build command changes, and the workload is re-split whenever the split command
//! changes. Single-node tests (`"mode": "one"`) build and run on the control node only.
//!
//! The record is written even when the campaign stops early, so measured points are kept.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::clap_app;

use console::style;

use log::{debug, error, info, warn};

use crate::{
    cli::{params, retry},
    cluster::ClusterTarget,
    command::{ExecMode, RemoteCommand},
    config::{self, CommonParams, ConfigError, ExperimentParams, Sweep},
    executor::{ssh::SshTransport, ClusterExecutor, CommandExecutor},
    measure::{MeasurementLoop, PointOutcome, RetryPolicy, Trial},
    method::Method,
    output::{self, MeasurementPoint, ResultRecord, XValue},
    patch::{self, BuildParams},
    stats::Mode,
    template::{render, Vars},
};

pub fn cli_options() -> clap::App<'static, 'static> {
    let app = clap_app! { campaign =>
        (about: "Run one experiment across the cluster and record the results.")
        (@setting ArgRequiredElseHelp)
        (@setting DisableVersion)
        (@arg NAME: +required +takes_value
         "The experiment to run; parameters are read from fig_<NAME>.json (e.g. 18a)")
        (@arg DRY_RUN: --dry_run
         "Print the planned points and commands without running anything")
    };

    let app = params::add_cli_options(app);
    let app = retry::add_cli_options(app);

    app
}

pub fn run(sub_m: &clap::ArgMatches<'_>) -> Result<(), failure::Error> {
    let name = sub_m.value_of("NAME").unwrap();
    let (params_dir, output_dir) = params::parse_cli_options(sub_m);
    let dry_run = sub_m.is_present("DRY_RUN");

    let (common, exp) = config::load(&params_dir, name)?;
    let policy = retry::parse_cli_options(sub_m, common.retry.clone());

    // Plan before connecting to anything.
    let points = plan(&common, &exp)?;

    if dry_run {
        for point in points.iter() {
            println!("{}", style(&point.trial.label).bold());
            println!("  build:    {}", point.build);
            if let Some(split) = &point.split {
                println!("  split:    {}", split);
            }
            println!("  kill:     {}", point.trial.kill);
            if let Some(reset) = &point.trial.reset {
                println!("  reset:    {}", reset);
            }
            println!("  workload: {}", point.trial.workload);
        }
        return Ok(());
    }

    let cluster = ClusterTarget::new(&common.cluster_ips, &common.master_ip);
    let transport = SshTransport::new(&common.username, common.ssh_key.clone());
    let executor = ClusterExecutor::new(cluster, transport, common.timeouts);

    let (record, path) = Campaign::new(&executor, common.cluster_ips.len(), policy)
        .run_and_save(name, &exp, points, &output_dir)?;

    let failed = record.failed_points().count();
    if failed > 0 {
        println!(
            "{}",
            style(format!("{} points ran out of attempts", failed))
                .yellow()
                .bold()
        );
    }
    println!("RESULTS: {}", path.display());

    Ok(())
}

/// One fully resolved point of an experiment.
#[derive(Clone, Debug)]
pub struct PlannedPoint {
    pub method: Method,
    pub x: XValue,
    pub vars: Vars,
    /// Runs on every node, or on the control node for single-node tests.
    pub build: RemoteCommand,
    /// Runs on the participating nodes.
    pub split: Option<String>,
    pub trial: Trial,
}

/// The parameters of one point before they are turned into commands.
struct PointParams {
    x: XValue,
    cn_num: usize,
    client_num_per_cn: usize,
    key_size: u64,
    cache_size: u64,
    span_size: Option<u64>,
    neighbor_size: Option<u64>,
    hotspot_buffer_size: Option<u64>,
    zipfian: Option<f64>,
    workload: Option<String>,
    ampl_size: Option<u64>,
}

impl PointParams {
    fn base(exp: &ExperimentParams, method: &Method) -> Self {
        let (cn_num, client_num_per_cn) = exp.client_num.unwrap_or((0, 0));
        let default_key_size = if exp.key_type == "randint" { 8 } else { 32 };

        PointParams {
            x: XValue::Number(0.0),
            cn_num,
            client_num_per_cn,
            key_size: exp.key_size.unwrap_or(default_key_size),
            cache_size: exp.cache_size,
            span_size: method.lookup(&exp.span_size).copied(),
            neighbor_size: exp.neighbor_size,
            hotspot_buffer_size: exp.hotspot_buffer_size,
            zipfian: exp.zipfian,
            workload: exp.workload.name.clone(),
            ampl_size: None,
        }
    }

    /// Apply the `i`-th value of the sweep.
    fn swept(mut self, sweep: &Sweep, i: usize) -> Self {
        match sweep {
            Sweep::ClientNum(v) => {
                let (cn, per_cn) = v[i];
                self.cn_num = cn;
                self.client_num_per_cn = per_cn;
                self.x = XValue::Number((cn * per_cn) as f64);
            }
            Sweep::Zipfian(v) => {
                self.zipfian = Some(v[i]);
                self.x = XValue::Number(v[i]);
            }
            Sweep::KeySize(v) => {
                self.key_size = v[i];
                self.x = XValue::Number(v[i] as f64);
            }
            Sweep::NeighborSize(v) => {
                self.neighbor_size = Some(v[i]);
                self.x = XValue::Number(v[i] as f64);
            }
            Sweep::HotspotBufferSize(v) => {
                self.hotspot_buffer_size = Some(v[i]);
                self.x = XValue::Number(v[i] as f64);
            }
            Sweep::CacheSize(v) => {
                self.cache_size = v[i];
                self.x = XValue::Number(v[i] as f64);
            }
            Sweep::SpanSize(v) => {
                self.span_size = Some(v[i]);
                self.x = XValue::Number(v[i] as f64);
            }
            Sweep::Workload(v) => {
                self.workload = Some(v[i].clone());
                self.x = XValue::Label(v[i].clone());
            }
            Sweep::AmplSize(v) => {
                self.ampl_size = Some(v[i]);
                self.x = XValue::Number(v[i] as f64);
            }
        }
        self
    }
}

fn json_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolve every point of the experiment, in the order they will run.
pub fn plan(
    common: &CommonParams,
    exp: &ExperimentParams,
) -> Result<Vec<PlannedPoint>, ConfigError> {
    exp.validate()?;

    let mode = if exp.averaged {
        Mode::Windowed
    } else {
        Mode::Snapshot
    };
    let need_latency = exp.metrics.iter().any(|m| m.needs_latency());
    let need_cache_stats = exp.metrics.iter().any(|m| m.needs_cache_stats());
    let exec_mode = exp.workload.mode;
    let on_cluster = exec_mode == ExecMode::All;

    let mut points = vec![];
    for method in exp.methods.iter() {
        let project_dir = dir!(&common.home_dir, method.base.project().label());
        let work_dir = dir!(&project_dir, "build");
        let sweep = method.lookup(&exp.method_sweep).unwrap_or(&exp.sweep);

        for i in 0..sweep.len() {
            let key = sweep.key(i);
            let over = exp.overrides.get(&key);
            if over.map_or(false, |o| o.skip_methods.contains(method)) {
                debug!("Skipping {} at {}={}", method, sweep.variable(), key);
                continue;
            }
            let target_epoch = over
                .and_then(|o| o.target_epoch)
                .unwrap_or(exp.target_epoch);

            let p = PointParams::base(exp, method).swept(sweep, i);

            if on_cluster && (p.cn_num == 0 || p.client_num_per_cn == 0) {
                return Err(ConfigError::Invalid {
                    reason: format!("no clients for {} at {}", method, p.x),
                });
            }
            if on_cluster && p.cn_num > common.cluster_ips.len() {
                return Err(ConfigError::Invalid {
                    reason: format!(
                        "{} at {} needs {} nodes, but the cluster has {}",
                        method,
                        p.x,
                        p.cn_num,
                        common.cluster_ips.len()
                    ),
                });
            }

            let build_params = BuildParams {
                key_size: p.key_size,
                value_size: exp.value_size,
                cache_size: method.cache_size(p.cache_size),
                mn_num: exp.mn_num,
                span_size: p.span_size,
                epsilon: exp.epsilon,
                neighbor_size: p.neighbor_size,
                hotspot_buffer_size: p.hotspot_buffer_size,
                greedy_io_size: exp.greedy_io_size,
            };

            let mut cmake_options = format!(
                "{} {}",
                common.common_options,
                method
                    .lookup(&common.cmake_options)
                    .map(String::as_str)
                    .unwrap_or("")
            );
            let point_replace = over.map(|o| o.cmake_replace.as_slice()).unwrap_or(&[]);
            for (from, to) in exp.cmake_replace.iter().chain(point_replace) {
                cmake_options = cmake_options.replace(from.as_str(), to.as_str());
            }

            let build = patch::build_command(
                &project_dir,
                method,
                &build_params,
                &common.workloads_dir,
                cmake_options.trim(),
            )?;

            let mut vars = Vars::new();
            for (name, value) in exp.vars.iter() {
                vars.insert(name.clone(), json_to_string(value));
            }
            vars.extend(vars! {
                "home_dir" => &common.home_dir,
                "workloads_dir" => &common.workloads_dir,
                "ycsb_dir" => common.ycsb_dir(),
                "project_dir" => &project_dir,
                "work_dir" => &work_dir,
                "method" => method,
                "binary" => &exp.workload.binary,
                "cn_num" => p.cn_num,
                "client_num_per_cn" => p.client_num_per_cn,
                "client_num" => p.cn_num * p.client_num_per_cn,
                "key_type" => &exp.key_type,
                "key_size" => p.key_size,
                "value_size" => exp.value_size,
                "cache_size" => build_params.cache_size,
                "mn_num" => exp.mn_num,
                "target_epoch" => target_epoch,
            });
            if let Some(span) = p.span_size {
                vars.insert("span_size".into(), span.to_string());
            }
            if let Some(neighbor) = p.neighbor_size {
                vars.insert("neighbor_size".into(), neighbor.to_string());
            }
            if let Some(buffer) = p.hotspot_buffer_size {
                vars.insert("hotspot_buffer_size".into(), buffer.to_string());
            }
            if let Some(zipfian) = p.zipfian {
                vars.insert("zipfian".into(), zipfian.to_string());
            }
            if let Some(workload) = &p.workload {
                vars.insert("workload".into(), workload.clone());
            }
            if let Some(ampl) = p.ampl_size {
                vars.insert("ampl_size".into(), ampl.to_string());
            }

            let in_work_dir = |template: &str| -> Result<String, ConfigError> {
                Ok(format!("cd {} && {}", work_dir, render(template, &vars)?))
            };

            let split = match &exp.workload.split {
                Some(split) => Some(in_work_dir(split)?),
                None => None,
            };

            let latency_dir = if need_latency {
                Some(render(&exp.workload.latency_dir, &vars)?)
            } else {
                None
            };

            let mut label = format!("method={} {}={}", method, sweep.variable(), p.x);
            if on_cluster {
                label.push_str(&format!(" client_num={}", p.cn_num * p.client_num_per_cn));
            }

            // Single-node tests have no memcached to reset.
            let reset = if on_cluster {
                Some(RemoteCommand::one(render(&common.reset, &vars)?))
            } else {
                None
            };

            let trial = Trial {
                label,
                kill: RemoteCommand::new(exec_mode, render(&common.kill, &vars)?).allow_error(),
                reset,
                workload: RemoteCommand::new(exec_mode, in_work_dir(&exp.workload.command)?),
                node_count: if on_cluster { p.cn_num } else { 1 },
                long_running: exp.workload.long_running,
                only_throughput: exp.workload.only_throughput,
                target_epoch,
                mode,
                scalar: exp.workload.scalar,
                cache_stats: need_cache_stats,
                latency_dir,
            };

            points.push(PlannedPoint {
                method: *method,
                x: p.x,
                vars,
                build: RemoteCommand::new(exec_mode, build).untemplated(),
                split,
                trial,
            });
        }
    }

    Ok(points)
}

/// Drives planned points through an executor.
pub struct Campaign<'e, E: CommandExecutor> {
    executor: &'e E,
    /// The number of nodes to build on.
    cluster_size: usize,
    policy: RetryPolicy,
}

impl<'e, E: CommandExecutor> Campaign<'e, E> {
    pub fn new(executor: &'e E, cluster_size: usize, policy: RetryPolicy) -> Self {
        Campaign {
            executor,
            cluster_size,
            policy,
        }
    }

    /// Measure every point into `record`. Build and split failures and missing nodes stop the
    /// campaign, leaving the points measured so far in `record`. Points that run out of attempts
    /// are recorded without metrics.
    pub fn run(
        &self,
        exp: &ExperimentParams,
        points: Vec<PlannedPoint>,
        record: &mut ResultRecord,
    ) -> Result<(), failure::Error> {
        let measure = MeasurementLoop::new(self.executor, self.policy.clone());
        let mut timers = vec![];
        let mut last_build: Option<RemoteCommand> = None;
        let mut last_split: Option<(String, usize)> = None;

        for point in points {
            if last_build.as_ref() != Some(&point.build) {
                info!("Building {}", point.method);
                time!(timers, "Build", {
                    self.executor.dispatch(&point.build, self.cluster_size)?
                });
                last_build = Some(point.build.clone());
            }

            if let Some(split) = &point.split {
                let key = (split.clone(), point.trial.node_count);
                if last_split.as_ref() != Some(&key) {
                    info!("Splitting workload for {} nodes", point.trial.node_count);
                    let cmd = RemoteCommand::all(split.as_str());
                    time!(timers, "Split", {
                        self.executor.execute_all(&cmd, point.trial.node_count)?
                    });
                    last_split = Some(key);
                }
            }

            let outcome = time!(timers, "Measure", measure.measure(&point.trial)?);

            let (metrics, attempts, last_error) = match outcome {
                PointOutcome::Measured { metrics, attempts } => (Some(metrics), attempts, None),
                PointOutcome::Exhausted {
                    attempts,
                    last_error,
                } => (None, attempts, Some(last_error)),
            };

            record.push(
                MeasurementPoint {
                    method: point.method.to_string(),
                    x: point.x,
                    params: point.vars,
                    metrics,
                    attempts,
                    last_error,
                },
                &exp.metrics,
            );
        }

        info!("Timings:\n{}", output::timings_str(&timers));

        Ok(())
    }

    /// Run the campaign and write `fig_<name>.json` and the time log to `output_dir`, whether or
    /// not the campaign finished. A campaign error is returned after the record is written.
    pub fn run_and_save(
        &self,
        name: &str,
        exp: &ExperimentParams,
        points: Vec<PlannedPoint>,
        output_dir: &Path,
    ) -> Result<(ResultRecord, PathBuf), failure::Error> {
        let start = Instant::now();
        let mut record = new_record(name, exp, &points);

        let result = self.run(exp, points, &mut record);
        if let Err(err) = &result {
            error!(
                "fig_{} stopped after {} points: {}",
                name,
                record.points.len(),
                err
            );
        }

        record.local_git_hash = output::local_git_hash().unwrap_or_else(|err| {
            warn!("Unable to get the local git hash: {}", err);
            "unknown".into()
        });

        let path = record.write(output_dir)?;
        output::append_time_log(output_dir, name, start.elapsed())?;

        result.map(|()| (record, path))
    }
}

/// An empty record for `points`, with the X values in the order they first appear.
pub fn new_record(name: &str, exp: &ExperimentParams, points: &[PlannedPoint]) -> ResultRecord {
    let methods = exp.methods.iter().map(Method::to_string).collect();
    let mut x_data: Vec<XValue> = vec![];
    for point in points.iter() {
        if !x_data.contains(&point.x) {
            x_data.push(point.x.clone());
        }
    }
    ResultRecord::new(name, methods, exp.sweep.variable(), x_data)
}

#[cfg(test)]
mod test {
    use super::*;

    use pretty_assertions::assert_eq;

    use crate::executor::{
        testing::{Call, FakeExecutor},
        ExecError,
    };
    use crate::output::Metric;

    fn common() -> CommonParams {
        serde_json::from_str(
            r#"{
                "home_dir": "/home/u",
                "workloads_dir": "/home/u/ycsb/workloads",
                "cluster_ips": ["10.0.0.1", "10.0.0.2", "10.0.0.3"],
                "master_ip": "10.0.0.1",
                "common_options": "-DENABLE_CACHE_EVICTION=off",
                "cmake_options": { "CHIME": "-DHOTSPOT=on", "SMART": "-DSMART=on" }
            }"#,
        )
        .unwrap()
    }

    fn experiment() -> ExperimentParams {
        serde_json::from_str(
            r#"{
                "methods": ["CHIME", "SMART-SC"],
                "workload": {
                    "binary": "ycsb_test",
                    "command": "./ycsb_test {cn_num} {client_num_per_cn} 2 {key_type} {workload}",
                    "split": "python3 {ycsb_dir}/split_workload.py {workload} {key_type} {cn_num} {client_num_per_cn}",
                    "name": "a"
                },
                "sweep": { "variable": "client_num", "values": [[1, 8], [2, 16]] },
                "target_epoch": 1,
                "MN_num": 1,
                "value_size": 8,
                "cache_size": 100,
                "span_size": { "CHIME": 64 },
                "neighbor_size": 8,
                "hotspot_buffer_size": 30,
                "metrics": ["throughput", "cache_hit_rate"]
            }"#,
        )
        .unwrap()
    }

    const LOG: &str = "epoch 1 passed!\n\
                       cluster throughput 3.0 Mops\n\
                       cache hit rate: 0.75\n\
                       avg. leaf load factor: 0.5\n";

    fn no_wait() -> RetryPolicy {
        RetryPolicy {
            max_attempts: Some(2),
            initial_backoff_secs: 0.0,
            ..RetryPolicy::default()
        }
    }

    fn run(exec: &FakeExecutor, exp: &ExperimentParams) -> Result<ResultRecord, failure::Error> {
        let points = plan(&common(), exp)?;
        let mut record = new_record("x", exp, &points);
        Campaign::new(exec, 3, no_wait()).run(exp, points, &mut record)?;
        Ok(record)
    }

    #[test]
    fn plan_resolves_commands() {
        let points = plan(&common(), &experiment()).unwrap();
        assert_eq!(points.len(), 4);

        let p = &points[1];
        assert_eq!(p.method.to_string(), "CHIME");
        assert_eq!(p.x, XValue::Number(32.0));
        assert_eq!(p.trial.node_count, 2);
        assert_eq!(
            p.trial.workload.as_str(),
            "cd /home/u/CHIME/build && ./ycsb_test 2 16 2 randint a"
        );
        assert_eq!(
            p.split.as_deref(),
            Some(
                "cd /home/u/CHIME/build && python3 /home/u/ycsb/split_workload.py a randint 2 16"
            )
        );
        assert_eq!(
            p.trial.kill.as_str(),
            "cd /home/u/CHIME/build && killall -9 ycsb_test"
        );
        assert!(p.trial.kill.allows_error());
        assert_eq!(
            p.trial.reset.as_ref().unwrap().as_str(),
            "cd /home/u/CHIME/build && /bin/bash ../script/restartMemc.sh"
        );
        assert_eq!(p.build.mode(), ExecMode::All);
        assert!(p.build.as_str().contains("cmake -DENABLE_CACHE_EVICTION=off -DHOTSPOT=on .."));
        assert_eq!(p.trial.mode, Mode::Snapshot);
        assert_eq!(p.trial.latency_dir, None);

        // SMART-SC builds SMART with a large cache.
        let sc = &points[2];
        assert!(sc.build.as_str().starts_with("cd /home/u/SMART && "));
        assert!(sc.build.as_str().contains("kIndexCacheSize = 1000;"));
        assert!(sc.build.as_str().contains("-DSMART=on"));
        assert_eq!(sc.vars["cache_size"], "1000");
    }

    #[test]
    fn plan_fails_on_missing_parameter() {
        let mut exp = experiment();
        exp.methods = vec!["ROLEX".parse().unwrap()];
        exp.span_size.insert("ROLEX".into(), 64);

        match plan(&common(), &exp) {
            Err(ConfigError::MissingParameter { parameter, .. }) => {
                assert_eq!(parameter, "epsilon")
            }
            other => panic!("unexpected: {:?}", other.map(|p| p.len())),
        }
    }

    #[test]
    fn plan_fails_on_unknown_placeholder() {
        let mut exp = experiment();
        exp.workload.command = "./ycsb_test {threads}".into();
        assert!(plan(&common(), &exp).is_err());

        exp.vars.insert("threads".into(), serde_json::json!(4));
        let points = plan(&common(), &exp).unwrap();
        assert_eq!(
            points[0].trial.workload.as_str(),
            "cd /home/u/CHIME/build && ./ycsb_test 4"
        );
    }

    #[test]
    fn latency_metrics_enable_latency_reading() {
        let mut exp = experiment();
        exp.metrics = vec![Metric::P99Latency, Metric::ConsumedCacheSize];
        exp.averaged = true;

        let points = plan(&common(), &exp).unwrap();
        assert_eq!(
            points[0].trial.latency_dir.as_deref(),
            Some("/home/u/CHIME/us_lat")
        );
        assert!(points[0].trial.cache_stats);
        assert_eq!(points[0].trial.mode, Mode::Windowed);
    }

    #[test]
    fn builds_once_per_method_and_splits_on_change() {
        let exp = experiment();
        let exec = FakeExecutor::new(3, LOG);
        let record = run(&exec, &exp).unwrap();

        let calls = exec.calls();
        let builds: Vec<_> = calls
            .iter()
            .filter(|c| match c {
                Call::All(cmd, 3) => cmd.contains("make -j"),
                _ => false,
            })
            .collect();
        assert_eq!(builds.len(), 2);

        let splits = calls
            .iter()
            .filter(|c| match c {
                Call::All(cmd, _) => cmd.contains("split_workload.py"),
                _ => false,
            })
            .count();
        assert_eq!(splits, 4);

        assert_eq!(record.x_label, "client_num");
        assert_eq!(
            record.x_data,
            vec![XValue::Number(8.0), XValue::Number(32.0)]
        );
        assert_eq!(record.y_data["CHIME"], vec![Some(3.0), Some(3.0)]);
        assert_eq!(record.y_data["SMART-SC"], vec![Some(3.0), Some(3.0)]);
        assert_eq!(
            record.backup_data["cache_hit_rate"]["CHIME"],
            vec![Some(0.75), Some(0.75)]
        );
    }

    #[test]
    fn exhausted_point_is_recorded_and_campaign_continues() {
        let mut exp = experiment();
        exp.methods.truncate(1);

        // Both attempts of the first point time out; the second point succeeds.
        let exec = FakeExecutor::new(3, LOG).failing(2);
        let record = run(&exec, &exp).unwrap();

        assert_eq!(record.y_data["CHIME"], vec![None, Some(3.0)]);
        assert_eq!(record.points[0].attempts, 2);
        assert!(record.points[0]
            .last_error
            .as_ref()
            .unwrap()
            .contains("timed out"));
        assert_eq!(record.failed_points().count(), 1);
    }

    #[test]
    fn config_errors_before_any_dispatch() {
        let mut exp = experiment();
        // The second method is broken; nothing may run for the first one either.
        exp.methods = vec!["CHIME".parse().unwrap(), "ROLEX".parse().unwrap()];
        let exec = FakeExecutor::new(3, LOG);

        assert!(run(&exec, &exp).is_err());
        assert!(exec.calls().is_empty());
    }

    #[test]
    fn more_nodes_than_the_cluster_is_a_config_error() {
        let mut exp = experiment();
        exp.sweep = Sweep::ClientNum(vec![(1, 8), (4, 8)]);
        let exec = FakeExecutor::new(3, LOG);

        match plan(&common(), &exp) {
            Err(ConfigError::Invalid { reason }) => {
                assert!(reason.contains("needs 4 nodes"), "{}", reason)
            }
            other => panic!("unexpected: {:?}", other.map(|p| p.len())),
        }
        assert!(run(&exec, &exp).is_err());
        assert!(exec.calls().is_empty());
    }

    #[test]
    fn missing_nodes_stop_the_campaign() {
        // The parameter files list three nodes, but only two answer.
        let mut exp = experiment();
        exp.methods.truncate(1);
        exp.workload.split = None;
        exp.sweep = Sweep::ClientNum(vec![(1, 8), (3, 8)]);
        let exec = FakeExecutor::new(2, LOG);
        let points = plan(&common(), &exp).unwrap();
        let mut record = new_record("x", &exp, &points);

        let err = Campaign::new(&exec, 2, no_wait())
            .run(&exp, points, &mut record)
            .unwrap_err();
        match err.downcast::<ExecError>() {
            Ok(ExecError::NotEnoughNodes {
                requested: 3,
                available: 2,
            }) => {}
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(record.points.len(), 1);
        assert_eq!(record.y_data["CHIME"], vec![Some(3.0), None]);
    }

    #[test]
    fn build_failure_keeps_measured_points() {
        let mut exp = experiment();
        exp.methods.truncate(1);
        exp.sweep = Sweep::KeySize(vec![8, 16]);
        exp.client_num = Some((1, 8));
        let points = plan(&common(), &exp).unwrap();

        // The second build (key size 16) fails after the first point was measured.
        let exec = FakeExecutor::new(3, LOG).rejecting("keyLen = 16;");
        let dir = tempfile::tempdir().unwrap();
        let result =
            Campaign::new(&exec, 3, no_wait()).run_and_save("07", &exp, points, dir.path());
        assert!(result.is_err());

        let record = ResultRecord::read(&dir.path().join("fig_07.json")).unwrap();
        assert_eq!(record.points.len(), 1);
        assert_eq!(
            record.x_data,
            vec![XValue::Number(8.0), XValue::Number(16.0)]
        );
        assert_eq!(record.y_data["CHIME"], vec![Some(3.0), None]);

        let time_log = std::fs::read_to_string(dir.path().join("time.log")).unwrap();
        assert!(time_log.starts_with("fig_07 execution time:"));
    }

    fn single_node_experiment() -> ExperimentParams {
        serde_json::from_str(
            r#"{
                "methods": ["CHIME", "SMART"],
                "workload": {
                    "binary": "hash_table_test",
                    "command": "./hash_table_test {key_size} {ampl_size}",
                    "mode": "one",
                    "scalar": { "token": 3, "percent": true }
                },
                "sweep": { "variable": "ampl_size", "values": [1, 2] },
                "target_epoch": 1,
                "MN_num": 1,
                "value_size": 8,
                "cache_size": 100,
                "span_size": { "CHIME": 64 },
                "neighbor_size": 8,
                "hotspot_buffer_size": 30,
                "metrics": ["value"]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn single_node_tests_run_on_the_control_node() {
        let exp = single_node_experiment();
        let points = plan(&common(), &exp).unwrap();
        assert_eq!(points.len(), 4);

        let p = &points[1];
        assert_eq!(p.build.mode(), ExecMode::One);
        assert_eq!(p.trial.workload.mode(), ExecMode::One);
        assert_eq!(
            p.trial.workload.as_str(),
            "cd /home/u/CHIME/build && ./hash_table_test 8 2"
        );
        assert_eq!(p.trial.node_count, 1);
        assert_eq!(p.trial.reset, None);
        assert_eq!(p.trial.label, "method=CHIME ampl_size=2");

        let exec = FakeExecutor::new(3, LOG).answering("hash load factor: 0.8125\n");
        let record = run(&exec, &exp).unwrap();

        assert_eq!(record.y_data["CHIME"], vec![Some(81.25), Some(81.25)]);
        assert_eq!(record.y_data["SMART"], vec![Some(81.25), Some(81.25)]);
        assert!(exec.calls().iter().all(|c| match c {
            Call::One(_) => true,
            _ => false,
        }));
    }

    #[test]
    fn scalar_tests_only_record_values() {
        let mut exp = single_node_experiment();
        exp.metrics = vec![Metric::Value, Metric::Throughput];
        assert!(plan(&common(), &exp).is_err());

        let mut exp = experiment();
        exp.metrics = vec![Metric::Value];
        assert!(plan(&common(), &exp).is_err());
    }

    #[test]
    fn overrides_apply_to_one_value() {
        let mut exp = experiment();
        exp.methods.push("ROLEX".parse().unwrap());
        exp.span_size.insert("ROLEX".into(), 64);
        exp.epsilon = Some(16);
        exp.sweep = Sweep::Workload(vec!["a".into(), "c".into()]);
        exp.client_num = Some((2, 8));
        exp.overrides = serde_json::from_str(
            r#"{
                "a": { "skip_methods": ["ROLEX"] },
                "c": {
                    "target_epoch": 5,
                    "cmake_replace": [["-DENABLE_CACHE_EVICTION=off", "-DENABLE_CACHE_EVICTION=on"]]
                }
            }"#,
        )
        .unwrap();

        let points = plan(&common(), &exp).unwrap();
        let labels: Vec<_> = points
            .iter()
            .map(|p| format!("{} {}", p.method, p.x))
            .collect();
        assert_eq!(
            labels,
            vec!["CHIME a", "CHIME c", "SMART-SC a", "SMART-SC c", "ROLEX c"]
        );

        let (a, c) = (&points[0], &points[1]);
        assert_eq!(a.trial.target_epoch, 1);
        assert!(a.build.as_str().contains("-DENABLE_CACHE_EVICTION=off"));
        assert_eq!(c.trial.target_epoch, 5);
        assert_eq!(c.vars["target_epoch"], "5");
        assert!(c.build.as_str().contains("-DENABLE_CACHE_EVICTION=on"));

        let log = format!("{}{}", LOG, LOG.replace("epoch 1", "epoch 5"));
        let exec = FakeExecutor::new(3, &log);
        let record = run(&exec, &exp).unwrap();
        assert_eq!(record.y_data["ROLEX"], vec![None, Some(3.0)]);
        assert_eq!(record.failed_points().count(), 0);
        assert_eq!(record.points.len(), 5);
    }

    #[test]
    fn methods_can_sweep_their_own_values() {
        let mut exp = experiment();
        exp.methods.truncate(1);
        exp.methods.push("SMART".parse().unwrap());
        exp.method_sweep.insert(
            "SMART".into(),
            Sweep::ClientNum(vec![(1, 8), (3, 8)]),
        );

        let points = plan(&common(), &exp).unwrap();
        let smart: Vec<_> = points
            .iter()
            .filter(|p| p.method.to_string() == "SMART")
            .map(|p| p.trial.node_count)
            .collect();
        assert_eq!(smart, vec![1, 3]);

        let exec = FakeExecutor::new(3, LOG);
        let record = run(&exec, &exp).unwrap();
        assert_eq!(
            record.x_data,
            vec![
                XValue::Number(8.0),
                XValue::Number(32.0),
                XValue::Number(24.0)
            ]
        );
        assert_eq!(record.y_data["CHIME"], vec![Some(3.0), Some(3.0), None]);
        assert_eq!(record.y_data["SMART"], vec![Some(3.0), None, Some(3.0)]);

        exp.method_sweep
            .insert("SMART".into(), Sweep::KeySize(vec![8]));
        assert!(plan(&common(), &exp).is_err());
    }
}
