//! Running commands on the cluster.
//!
//! A `CommandExecutor` runs a `RemoteCommand` either on the control node or on the first few
//! workers at once, and hands back what they printed. Fan-out is all-or-nothing: if any node
//! fails or the deadline passes, the whole call fails and nothing it collected is returned.
//!
//! Executors never retry and never clean up after themselves. A timed-out command may still be
//! running remotely; it is the caller's job to kill it.

pub mod latency;
pub mod ssh;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::{
    mpsc::{self, RecvTimeoutError},
    Arc,
};
use std::time::{Duration, Instant};

use failure::Fail;

use log::debug;

use serde::{Deserialize, Serialize};

use crate::cluster::{ClusterTarget, Node};
use crate::command::{ExecMode, RemoteCommand};
use crate::stats::{event::is_throughput_relevant, window_epochs, LogBundle, NodeLog};

pub use self::latency::Latencies;

/// Failures of a single executor call.
#[derive(Debug, Fail)]
pub enum ExecError {
    #[fail(
        display = "`{}` timed out after {:?} ({} of {} nodes finished)",
        command, timeout, finished, total
    )]
    Timeout {
        command: String,
        timeout: Duration,
        finished: usize,
        total: usize,
    },

    #[fail(display = "`{}` failed on {}: {}", command, node, reason)]
    RemoteExecution {
        command: String,
        node: String,
        reason: String,
    },

    #[fail(display = "unexpected output from {}: {}", node, reason)]
    MalformedOutput { node: String, reason: String },

    #[fail(
        display = "asked for {} worker nodes, but the cluster only has {}",
        requested, available
    )]
    NotEnoughNodes { requested: usize, available: usize },
}

impl ExecError {
    /// Errors that another attempt with the same command cannot fix.
    pub fn is_permanent(&self) -> bool {
        matches!(self, ExecError::NotEnoughNodes { .. })
    }
}

/// Deadlines for short commands (kill, reset, build, split) and for workload runs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(rename = "short_secs", with = "secs")]
    pub short: Duration,
    #[serde(rename = "long_secs", with = "secs")]
    pub long: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            short: Duration::from_secs(300),
            long: Duration::from_secs(1200),
        }
    }
}

/// Durations stored as whole seconds in parameter files.
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// The remote shell underneath a `ClusterExecutor`: runs one command on one node and returns
/// its stdout. Unless `allow_error` is set, a non-zero exit status is an error.
pub trait Transport: Send + Sync + 'static {
    fn run(&self, node: &Node, command: &str, allow_error: bool)
        -> Result<String, failure::Error>;
}

pub trait CommandExecutor {
    /// Run `command` on the control node with the short deadline.
    fn execute_one(&self, command: &RemoteCommand) -> Result<Vec<String>, ExecError>;

    /// Run `command` on the first `node_count` workers concurrently, with the short deadline.
    fn execute_all(&self, command: &RemoteCommand, node_count: usize)
        -> Result<LogBundle, ExecError>;

    /// Like `execute_all`, but with the long deadline. With `only_throughput`, each node's
    /// output is reduced to the lines needed for a throughput measurement.
    fn execute_all_long(
        &self,
        command: &RemoteCommand,
        node_count: usize,
        only_throughput: bool,
    ) -> Result<LogBundle, ExecError>;

    /// Read the latency histograms that the workload left in `dir` on the first `node_count`
    /// workers and compute cluster-wide percentiles for `target_epoch`, or averaged over the
    /// measurement window ending there.
    fn read_cluster_latencies(
        &self,
        dir: &str,
        node_count: usize,
        target_epoch: u64,
        averaged: bool,
    ) -> Result<Latencies, ExecError>;

    /// Run `command` wherever its mode says. The output of a control node command comes back as
    /// a bundle with a single entry.
    fn dispatch(&self, command: &RemoteCommand, node_count: usize) -> Result<LogBundle, ExecError> {
        match command.mode() {
            ExecMode::One => Ok(LogBundle::from_logs(vec![NodeLog {
                node: "control".into(),
                lines: self.execute_one(command)?,
            }])),
            ExecMode::All => self.execute_all(command, node_count),
        }
    }
}

fn split_lines(stdout: &str) -> Vec<String> {
    stdout.lines().map(str::to_owned).collect()
}

/// Executes commands on a `ClusterTarget` through some `Transport`, one thread per node.
pub struct ClusterExecutor<T: Transport> {
    cluster: ClusterTarget,
    transport: Arc<T>,
    timeouts: Timeouts,
}

impl<T: Transport> ClusterExecutor<T> {
    pub fn new(cluster: ClusterTarget, transport: T, timeouts: Timeouts) -> Self {
        ClusterExecutor {
            cluster,
            transport: Arc::new(transport),
            timeouts,
        }
    }

    /// Run `command` on each of `nodes` in its own thread and wait for all of them, or until
    /// `timeout` has passed. Outputs are returned in the order of `nodes`.
    ///
    /// Threads that are still running when we give up are abandoned; their results are dropped
    /// on the floor when they finally try to send them.
    fn fan_out(
        &self,
        command: &RemoteCommand,
        nodes: &[Node],
        timeout: Duration,
    ) -> Result<Vec<String>, ExecError> {
        let deadline = Instant::now() + timeout;
        let (tx, rx) = mpsc::channel();

        for (idx, node) in nodes.iter().enumerate() {
            let tx = tx.clone();
            let transport = Arc::clone(&self.transport);
            let node = node.clone();
            let rendered = command.render_for(node.rank);
            let allow_error = command.allows_error();

            debug!("[{}] {}", node, rendered);

            std::thread::spawn(move || {
                let result = transport.run(&node, &rendered, allow_error);
                let _ = tx.send((idx, result));
            });
        }
        drop(tx);

        let mut outputs: Vec<Option<String>> = vec![None; nodes.len()];
        let mut finished = 0;
        while finished < nodes.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((idx, Ok(stdout))) => {
                    outputs[idx] = Some(stdout);
                    finished += 1;
                }
                Ok((idx, Err(err))) => {
                    return Err(ExecError::RemoteExecution {
                        command: command.to_string(),
                        node: nodes[idx].to_string(),
                        reason: err.to_string(),
                    });
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(ExecError::Timeout {
                        command: command.to_string(),
                        timeout,
                        finished,
                        total: nodes.len(),
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    let idx = outputs.iter().position(Option::is_none).unwrap_or(0);
                    return Err(ExecError::RemoteExecution {
                        command: command.to_string(),
                        node: nodes[idx].to_string(),
                        reason: "worker thread exited without a result".into(),
                    });
                }
            }
        }

        Ok(outputs.into_iter().map(Option::unwrap_or_default).collect())
    }

    fn workers(&self, node_count: usize) -> Result<&[Node], ExecError> {
        self.cluster
            .first_workers(node_count)
            .ok_or(ExecError::NotEnoughNodes {
                requested: node_count,
                available: self.cluster.len(),
            })
    }

    fn bundle(nodes: &[Node], outputs: Vec<String>, only_throughput: bool) -> LogBundle {
        nodes
            .iter()
            .zip(outputs)
            .map(|(node, stdout)| {
                let lines = if only_throughput {
                    stdout
                        .lines()
                        .filter(|line| is_throughput_relevant(line))
                        .map(str::to_owned)
                        .collect()
                } else {
                    split_lines(&stdout)
                };
                (node.to_string(), lines)
            })
            .collect()
    }
}

impl<T: Transport> CommandExecutor for ClusterExecutor<T> {
    fn execute_one(&self, command: &RemoteCommand) -> Result<Vec<String>, ExecError> {
        let control = std::slice::from_ref(self.cluster.control());
        let mut outputs = self.fan_out(command, control, self.timeouts.short)?;
        Ok(outputs.pop().map(|out| split_lines(&out)).unwrap_or_default())
    }

    fn execute_all(
        &self,
        command: &RemoteCommand,
        node_count: usize,
    ) -> Result<LogBundle, ExecError> {
        let nodes = self.workers(node_count)?;
        let outputs = self.fan_out(command, nodes, self.timeouts.short)?;
        Ok(Self::bundle(nodes, outputs, false))
    }

    fn execute_all_long(
        &self,
        command: &RemoteCommand,
        node_count: usize,
        only_throughput: bool,
    ) -> Result<LogBundle, ExecError> {
        let nodes = self.workers(node_count)?;
        let outputs = self.fan_out(command, nodes, self.timeouts.long)?;
        Ok(Self::bundle(nodes, outputs, only_throughput))
    }

    fn read_cluster_latencies(
        &self,
        dir: &str,
        node_count: usize,
        target_epoch: u64,
        averaged: bool,
    ) -> Result<Latencies, ExecError> {
        let epochs: Vec<u64> = if averaged {
            window_epochs(target_epoch).collect()
        } else {
            vec![target_epoch]
        };

        let nodes = self.workers(node_count)?;
        let command = RemoteCommand::all(latency::collect_script(dir, &epochs)).untemplated();
        let outputs = self.fan_out(&command, nodes, self.timeouts.short)?;

        let mut per_node = Vec::with_capacity(nodes.len());
        for (node, stdout) in nodes.iter().zip(outputs) {
            let sections = latency::parse_sections(&split_lines(&stdout)).map_err(|reason| {
                ExecError::MalformedOutput {
                    node: node.to_string(),
                    reason,
                }
            })?;
            per_node.push(sections);
        }

        latency::aggregate(&per_node, &epochs).map_err(|reason| ExecError::MalformedOutput {
            node: dir.to_owned(),
            reason,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::sync::Mutex;

    use failure::format_err;

    /// Answers every command with a canned reply chosen by a closure.
    struct Scripted<F> {
        reply: F,
        seen: Mutex<Vec<(String, String)>>,
    }

    impl<F> Scripted<F>
    where
        F: Fn(&Node, &str) -> Result<String, failure::Error> + Send + Sync + 'static,
    {
        fn new(reply: F) -> Self {
            Scripted {
                reply,
                seen: Mutex::new(vec![]),
            }
        }
    }

    impl<F> Transport for Scripted<F>
    where
        F: Fn(&Node, &str) -> Result<String, failure::Error> + Send + Sync + 'static,
    {
        fn run(&self, node: &Node, command: &str, _: bool) -> Result<String, failure::Error> {
            self.seen
                .lock()
                .unwrap()
                .push((node.addr.clone(), command.to_owned()));
            (self.reply)(node, command)
        }
    }

    fn cluster() -> ClusterTarget {
        ClusterTarget::new(&["10.0.0.1", "10.0.0.2", "10.0.0.3"], "10.0.0.1")
    }

    fn timeouts(ms: u64) -> Timeouts {
        Timeouts {
            short: Duration::from_millis(ms),
            long: Duration::from_millis(ms),
        }
    }

    #[test]
    fn execute_all_templates_per_node() {
        let exec = ClusterExecutor::new(
            cluster(),
            Scripted::new(|node, cmd| Ok(format!("{}\n{}\n", node.rank, cmd))),
            timeouts(5000),
        );

        let bundle = exec
            .execute_all(&RemoteCommand::all("split {node}"), 2)
            .unwrap();

        assert_eq!(bundle.len(), 2);
        assert_eq!(
            bundle.get("10.0.0.1").unwrap(),
            &["0".to_string(), "split 0".to_string()][..]
        );
        assert_eq!(
            bundle.get("10.0.0.2").unwrap(),
            &["1".to_string(), "split 1".to_string()][..]
        );
        assert!(bundle.get("10.0.0.3").is_none());
    }

    #[test]
    fn execute_one_runs_on_control() {
        let transport = Scripted::new(|node, _| Ok(format!("hello from {}\n", node.addr)));
        let exec = ClusterExecutor::new(
            ClusterTarget::new(&["10.0.0.1", "10.0.0.2"], "10.0.0.9"),
            transport,
            timeouts(5000),
        );

        let out = exec.execute_one(&RemoteCommand::one("restart")).unwrap();
        assert_eq!(out, vec!["hello from 10.0.0.9".to_string()]);
    }

    #[test]
    fn one_failure_fails_the_call() {
        let exec = ClusterExecutor::new(
            cluster(),
            Scripted::new(|node, _| {
                if node.rank == 1 {
                    Err(format_err!("exit status 1"))
                } else {
                    Ok("fine".into())
                }
            }),
            timeouts(5000),
        );

        match exec.execute_all(&RemoteCommand::all("run"), 3) {
            Err(ExecError::RemoteExecution { node, reason, .. }) => {
                assert_eq!(node, "10.0.0.2");
                assert!(reason.contains("exit status 1"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn slow_node_times_out_without_partial_result() {
        let exec = ClusterExecutor::new(
            cluster(),
            Scripted::new(|node, _| {
                if node.rank == 2 {
                    std::thread::sleep(Duration::from_secs(2));
                }
                Ok("epoch 1 passed!\n".into())
            }),
            timeouts(200),
        );

        let start = Instant::now();
        match exec.execute_all_long(&RemoteCommand::all("run"), 3, false) {
            Err(ExecError::Timeout {
                finished, total, ..
            }) => {
                assert_eq!(finished, 2);
                assert_eq!(total, 3);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn not_enough_nodes_dispatches_nothing() {
        let transport = Scripted::new(|_, _| Ok(String::new()));
        let exec = ClusterExecutor::new(cluster(), transport, timeouts(5000));

        match exec.execute_all(&RemoteCommand::all("run"), 4) {
            Err(ExecError::NotEnoughNodes {
                requested: 4,
                available: 3,
            }) => {}
            other => panic!("unexpected: {:?}", other),
        }
        assert!(exec.transport.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn only_throughput_filters_lines() {
        let exec = ClusterExecutor::new(
            cluster(),
            Scripted::new(|_, _| {
                Ok("starting\nepoch 1 passed!\ncluster throughput 1.5 Mops\n\
                    cache hit rate: 0.9\navg. leaf load factor: 0.5\n"
                    .into())
            }),
            timeouts(5000),
        );

        let bundle = exec
            .execute_all_long(&RemoteCommand::all("run"), 1, true)
            .unwrap();
        assert_eq!(
            bundle.get("10.0.0.1").unwrap(),
            &[
                "epoch 1 passed!".to_string(),
                "cluster throughput 1.5 Mops".to_string(),
                "avg. leaf load factor: 0.5".to_string(),
            ][..]
        );
    }

    #[test]
    fn cluster_latencies() {
        let exec = ClusterExecutor::new(
            cluster(),
            Scripted::new(|node, cmd| {
                assert!(cmd.starts_with("cd /h/CHIME/us_lat && for e in 10;"));
                Ok(format!("### epoch 10\n{}.0\t100\n", node.rank + 1))
            }),
            timeouts(5000),
        );

        let lat = exec
            .read_cluster_latencies("/h/CHIME/us_lat", 2, 10, false)
            .unwrap();
        assert_eq!(lat.p50, 1.0);
        assert_eq!(lat.p99, 2.0);
    }

    #[test]
    fn garbled_latencies_are_malformed() {
        let exec = ClusterExecutor::new(
            cluster(),
            Scripted::new(|_, _| Ok("### epoch 10\nnot a bucket\n".into())),
            timeouts(5000),
        );

        match exec.read_cluster_latencies("/lat", 1, 10, false) {
            Err(ExecError::MalformedOutput { node, .. }) => assert_eq!(node, "10.0.0.1"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn dispatch_routes_by_mode() {
        let exec = ClusterExecutor::new(
            cluster(),
            Scripted::new(|node, _| Ok(node.addr.clone())),
            timeouts(5000),
        );

        let one = exec.dispatch(&RemoteCommand::one("x"), 3).unwrap();
        assert_eq!(one.len(), 1);
        let all = exec.dispatch(&RemoteCommand::all("x"), 3).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn timeouts_in_seconds() {
        let t: Timeouts = serde_json::from_str(r#"{"short_secs": 10, "long_secs": 60}"#).unwrap();
        assert_eq!(t.short, Duration::from_secs(10));
        assert_eq!(t.long, Duration::from_secs(60));
    }
}
