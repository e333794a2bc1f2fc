//! An in-memory `CommandExecutor` for unit tests.

use std::cell::{Cell, RefCell};
use std::time::Duration;

use crate::command::RemoteCommand;
use crate::stats::LogBundle;

use super::{CommandExecutor, ExecError, Latencies};

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    One(String),
    All(String, usize),
    Long(String, usize, bool),
    Latencies(String, usize, u64, bool),
}

/// Records every call. Workload runs (`execute_all_long`) return `logs` for every node, after
/// timing out `failures` times. Control node commands print `answer`. Short commands containing
/// `rejected` fail.
pub struct FakeExecutor {
    pub calls: RefCell<Vec<Call>>,
    nodes: usize,
    failures: Cell<usize>,
    logs: Vec<String>,
    answer: Vec<String>,
    rejected: Option<String>,
    latencies: Latencies,
}

impl FakeExecutor {
    pub fn new(nodes: usize, logs: &str) -> Self {
        FakeExecutor {
            calls: RefCell::new(vec![]),
            nodes,
            failures: Cell::new(0),
            logs: logs.lines().map(str::to_owned).collect(),
            answer: vec![],
            rejected: None,
            latencies: Latencies {
                p50: 5.0,
                p99: 20.0,
            },
        }
    }

    pub fn failing(self, failures: usize) -> Self {
        self.failures.set(failures);
        self
    }

    pub fn answering(mut self, output: &str) -> Self {
        self.answer = output.lines().map(str::to_owned).collect();
        self
    }

    pub fn rejecting(mut self, pattern: &str) -> Self {
        self.rejected = Some(pattern.to_owned());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    fn check_nodes(&self, node_count: usize) -> Result<(), ExecError> {
        if node_count > self.nodes {
            Err(ExecError::NotEnoughNodes {
                requested: node_count,
                available: self.nodes,
            })
        } else {
            Ok(())
        }
    }

    fn check_rejected(&self, command: &RemoteCommand) -> Result<(), ExecError> {
        match &self.rejected {
            Some(pattern) if command.as_str().contains(pattern.as_str()) => {
                Err(ExecError::RemoteExecution {
                    command: command.to_string(),
                    node: "node0".into(),
                    reason: "connection reset".into(),
                })
            }
            _ => Ok(()),
        }
    }

    fn bundle(&self, node_count: usize, lines: &[String]) -> LogBundle {
        (0..node_count)
            .map(|i| (format!("node{}", i), lines.to_vec()))
            .collect()
    }
}

impl CommandExecutor for FakeExecutor {
    fn execute_one(&self, command: &RemoteCommand) -> Result<Vec<String>, ExecError> {
        self.calls.borrow_mut().push(Call::One(command.to_string()));
        self.check_rejected(command)?;
        Ok(self.answer.clone())
    }

    fn execute_all(
        &self,
        command: &RemoteCommand,
        node_count: usize,
    ) -> Result<LogBundle, ExecError> {
        self.check_nodes(node_count)?;
        self.calls
            .borrow_mut()
            .push(Call::All(command.to_string(), node_count));
        self.check_rejected(command)?;
        Ok(self.bundle(node_count, &[]))
    }

    fn execute_all_long(
        &self,
        command: &RemoteCommand,
        node_count: usize,
        only_throughput: bool,
    ) -> Result<LogBundle, ExecError> {
        self.check_nodes(node_count)?;
        self.calls.borrow_mut().push(Call::Long(
            command.to_string(),
            node_count,
            only_throughput,
        ));

        let failures = self.failures.get();
        if failures > 0 {
            self.failures.set(failures - 1);
            return Err(ExecError::Timeout {
                command: command.to_string(),
                timeout: Duration::from_secs(1),
                finished: 0,
                total: node_count,
            });
        }

        Ok(self.bundle(node_count, &self.logs))
    }

    fn read_cluster_latencies(
        &self,
        dir: &str,
        node_count: usize,
        target_epoch: u64,
        averaged: bool,
    ) -> Result<Latencies, ExecError> {
        self.calls.borrow_mut().push(Call::Latencies(
            dir.to_owned(),
            node_count,
            target_epoch,
            averaged,
        ));
        Ok(self.latencies)
    }
}
