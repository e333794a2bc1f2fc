//! A library for running benchmark campaigns on a cluster of index servers.
//!
//! A campaign sweeps one parameter over a set of index designs. For every point it rebuilds the
//! projects on the cluster if needed, runs the workload on a prefix of the worker nodes, and
//! reduces the nodes' stdout to a handful of numbers:
//!
//! - `executor` runs commands on the cluster (SSH, one thread per node, bounded by a deadline).
//! - `stats` decodes workload logs and extracts the statistics of an epoch or epoch window.
//! - `measure` retries a point until it yields numbers or runs out of attempts.
//! - `campaign` plans the points of an experiment and drives them, writing a `ResultRecord`.

// Must be imported first because the other submodules use the macros defined therein.
#[macro_use]
mod macros;

#[macro_use]
pub mod template;

pub mod campaign;
pub mod cli;
pub mod cluster;
pub mod command;
pub mod config;
pub mod executor;
pub mod inspect;
pub mod measure;
pub mod method;
pub mod output;
pub mod patch;
pub mod stats;
