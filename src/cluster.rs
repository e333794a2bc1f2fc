//! The set of machines a campaign runs on.

use std::fmt;

/// The SSH port used when a node address does not specify one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// One machine in the cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    /// The position of the node in the worker list. The control node has rank 0 unless it is
    /// also a worker, in which case it has the worker's rank.
    pub rank: usize,

    /// A network address for the host, e.g. `10.10.1.1` or `clnode279.clemson.cloudlab.us:22`.
    pub addr: String,
}

impl Node {
    pub fn new(rank: usize, addr: &str) -> Self {
        Node {
            rank,
            addr: addr.trim().to_owned(),
        }
    }

    /// The address with a port, suitable for `ToSocketAddrs`.
    pub fn ssh_addr(&self) -> String {
        if self.addr.contains(':') {
            self.addr.clone()
        } else {
            format!("{}:{}", self.addr, DEFAULT_SSH_PORT)
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

/// An ordered set of worker nodes plus the single coordinating node. The workload always runs on
/// a prefix of the worker list, so the order matters.
///
/// A `ClusterTarget` is built once from the common parameters and never changes afterwards.
#[derive(Clone, Debug)]
pub struct ClusterTarget {
    control: Node,
    workers: Vec<Node>,
}

impl ClusterTarget {
    /// Build the cluster from the worker addresses and the control address. The control node may
    /// also appear in the worker list (it usually does).
    pub fn new<S: AsRef<str>>(workers: &[S], control: &str) -> Self {
        let workers: Vec<_> = workers
            .iter()
            .enumerate()
            .map(|(rank, addr)| Node::new(rank, addr.as_ref()))
            .collect();

        let control = workers
            .iter()
            .find(|node| node.addr == control.trim())
            .cloned()
            .unwrap_or_else(|| Node::new(0, control));

        ClusterTarget { control, workers }
    }

    pub fn control(&self) -> &Node {
        &self.control
    }

    pub fn workers(&self) -> &[Node] {
        &self.workers
    }

    /// The first `n` workers, or `None` if the cluster is too small.
    pub fn first_workers(&self, n: usize) -> Option<&[Node]> {
        self.workers.get(..n)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
