//! Rolling node restart
//!
//! Nodes are visited in a random permutation and restarted strictly one at
//! a time, so at most one node is away from the network at any instant.
//! Per node:
//! - Find the process listening on the node's RPC port and terminate it
//! - Wait for the port to be released
//! - Relaunch against the node config, output appended to the node log
//! - Poll the port until a *different* process holds it
//! - Pad the downtime up to the configured floor before the next node
//!
//! Any failure aborts the sequence; later nodes are left untouched.

mod shell;

pub use shell::ShellProcessControl;

use crate::chain::ChainConnection;
use crate::error::{ProcessError, TransitError};
use crate::types::NodeDescriptor;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// OS process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Command line of a detached node process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// stdout and stderr are appended here
    pub log_path: PathBuf,
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        write!(f, " >> {}", self.log_path.display())
    }
}

/// Builds the launch command of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLauncher {
    binary: PathBuf,
}

impl NodeLauncher {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// `<binary> --config <node config>`
    #[must_use]
    pub fn command(&self, node: &NodeDescriptor) -> LaunchCommand {
        LaunchCommand {
            program: self.binary.clone(),
            args: vec![
                "--config".to_string(),
                node.config_path.display().to_string(),
            ],
            log_path: node.log_path.clone(),
        }
    }
}

/// OS process operations the coordinator needs
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Process listening on `port`, if any
    async fn find_by_port(&self, port: u16) -> Result<Option<ProcessId>, ProcessError>;

    /// Send a termination signal
    async fn terminate(&self, pid: ProcessId) -> Result<(), ProcessError>;

    /// Launch detached from the coordinator
    async fn spawn(&self, command: &LaunchCommand) -> Result<(), ProcessError>;
}

/// Restart state of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRestartState {
    /// Old process still serving
    Running,
    /// Termination requested
    Stopping,
    /// Port released
    Stopped,
    /// New process launched, not yet seen on the port
    Starting,
    /// New process holds the port
    Confirmed,
    Failed,
}

impl NodeRestartState {
    /// Whether the node is away from the network in this state
    #[inline]
    #[must_use]
    pub fn is_absent(self) -> bool {
        matches!(self, Self::Stopping | Self::Stopped | Self::Starting)
    }

    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }
}

/// States reachable from `from`
#[must_use]
pub fn allowed_transitions(from: NodeRestartState) -> Vec<NodeRestartState> {
    use NodeRestartState::{Confirmed, Failed, Running, Starting, Stopped, Stopping};
    match from {
        Running => vec![Stopping],
        Stopping => vec![Stopped, Failed],
        Stopped => vec![Starting, Failed],
        Starting => vec![Confirmed, Failed],
        Confirmed | Failed => vec![],
    }
}

/// Check a transition against the table
///
/// # Errors
/// - `ProcessError::IllegalTransition` if `to` is not reachable from `from`
pub fn validate_transition(
    node: usize,
    from: NodeRestartState,
    to: NodeRestartState,
) -> Result<(), ProcessError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(ProcessError::IllegalTransition { node, from, to })
    }
}

/// Restart timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartPolicy {
    /// Wait after the termination signal before relaunching
    pub stop_settle_secs: u64,
    /// Delay before each readiness check
    pub poll_interval_ms: u64,
    /// Readiness checks before giving up
    pub max_confirm_attempts: u32,
    /// Minimum time between relaunch and moving on
    pub min_downtime_secs: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            stop_settle_secs: 5,
            poll_interval_ms: 1000,
            max_confirm_attempts: 10,
            min_downtime_secs: 5,
        }
    }
}

impl RestartPolicy {
    #[inline]
    #[must_use]
    pub fn stop_settle(&self) -> Duration {
        Duration::from_secs(self.stop_settle_secs)
    }

    #[inline]
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[inline]
    #[must_use]
    pub fn min_downtime(&self) -> Duration {
        Duration::from_secs(self.min_downtime_secs)
    }
}

/// Outcome of one node restart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRestartRecord {
    pub index: usize,
    pub rpc_port: u16,
    pub old_pid: ProcessId,
    pub new_pid: ProcessId,
    /// Readiness checks it took
    pub confirm_attempts: u32,
    /// Relaunch to confirmation
    pub time_to_confirm: Duration,
    /// Extra wait to honour the downtime floor
    pub padding: Duration,
}

/// Outcome of the whole rolling restart
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartReport {
    /// Node indices in visitation order
    pub order: Vec<usize>,
    pub nodes: Vec<NodeRestartRecord>,
    /// Whether the chain connection had to be re-established
    pub reconnected: bool,
}

/// Restarts a roster of nodes one by one
pub struct RestartCoordinator {
    policy: RestartPolicy,
    processes: Arc<dyn ProcessControl>,
    launcher: NodeLauncher,
    rng: StdRng,
    states: BTreeMap<usize, NodeRestartState>,
}

impl fmt::Debug for RestartCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestartCoordinator")
            .field("policy", &self.policy)
            .field("launcher", &self.launcher)
            .field("states", &self.states)
            .finish_non_exhaustive()
    }
}

impl RestartCoordinator {
    /// Coordinator with an OS-seeded visitation order
    pub fn new(
        policy: RestartPolicy,
        processes: Arc<dyn ProcessControl>,
        launcher: NodeLauncher,
    ) -> Self {
        Self::with_rng(policy, processes, launcher, StdRng::from_os_rng())
    }

    /// Coordinator with a reproducible visitation order
    pub fn with_seed(
        policy: RestartPolicy,
        processes: Arc<dyn ProcessControl>,
        launcher: NodeLauncher,
        seed: u64,
    ) -> Self {
        Self::with_rng(policy, processes, launcher, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        policy: RestartPolicy,
        processes: Arc<dyn ProcessControl>,
        launcher: NodeLauncher,
        rng: StdRng,
    ) -> Self {
        Self {
            policy,
            processes,
            launcher,
            rng,
            states: BTreeMap::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn policy(&self) -> &RestartPolicy {
        &self.policy
    }

    /// Current state of a node, if the roster included it
    #[must_use]
    pub fn state(&self, index: usize) -> Option<NodeRestartState> {
        self.states.get(&index).copied()
    }

    /// Nodes currently away from the network
    #[must_use]
    pub fn absent_count(&self) -> usize {
        self.states.values().filter(|s| s.is_absent()).count()
    }

    /// Random permutation of `0..len`
    pub fn visitation_order(&mut self, len: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..len).collect();
        order.shuffle(&mut self.rng);
        order
    }

    /// Restart every node of the roster, then re-establish the chain
    /// connection if it went away
    ///
    /// # Errors
    /// - `TransitError::Process` for the first node that cannot be restarted;
    ///   nodes after it in the order are not touched
    /// - `TransitError::Chain` if reconnecting fails
    pub async fn restart_all(
        &mut self,
        roster: &[NodeDescriptor],
        conn: &mut ChainConnection,
    ) -> Result<RestartReport, TransitError> {
        self.states = roster
            .iter()
            .map(|node| (node.index, NodeRestartState::Running))
            .collect();

        let positions = self.visitation_order(roster.len());
        let order: Vec<usize> = positions.iter().map(|&p| roster[p].index).collect();
        tracing::info!(?order, "restarting nodes");

        let mut nodes = Vec::with_capacity(roster.len());
        for &position in &positions {
            let node = &roster[position];
            match self.restart_node(node).await {
                Ok(record) => nodes.push(record),
                Err(e) => {
                    if self.state(node.index).is_some_and(|s| !s.is_terminal() && s != NodeRestartState::Running) {
                        self.advance(node.index, NodeRestartState::Failed)?;
                    }
                    tracing::error!(node = node.index, error = %e, "node restart failed");
                    return Err(e.into());
                }
            }
        }

        let reconnected = conn.reconnect().await?;
        Ok(RestartReport {
            order,
            nodes,
            reconnected,
        })
    }

    async fn restart_node(&mut self, node: &NodeDescriptor) -> Result<NodeRestartRecord, ProcessError> {
        let index = node.index;
        let port = node.rpc_port;
        tracing::info!(node = index, port, "restarting node");

        self.advance(index, NodeRestartState::Stopping)?;
        let old_pid = self
            .processes
            .find_by_port(port)
            .await?
            .ok_or(ProcessError::NotRunning { node: index, port })?;
        self.processes.terminate(old_pid).await?;
        tracing::debug!(node = index, pid = %old_pid, "termination signalled");
        tokio::time::sleep(self.policy.stop_settle()).await;
        self.advance(index, NodeRestartState::Stopped)?;

        let command = self.launcher.command(node);
        tracing::debug!(node = index, %command, "launching");
        self.processes.spawn(&command).await?;
        let launched_at = Instant::now();
        self.advance(index, NodeRestartState::Starting)?;

        let (new_pid, confirm_attempts) = self.await_new_process(node, old_pid).await?;
        let time_to_confirm = launched_at.elapsed();
        self.advance(index, NodeRestartState::Confirmed)?;

        let padding = self.policy.min_downtime().saturating_sub(time_to_confirm);
        if !padding.is_zero() {
            tracing::debug!(node = index, ?padding, "padding to minimum downtime");
            tokio::time::sleep(padding).await;
        }

        tracing::info!(node = index, old = %old_pid, new = %new_pid, confirm_attempts, "node restarted");
        Ok(NodeRestartRecord {
            index,
            rpc_port: port,
            old_pid,
            new_pid,
            confirm_attempts,
            time_to_confirm,
            padding,
        })
    }

    async fn await_new_process(
        &self,
        node: &NodeDescriptor,
        old_pid: ProcessId,
    ) -> Result<(ProcessId, u32), ProcessError> {
        let attempts = self.policy.max_confirm_attempts;
        for attempt in 1..=attempts {
            tokio::time::sleep(self.policy.poll_interval()).await;
            match self.processes.find_by_port(node.rpc_port).await {
                Ok(Some(pid)) if pid == old_pid => {
                    return Err(ProcessError::SamePid {
                        node: node.index,
                        pid: pid.0,
                    });
                }
                Ok(Some(pid)) => return Ok((pid, attempt)),
                Ok(None) => tracing::trace!(node = node.index, attempt, "port not yet bound"),
                Err(e) => tracing::debug!(node = node.index, attempt, error = %e, "port lookup failed"),
            }
        }
        Err(ProcessError::NotConfirmed {
            node: node.index,
            port: node.rpc_port,
            attempts,
        })
    }

    fn advance(&mut self, node: usize, to: NodeRestartState) -> Result<(), ProcessError> {
        let from = self
            .states
            .get(&node)
            .copied()
            .unwrap_or(NodeRestartState::Running);
        validate_transition(node, from, to)?;
        self.states.insert(node, to);
        tracing::trace!(node, ?from, ?to, "state change");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn happy_path_is_allowed() {
        use NodeRestartState::*;
        let path = [Running, Stopping, Stopped, Starting, Confirmed];
        for pair in path.windows(2) {
            assert!(validate_transition(0, pair[0], pair[1]).is_ok());
        }
    }

    #[test]
    fn illegal_transitions_rejected() {
        use NodeRestartState::*;
        assert!(validate_transition(1, Running, Starting).is_err());
        assert!(validate_transition(1, Confirmed, Stopping).is_err());
        assert!(validate_transition(1, Failed, Running).is_err());
        assert!(validate_transition(1, Running, Failed).is_err());
        assert!(matches!(
            validate_transition(4, Stopped, Confirmed),
            Err(ProcessError::IllegalTransition { node: 4, .. })
        ));
    }

    #[test]
    fn absent_states() {
        use NodeRestartState::*;
        assert!(!Running.is_absent());
        assert!(Stopping.is_absent() && Stopped.is_absent() && Starting.is_absent());
        assert!(!Confirmed.is_absent() && !Failed.is_absent());
    }

    #[test]
    fn launch_command_line() {
        let node = NodeDescriptor {
            index: 3,
            rpc_port: 8543,
            config_path: PathBuf::from("./config/node3.toml"),
            log_path: PathBuf::from("./parity-data/node3/log"),
        };
        let command = NodeLauncher::new("/usr/bin/parity").command(&node);
        assert_eq!(
            command.to_string(),
            "/usr/bin/parity --config ./config/node3.toml >> ./parity-data/node3/log"
        );
    }

    #[test]
    fn default_policy() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.stop_settle(), Duration::from_secs(5));
        assert_eq!(policy.poll_interval(), Duration::from_secs(1));
        assert_eq!(policy.max_confirm_attempts, 10);
        assert_eq!(policy.min_downtime(), Duration::from_secs(5));
    }

    struct NoProcesses;

    #[async_trait]
    impl ProcessControl for NoProcesses {
        async fn find_by_port(&self, _port: u16) -> Result<Option<ProcessId>, ProcessError> {
            Ok(None)
        }
        async fn terminate(&self, _pid: ProcessId) -> Result<(), ProcessError> {
            Ok(())
        }
        async fn spawn(&self, _command: &LaunchCommand) -> Result<(), ProcessError> {
            Ok(())
        }
    }

    fn coordinator(seed: u64) -> RestartCoordinator {
        RestartCoordinator::with_seed(
            RestartPolicy::default(),
            Arc::new(NoProcesses),
            NodeLauncher::new("parity"),
            seed,
        )
    }

    #[test]
    fn seeded_order_is_reproducible() {
        assert_eq!(coordinator(7).visitation_order(7), coordinator(7).visitation_order(7));
    }

    proptest! {
        #[test]
        fn visitation_order_is_permutation(len in 0usize..64, seed in any::<u64>()) {
            let mut order = coordinator(seed).visitation_order(len);
            order.sort_unstable();
            prop_assert_eq!(order, (0..len).collect::<Vec<_>>());
        }
    }
}
