//! Simulated node processes for restart tests

use crate::chain::SimulatedChain;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use transit_core::restart::{LaunchCommand, ProcessControl, ProcessId};
use transit_core::{NodeDescriptor, ProcessError};

/// Observable process operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Terminated { port: u16, pid: ProcessId },
    Spawned { port: u16, config: PathBuf },
    Bound { port: u16, pid: ProcessId },
}

#[derive(Debug, Default)]
struct PortState {
    pid: Option<ProcessId>,
    /// New process and the polls it still answers with nothing
    starting: Option<(ProcessId, u32)>,
    last_pid: Option<ProcessId>,
}

#[derive(Debug, Default)]
struct State {
    ports: HashMap<u16, PortState>,
    configs: HashMap<PathBuf, u16>,
    dead: HashSet<u16>,
    never_rebind: HashSet<u16>,
    next_pid: u32,
    startup_polls: u32,
    reuse_pids: bool,
    absent: usize,
    max_absent: usize,
    events: Vec<ProcessEvent>,
    chain: Option<SimulatedChain>,
}

/// One process per roster port; clones share state
#[derive(Debug, Clone, Default)]
pub struct SimulatedProcesses {
    state: Arc<Mutex<State>>,
}

impl SimulatedProcesses {
    /// Node `i` runs as pid `1000 + i`; restarts need two polls to bind
    #[must_use]
    pub fn for_roster(roster: &[NodeDescriptor]) -> Self {
        let mut state = State {
            next_pid: 2000,
            startup_polls: 2,
            ..State::default()
        };
        for node in roster {
            let pid = ProcessId(1000 + u32::try_from(node.index).unwrap());
            state.ports.insert(
                node.rpc_port,
                PortState {
                    pid: Some(pid),
                    ..PortState::default()
                },
            );
            state.configs.insert(node.config_path.clone(), node.rpc_port);
        }
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Polls a fresh process answers with nothing before binding
    #[must_use]
    pub fn with_startup_polls(self, polls: u32) -> Self {
        self.state.lock().startup_polls = polls;
        self
    }

    /// Restarted nodes come back with their previous pid
    #[must_use]
    pub fn reusing_pids(self) -> Self {
        self.state.lock().reuse_pids = true;
        self
    }

    /// Terminations drop the chain transport, as a restarting RPC node would
    #[must_use]
    pub fn linked_to(self, chain: SimulatedChain) -> Self {
        self.state.lock().chain = Some(chain);
        self
    }

    /// Nothing listens on `port`
    pub fn kill_port(&self, port: u16) {
        let mut state = self.state.lock();
        state.dead.insert(port);
        if let Some(entry) = state.ports.get_mut(&port) {
            entry.pid = None;
        }
    }

    /// Processes spawned for `port` never bind it
    pub fn never_rebinds(&self, port: u16) {
        self.state.lock().never_rebind.insert(port);
    }

    /// Most nodes down at the same time
    #[must_use]
    pub fn max_absent(&self) -> usize {
        self.state.lock().max_absent
    }

    #[must_use]
    pub fn events(&self) -> Vec<ProcessEvent> {
        self.state.lock().events.clone()
    }

    /// Ports in termination order
    #[must_use]
    pub fn terminated_ports(&self) -> Vec<u16> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProcessEvent::Terminated { port, .. } => Some(port),
                _ => None,
            })
            .collect()
    }

    /// Process currently listening on `port`
    #[must_use]
    pub fn pid_of(&self, port: u16) -> Option<ProcessId> {
        self.state.lock().ports.get(&port).and_then(|p| p.pid)
    }
}

#[async_trait]
impl ProcessControl for SimulatedProcesses {
    async fn find_by_port(&self, port: u16) -> Result<Option<ProcessId>, ProcessError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.dead.contains(&port) {
            return Ok(None);
        }
        let Some(entry) = state.ports.get_mut(&port) else {
            return Ok(None);
        };
        if let Some((pid, remaining)) = entry.starting {
            if state.never_rebind.contains(&port) {
                return Ok(None);
            }
            if remaining > 0 {
                entry.starting = Some((pid, remaining - 1));
                return Ok(None);
            }
            entry.starting = None;
            entry.pid = Some(pid);
            state.absent -= 1;
            state.events.push(ProcessEvent::Bound { port, pid });
            return Ok(Some(pid));
        }
        Ok(entry.pid)
    }

    async fn terminate(&self, pid: ProcessId) -> Result<(), ProcessError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let port = state
            .ports
            .iter()
            .find(|(_, p)| p.pid == Some(pid))
            .map(|(port, _)| *port)
            .ok_or_else(|| ProcessError::Terminate {
                pid: pid.0,
                reason: "no such process".to_string(),
            })?;
        if let Some(entry) = state.ports.get_mut(&port) {
            entry.pid = None;
            entry.last_pid = Some(pid);
        }
        state.absent += 1;
        state.max_absent = state.max_absent.max(state.absent);
        state.events.push(ProcessEvent::Terminated { port, pid });
        if let Some(chain) = &state.chain {
            chain.disconnect();
        }
        Ok(())
    }

    async fn spawn(&self, command: &LaunchCommand) -> Result<(), ProcessError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let config = command
            .args
            .iter()
            .position(|a| a == "--config")
            .and_then(|i| command.args.get(i + 1))
            .map(PathBuf::from)
            .ok_or_else(|| ProcessError::Spawn {
                program: command.program.display().to_string(),
                reason: "missing --config".to_string(),
            })?;
        let port = *state.configs.get(&config).ok_or_else(|| ProcessError::Spawn {
            program: command.program.display().to_string(),
            reason: format!("unknown config {}", config.display()),
        })?;

        let fresh = ProcessId(state.next_pid);
        state.next_pid += 1;
        let polls = state.startup_polls;
        let reuse = state.reuse_pids;
        if let Some(entry) = state.ports.get_mut(&port) {
            let pid = if reuse { entry.last_pid.unwrap_or(fresh) } else { fresh };
            entry.starting = Some((pid, polls));
        }
        state.events.push(ProcessEvent::Spawned { port, config });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::sample_roster;
    use transit_core::restart::NodeLauncher;

    #[tokio::test]
    async fn port_that_never_rebinds_stays_silent() {
        let roster = sample_roster(2);
        let processes = SimulatedProcesses::for_roster(&roster).with_startup_polls(0);
        processes.never_rebinds(roster[1].rpc_port);
        let launcher = NodeLauncher::new("parity");

        for node in &roster {
            let pid = processes.find_by_port(node.rpc_port).await.unwrap().unwrap();
            processes.terminate(pid).await.unwrap();
            processes.spawn(&launcher.command(node)).await.unwrap();
        }

        assert!(processes.find_by_port(roster[0].rpc_port).await.unwrap().is_some());
        for _ in 0..20 {
            assert_eq!(processes.find_by_port(roster[1].rpc_port).await.unwrap(), None);
        }
        assert_eq!(processes.max_absent(), 2);
    }
}
