//! Process control through `lsof`, `kill` and detached spawns

use super::{LaunchCommand, ProcessControl, ProcessId};
use crate::error::ProcessError;
use async_trait::async_trait;
use std::fs::OpenOptions;
use std::process::Stdio;
use tokio::process::Command;

/// `ProcessControl` backed by the host's process tools
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellProcessControl;

#[async_trait]
impl ProcessControl for ShellProcessControl {
    async fn find_by_port(&self, port: u16) -> Result<Option<ProcessId>, ProcessError> {
        let output = Command::new("lsof")
            .arg("-t")
            .arg(format!("-i:{port}"))
            .arg("-sTCP:LISTEN")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ProcessError::PortLookup {
                port,
                reason: e.to_string(),
            })?;

        // lsof exits non-zero when nothing matches
        parse_pid(&String::from_utf8_lossy(&output.stdout)).map_err(|reason| ProcessError::PortLookup {
            port,
            reason,
        })
    }

    async fn terminate(&self, pid: ProcessId) -> Result<(), ProcessError> {
        let status = Command::new("kill")
            .arg(pid.to_string())
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| ProcessError::Terminate {
                pid: pid.0,
                reason: e.to_string(),
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(ProcessError::Terminate {
                pid: pid.0,
                reason: format!("kill exited with {status}"),
            })
        }
    }

    async fn spawn(&self, command: &LaunchCommand) -> Result<(), ProcessError> {
        let spawn_err = |reason: String| ProcessError::Spawn {
            program: command.program.display().to_string(),
            reason,
        };

        if let Some(dir) = command.log_path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|e| spawn_err(format!("{}: {e}", dir.display())))?;
            }
        }
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&command.log_path)
            .map_err(|e| spawn_err(format!("{}: {e}", command.log_path.display())))?;
        let log_err = log
            .try_clone()
            .map_err(|e| spawn_err(format!("{}: {e}", command.log_path.display())))?;

        let mut process = Command::new(&command.program);
        process
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(false);
        #[cfg(unix)]
        process.process_group(0);

        let child = process.spawn().map_err(|e| spawn_err(e.to_string()))?;
        tracing::debug!(pid = ?child.id(), %command, "node launched");
        Ok(())
    }
}

/// First pid of `lsof -t` output; empty output means no process
fn parse_pid(stdout: &str) -> Result<Option<ProcessId>, String> {
    let Some(line) = stdout.lines().map(str::trim).find(|l| !l.is_empty()) else {
        return Ok(None);
    };
    line.parse::<u32>()
        .map(|pid| Some(ProcessId(pid)))
        .map_err(|e| format!("unexpected lsof output '{line}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lsof_output() {
        assert_eq!(parse_pid(""), Ok(None));
        assert_eq!(parse_pid("\n"), Ok(None));
        assert_eq!(parse_pid("4242\n"), Ok(Some(ProcessId(4242))));
        assert_eq!(parse_pid("4242\n4343\n"), Ok(Some(ProcessId(4242))));
        assert!(parse_pid("COMMAND PID").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawn_appends_to_log() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("node0").join("log");
        let command = LaunchCommand {
            program: "sh".into(),
            args: vec!["-c".to_string(), "echo started".to_string()],
            log_path: log_path.clone(),
        };

        ShellProcessControl.spawn(&command).await.unwrap();
        for _ in 0..50 {
            if std::fs::read_to_string(&log_path).is_ok_and(|s| s.contains("started")) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("log never received output");
    }
}
