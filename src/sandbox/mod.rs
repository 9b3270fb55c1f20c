//! Runs user code in a child process with the hardware bridge in front of it.
//!
//! Isolation is the launcher's job (firejail, bwrap, a container CLI); the
//! runner only guarantees a fresh working directory, a scrubbed environment,
//! a wall-clock budget, and that the child is killed and its files removed
//! on every exit path.

pub mod protocol;

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;

use crate::config::SandboxConfig;
use crate::error::{EmuError, EmuResult};
use crate::event::EventKind;
use crate::model::SharedModel;
use crate::shim::handle_request_line;
use protocol::classify;

const BRIDGE_SOURCE: &str = include_str!("../../assets/bridge.py");
const BRIDGE_FILE: &str = "rpi_sim_bridge.py";
const CODE_FILE: &str = "main.py";
const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// How a run ended. Every variant has already emitted its terminal event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed,
    Failed { exit_code: Option<i32> },
    TimedOut,
    Stopped,
    Rejected,
}

enum Finish {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct SandboxRunner {
    config: SandboxConfig,
}

impl SandboxRunner {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn validate_code(&self, code: &str) -> EmuResult<()> {
        if code.trim().is_empty() {
            return Err(EmuError::validation("code must not be empty"));
        }
        if code.len() > self.config.max_code_bytes {
            return Err(EmuError::validation(format!(
                "code is {} bytes, the limit is {}",
                code.len(),
                self.config.max_code_bytes
            )));
        }
        if code.contains('\0') {
            return Err(EmuError::validation("code contains NUL bytes"));
        }
        Ok(())
    }

    fn command(&self, dir: &Path) -> Command {
        let mut argv: Vec<String> = self.config.launcher.clone();
        argv.push(self.config.interpreter.clone());
        argv.extend(self.config.args.iter().cloned());
        if self.config.bridge {
            argv.push(BRIDGE_FILE.to_string());
        }
        argv.push(CODE_FILE.to_string());

        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .current_dir(dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if self.config.clear_env {
            command
                .env_clear()
                .env("PATH", SANDBOX_PATH)
                .env("HOME", dir)
                .env("PYTHONUNBUFFERED", "1")
                .env("PYTHONDONTWRITEBYTECODE", "1");
        }
        command
    }

    fn prepare(&self, code: &str) -> EmuResult<(tempfile::TempDir, Child)> {
        let dir = tempfile::Builder::new()
            .prefix("rpi-sim-")
            .tempdir()
            .map_err(|e| EmuError::Sandbox(format!("cannot create working directory: {e}")))?;
        std::fs::write(dir.path().join(CODE_FILE), code)
            .and_then(|_| std::fs::write(dir.path().join(BRIDGE_FILE), BRIDGE_SOURCE))
            .map_err(|e| EmuError::Sandbox(format!("cannot stage code: {e}")))?;
        let child = self
            .command(dir.path())
            .spawn()
            .map_err(|e| EmuError::Sandbox(format!("cannot start '{}': {e}", self.config.interpreter)))?;
        Ok((dir, child))
    }

    /// Run `code` to completion, timeout or stop. Emits the lifecycle events
    /// into the model's event bus, ending with exactly one terminal event.
    pub async fn run(
        &self,
        code: &str,
        model: SharedModel,
        mut stop_rx: oneshot::Receiver<()>,
    ) -> ExecutionOutcome {
        if let Err(e) = self.validate_code(code) {
            model.lock().await.emit("", EventKind::error(e.to_string()));
            return ExecutionOutcome::Rejected;
        }

        {
            let mut guard = model.lock().await;
            guard.reset_devices();
            guard.emit("", EventKind::ExecutionStarted { message: "Execution started".into() });
        }

        // The directory lives until the end of this function on every path.
        let (_dir, mut child) = match self.prepare(code) {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::error!("Sandbox failed to start: {}", e);
                model.lock().await.emit("", EventKind::error(e.to_string()));
                return ExecutionOutcome::Failed { exit_code: None };
            }
        };
        tracing::info!("Started execution for session {}", model.lock().await.session_id());

        let timeout = self.config.timeout();
        let finish = {
            let pump = pump(&mut child, model.clone());
            tokio::pin!(pump);
            tokio::select! {
                status = &mut pump => Finish::Exited(status),
                _ = tokio::time::sleep(timeout) => Finish::TimedOut,
                Ok(()) = &mut stop_rx => Finish::Stopped,
            }
        };

        if !matches!(finish, Finish::Exited(Ok(_))) {
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to kill sandbox process: {}", e);
            }
        }

        let mut guard = model.lock().await;
        match finish {
            Finish::Exited(Ok(status)) if status.success() => {
                guard.emit(
                    "",
                    EventKind::ExecutionCompleted {
                        message: "Execution completed".into(),
                        success: true,
                        exit_code: Some(0),
                    },
                );
                ExecutionOutcome::Completed
            }
            Finish::Exited(Ok(status)) => {
                let exit_code = status.code();
                let detail = match exit_code {
                    Some(code) => format!("Process exited with code {code}"),
                    None => "Process terminated by a signal".to_string(),
                };
                guard.emit("", EventKind::error(detail.clone()));
                guard.emit(
                    "",
                    EventKind::ExecutionCompleted { message: detail, success: false, exit_code },
                );
                ExecutionOutcome::Failed { exit_code }
            }
            Finish::Exited(Err(e)) => {
                tracing::error!("Lost contact with sandbox process: {}", e);
                let err = EmuError::Sandbox(e.to_string());
                guard.emit("", EventKind::error(err.to_string()));
                guard.emit(
                    "",
                    EventKind::ExecutionCompleted {
                        message: err.to_string(),
                        success: false,
                        exit_code: None,
                    },
                );
                ExecutionOutcome::Failed { exit_code: None }
            }
            Finish::TimedOut => {
                tracing::warn!("Execution timed out after {:?}", timeout);
                guard.emit("", EventKind::error(EmuError::Timeout(timeout).to_string()));
                ExecutionOutcome::TimedOut
            }
            Finish::Stopped => {
                guard.emit(
                    "",
                    EventKind::ExecutionStopped { message: "Execution stopped by user".into() },
                );
                ExecutionOutcome::Stopped
            }
        }
    }
}

/// Relay the child's stdio until it exits: hardware calls are answered,
/// other stdout lines become `output` events, stderr lines `log` events.
async fn pump(child: &mut Child, model: SharedModel) -> std::io::Result<ExitStatus> {
    let missing = || std::io::Error::other("child stdio was not captured");
    let mut stdout = BufReader::new(child.stdout.take().ok_or_else(missing)?).lines();
    let mut stderr = BufReader::new(child.stderr.take().ok_or_else(missing)?).lines();
    let mut stdin = child.stdin.take();
    let (mut stdout_done, mut stderr_done) = (false, false);

    while !(stdout_done && stderr_done) {
        tokio::select! {
            line = stdout.next_line(), if !stdout_done => match line? {
                Some(line) => on_stdout(&line, &model, &mut stdin).await,
                None => stdout_done = true,
            },
            line = stderr.next_line(), if !stderr_done => match line? {
                Some(line) => model.lock().await.emit("", EventKind::Log { content: line }),
                None => stderr_done = true,
            },
        }
    }
    drop(stdin);
    child.wait().await
}

async fn on_stdout(line: &str, model: &SharedModel, stdin: &mut Option<ChildStdin>) {
    let parsed = classify(line);
    let reply = {
        let mut guard = model.lock().await;
        if let Some(output) = parsed.output {
            guard.emit("", EventKind::Output { content: output.to_string() });
        }
        match parsed.call {
            Some(call) => handle_request_line(&mut guard, call),
            None => return,
        }
    };

    let Some(pipe) = stdin.as_mut() else {
        return;
    };
    let mut encoded = serde_json::to_string(&reply).unwrap_or_else(|_| String::from("{}"));
    encoded.push('\n');
    let written = async {
        pipe.write_all(encoded.as_bytes()).await?;
        pipe.flush().await
    };
    if let Err(e) = written.await {
        tracing::warn!("Child stopped reading replies: {}", e);
        *stdin = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(max_code_bytes: usize) -> SandboxRunner {
        SandboxRunner::new(SandboxConfig { max_code_bytes, ..SandboxConfig::default() })
    }

    #[test]
    fn test_validate_code() {
        let runner = runner(16);
        assert!(runner.validate_code("print(1)").is_ok());
        assert!(matches!(runner.validate_code("   \n"), Err(EmuError::Validation(_))));
        assert!(matches!(runner.validate_code(&"x".repeat(17)), Err(EmuError::Validation(_))));
    }

    #[test]
    fn test_bridge_is_embedded() {
        assert!(BRIDGE_SOURCE.contains(protocol::HW_PREFIX.trim_end()));
    }
}
