//! tmux-backed worker lifecycle: one detached session per role.

use super::{SpawnStatus, WorkerLauncher, WorkerRole};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Default command started inside each worker session.
pub const DEFAULT_WORKER_CMD: &str = "claude --dangerously-skip-permissions";

#[derive(Debug, Clone)]
pub struct TmuxLauncher {
    worker_cmd: String,
    session_prefix: String,
    startup_delay: Duration,
}

impl Default for TmuxLauncher {
    fn default() -> Self {
        Self {
            worker_cmd: DEFAULT_WORKER_CMD.to_string(),
            session_prefix: "sy-".to_string(),
            startup_delay: Duration::from_secs(5),
        }
    }
}

impl TmuxLauncher {
    pub fn new(worker_cmd: &str, session_prefix: &str) -> Self {
        Self {
            worker_cmd: worker_cmd.to_string(),
            session_prefix: session_prefix.to_string(),
            ..Default::default()
        }
    }

    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    pub fn session_name(&self, role: WorkerRole) -> String {
        format!("{}{}", self.session_prefix, role)
    }

    async fn tmux(&self, args: &[&str]) -> Result<bool> {
        let status = Command::new("tmux")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .context("Failed to run tmux")?;
        Ok(status.success())
    }

    async fn send_literal(&self, session: &str, text: &str) -> Result<()> {
        if !self.tmux(&["send-keys", "-t", session, "-l", text]).await? {
            anyhow::bail!("tmux send-keys to {} failed", session);
        }
        if !self.tmux(&["send-keys", "-t", session, "Enter"]).await? {
            anyhow::bail!("tmux send-keys Enter to {} failed", session);
        }
        Ok(())
    }
}

#[async_trait]
impl WorkerLauncher for TmuxLauncher {
    async fn spawn(&self, role: WorkerRole) -> SpawnStatus {
        if self.is_running(role).await {
            return SpawnStatus::Exists;
        }
        let session = self.session_name(role);

        match self
            .tmux(&["new-session", "-d", "-s", &session, "-x", "200", "-y", "50"])
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                return SpawnStatus::Error {
                    message: format!("tmux new-session {} failed", session),
                };
            }
            Err(e) => {
                return SpawnStatus::Error {
                    message: format!("{:#}", e),
                };
            }
        }

        if let Err(e) = self.send_literal(&session, &self.worker_cmd).await {
            return SpawnStatus::Error {
                message: format!("{:#}", e),
            };
        }

        tokio::time::sleep(self.startup_delay).await;
        tracing::info!(%role, %session, "worker started");
        SpawnStatus::Running
    }

    async fn kill(&self, role: WorkerRole) -> Result<()> {
        let session = self.session_name(role);
        if self.tmux(&["kill-session", "-t", &session]).await? {
            tracing::info!(%role, %session, "worker stopped");
        }
        Ok(())
    }

    async fn is_running(&self, role: WorkerRole) -> bool {
        let session = self.session_name(role);
        self.tmux(&["has-session", "-t", &session])
            .await
            .unwrap_or(false)
    }

    async fn dispatch(&self, role: WorkerRole, instruction: &str) -> Result<()> {
        let session = self.session_name(role);
        self.send_literal(&session, instruction)
            .await
            .with_context(|| format!("Failed to dispatch to {}", role))
    }
}
