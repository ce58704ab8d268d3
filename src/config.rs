//! Layered configuration for Switchyard.
//!
//! Settings are read from `.switchyard/switchyard.toml`, then selected environment
//! variables, then CLI flags. Every field has a default, so a missing or partial file is
//! valid.
//!
//! # Configuration File Format
//!
//! ```toml
//! [orchestrator]
//! loop_interval_ms = 5000
//!
//! [limits]
//! max_queue_length = 3
//! task_estimate_ms = 300000
//!
//! [locks]
//! default_ttl_minutes = 120
//! force_expire_hours = 24
//!
//! [sessions]
//! ttl_hours = 24
//!
//! [checkouts]
//! base_dir = "/home/me/worktrees"
//! branch_prefix = "feature/"
//!
//! [workers]
//! command = "claude --dangerously-skip-permissions"
//! session_prefix = "sy-"
//!
//! [notifications]
//! webhook_url = "https://hooks.example.com/switchyard"
//!
//! [logging]
//! level = "info"
//! json = false
//!
//! [workflows.default]
//! pipeline = ["backend", "review", "frontend", "qa"]
//! review_threshold = 0.7
//! max_retries = 2
//! ```

use crate::errors::{CoordError, CoordResult};
use crate::pipeline::{Workflow, WorkflowSet};
use crate::store::StateLayout;
use crate::worker::WorkerRole;
use crate::worker::tmux::DEFAULT_WORKER_CMD;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

pub const ENV_LOOP_INTERVAL_MS: &str = "SWITCHYARD_LOOP_INTERVAL_MS";
pub const ENV_WEBHOOK_URL: &str = "SWITCHYARD_WEBHOOK_URL";
pub const ENV_WORKER_CMD: &str = "SWITCHYARD_WORKER_CMD";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSection {
    /// Tick interval of the polling loop
    #[serde(default = "default_loop_interval_ms")]
    pub loop_interval_ms: u64,
}

fn default_loop_interval_ms() -> u64 {
    5000
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            loop_interval_ms: default_loop_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsSection {
    /// Capacity of every per-role queue
    #[serde(default = "default_max_queue_length")]
    pub max_queue_length: usize,
    /// Assumed duration of one queued task, used for wait estimates
    #[serde(default = "default_task_estimate_ms")]
    pub task_estimate_ms: u64,
}

fn default_max_queue_length() -> usize {
    3
}

fn default_task_estimate_ms() -> u64 {
    300_000
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_queue_length: default_max_queue_length(),
            task_estimate_ms: default_task_estimate_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocksSection {
    #[serde(default = "default_lock_ttl_minutes")]
    pub default_ttl_minutes: i64,
    /// Age after which a forced cleanup expires a lock regardless of its TTL
    #[serde(default = "default_force_expire_hours")]
    pub force_expire_hours: i64,
}

fn default_lock_ttl_minutes() -> i64 {
    120
}

fn default_force_expire_hours() -> i64 {
    24
}

impl Default for LocksSection {
    fn default() -> Self {
        Self {
            default_ttl_minutes: default_lock_ttl_minutes(),
            force_expire_hours: default_force_expire_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsSection {
    #[serde(default = "default_session_ttl_hours")]
    pub ttl_hours: i64,
}

fn default_session_ttl_hours() -> i64 {
    24
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            ttl_hours: default_session_ttl_hours(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutsSection {
    /// Root for per-task checkouts (default: `$HOME/worktrees`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
}

fn default_branch_prefix() -> String {
    "feature/".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersSection {
    /// Command started inside each worker session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default = "default_session_prefix")]
    pub session_prefix: String,
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,
    /// Roles to start on `run`; empty means every role used by a workflow
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<WorkerRole>,
}

fn default_session_prefix() -> String {
    "sy-".to_string()
}

fn default_startup_delay_ms() -> u64 {
    5000
}

impl Default for WorkersSection {
    fn default() -> Self {
        Self {
            command: None,
            session_prefix: default_session_prefix(),
            startup_delay_ms: default_startup_delay_ms(),
            roles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationsSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_workflows() -> BTreeMap<String, Workflow> {
    let mut workflows = BTreeMap::new();
    workflows.insert(
        "default".to_string(),
        Workflow::new(vec![
            WorkerRole::Backend,
            WorkerRole::Review,
            WorkerRole::Frontend,
            WorkerRole::Qa,
        ]),
    );
    workflows.insert(
        "backend_only".to_string(),
        Workflow::new(vec![WorkerRole::Backend, WorkerRole::Review]),
    );
    workflows
}

/// Raw contents of `switchyard.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchyardToml {
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default)]
    pub locks: LocksSection,
    #[serde(default)]
    pub sessions: SessionsSection,
    #[serde(default)]
    pub checkouts: CheckoutsSection,
    #[serde(default)]
    pub workers: WorkersSection,
    #[serde(default)]
    pub notifications: NotificationsSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default = "default_workflows")]
    pub workflows: BTreeMap<String, Workflow>,
}

impl Default for SwitchyardToml {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorSection::default(),
            limits: LimitsSection::default(),
            locks: LocksSection::default(),
            sessions: SessionsSection::default(),
            checkouts: CheckoutsSection::default(),
            workers: WorkersSection::default(),
            notifications: NotificationsSection::default(),
            logging: LoggingSection::default(),
            workflows: default_workflows(),
        }
    }
}

/// Outcome of [`SwitchyardToml::validate`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl SwitchyardToml {
    pub fn load(path: &Path) -> CoordResult<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> CoordResult<Self> {
        toml::from_str(content)
            .map_err(|e| CoordError::ConfigInvalid(format!("switchyard.toml: {}", e)))
    }

    /// Load from `layout`, or defaults when the file doesn't exist.
    pub fn load_or_default(layout: &StateLayout) -> CoordResult<Self> {
        let path = layout.config_file();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> CoordResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CoordError::ConfigInvalid(format!("Failed to serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_LOOP_INTERVAL_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => self.orchestrator.loop_interval_ms = ms,
                Err(_) => tracing::warn!(value = %raw, "ignoring invalid {}", ENV_LOOP_INTERVAL_MS),
            }
        }
        if let Some(url) = lookup(ENV_WEBHOOK_URL).filter(|u| !u.trim().is_empty()) {
            self.notifications.webhook_url = Some(url);
        }
        if let Some(cmd) = lookup(ENV_WORKER_CMD).filter(|c| !c.trim().is_empty()) {
            self.workers.command = Some(cmd);
        }
    }

    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if self.orchestrator.loop_interval_ms == 0 {
            report
                .errors
                .push("orchestrator.loop_interval_ms must be greater than 0".to_string());
        }
        if self.limits.max_queue_length == 0 {
            report
                .errors
                .push("limits.max_queue_length must be greater than 0".to_string());
        }
        if self.locks.default_ttl_minutes <= 0 {
            report
                .errors
                .push("locks.default_ttl_minutes must be greater than 0".to_string());
        }
        if self.sessions.ttl_hours <= 0 {
            report
                .errors
                .push("sessions.ttl_hours must be greater than 0".to_string());
        }

        for (name, workflow) in &self.workflows {
            if workflow.pipeline.is_empty() {
                report
                    .errors
                    .push(format!("workflow '{}' has an empty pipeline", name));
            }
            let mut seen = BTreeSet::new();
            for stage in &workflow.pipeline {
                if !seen.insert(*stage) {
                    report.errors.push(format!(
                        "workflow '{}' lists stage '{}' more than once",
                        name, stage
                    ));
                }
            }
            if !(0.0..=1.0).contains(&workflow.review_threshold) {
                report.errors.push(format!(
                    "workflow '{}' review_threshold {} is outside [0, 1]",
                    name, workflow.review_threshold
                ));
            }
            if !workflow.pipeline.iter().any(WorkerRole::is_review) {
                report.warnings.push(format!(
                    "workflow '{}' has no review stage; its review_threshold is never applied",
                    name
                ));
            }
        }

        if !self.workflows.contains_key(crate::pipeline::DEFAULT_WORKFLOW) {
            report.warnings.push(
                "no 'default' workflow; tasks submitted without a workflow will be rejected"
                    .to_string(),
            );
        }

        report
    }
}

/// Resolved runtime configuration for one switchyard root.
#[derive(Debug, Clone)]
pub struct SwitchyardConfig {
    pub project_dir: PathBuf,
    pub layout: StateLayout,
    pub toml: SwitchyardToml,
    /// CLI override: print replies as JSON
    pub json: bool,
    /// CLI override: debug-level logging
    pub verbose: bool,
}

impl SwitchyardConfig {
    /// Load file and environment layers for `project_dir`.
    pub fn load(project_dir: &Path) -> CoordResult<Self> {
        let layout = StateLayout::new(project_dir);
        let mut toml = SwitchyardToml::load_or_default(&layout)?;
        toml.apply_env(|key| std::env::var(key).ok());
        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            layout,
            toml,
            json: false,
            verbose: false,
        })
    }

    pub fn with_cli_args(project_dir: &Path, json: bool, verbose: bool) -> CoordResult<Self> {
        let mut config = Self::load(project_dir)?;
        config.json = json;
        config.verbose = verbose;
        Ok(config)
    }

    pub fn workflows(&self) -> WorkflowSet {
        WorkflowSet::new(self.toml.workflows.clone())
    }

    pub fn worker_command(&self) -> String {
        self.toml
            .workers
            .command
            .clone()
            .unwrap_or_else(|| DEFAULT_WORKER_CMD.to_string())
    }

    pub fn checkout_base_dir(&self) -> PathBuf {
        self.toml.checkouts.base_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .map(|home| home.join("worktrees"))
                .unwrap_or_else(|| self.project_dir.join("worktrees"))
        })
    }

    /// Roles the orchestrator manages: the configured list, else every workflow stage.
    pub fn worker_roles(&self) -> Vec<WorkerRole> {
        if !self.toml.workers.roles.is_empty() {
            return self.toml.workers.roles.clone();
        }
        let roles: BTreeSet<WorkerRole> = self
            .toml
            .workflows
            .values()
            .flat_map(|w| w.pipeline.iter().copied())
            .collect();
        roles.into_iter().collect()
    }

    pub fn log_level(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            &self.toml.logging.level
        }
    }

    pub fn validate(&self) -> ValidationReport {
        self.toml.validate()
    }
}
