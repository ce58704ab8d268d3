//! CLI command implementations.
//!
//! Every handler turns a coordinator result into a [`Reply`]; `main` prints it and maps
//! `success` to the exit status. Each submodule owns one or more related `Commands`
//! variants:
//!
//! | Module     | Commands handled                      |
//! |------------|---------------------------------------|
//! | `config`   | `Init`, `Config`                      |
//! | `session`  | `Session`                             |
//! | `project`  | `Project`                             |
//! | `lock`     | `Lock`                                |
//! | `queue`    | `Queue`                               |
//! | `pipeline` | `Pipeline`, `Submit`, `Progress`      |
//! | `cleanup`  | `Cleanup`, `Prune`                    |
//! | `run`      | `Run`, `Status`                       |

pub mod cleanup;
pub mod config;
pub mod lock;
pub mod pipeline;
pub mod project;
pub mod queue;
pub mod run;
pub mod session;

pub use cleanup::{cmd_cleanup, cmd_prune};
pub use config::{cmd_config, cmd_init};
pub use lock::cmd_lock;
pub use pipeline::{cmd_pipeline, cmd_progress, cmd_submit};
pub use project::cmd_project;
pub use queue::cmd_queue;
pub use run::{cmd_run, cmd_status};
pub use session::cmd_session;

use std::path::Path;
use std::sync::Arc;
use switchyard::checkout::GitCheckouts;
use switchyard::cleanup::Cleaner;
use switchyard::config::SwitchyardConfig;
use switchyard::errors::{CoordResult, Reply};
use switchyard::lock::LockCoordinator;
use switchyard::logging::LogOptions;
use switchyard::pipeline::PipelineRouter;
use switchyard::progress::ProgressTracker;
use switchyard::project::ProjectRegistry;
use switchyard::queue::QueueManager;
use switchyard::session::SessionManager;
use switchyard::store::RecordStore;
use switchyard::worker::WorkerRole;

/// Configuration and store shared by every command.
pub struct CmdContext {
    pub config: SwitchyardConfig,
    pub store: RecordStore,
}

impl CmdContext {
    pub fn load(root: &Path, json: bool, verbose: bool) -> CoordResult<Self> {
        let config = SwitchyardConfig::with_cli_args(root, json, verbose)?;
        let store = RecordStore::new(root);
        Ok(Self { config, store })
    }

    /// Logging for this invocation. Only the long-running loop writes a log file.
    pub fn log_options(&self, long_running: bool) -> LogOptions {
        LogOptions {
            level: self.config.log_level().to_string(),
            json: self.config.toml.logging.json,
            file_dir: long_running.then(|| self.config.layout.log_dir()),
        }
    }

    pub fn sessions(&self) -> SessionManager {
        SessionManager::new(self.store.clone(), self.config.toml.sessions.ttl_hours)
    }

    pub fn projects(&self) -> ProjectRegistry {
        ProjectRegistry::new(self.store.clone())
    }

    fn checkouts(&self) -> GitCheckouts {
        GitCheckouts::new(
            &self.config.checkout_base_dir(),
            &self.config.toml.checkouts.branch_prefix,
        )
    }

    pub fn coordinator(&self) -> LockCoordinator {
        let locks = &self.config.toml.locks;
        LockCoordinator::new(
            self.store.clone(),
            self.sessions(),
            locks.default_ttl_minutes,
            locks.force_expire_hours,
        )
        .with_checkouts(Arc::new(self.checkouts()))
    }

    pub fn cleaner(&self) -> Cleaner {
        Cleaner::new(self.store.clone(), self.sessions()).with_checkouts(Arc::new(self.checkouts()))
    }

    pub fn queues(&self) -> QueueManager {
        let limits = &self.config.toml.limits;
        QueueManager::new(
            self.store.clone(),
            limits.max_queue_length,
            limits.task_estimate_ms,
        )
    }

    pub fn router(&self) -> PipelineRouter {
        PipelineRouter::new(self.store.clone(), self.config.workflows(), self.queues())
    }

    pub fn progress(&self) -> ProgressTracker {
        ProgressTracker::new(self.store.clone())
    }
}

pub fn parse_role(raw: &str) -> CoordResult<WorkerRole> {
    raw.parse()
}

/// Print `reply` to stdout: verbatim JSON, or a styled summary line.
pub fn print_reply(reply: &Reply, json: bool) {
    if json {
        match serde_json::to_string_pretty(reply) {
            Ok(out) => println!("{}", out),
            Err(e) => eprintln!("Failed to serialize reply: {}", e),
        }
        return;
    }

    match reply.error {
        None => println!("{} {}", console::style("✓").green(), reply.message),
        Some(code) => println!(
            "{} {} {}",
            console::style("✗").red(),
            console::style(code).red().bold(),
            reply.message
        ),
    }
}
