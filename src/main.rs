use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod cmd;

#[derive(Parser)]
#[command(name = "switchyard")]
#[command(version, about = "Coordinate pipeline workers: leases, bounded queues, gated stages")]
pub struct Cli {
    /// Directory holding .switchyard/ (defaults to the current directory)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Print replies as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the .switchyard directory and a default switchyard.toml
    Init,
    /// Start, inspect and end sessions
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// Register projects and attach them to sessions
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Claim and release leases on projects and tasks
    Lock {
        #[command(subcommand)]
        command: LockCommands,
    },
    /// Inspect and edit per-role queues
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Route tasks and move them between stages
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },
    /// Submit a new task to its workflow's entry stage
    Submit {
        task_id: String,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long)]
        project: Option<String>,
        #[arg(long, default_value = "0")]
        priority: i32,
        #[arg(long)]
        workflow: Option<String>,
        /// Plan document handed to the entry worker
        #[arg(long)]
        plan: Option<PathBuf>,
        /// Drop the submission into the inbox for a running loop instead
        #[arg(long)]
        inbox: bool,
    },
    /// Report or show task progress
    Progress {
        #[command(subcommand)]
        command: ProgressCommands,
    },
    /// End stale sessions, expire lapsed locks, list orphaned checkouts and archive finished tasks
    Cleanup {
        #[arg(long)]
        dry_run: bool,
        /// Show archived progress records and handoffs instead of cleaning
        #[arg(long, conflicts_with = "dry_run")]
        list_archive: bool,
    },
    /// Remove orphaned checkouts
    Prune {
        #[arg(long)]
        dry_run: bool,
        /// Remove checkouts with uncommitted changes too
        #[arg(long)]
        force: bool,
    },
    /// Run the orchestrator loop
    Run {
        /// Run a single tick and exit
        #[arg(long)]
        once: bool,
    },
    /// Show queues, active tasks and workers
    Status,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
pub enum SessionCommands {
    /// Start a new session
    Start {
        #[arg(long)]
        id: Option<String>,
    },
    /// List sessions, newest first
    List {
        /// Include ended sessions
        #[arg(long)]
        all: bool,
    },
    /// Show one session (defaults to the current one)
    Show { id: Option<String> },
    /// End a session
    End {
        id: Option<String>,
        /// Release held locks instead of refusing
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
pub enum ProjectCommands {
    Add {
        name: String,
        path: PathBuf,
        #[arg(long)]
        remote: Option<String>,
    },
    List,
    /// Attach a project to a session
    Use {
        project: String,
        #[arg(long)]
        session: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum LockCommands {
    Claim {
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        task: Option<String>,
        #[arg(long)]
        session: Option<String>,
        /// Lease length in minutes
        #[arg(long)]
        ttl: Option<i64>,
        /// Do not create a checkout for a task claim
        #[arg(long)]
        no_checkout: bool,
    },
    Release {
        #[arg(long)]
        lock: Option<String>,
        #[arg(long)]
        all: bool,
        #[arg(long)]
        session: Option<String>,
    },
    Heartbeat {
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        lock: Option<String>,
        #[arg(long)]
        ttl: Option<i64>,
    },
    /// Expire lapsed locks
    Cleanup {
        /// Also expire locks older than the force horizon
        #[arg(long)]
        force: bool,
    },
    List {
        /// Include expired and released locks
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    Add {
        role: String,
        task_id: String,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long)]
        project: Option<String>,
        #[arg(long, default_value = "0")]
        priority: i32,
    },
    /// Remove and show the head of a queue
    Next { role: String },
    Peek { role: String },
    Clear { role: String },
    List {
        role: String,
        /// Order by priority, highest first
        #[arg(long)]
        by_priority: bool,
    },
}

#[derive(Subcommand)]
pub enum PipelineCommands {
    /// Show the entry stage of a workflow
    Route {
        #[arg(long)]
        workflow: Option<String>,
    },
    /// Move a task past its current stage
    Advance {
        task_id: String,
        stage: String,
        #[arg(long)]
        workflow: Option<String>,
        #[arg(long, default_value = "")]
        title: String,
        /// COMPLETE or FAILED
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        confidence: Option<f64>,
        #[arg(long)]
        summary: Option<String>,
        #[arg(long = "file")]
        files: Vec<String>,
        #[arg(long = "learning")]
        learnings: Vec<String>,
        #[arg(long = "blocker")]
        blockers: Vec<String>,
        #[arg(long = "recommendation")]
        recommendations: Vec<String>,
    },
    /// Position and neighbours of a stage
    Info {
        stage: String,
        #[arg(long)]
        workflow: Option<String>,
    },
    /// Handoffs recorded for a task
    Handoffs { task_id: String },
}

#[derive(Subcommand)]
pub enum ProgressCommands {
    Report {
        task_id: String,
        /// IN_PROGRESS, COMPLETE, BLOCKED or FAILED
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        message: Option<String>,
        #[arg(long)]
        confidence: Option<f64>,
        #[arg(long)]
        summary: Option<String>,
        #[arg(long = "file")]
        files: Vec<String>,
        #[arg(long = "learning")]
        learnings: Vec<String>,
        #[arg(long = "blocker")]
        blockers: Vec<String>,
        #[arg(long = "recommendation")]
        recommendations: Vec<String>,
    },
    Show { task_id: String },
}

#[derive(Subcommand, Clone, Copy)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default switchyard.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let root = match cli.root.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let ctx = match cmd::CmdContext::load(&root, cli.json, cli.verbose) {
        Ok(ctx) => ctx,
        Err(err) => {
            let reply = switchyard::errors::Reply::from_error(&err);
            cmd::print_reply(&reply, cli.json);
            return Ok(ExitCode::FAILURE);
        }
    };

    let is_loop = matches!(cli.command, Commands::Run { once: false });
    let _log_guard = switchyard::logging::init(&ctx.log_options(is_loop))?;

    let reply = match cli.command {
        Commands::Init => cmd::cmd_init(&ctx),
        Commands::Session { command } => cmd::cmd_session(&ctx, command),
        Commands::Project { command } => cmd::cmd_project(&ctx, command),
        Commands::Lock { command } => cmd::cmd_lock(&ctx, command),
        Commands::Queue { command } => cmd::cmd_queue(&ctx, command),
        Commands::Pipeline { command } => cmd::cmd_pipeline(&ctx, command),
        Commands::Submit {
            task_id,
            title,
            project,
            priority,
            workflow,
            plan,
            inbox,
        } => {
            let submission = switchyard::pipeline::TaskSubmission {
                task_id,
                title,
                project_id: project,
                priority,
                workflow,
                plan_path: plan,
            };
            cmd::cmd_submit(&ctx, submission, inbox)
        }
        Commands::Progress { command } => cmd::cmd_progress(&ctx, command),
        Commands::Cleanup {
            dry_run,
            list_archive,
        } => cmd::cmd_cleanup(&ctx, dry_run, list_archive),
        Commands::Prune { dry_run, force } => cmd::cmd_prune(&ctx, dry_run, force),
        Commands::Run { once } => cmd::cmd_run(&ctx, once).await,
        Commands::Status => cmd::cmd_status(&ctx).await,
        Commands::Config { command } => cmd::cmd_config(&ctx, command),
    };

    cmd::print_reply(&reply, cli.json);
    Ok(if reply.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
