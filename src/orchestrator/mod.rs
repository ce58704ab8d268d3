//! The polling scheduler and its durable bookkeeping.

pub mod inbox;
pub mod runner;
pub mod state;

pub use inbox::{Inbox, InboxSummary};
pub use runner::{Orchestrator, StatusReport, TickSummary, dispatch_instruction};
pub use state::{ActiveTask, ActiveTaskStore, AssignmentStatus};
