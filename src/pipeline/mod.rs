//! Pipeline routing: workflows, the stage state machine and handoff records.
//!
//! A task enters at the first stage of its workflow and only ever moves forward. Each
//! transition leaves a write-once [`Handoff`] and an item on the next stage's queue.

pub mod handoff;
pub mod router;
pub mod workflow;

pub use handoff::{
    DEFAULT_CONFIDENCE, Handoff, HandoffStatus, HandoffStore, StageResult, StoredHandoff,
};
pub use router::{
    AdvanceOutcome, PipelineRouter, RouteInfo, SubmitReceipt, TaskContext, TaskSubmission,
};
pub use workflow::{DEFAULT_WORKFLOW, NamedWorkflow, StageInfo, Workflow, WorkflowSet};
