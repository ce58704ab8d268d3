//! Switchyard: the coordination layer for a small fleet of pipeline workers.
//!
//! Sessions take time-bounded leases on projects and tasks, every worker role owns a
//! bounded FIFO queue, and tasks move through fixed linear workflows whose review stage
//! gates advancement on reported confidence. The [`orchestrator`] ties these together in a
//! single ticking loop.

pub mod audit;
pub mod checkout;
pub mod cleanup;
pub mod config;
pub mod errors;
pub mod lock;
pub mod logging;
pub mod notify;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod project;
pub mod queue;
pub mod session;
pub mod store;
pub mod util;
pub mod worker;
