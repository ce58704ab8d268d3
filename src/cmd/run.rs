//! The orchestrator loop: `switchyard run` and `switchyard status`.

use super::CmdContext;
use switchyard::errors::{CoordError, Reply};
use switchyard::orchestrator::Orchestrator;
use tokio::sync::watch;

pub async fn cmd_run(ctx: &CmdContext, once: bool) -> Reply {
    let report = ctx.config.validate();
    if !report.is_valid() {
        return Reply::from_error(&CoordError::ConfigInvalid(report.errors.join("; ")));
    }
    for warning in &report.warnings {
        tracing::warn!("{}", warning);
    }

    let orchestrator = Orchestrator::from_config(&ctx.config);

    if once {
        return Reply::from_result(orchestrator.tick().await, |summary| {
            Reply::ok(
                format!(
                    "Tick: {} submitted, {} dispatched, {} advanced, {} completed, {} blocked",
                    summary.inbox.submitted.len(),
                    summary.dispatched.len(),
                    summary.advanced.len(),
                    summary.completed.len(),
                    summary.blocked.len()
                ),
                &summary,
            )
        });
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, finishing current tick");
            let _ = stop_tx.send(true);
        }
    });

    Reply::from_result(orchestrator.run(stop_rx).await, |()| {
        Reply::ok_message("Orchestrator stopped")
    })
}

pub async fn cmd_status(ctx: &CmdContext) -> Reply {
    let orchestrator = Orchestrator::from_config(&ctx.config);
    let status = orchestrator.status().await;

    let mut message = format!("{} active task(s)", status.active.len());
    for queue in &status.queues {
        let running = status
            .workers
            .iter()
            .any(|w| w.role == queue.role && w.running);
        message.push_str(&format!(
            "\n  {:<10} {}/{} queued  worker {}",
            queue.role.as_str(),
            queue.length,
            queue.max_length,
            if running { "up" } else { "down" }
        ));
    }
    for task in &status.active {
        message.push_str(&format!(
            "\n  {} at {} ({:?})",
            task.task_id, task.role, task.status
        ));
    }
    Reply::ok(message, &status)
}
