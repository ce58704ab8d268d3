//! Routing, stage transitions and progress: `switchyard pipeline`, `submit`, `progress`.

use super::{CmdContext, parse_role};
use crate::{PipelineCommands, ProgressCommands};
use serde_json::json;
use switchyard::errors::{CoordError, CoordResult, Reply};
use switchyard::orchestrator::Inbox;
use switchyard::pipeline::{AdvanceOutcome, StageResult, TaskContext, TaskSubmission};
use switchyard::progress::{ProgressReport, TaskStatus};

fn parse_status(raw: Option<&str>) -> CoordResult<Option<TaskStatus>> {
    raw.map(str::parse).transpose()
}

pub fn cmd_pipeline(ctx: &CmdContext, command: PipelineCommands) -> Reply {
    let router = ctx.router();
    match command {
        PipelineCommands::Route { workflow } => {
            Reply::from_result(router.route_task(workflow.as_deref()), |route| {
                let stages: Vec<&str> = route.pipeline.iter().map(|s| s.as_str()).collect();
                Reply::ok(
                    format!(
                        "Workflow {} enters at {} ({})",
                        route.workflow,
                        route.entry_stage,
                        stages.join(" -> ")
                    ),
                    &route,
                )
            })
        }
        PipelineCommands::Advance {
            task_id,
            stage,
            workflow,
            title,
            status,
            confidence,
            summary,
            files,
            learnings,
            blockers,
            recommendations,
        } => {
            let result = (|| -> CoordResult<AdvanceOutcome> {
                let stage = parse_role(&stage)?;
                let status = parse_status(status.as_deref())?;
                let task = TaskContext {
                    task_id: task_id.clone(),
                    title,
                    workflow,
                    ..Default::default()
                };
                let stage_result = StageResult {
                    status,
                    confidence,
                    summary,
                    files_changed: files,
                    learnings,
                    blockers,
                    recommendations,
                };
                router.advance(&task, stage, &stage_result)
            })();
            Reply::from_result(result, |outcome| {
                let message = match &outcome {
                    AdvanceOutcome::Complete { workflow, .. } => {
                        format!("{} completed workflow {}", task_id, workflow)
                    }
                    AdvanceOutcome::Advanced {
                        from,
                        next,
                        position,
                        ..
                    } => format!(
                        "{} moved {} -> {} (position {})",
                        task_id, from, next, position
                    ),
                };
                let mut reply = Reply::ok(message, &outcome);
                reply
                    .payload
                    .insert("complete".to_string(), json!(outcome.is_complete()));
                reply
            })
        }
        PipelineCommands::Info { stage, workflow } => {
            let result = parse_role(&stage).and_then(|stage| {
                let info = router.stage_info(workflow.as_deref(), stage)?;
                let needs_review = router.needs_review_before_advance(workflow.as_deref(), stage)?;
                Ok((info, needs_review))
            });
            Reply::from_result(result, |(info, needs_review)| {
                let next = info.next.map(|n| n.to_string()).unwrap_or_else(|| "-".into());
                let mut reply = Reply::ok(
                    format!(
                        "{} is stage {}/{} (next: {})",
                        info.stage,
                        info.index + 1,
                        info.total,
                        next
                    ),
                    &info,
                );
                reply
                    .payload
                    .insert("needsReviewBeforeAdvance".to_string(), json!(needs_review));
                reply
            })
        }
        PipelineCommands::Handoffs { task_id } => {
            Reply::from_result(router.handoffs().list(&task_id), |handoffs| {
                let mut message = format!("{} handoff(s) for {}", handoffs.len(), task_id);
                for handoff in &handoffs {
                    message.push_str(&format!(
                        "\n  {} -> {}  {:.2}  {}",
                        handoff.from, handoff.to, handoff.confidence, handoff.summary
                    ));
                }
                Reply::ok(message, json!({ "handoffs": handoffs }))
            })
        }
    }
}

pub fn cmd_submit(ctx: &CmdContext, submission: TaskSubmission, inbox: bool) -> Reply {
    if inbox {
        let task_id = submission.task_id.clone();
        return Reply::from_result(
            Inbox::new(ctx.store.clone()).drop_submission(&submission),
            |path| {
                Reply::ok(
                    format!("{} dropped into the inbox", task_id),
                    json!({ "taskId": task_id, "path": path }),
                )
            },
        );
    }

    Reply::from_result(ctx.router().submit(submission), |receipt| {
        Reply::ok(
            format!(
                "{} queued for {} at position {}",
                receipt.task_id, receipt.route.entry_stage, receipt.position
            ),
            &receipt,
        )
    })
}

pub fn cmd_progress(ctx: &CmdContext, command: ProgressCommands) -> Reply {
    let progress = ctx.progress();
    match command {
        ProgressCommands::Report {
            task_id,
            status,
            message,
            confidence,
            summary,
            files,
            learnings,
            blockers,
            recommendations,
        } => {
            let result = parse_status(status.as_deref()).and_then(|status| {
                progress.report(
                    &task_id,
                    ProgressReport {
                        status,
                        message,
                        confidence,
                        summary,
                        files_changed: files,
                        learnings,
                        blockers,
                        recommendations,
                    },
                )
            });
            Reply::from_result(result, |record| {
                Reply::ok(
                    format!("{} is {} at {}", record.task_id, record.status, record.role),
                    json!({ "progress": record }),
                )
            })
        }
        ProgressCommands::Show { task_id } => {
            let result = progress.read(&task_id).and_then(|record| {
                record.ok_or_else(|| {
                    CoordError::InvalidArgs(format!("No progress record for task '{}'", task_id))
                })
            });
            Reply::from_result(result, |record| {
                let mut message = format!(
                    "{} is {} at {} (updated {})",
                    record.task_id,
                    record.status,
                    record.role,
                    record.updated_at.to_rfc3339()
                );
                for line in record.log.iter().rev().take(5).rev() {
                    message.push_str(&format!(
                        "\n  {}  {}",
                        line.timestamp.format("%H:%M:%S"),
                        line.message
                    ));
                }
                Reply::ok(message, json!({ "progress": record }))
            })
        }
    }
}
