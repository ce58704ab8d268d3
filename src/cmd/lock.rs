//! Leases: `switchyard lock`.

use super::CmdContext;
use crate::LockCommands;
use serde_json::json;
use switchyard::errors::Reply;
use switchyard::lock::{ClaimRequest, ReleaseRequest};

pub fn cmd_lock(ctx: &CmdContext, command: LockCommands) -> Reply {
    let coordinator = ctx.coordinator();
    match command {
        LockCommands::Claim {
            project,
            task,
            session,
            ttl,
            no_checkout,
        } => {
            let request = ClaimRequest {
                project,
                task,
                session,
                ttl_minutes: ttl,
                no_checkout,
            };
            Reply::from_result(coordinator.claim(request), |grant| {
                let target = match (&grant.project, &grant.lock.task_id) {
                    (Some(project), Some(task)) => format!("{}/{}", project.name, task),
                    (Some(project), None) => project.name.clone(),
                    (None, Some(task)) => task.clone(),
                    (None, None) => "-".to_string(),
                };
                Reply::ok(
                    format!(
                        "Locked {} as {} until {}",
                        target,
                        grant.lock.id,
                        grant.lock.expires_at.to_rfc3339()
                    ),
                    &grant,
                )
            })
        }
        LockCommands::Release { lock, all, session } => {
            let request = ReleaseRequest { lock, all, session };
            Reply::from_result(coordinator.release(request), |outcome| {
                Reply::ok(format!("Released {} lock(s)", outcome.count), &outcome)
            })
        }
        LockCommands::Heartbeat { session, lock, ttl } => Reply::from_result(
            coordinator.heartbeat(session.as_deref(), lock.as_deref(), ttl),
            |outcome| {
                Reply::ok(
                    format!("Extended {} lock(s)", outcome.extended.len()),
                    &outcome,
                )
            },
        ),
        LockCommands::Cleanup { force } => {
            Reply::from_result(coordinator.cleanup_locks(force), |outcome| {
                Reply::ok(
                    format!(
                        "Expired {} lock(s), force-expired {}",
                        outcome.expired.len(),
                        outcome.force_expired.len()
                    ),
                    &outcome,
                )
            })
        }
        LockCommands::List { all } => {
            let locks = coordinator.list(all);
            let mut message = format!("{} lock(s)", locks.len());
            for lock in &locks {
                message.push_str(&format!(
                    "\n  {}  {:?}  owner={}  project={}  task={}",
                    lock.id,
                    lock.status,
                    lock.owner_id,
                    lock.project_id.as_deref().unwrap_or("-"),
                    lock.task_id.as_deref().unwrap_or("-"),
                ));
            }
            Reply::ok(message, json!({ "locks": locks }))
        }
    }
}
