//! Session lifecycle: `switchyard session`.

use super::CmdContext;
use crate::SessionCommands;
use serde_json::json;
use switchyard::errors::Reply;
use switchyard::session::SessionSummary;

fn describe(summary: &SessionSummary) -> String {
    let session = &summary.session;
    let project = session
        .project
        .as_ref()
        .map(|p| p.name.as_str())
        .unwrap_or("-");
    let mut line = format!(
        "{}  {:?}  project={}  locks={}",
        session.id,
        session.status,
        project,
        session.locks.len()
    );
    if summary.is_old {
        line.push_str("  (old)");
    }
    line
}

pub fn cmd_session(ctx: &CmdContext, command: SessionCommands) -> Reply {
    match command {
        SessionCommands::Start { id } => {
            Reply::from_result(ctx.coordinator().create_session(id.as_deref()), |session| {
                Reply::ok(
                    format!("Session {} started", session.id),
                    json!({ "sessionId": session.id, "session": session }),
                )
            })
        }
        SessionCommands::List { all } => {
            let sessions = ctx.sessions().list(all);
            let mut message = format!("{} session(s)", sessions.len());
            for summary in &sessions {
                message.push_str("\n  ");
                message.push_str(&describe(summary));
            }
            Reply::ok(message, json!({ "sessions": sessions }))
        }
        SessionCommands::Show { id } => {
            let sessions = ctx.sessions();
            Reply::from_result(sessions.resolve(id.as_deref()), |session| {
                let now = chrono::Utc::now();
                let summary = SessionSummary {
                    is_old: session.is_active() && session.is_old(sessions.ttl_hours(), now),
                    session,
                };
                Reply::ok(describe(&summary), json!({ "session": summary }))
            })
        }
        SessionCommands::End { id, force } => {
            Reply::from_result(ctx.coordinator().end_session(id.as_deref(), force), |ended| {
                Reply::ok(
                    format!(
                        "Session {} ended ({} lock(s) released)",
                        ended.session_id,
                        ended.released.len()
                    ),
                    &ended,
                )
            })
        }
    }
}
