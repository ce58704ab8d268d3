//! Project registry: `switchyard project`.

use super::CmdContext;
use crate::ProjectCommands;
use serde_json::json;
use switchyard::errors::Reply;

pub fn cmd_project(ctx: &CmdContext, command: ProjectCommands) -> Reply {
    let projects = ctx.projects();
    match command {
        ProjectCommands::Add { name, path, remote } => {
            Reply::from_result(projects.add(&name, &path, remote.as_deref()), |project| {
                Reply::ok(
                    format!("Project {} added as {}", project.name, project.id),
                    json!({ "project": project }),
                )
            })
        }
        ProjectCommands::List => {
            let list = projects.list();
            let mut message = format!("{} project(s)", list.len());
            for project in &list {
                message.push_str(&format!(
                    "\n  {}  {}  {}",
                    project.id,
                    project.name,
                    project.path.display()
                ));
            }
            Reply::ok(message, json!({ "projects": list }))
        }
        ProjectCommands::Use { project, session } => {
            let sessions = ctx.sessions();
            Reply::from_result(
                projects.use_project(&sessions, &project, session.as_deref()),
                |(project, session)| {
                    Reply::ok(
                        format!("Session {} now on {}", session.id, project.name),
                        json!({ "project": project, "sessionId": session.id }),
                    )
                },
            )
        }
    }
}
