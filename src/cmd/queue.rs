//! Per-role queues: `switchyard queue`.

use super::{CmdContext, parse_role};
use crate::QueueCommands;
use serde_json::json;
use switchyard::errors::Reply;
use switchyard::queue::QueueItem;

pub fn cmd_queue(ctx: &CmdContext, command: QueueCommands) -> Reply {
    let queues = ctx.queues();
    match command {
        QueueCommands::Add {
            role,
            task_id,
            title,
            project,
            priority,
        } => {
            let result = parse_role(&role).and_then(|role| {
                let mut item = QueueItem::new(&task_id, &title);
                item.project_id = project;
                item.priority = priority;
                queues.enqueue(role, item)
            });
            Reply::from_result(result, |receipt| {
                Reply::ok(
                    format!(
                        "Queued {} for {} at position {}",
                        task_id, receipt.role, receipt.position
                    ),
                    &receipt,
                )
            })
        }
        QueueCommands::Next { role } => {
            let result = parse_role(&role).and_then(|role| queues.dequeue(role));
            Reply::from_result(result, |item| match item {
                Some(item) => Reply::ok(format!("Dequeued {}", item.task_id), json!({ "item": item })),
                None => Reply::ok(format!("Queue for {} is empty", role), json!({ "item": null })),
            })
        }
        QueueCommands::Peek { role } => {
            Reply::from_result(parse_role(&role), |role| match queues.peek(role) {
                Some(item) => Reply::ok(format!("Next up: {}", item.task_id), json!({ "item": item })),
                None => Reply::ok(format!("Queue for {} is empty", role), json!({ "item": null })),
            })
        }
        QueueCommands::Clear { role } => {
            let result = parse_role(&role).and_then(|role| queues.clear(role));
            Reply::from_result(result, |cleared| {
                Reply::ok(
                    format!("Cleared {} item(s)", cleared),
                    json!({ "cleared": cleared }),
                )
            })
        }
        QueueCommands::List { role, by_priority } => {
            Reply::from_result(parse_role(&role), |role| {
                let items = if by_priority {
                    queues.prioritized(role)
                } else {
                    queues.list(role)
                };
                let mut message = format!(
                    "{}: {}/{} queued",
                    role,
                    items.len(),
                    queues.max_length()
                );
                for (index, item) in items.iter().enumerate() {
                    message.push_str(&format!(
                        "\n  {}. {}  p{}  {}",
                        index + 1,
                        item.task_id,
                        item.priority,
                        item.title
                    ));
                }
                Reply::ok(
                    message,
                    json!({
                        "role": role,
                        "length": items.len(),
                        "maxLength": queues.max_length(),
                        "items": items,
                    }),
                )
            })
        }
    }
}
