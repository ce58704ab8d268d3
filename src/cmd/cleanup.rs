//! Garbage collection: `switchyard cleanup` and `switchyard prune`.

use super::CmdContext;
use switchyard::errors::Reply;

pub fn cmd_cleanup(ctx: &CmdContext, dry_run: bool, list_archive: bool) -> Reply {
    if list_archive {
        return Reply::from_result(ctx.cleaner().archive_contents(), |months| {
            let mut message = format!("{} archive month(s)", months.len());
            for (month, contents) in &months {
                message.push_str(&format!(
                    "\n  {}: {} progress record(s), {} handoff file(s)",
                    month,
                    contents.progress.len(),
                    contents.handoffs.len()
                ));
            }
            Reply::ok(message, serde_json::json!({ "months": months }))
        });
    }

    Reply::from_result(ctx.cleaner().run(dry_run), |report| {
        let verb = if dry_run { "Would end" } else { "Ended" };
        let mut message = format!(
            "{} {} session(s); {} lock(s) released, {} expired; {} orphaned checkout(s); {} task(s) archived",
            verb,
            report.sessions_ended.len(),
            report.locks_released.len(),
            report.locks_expired.len(),
            report.orphaned_checkouts.len(),
            report.archive.tasks.len()
        );
        for orphan in &report.orphaned_checkouts {
            message.push_str(&format!("\n  {} ({:?})", orphan.path.display(), orphan.reason));
        }
        Reply::ok(message, &report)
    })
}

pub fn cmd_prune(ctx: &CmdContext, dry_run: bool, force: bool) -> Reply {
    Reply::from_result(ctx.cleaner().prune(dry_run, force), |report| {
        let verb = if dry_run { "Would remove" } else { "Removed" };
        let mut message = format!(
            "{} {} checkout(s), skipped {}",
            verb,
            report.removed.len(),
            report.skipped.len()
        );
        for skip in &report.skipped {
            message.push_str(&format!("\n  {} {}: {}", skip.error, skip.path.display(), skip.message));
        }
        Reply::ok(message, &report)
    })
}
