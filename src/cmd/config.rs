//! Root setup and configuration commands: `switchyard init` and `switchyard config`.

use super::CmdContext;
use crate::ConfigCommands;
use serde_json::json;
use switchyard::config::SwitchyardToml;
use switchyard::errors::{CoordError, Reply};

pub fn cmd_init(ctx: &CmdContext) -> Reply {
    let layout = &ctx.config.layout;
    let result = layout
        .init()
        .map_err(CoordError::from)
        .and_then(|init| {
            let config_path = layout.config_file();
            let wrote_config = !config_path.exists();
            if wrote_config {
                SwitchyardToml::default().save(&config_path)?;
            }
            Ok((init, config_path, wrote_config))
        });

    Reply::from_result(result, |(init, config_path, wrote_config)| {
        let message = if init.created {
            format!("Initialized {}", init.base_dir.display())
        } else {
            format!("{} already initialized", init.base_dir.display())
        };
        Reply::ok(
            message,
            json!({
                "baseDir": init.base_dir,
                "created": init.created,
                "configFile": config_path,
                "configWritten": wrote_config,
            }),
        )
    })
}

pub fn cmd_config(ctx: &CmdContext, command: Option<ConfigCommands>) -> Reply {
    let config_path = ctx.config.layout.config_file();

    match command.unwrap_or(ConfigCommands::Show) {
        ConfigCommands::Show => {
            let source = if config_path.exists() {
                config_path.display().to_string()
            } else {
                "defaults".to_string()
            };
            let mut message = format!("Configuration from {}", source);
            match toml::to_string_pretty(&ctx.config.toml) {
                Ok(rendered) => {
                    message.push_str("\n\n");
                    message.push_str(rendered.trim_end());
                }
                Err(e) => tracing::warn!(error = %e, "could not render configuration"),
            }
            Reply::ok(
                message,
                json!({
                    "configFile": config_path,
                    "exists": config_path.exists(),
                    "config": ctx.config.toml,
                    "workerCommand": ctx.config.worker_command(),
                    "checkoutBaseDir": ctx.config.checkout_base_dir(),
                    "workerRoles": ctx.config.worker_roles(),
                }),
            )
        }
        ConfigCommands::Validate => {
            let report = ctx.config.validate();
            if report.is_valid() {
                let message = if report.warnings.is_empty() {
                    "Configuration is valid".to_string()
                } else {
                    format!(
                        "Configuration is valid with {} warning(s):\n  {}",
                        report.warnings.len(),
                        report.warnings.join("\n  ")
                    )
                };
                Reply::ok(message, &report)
            } else {
                let mut reply = Reply::from_error(&CoordError::ConfigInvalid(report.errors.join("; ")));
                if let Ok(serde_json::Value::Object(map)) = serde_json::to_value(&report) {
                    reply.payload.extend(map);
                }
                reply
            }
        }
        ConfigCommands::Init => {
            if config_path.exists() {
                return Reply::from_error(&CoordError::InvalidArgs(format!(
                    "{} already exists",
                    config_path.display()
                )));
            }
            Reply::from_result(SwitchyardToml::default().save(&config_path), |()| {
                Reply::ok(
                    format!("Wrote {}", config_path.display()),
                    json!({ "configFile": config_path }),
                )
            })
        }
    }
}
