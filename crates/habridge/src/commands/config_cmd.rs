//! Config subcommand handlers.
//!
//! On a device these edits come from the configuration portal; here they
//! write the same settings file the bridge reads.

use std::fmt::Write as _;
use std::io::BufRead;

use habridge_core::{EntityId, SelectedEntity};

use crate::cli::{ConfigArgs, ConfigCommand};
use crate::commands::Context;
use crate::error::CliError;

pub fn handle(args: &ConfigArgs, ctx: &Context) -> Result<(), CliError> {
    match &args.command {
        ConfigCommand::Show => {
            print!("{}", format_redacted(ctx)?);
            Ok(())
        }

        ConfigCommand::SetHost { host, port } => {
            let host = host.trim();
            if host.is_empty() {
                return Err(CliError::Validation {
                    field: "host".into(),
                    reason: "must not be empty".into(),
                });
            }
            ctx.settings.set_host(host)?;
            if let Some(port) = port {
                ctx.settings.set_port(*port)?;
            }
            eprintln!("Host set to {host}");
            Ok(())
        }

        ConfigCommand::SetToken { token } => {
            let token = match token {
                Some(token) => token.clone(),
                None => read_token()?,
            };
            if token.trim().is_empty() {
                return Err(CliError::Validation {
                    field: "token".into(),
                    reason: "must not be empty".into(),
                });
            }
            ctx.settings.set_api_key(&token)?;
            eprintln!("Access token stored");
            Ok(())
        }

        ConfigCommand::Select { entities } => {
            let selection = parse_selection(entities)?;
            ctx.settings.set_selection(&selection)?;
            eprintln!("Selected {} entities", selection.len());
            Ok(())
        }

        ConfigCommand::Reset => {
            ctx.settings.reset()?;
            eprintln!("Settings cleared");
            Ok(())
        }

        ConfigCommand::Path => {
            println!("config:   {}", ctx.config_path.display());
            println!("settings: {}", ctx.settings_path.display());
            Ok(())
        }
    }
}

fn read_token() -> Result<String, CliError> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_owned())
}

/// Validate ids and drop duplicates, keeping the first occurrence.
fn parse_selection(raw: &[String]) -> Result<Vec<SelectedEntity>, CliError> {
    let mut selection: Vec<SelectedEntity> = Vec::with_capacity(raw.len());
    for entry in raw {
        let entity_id = EntityId::parse(entry.trim())?;
        if selection.iter().all(|s| s.entity_id != entity_id) {
            selection.push(SelectedEntity {
                entity_id,
                friendly_name: None,
                state: None,
            });
        }
    }
    Ok(selection)
}

/// Runtime config and settings as TOML-ish text, token masked.
fn format_redacted(ctx: &Context) -> Result<String, CliError> {
    let bridge = &ctx.config.bridge;
    let mut out = String::new();

    let _ = writeln!(out, "[bridge]");
    let _ = writeln!(out, "fetch_delay_ms = {}", bridge.fetch_delay_ms);
    let _ = writeln!(out, "lock_timeout_ms = {}", bridge.lock_timeout_ms);
    let _ = writeln!(out, "request_timeout_secs = {}", bridge.request_timeout_secs);
    let _ = writeln!(out, "tick_interval_ms = {}", bridge.tick_interval_ms);
    let _ = writeln!(out, "accept_invalid_certs = {}", bridge.accept_invalid_certs);
    let _ = writeln!(out);
    let _ = writeln!(out, "[portal]");
    if let Some(ref url) = ctx.config.portal.url {
        let _ = writeln!(out, "url = \"{url}\"");
    }

    let settings = &ctx.settings;
    let _ = writeln!(out);
    let _ = writeln!(out, "[settings]");
    match settings.host() {
        Some(host) => {
            let _ = writeln!(out, "ha_host = \"{host}\"");
        }
        None => {
            let _ = writeln!(out, "# ha_host not set");
        }
    }
    let _ = writeln!(out, "ha_port = {}", settings.port());
    if settings.has_api_key() {
        let _ = writeln!(out, "ha_api_key = \"****\"");
    } else {
        let _ = writeln!(out, "# ha_api_key not set");
    }

    let selection = settings.selection()?;
    if selection.is_empty() {
        let _ = writeln!(out, "# no entities selected");
    } else {
        let ids: Vec<String> = selection
            .iter()
            .map(|s| format!("\"{}\"", s.entity_id))
            .collect();
        let _ = writeln!(out, "ha_entities = [{}]", ids.join(", "));
    }

    Ok(out)
}
