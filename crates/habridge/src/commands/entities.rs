//! `habridge entities`: what the portal would offer for selection.

use std::fmt::Write as _;
use std::str::FromStr;

use serde::Serialize;

use habridge_core::{Domain, SelectedEntity, fetch_entity_list, selectable_entities};

use crate::cli::EntitiesArgs;
use crate::commands::Context;
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct Row<'a> {
    entity_id: &'a str,
    name: &'a str,
    state: &'a str,
    selected: bool,
}

pub async fn handle(args: &EntitiesArgs, ctx: &Context) -> Result<(), CliError> {
    let domain = args
        .domain
        .as_deref()
        .map(|raw| {
            Domain::from_str(raw).map_err(|_| CliError::Validation {
                field: "domain".into(),
                reason: format!("'{raw}' is not a supported domain"),
            })
        })
        .transpose()?;

    let credentials = ctx.credentials()?;
    let transport = ctx.bridge_config()?.transport();
    let states = fetch_entity_list(&credentials, &transport).await?;
    tracing::debug!(total = states.len(), "entity listing received");

    let selected = ctx.settings.selection()?;
    let entities: Vec<SelectedEntity> = selectable_entities(&states)
        .into_iter()
        .filter(|e| domain.is_none_or(|d| e.entity_id.domain() == d))
        .collect();

    let rows: Vec<Row<'_>> = entities
        .iter()
        .map(|e| Row {
            entity_id: e.entity_id.as_str(),
            name: e.display_name(),
            state: e.state.as_deref().unwrap_or(""),
            selected: selected.iter().any(|s| s.entity_id == e.entity_id),
        })
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        print!("{}", render_table(&rows));
    }
    Ok(())
}

fn render_table(rows: &[Row<'_>]) -> String {
    let id_width = rows
        .iter()
        .map(|r| r.entity_id.len())
        .max()
        .unwrap_or(0)
        .max("ENTITY".len());
    let name_width = rows
        .iter()
        .map(|r| r.name.chars().count())
        .max()
        .unwrap_or(0)
        .max("NAME".len());

    let mut out = String::new();
    let _ = writeln!(out, "  {:id_width$}  {:name_width$}  STATE", "ENTITY", "NAME");
    for row in rows {
        let mark = if row.selected { '*' } else { ' ' };
        let _ = writeln!(
            out,
            "{mark} {:id_width$}  {:name_width$}  {}",
            row.entity_id, row.name, row.state
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_marks_selected_rows() {
        let rows = [
            Row {
                entity_id: "light.kitchen",
                name: "Kitchen",
                state: "on",
                selected: true,
            },
            Row {
                entity_id: "cover.garage",
                name: "Garage",
                state: "closed",
                selected: false,
            },
        ];
        let table = render_table(&rows);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("ENTITY"));
        assert!(lines[1].starts_with("* light.kitchen"));
        assert!(lines[2].starts_with("  cover.garage"));
        assert!(lines[2].ends_with("closed"));
    }
}
