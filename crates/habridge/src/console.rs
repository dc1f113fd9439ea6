// ── Console renderer ──
//
// Stands in for the device UI: prints app events as they arrive and turns
// lines typed on stdin into platform events.

use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use habridge_core::event::wire::WireEvent;
use habridge_core::{
    AppEvent, EntitySnapshot, Intent, PlatformEvent, PlatformSender, SettingsGate, StoreReader,
};

use crate::cli::EventFormat;

const HELP: &str = "\
intents:   light-on|light-off|switch-on|switch-off <id>
           cover-open|cover-close|cover-stop <id>
           climate-set-mode <id> <mode>, climate-set-temperature <id> <temp>
           fetch <id>, all-lights-off, all-covers-down, all-switches-off
platform:  network-up, network-down, reload
wire:      wire <code> [value] [payload]
other:     list, help, quit";

// ── Output ──────────────────────────────────────────────────────────

/// One printable line for `event`. `snapshot` is the cached state of the
/// entity an `EntityUpdated` refers to.
pub fn format_event(
    event: &AppEvent,
    snapshot: Option<&EntitySnapshot>,
    format: EventFormat,
) -> String {
    match format {
        EventFormat::Json => serde_json::to_string(event).unwrap_or_else(|e| {
            warn!(error = %e, "event not serializable");
            event.kind().to_owned()
        }),
        EventFormat::Wire => match WireEvent::try_from(event) {
            Ok(wire) => format!("{} {} {}", wire.code, wire.value, wire.payload)
                .trim_end()
                .to_owned(),
            Err(e) => {
                warn!(error = %e, "event not encodable");
                format!("! {e}")
            }
        },
        EventFormat::Text => match (event, snapshot) {
            (AppEvent::EntityUpdated { id }, Some(snapshot)) => {
                format!("{} {id} {} = {}", event.kind(), snapshot.display_name(), snapshot.state)
            }
            _ => event.to_string(),
        },
    }
}

fn format_snapshot(snapshot: &EntitySnapshot) -> String {
    let mut line = format!("{}  {}  {}", snapshot.id, snapshot.display_name(), snapshot.state);
    if let Some(target) = snapshot.target_temperature() {
        let _ = write!(line, "  target {target}");
    }
    if let Some(current) = snapshot.current_temperature() {
        let _ = write!(line, "  current {current}");
    }
    line
}

/// Print app events until `cancel` fires, then flush what is queued.
pub async fn render(
    mut events: broadcast::Receiver<AppEvent>,
    reader: StoreReader,
    format: EventFormat,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            event = events.recv() => event,
            () = cancel.cancelled() => break,
        };
        match event {
            Ok(event) => print_event(&event, &reader, format).await,
            Err(RecvError::Lagged(missed)) => warn!(missed, "renderer fell behind"),
            Err(RecvError::Closed) => return,
        }
    }
    while let Ok(event) = events.try_recv() {
        print_event(&event, &reader, format).await;
    }
}

async fn print_event(event: &AppEvent, reader: &StoreReader, format: EventFormat) {
    let snapshot = match event {
        AppEvent::EntityUpdated { id } => reader.get(id).await.ok().flatten(),
        _ => None,
    };
    println!("{}", format_event(event, snapshot.as_deref(), format));
}

// ── Input ───────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum ConsoleCommand {
    Skip,
    Help,
    List,
    Reload,
    Quit,
    Platform(PlatformEvent),
}

pub fn parse_line(line: &str) -> Result<ConsoleCommand, String> {
    let line = line.trim();
    let mut parts = line.split_whitespace();
    let Some(word) = parts.next() else {
        return Ok(ConsoleCommand::Skip);
    };

    let command = match word {
        "help" | "?" => ConsoleCommand::Help,
        "list" => ConsoleCommand::List,
        "reload" => ConsoleCommand::Reload,
        "quit" | "exit" => ConsoleCommand::Quit,
        "network-up" => ConsoleCommand::Platform(PlatformEvent::NetworkConnected),
        "network-down" => ConsoleCommand::Platform(PlatformEvent::NetworkLost),
        "wire" => {
            let code = parts
                .next()
                .and_then(|c| c.parse::<u16>().ok())
                .ok_or("'wire' needs a numeric code")?;
            let value = match parts.next() {
                Some(v) => v.parse::<i32>().map_err(|_| "wire value must be an integer")?,
                None => 0,
            };
            let payload = parts.next().unwrap_or("");
            let wire = WireEvent::exact(code, value, payload).map_err(|e| e.to_string())?;
            let event = PlatformEvent::try_from(&wire).map_err(|e| e.to_string())?;
            ConsoleCommand::Platform(event)
        }
        _ => {
            let intent = Intent::from_str(line).map_err(|e| e.to_string())?;
            ConsoleCommand::Platform(intent.into())
        }
    };
    Ok(command)
}

/// Read stdin line by line until EOF, `quit` or cancellation. Both EOF and
/// `quit` stop the bridge.
pub async fn read_input(
    sender: PlatformSender,
    gate: Arc<SettingsGate>,
    reader: StoreReader,
    cancel: CancellationToken,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => return,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("stdin closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "stdin read failed");
                break;
            }
        };

        match parse_line(&line) {
            Ok(ConsoleCommand::Skip) => {}
            Ok(ConsoleCommand::Help) => println!("{HELP}"),
            Ok(ConsoleCommand::List) => match reader.snapshots().await {
                Ok(snapshots) if snapshots.is_empty() => println!("(no entities cached)"),
                Ok(snapshots) => {
                    for snapshot in snapshots {
                        println!("{}", format_snapshot(&snapshot));
                    }
                }
                Err(e) => eprintln!("{e}"),
            },
            Ok(ConsoleCommand::Reload) => gate.notify_changed(),
            Ok(ConsoleCommand::Quit) => break,
            Ok(ConsoleCommand::Platform(event)) => {
                if sender.send(event).is_err() {
                    break;
                }
            }
            Err(message) => eprintln!("{message} (try 'help')"),
        }
    }
    cancel.cancel();
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use habridge_core::EntityId;

    use super::*;

    fn id(raw: &str) -> EntityId {
        EntityId::parse(raw).unwrap()
    }

    #[test]
    fn intents_and_platform_words_parse() {
        assert_eq!(
            parse_line("light-on light.kitchen").unwrap(),
            ConsoleCommand::Platform(PlatformEvent::App(Intent::LightOn {
                id: id("light.kitchen")
            }))
        );
        assert_eq!(
            parse_line("  network-down ").unwrap(),
            ConsoleCommand::Platform(PlatformEvent::NetworkLost)
        );
        assert_eq!(parse_line("").unwrap(), ConsoleCommand::Skip);
        assert_eq!(parse_line("quit").unwrap(), ConsoleCommand::Quit);
    }

    #[test]
    fn wire_lines_decode_through_the_channel_encoding() {
        assert_eq!(
            parse_line("wire 2").unwrap(),
            ConsoleCommand::Platform(PlatformEvent::NetworkLost)
        );
        assert_eq!(
            parse_line("wire 143 0 light.porch").unwrap(),
            ConsoleCommand::Platform(PlatformEvent::App(Intent::LightOn {
                id: id("light.porch")
            }))
        );
        assert!(parse_line("wire 99").is_err());
        assert!(parse_line("wire x").is_err());
    }

    #[test]
    fn unknown_words_are_errors() {
        let err = parse_line("dance light.kitchen").unwrap_err();
        assert!(err.contains("dance"));
    }

    #[test]
    fn text_format_includes_cached_state() {
        let kitchen = id("light.kitchen");
        let snapshot =
            EntitySnapshot::parse(&kitchen, r#"{"state":"on","attributes":{"friendly_name":"Kitchen"}}"#)
                .unwrap();
        let event = AppEvent::EntityUpdated { id: kitchen };

        assert_eq!(
            format_event(&event, Some(&snapshot), EventFormat::Text),
            "entity-updated light.kitchen Kitchen = on"
        );
        assert_eq!(
            format_event(&event, None, EventFormat::Text),
            "entity-updated light.kitchen"
        );
    }

    #[test]
    fn json_and_wire_formats() {
        let event = AppEvent::ConfigSet;
        assert_eq!(
            format_event(&event, None, EventFormat::Json),
            r#"{"kind":"config_set"}"#
        );
        assert_eq!(format_event(&event, None, EventFormat::Wire), "103 0");
    }

    #[test]
    fn unencodable_events_print_the_wire_error() {
        let event = AppEvent::EntityUpdated {
            id: id(&format!("sensor.{}", "t".repeat(130))),
        };
        let line = format_event(&event, None, EventFormat::Wire);
        assert!(line.starts_with("! payload for code 123"), "{line}");
    }
}
