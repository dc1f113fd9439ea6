//! `habridge run`: the bridge lifecycle with the console renderer.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use habridge_core::{LogIndicator, Orchestrator, PlatformEvent, SettingsGate};

use crate::cli::RunArgs;
use crate::commands::Context;
use crate::console;
use crate::error::CliError;

pub async fn handle(args: &RunArgs, ctx: &Context) -> Result<(), CliError> {
    let bridge = ctx.bridge_config()?;
    let portal_url = bridge.portal_url.clone().unwrap_or_default();
    let gate = Arc::new(SettingsGate::new(ctx.settings.clone(), portal_url));

    let mut orchestrator = Orchestrator::new(
        bridge,
        ctx.settings.clone(),
        gate.clone(),
        Arc::new(LogIndicator),
    );
    let cancel = CancellationToken::new();

    let renderer = tokio::spawn(console::render(
        orchestrator.events(),
        orchestrator.reader(),
        args.events,
        cancel.clone(),
    ));

    if let Err(e) = orchestrator.initialize() {
        cancel.cancel();
        let _ = renderer.await;
        return Err(e.into());
    }

    // A host process is online by the time it starts the bridge.
    orchestrator
        .handle_platform_event(PlatformEvent::NetworkConnected)
        .await;
    info!(state = %orchestrator.current_state(), "bridge started");

    if !args.no_input {
        tokio::spawn(console::read_input(
            orchestrator.sender(),
            gate.clone(),
            orchestrator.reader(),
            cancel.clone(),
        ));
    }
    spawn_signal_handlers(&gate, &cancel);

    orchestrator.run(cancel.clone()).await;
    cancel.cancel();
    if let Err(e) = renderer.await {
        warn!(error = %e, "renderer ended abnormally");
    }
    Ok(())
}

/// Ctrl-C stops the bridge; SIGHUP re-reads the settings file.
fn spawn_signal_handlers(gate: &Arc<SettingsGate>, cancel: &CancellationToken) {
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        warn!(error = %e, "cannot listen for Ctrl-C");
                        return;
                    }
                    info!("interrupt received, stopping");
                    cancel.cancel();
                }
            }
        });
    }

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let gate = Arc::clone(gate);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut hangup = match signal(SignalKind::hangup()) {
                Ok(hangup) => hangup,
                Err(e) => {
                    warn!(error = %e, "cannot listen for SIGHUP");
                    return;
                }
            };
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    received = hangup.recv() => {
                        if received.is_none() {
                            break;
                        }
                        info!("SIGHUP received, reloading settings");
                        gate.notify_changed();
                    }
                }
            }
        });
    }
}
