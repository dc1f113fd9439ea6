mod cli;
mod commands;
mod console;
mod error;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, LogFormat};
use crate::commands::Context;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose, cli.global.log_format);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, format: LogFormat) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr; stdout belongs to the renderer.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "habridge", &mut std::io::stdout());
            Ok(())
        }

        Command::Config(ref args) => {
            let ctx = Context::load(&cli.global)?;
            commands::config_cmd::handle(args, &ctx)
        }

        Command::Entities(ref args) => {
            let ctx = Context::load(&cli.global)?;
            commands::entities::handle(args, &ctx).await
        }

        Command::Run(ref args) => {
            let ctx = Context::load(&cli.global)?;
            tracing::debug!(?args, "starting bridge");
            commands::run::handle(args, &ctx).await
        }
    }
}
