mod cli;
mod error;
mod output;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mysbridge_config::FileFormat;
use mysbridge_core::{Bridge, CoreError, bindings_from_config};

use crate::cli::{CheckArgs, Cli, Command, GlobalOpts, LogFormat};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

/// `RUST_LOG` wins, then `-v` flags, then the configured level.
fn init_tracing(verbosity: u8, configured: &str, format: LogFormat) {
    let fallback = match verbosity {
        0 => configured,
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Some(Command::Completions(args)) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "mysbridge", &mut std::io::stdout());
            Ok(())
        }
        Some(Command::Check(args)) => check(&cli.global, &args),
        Some(Command::Run) | None => serve(&cli.global).await,
    }
}

fn check(global: &GlobalOpts, args: &CheckArgs) -> Result<(), CliError> {
    let config = mysbridge_config::load(&global.config)?;
    let bridge_config = config.to_bridge_config()?;
    let bindings = bindings_from_config(&bridge_config);
    let color = output::should_color(global.color);

    if args.print {
        let format = FileFormat::from_path(&global.config);
        println!("{}", mysbridge_config::render(&config, format)?);
    }
    println!("{}", output::gateway_summary(&bridge_config, color));
    println!("{}", output::binding_table(&bindings));
    println!(
        "{}",
        output::verdict(bindings.len(), bridge_config.gateways.len(), color)
    );
    Ok(())
}

async fn serve(global: &GlobalOpts) -> Result<(), CliError> {
    let config = mysbridge_config::load(&global.config)?;
    init_tracing(global.verbose, &config.log_level, global.log_format);

    let bridge = Bridge::new(config.to_bridge_config()?)?;
    let cancel = bridge.cancellation();
    tokio::spawn(shutdown_signal(cancel.clone()));

    info!(config = %global.config.display(), "starting bridge");
    match bridge.start().await {
        Ok(()) => {}
        Err(CoreError::Cancelled) => {
            info!("startup interrupted");
            bridge.shutdown().await;
            return Ok(());
        }
        Err(e) => {
            bridge.shutdown().await;
            return Err(e.into());
        }
    }

    info!("bridge running");
    cancel.cancelled().await;
    info!("shutting down");
    bridge.shutdown().await;
    Ok(())
}

/// Cancel `cancel` on SIGINT or SIGTERM.
async fn shutdown_signal(cancel: CancellationToken) {
    let terminate = async {
        #[cfg(unix)]
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
        #[cfg(not(unix))]
        std::future::pending::<()>().await;
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => return,
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "cannot listen for ctrl-c");
                return;
            }
            info!("interrupt received");
        }
        () = terminate => info!("terminate received"),
    }
    cancel.cancel();
}
