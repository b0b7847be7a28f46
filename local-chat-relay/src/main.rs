use std::io::{IsTerminal, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::oneshot;
use tracing::{info, warn};

use local_chat_relay::{
    cli::{Cli, Command, JoinArgs, RelayArgs, SessionArgs, StartArgs},
    client::{self, LineSource, StdinLines},
    relay::Relay,
    render::{AnsiRenderer, PlainRenderer, Renderer},
    rendezvous::Rendezvous,
    session::Session,
};

fn init_tracing(default: &str) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Start(args) => {
            init_tracing("warn");
            start(args).await
        }
        Command::Join(args) => {
            init_tracing("warn");
            join(args).await
        }
        Command::Relay(args) => {
            init_tracing("info");
            relay_only(args).await
        }
    }
}

async fn start(args: StartArgs) -> Result<()> {
    let rendezvous = Rendezvous::create(&args.relay.runtime_dir)?;
    let relay = Relay::bind(&rendezvous.socket_path(), args.relay.relay_config())
        .context("failed to bind relay socket")?;
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let relay_task = tokio::spawn(relay.run_until(async move {
        let _ = stop_rx.await;
    }));
    println!("session key: {}", rendezvous.key());
    info!(socket = %rendezvous.socket_path().display(), "session started");

    let outcome =
        match participate(&rendezvous.socket_path(), rendezvous.key(), &args.session).await {
            Ok(mut lines) => {
                println!("relay is still running... [enter] to stop");
                tokio::select! {
                    _ = lines.next_line("") => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
                Ok(())
            }
            Err(err) => Err(err),
        };

    let _ = stop_tx.send(());
    match relay_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!("relay exited with error: {err:?}"),
        Err(err) => warn!("relay task failed: {err}"),
    }
    rendezvous.teardown()?;
    outcome
}

async fn join(args: JoinArgs) -> Result<()> {
    let rendezvous = Rendezvous::existing(&args.runtime_dir, &args.key)?;
    participate(&rendezvous.socket_path(), rendezvous.key(), &args.session).await?;
    Ok(())
}

async fn relay_only(args: RelayArgs) -> Result<()> {
    let rendezvous = Rendezvous::create(&args.runtime_dir)?;
    let relay = Relay::bind(&rendezvous.socket_path(), args.relay_config())
        .context("failed to bind relay socket")?;

    println!("session key: {}", rendezvous.key());
    std::io::stdout().flush()?;
    info!(socket = %rendezvous.socket_path().display(), "relay listening");

    let outcome = relay.run_until_ctrl_c().await;
    if let Err(err) = &outcome {
        warn!("relay exited with error: {err:?}");
    }
    rendezvous.teardown()?;
    outcome
}

/// Runs one client session and hands stdin back once it ends.
async fn participate(socket: &Path, key: &str, args: &SessionArgs) -> Result<StdinLines> {
    let plain = args.plain || !std::io::stdout().is_terminal();
    let lines = StdinLines::spawn(!plain).context("failed to start input thread")?;
    let stream = client::connect(socket).await?;
    let session = Arc::new(Session::new(&args.session_config(key)));

    let shutdown = session.shutdown().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.trigger();
        }
    });

    if plain {
        let renderer = Arc::new(PlainRenderer::stdout());
        client::run_session(stream, session, lines, renderer).await
    } else {
        let renderer = Arc::new(AnsiRenderer::stdout());
        let lines = client::run_session(stream, session, lines, Arc::clone(&renderer)).await?;
        renderer.reset();
        Ok(lines)
    }
}
