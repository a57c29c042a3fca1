//! `webhook-entities` entry point.
//!
//! Reads configuration, installs the tracing subscriber, opens the adapters
//! each command needs under the data directory, and runs it:
//!
//! | Command | Effect |
//! |---------|--------|
//! | `serve` | HTTP listener plus the scheduled queue runner, until Ctrl-C |
//! | `process-queue` | One queue run, then exit; refused while `serve` owns the data directory |
//! | `set-token` | Stores the expected `Authorization` header value |
//! | `dead-letters list` / `dead-letters requeue` | Inspect or retry dead-lettered items |

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use reconcile::{DeadLetterQueue, QueueItemId};
use storage::{FileSettings, SpoolDeadLetters, WebhookSettings};
use tokio::net::TcpListener;
use tokio::sync::watch;

mod app;
mod config;
mod telemetry;

use app::App;
use config::AppConfig;

#[derive(Debug, Parser)]
#[command(name = "webhook-entities", version, about = "Reconcile webhook entity notifications into a local record store")]
struct Cli {
    /// Directory holding the queue, the record store, and the settings file.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the webhook listener and the scheduled queue worker.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },

    /// Process queued notifications once and exit.
    ProcessQueue,

    /// Set the token webhook callers must send in the `Authorization` header.
    SetToken { token: String },

    /// Inspect or requeue notifications that could not be processed.
    DeadLetters {
        #[command(subcommand)]
        command: DeadLetterCommands,
    },
}

#[derive(Debug, Subcommand)]
enum DeadLetterCommands {
    /// List dead-lettered items with the reason they failed.
    List,
    /// Move a dead-lettered item back onto the work queue.
    Requeue { id: QueueItemId },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::from_env()?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    let _telemetry = telemetry::init(config.log_format, config.otlp_endpoint.as_deref())?;

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            serve(App::open(config).await?).await
        }
        Commands::ProcessQueue => {
            let summary = App::open(config).await?.runner().run_once().await?;
            println!("{summary}");
            Ok(())
        }
        Commands::SetToken { token } => {
            let settings = FileSettings::new(config.settings_path());
            settings.save(&WebhookSettings::with_token(token)?).await?;
            println!("token saved to {}", settings.path().display());
            Ok(())
        }
        Commands::DeadLetters { command } => {
            // Leaves the spool's owner (a running `serve`) undisturbed.
            let dead_letters = SpoolDeadLetters::open(config.queue_dir()).await?;
            match command {
                DeadLetterCommands::List => {
                    for dead in dead_letters.list().await? {
                        println!(
                            "{}\t{}\t{}",
                            dead.item.id, dead.dead_lettered_at, dead.reason
                        );
                    }
                    Ok(())
                }
                DeadLetterCommands::Requeue { id } => {
                    let item_id = dead_letters
                        .requeue(id)
                        .await?
                        .with_context(|| format!("no dead letter with id {id}"))?;
                    tracing::info!(item_id = %item_id, "dead letter requeued");
                    println!("{item_id}");
                    Ok(())
                }
            }
        }
    }
}

async fn serve(app: App) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let runner = app.runner();
    let interval = app.config.worker_interval;
    let worker_task = tokio::spawn(async move { runner.run(interval, shutdown_rx).await });

    let addr = (app.config.host.as_str(), app.config.port);
    let tcp = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}:{}", app.config.host, app.config.port))?;

    let mut server_shutdown = shutdown_tx.subscribe();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            return;
        }
        tracing::info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    listener::serve(tcp, app.listener_state(), async move {
        loop {
            let stop = *server_shutdown.borrow_and_update();
            if stop || server_shutdown.changed().await.is_err() {
                break;
            }
        }
    })
    .await?;

    worker_task.await?;
    Ok(())
}
