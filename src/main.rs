use bustmaker::app::{App, Stores};
use bustmaker::config::AppConfig;
use bustmaker::interfaces::csv::account_writer::AccountWriter;
use bustmaker::telemetry;
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use serde_json::json;
use std::io;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "Operator tool for the credit and generation pipeline", long_about = None)]
struct Cli {
    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Webhook signing secret. Overrides BUSTMAKER_WEBHOOK_SECRET.
    #[arg(long, global = true, env = "BUSTMAKER_WEBHOOK_SECRET", hide_env_values = true)]
    webhook_secret: Option<String>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the pricing catalogue as JSON.
    Plans,
    /// Write every credit account to stdout as CSV.
    ExportAccounts,
    /// Re-drive missing payment credits and re-dispatch stuck generation jobs.
    Sweep,
    /// Replay a captured provider webhook.
    Webhook {
        /// Signature header value sent with the event.
        #[arg(long)]
        signature: String,
        /// File holding the raw event body.
        payload: PathBuf,
    },
}

fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    let Some(db_path) = db_path else {
        return Ok(Stores::in_memory());
    };
    #[cfg(feature = "storage-rocksdb")]
    {
        Stores::rocksdb(db_path).into_diagnostic()
    }
    #[cfg(not(feature = "storage-rocksdb"))]
    {
        tracing::warn!(
            path = %db_path.display(),
            "built without storage-rocksdb, falling back to in-memory storage"
        );
        Ok(Stores::in_memory())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::from_env().into_diagnostic()?;
    if cli.webhook_secret.is_some() {
        config.webhook_secret = cli.webhook_secret;
    }
    config.log_json |= cli.log_json;
    telemetry::init(config.log_json);

    let stores = open_stores(cli.db_path)?;
    let app = App::build(&config, stores).into_diagnostic()?;

    match cli.command {
        Command::Plans => {
            let catalogue = serde_json::to_string_pretty(app.reconciler.catalogue()).into_diagnostic()?;
            println!("{catalogue}");
        }
        Command::ExportAccounts => {
            let accounts = app.ledger.accounts().await.into_diagnostic()?;
            let stdout = io::stdout();
            let mut writer = AccountWriter::new(stdout.lock());
            writer.write_accounts(accounts).into_diagnostic()?;
        }
        Command::Sweep => {
            let (credits, jobs) = app.sweep().await.into_diagnostic()?;
            app.orchestrator.dispatcher().wait_idle().await;
            println!(
                "{}",
                json!({
                    "payments": {
                        "examined": credits.examined,
                        "regranted": credits.regranted,
                        "failed": credits.failed,
                    },
                    "projects": {
                        "examined": jobs.examined,
                        "redispatched": jobs.redispatched,
                    },
                })
            );
        }
        Command::Webhook { signature, payload } => {
            let body = std::fs::read(&payload).into_diagnostic()?;
            let ack = app
                .reconciler
                .handle_webhook(&body, Some(&signature))
                .await
                .into_diagnostic()?;
            println!("{ack:?}");
        }
    }

    Ok(())
}
