mod cli;

use std::{process, sync::Arc};

use chrono::{SecondsFormat, TimeDelta};
use clap::Parser;
use cli::{Cli, Command};
use config::ConfigError;
use core_types::{
    config::{AppConfig, StoreBackend},
    KeyDeriver, KeyError,
};
use ledger::{Admission, LedgerConfig, LedgerController, LedgerError, Record};
use storage::{BlobStore, MemoryBlobStore, S3BlobStore, S3Settings};
use thiserror::Error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    cli::init_logging(cli.log_filter.as_deref());
    if let Err(err) = run(cli).await {
        eprintln!("ledgerctl failed: {err}");
        process::exit(1);
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("keys.hash_key_hex is not configured (set LEDGER_KEYS__HASH_KEY_HEX)")]
    MissingHashKey,
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("failed to render JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("--older-than-mins must not be negative (got {0})")]
    NegativeAge(i64),
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = AppConfig::load_from(&cli.config)?;
    let partition = cli.partition();

    if let Command::Key { path } = &cli.command {
        let secret = config
            .keys
            .hash_key_hex
            .as_deref()
            .ok_or(CliError::MissingHashKey)?;
        let key = KeyDeriver::from_hex(secret)?.derive(path)?;
        println!("{key}");
        return Ok(());
    }

    let ledger_config = LedgerConfig::from_settings(&config.ledger, partition);
    let controller = LedgerController::bootstrap(open_blob_store(&config), ledger_config);
    log::info!(
        "using ledger snapshot {} ({:?} backend)",
        controller.store().object_key(),
        config.store.backend
    );

    match cli.command {
        Command::Key { .. } => {}
        Command::Claim { key, ineligible } => match controller.claim(&key, !ineligible).await? {
            Admission::Fresh => println!("claimed {key}"),
            Admission::Resumed { prior } => println!(
                "claimed {key} (resuming after: {})",
                prior.error_message.as_deref().unwrap_or("unknown error")
            ),
        },
        Command::Succeed { key } => {
            let record = controller.record_success(&key).await?;
            print_record(&record);
        }
        Command::Fail { key, message } => {
            let record = controller.record_failure(&key, message).await?;
            print_record(&record);
        }
        Command::Show { json } => {
            let snapshot = controller.snapshot().await?;
            if json {
                for record in &snapshot.records {
                    println!("{}", serde_json::to_string(record)?);
                }
            } else {
                print_table(snapshot.records.iter());
            }
        }
        Command::Failed => print_table(controller.failed().await?.iter()),
        Command::Stale { older_than_mins } => {
            if older_than_mins < 0 {
                return Err(CliError::NegativeAge(older_than_mins));
            }
            let claims = controller
                .stale_claims(TimeDelta::minutes(older_than_mins))
                .await?;
            print_table(claims.iter());
        }
        Command::Summary => {
            let summary = controller.summary().await?;
            println!(
                "partition {}: {} records ({} processed, {} failed, {} idle)",
                controller.partition(),
                summary.total,
                summary.processed,
                summary.failed,
                summary.idle
            );
        }
    }
    Ok(())
}

fn open_blob_store(config: &AppConfig) -> Arc<dyn BlobStore> {
    match config.store.backend {
        StoreBackend::S3 => Arc::new(S3BlobStore::new(&S3Settings::from(&config.store))),
        StoreBackend::Memory => {
            log::warn!("memory backend selected; nothing outlives this process");
            Arc::new(MemoryBlobStore::new())
        }
    }
}

fn print_record(record: &Record) {
    println!(
        "{} processed={} errored={} at {}{}",
        record.work_item_key,
        record.processed,
        record.errored,
        record
            .occurrence_timestamp
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        record
            .error_message
            .as_deref()
            .map(|message| format!(" ({message})"))
            .unwrap_or_default()
    );
}

fn print_table<'a>(records: impl Iterator<Item = &'a Record>) {
    let mut count = 0;
    for record in records {
        print_record(record);
        count += 1;
    }
    if count == 0 {
        println!("no records");
    }
}
