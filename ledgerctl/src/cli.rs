use std::io::Write;

use clap::{Parser, Subcommand};
use env_logger::Env;
use ledger::Partition;

pub const DEFAULT_LOG_FILTER: &str = "warn,ledger=info,storage=info";

/// Operator tool for the processing ledger.
#[derive(Parser, Debug)]
#[command(name = "ledgerctl", version, about)]
pub struct Cli {
    /// Config file; environment overrides use the LEDGER_ prefix
    #[arg(long, global = true, default_value = core_types::config::DEFAULT_CONFIG_FILE)]
    pub config: String,

    /// Year partition to operate on (defaults to the current UTC year)
    #[arg(long, global = true)]
    pub partition: Option<Partition>,

    /// env_logger-style filter string (e.g. "info,ledger=debug"); overrides RUST_LOG
    #[arg(long, global = true)]
    pub log_filter: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the work-item key for an object path
    Key {
        /// Object path, e.g. s3://bucket/conversations/a.parquet
        path: String,
    },

    /// Claim a key before starting work on it
    Claim {
        key: String,

        /// Mark the work item as ineligible (always rejected)
        #[arg(long)]
        ineligible: bool,
    },

    /// Confirm a claimed key
    Succeed { key: String },

    /// Record a failure for a claimed key
    Fail {
        key: String,

        #[arg(short, long)]
        message: String,
    },

    /// List every record in the partition
    Show {
        /// Emit JSON lines instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List records whose last attempt failed
    Failed,

    /// List claims that were never confirmed or failed
    Stale {
        #[arg(long, default_value_t = 60)]
        older_than_mins: i64,
    },

    /// Count records by state
    Summary,
}

impl Cli {
    pub fn partition(&self) -> Partition {
        self.partition.unwrap_or_else(Partition::current)
    }
}

pub fn init_logging(cli_filter: Option<&str>) {
    let env = Env::default().default_filter_or(DEFAULT_LOG_FILTER);
    let mut builder = env_logger::Builder::from_env(env);
    if let Some(filter) = cli_filter {
        builder.parse_filters(filter);
    }
    builder.format_timestamp_millis();
    builder.format(|buf, record| {
        let ts = buf.timestamp();
        writeln!(
            buf,
            "[{} {:<5} {}] {}",
            ts,
            record.level(),
            record.target(),
            record.args()
        )
    });
    builder.init();
}
