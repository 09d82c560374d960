use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "pgfilterproxy",
    version,
    about = "Postgres proxy that only forwards allow-listed queries"
)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Log filter used when RUST_LOG is not set, e.g. "info" or "pgfilter_proxy=debug"
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Defaults to `serve` with the default config file.
    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the proxy. SIGHUP reloads the config; SIGINT or SIGTERM stops it.
    Serve {
        /// Path to the YAML config file
        #[arg(env = "PGFILTER_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Validate a config file without starting the proxy
    Check {
        /// Path to the YAML config file
        #[arg(env = "PGFILTER_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Print the fingerprint of a query, for adding to allowed_fingerprints
    Fingerprint {
        /// SQL text. Read from stdin when omitted.
        sql: Option<String>,

        /// Treat embedded Unix timestamps as literals
        #[arg(long, default_value_t = false)]
        ignore_unix_timestamps: bool,

        /// Take the timestamp setting from this config file instead
        #[arg(long, conflicts_with = "ignore_unix_timestamps")]
        config: Option<PathBuf>,

        /// Also print the normalized statement the fingerprint is computed from
        #[arg(long, default_value_t = false)]
        canonical: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat, level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format, &cli.log_level);

    match cli.cmd.unwrap_or(Command::Serve { config: None }) {
        Command::Serve { config } => commands::serve::serve(config_path(config)).await?,

        Command::Check { config } => commands::check::run_check(&config_path(config))?,

        Command::Fingerprint {
            sql,
            ignore_unix_timestamps,
            config,
            canonical,
        } => commands::fingerprint::run_fingerprint(
            sql,
            ignore_unix_timestamps,
            config.as_deref(),
            canonical,
        )?,
    }

    Ok(())
}

fn config_path(config: Option<PathBuf>) -> PathBuf {
    config.unwrap_or_else(|| PathBuf::from(pgfilter_core::DEFAULT_CONFIG_PATH))
}
