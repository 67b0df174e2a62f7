use clap::{Args, Parser, Subcommand};
use granary_core::{DbConfig, RepairPolicy, StoreConfig};
use std::path::PathBuf;
use std::sync::LazyLock;

/// Catalog harvested when neither `--catalog` nor the config file name one.
pub const DEFAULT_CATALOG_URL: &str = "https://bdap-opendata.rgs.mef.gov.it/SpodCkanApi/api/3/action/";

static VERSION_INFO: LazyLock<String> = LazyLock::new(|| {
    let version = env!("CARGO_PKG_VERSION");

    let commit = option_env!("VERGEN_GIT_SHA")
        .map(|s| s.chars().take(7).collect::<String>())
        .unwrap_or_else(|| "unknown".to_string());

    let built = option_env!("VERGEN_BUILD_DATE").unwrap_or("unknown"); // YYYY-MM-DD
    let target = option_env!("VERGEN_CARGO_TARGET_TRIPLE").unwrap_or("unknown");
    let rustc = option_env!("VERGEN_RUSTC_SEMVER").unwrap_or("unknown");

    format!("{version}\ncommit: {commit}\nbuilt: {built}\ntarget: {target}\nrustc: {rustc}")
});

pub fn version_info() -> &'static str {
    &VERSION_INFO
}

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "granary")]
#[command(
    author,
    version = version_info(),
    about = "Harvest a CKAN open data catalog, repair its files and load its CSVs into PostgreSQL"
)]
#[command(after_help = "Examples:
  granary download --output dataset --max-concurrency 8
  granary download --group 82_pubblico-impiego --format csv -j 4
  granary repair --output dataset --policy replace
  granary ingest --output dataset --skip-loaded
  granary run --output dataset -j 8

Every command can be re-run: finished files and tables are detected and skipped.")]
pub struct Config {
    /// Root directory of the local mirror
    #[arg(
        short,
        long,
        global = true,
        env = "GRANARY_OUTPUT",
        value_name = "DIR",
        default_value = "dataset"
    )]
    pub output: PathBuf,

    /// Log level or filter directive, overridden by RUST_LOG
    #[arg(long, global = true, env = "GRANARY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Custom path to the granary.toml configuration file
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    #[command(flatten)]
    pub store: StoreArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Mirror catalog metadata and resource payloads to the output directory
    #[command(after_help = "Examples:
  granary download -j 8                                  # Whole catalog from config or default
  granary download -j 8 --catalog https://dati.gov.it    # Another CKAN portal
  granary download -j 4 --group 77_sanit --group 195_tesoreria
  granary download -j 4 --format csv --format json")]
    Download(DownloadArgs),
    /// Rewrite stored text files that contain invalid UTF-8
    Repair(RepairArgs),
    /// Load every stored CSV into its own PostgreSQL table
    Ingest(IngestArgs),
    /// Run download, repair and ingest in order
    Run {
        #[command(flatten)]
        download: DownloadArgs,
        #[command(flatten)]
        repair: RepairArgs,
        #[command(flatten)]
        ingest: IngestArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct DownloadArgs {
    /// Base URL of the CKAN catalog or of its action API
    #[arg(long, env = "GRANARY_CATALOG_URL", value_name = "URL")]
    pub catalog: Option<String>,

    /// Harvest only the packages of this group (repeatable)
    #[arg(long = "group", value_name = "NAME")]
    pub groups: Vec<String>,

    /// Download only resources of this format (repeatable)
    #[arg(long = "format", value_name = "FORMAT")]
    pub formats: Vec<String>,

    /// Maximum number of concurrent requests (required)
    #[arg(short = 'j', long, env = "GRANARY_MAX_CONCURRENCY", value_name = "N")]
    pub max_concurrency: usize,
}

#[derive(Args, Debug, Clone)]
pub struct RepairArgs {
    /// What to do with invalid byte sequences: drop or replace
    #[arg(long, default_value = "drop")]
    pub policy: RepairPolicy,
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    /// Rows sampled per file for column type inference
    #[arg(long, default_value = "100000")]
    pub sample_rows: usize,

    /// Keep tables that already hold as many rows as their file
    #[arg(long)]
    pub skip_loaded: bool,
}

/// PostgreSQL connection parameters, following the libpq environment variables.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Full connection URL; wins over the individual parameters
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    #[arg(long, global = true, env = "PGHOST", default_value = "localhost")]
    pub db_host: String,

    #[arg(long, global = true, env = "PGPORT", default_value = "5432")]
    pub db_port: u16,

    #[arg(long, global = true, env = "PGDATABASE", default_value = "postgres")]
    pub db_name: String,

    #[arg(long, global = true, env = "PGUSER", default_value = "postgres")]
    pub db_user: String,

    #[arg(long, global = true, env = "PGPASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,

    /// Size of the connection pool
    #[arg(long, global = true, env = "GRANARY_DB_MAX_CONNECTIONS", default_value = "5")]
    pub db_max_connections: u32,
}

impl StoreArgs {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            host: self.db_host.clone(),
            port: self.db_port,
            database: self.db_name.clone(),
            user: self.db_user.clone(),
            password: self.db_password.clone(),
            url: self.database_url.clone(),
        }
    }

    pub fn db_config(&self) -> DbConfig {
        DbConfig {
            max_connections: self.db_max_connections,
        }
    }
}
