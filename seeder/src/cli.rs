use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "seeder",
    version,
    about = "Keeps the latest published torrent manifest seeding"
)]
pub struct Cli {
    /// URL of the manifest to mirror
    #[arg(long, env = "SEEDER_URL", default_value = "http://driveroff.net/SDI_Update.torrent")]
    pub url: String,

    /// Directory holding manifests, named by their SHA-256 digest
    #[arg(long, env = "SEEDER_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Directory where the engine keeps downloaded content
    #[arg(long, env = "SEEDER_DOWNLOAD_DIR", default_value = "downloads")]
    pub download_dir: PathBuf,

    /// Seconds between manifest refreshes
    #[arg(long, env = "SEEDER_REFRESH_INTERVAL", default_value_t = 900)]
    pub refresh_interval: u64,

    /// Seconds between status reports
    #[arg(long, env = "SEEDER_STATUS_INTERVAL", default_value_t = 60)]
    pub status_interval: u64,

    /// Seconds before a manifest download is abandoned
    #[arg(long, env = "SEEDER_FETCH_TIMEOUT", default_value_t = 120)]
    pub fetch_timeout: u64,

    /// Seconds to wait for a job to stop before giving up
    #[arg(long, env = "SEEDER_STOP_TIMEOUT", default_value_t = 30)]
    pub stop_timeout: u64,

    /// Port for incoming peer connections
    #[arg(long, env = "SEEDER_LISTEN_PORT", default_value_t = 6881)]
    pub listen_port: u16,

    /// Upload limit in bytes per second (0 = unlimited)
    #[arg(long, env = "SEEDER_UPLOAD_RATE", default_value_t = 2_000_000)]
    pub upload_rate: u64,

    /// Log level (RUST_LOG overrides)
    #[arg(long, env = "SEEDER_LOG_LEVEL", value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Log level for the distribution engine and tracker clients
    #[arg(long, env = "SEEDER_ENGINE_LOG_LEVEL", value_enum, default_value = "off")]
    pub engine_log_level: LogLevel,
}

impl Cli {
    /// `EnvFilter` directives used when `RUST_LOG` is not set.
    pub fn log_directives(&self) -> String {
        let engine = self.engine_log_level.as_filter();
        format!(
            "{},seed_engine={},tracker={}",
            self.log_level.as_filter(),
            engine,
            engine
        )
    }
}
