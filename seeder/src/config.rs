use crate::cli::Cli;
use anyhow::{Context, bail};
use seed_engine::SessionConfig;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Validated runtime settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub url: String,
    pub data_dir: PathBuf,
    pub download_dir: PathBuf,
    pub refresh_interval: Duration,
    pub status_interval: Duration,
    pub fetch_timeout: Duration,
    pub stop_timeout: Duration,
    pub listen_port: u16,
    pub upload_rate: u64,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let url = Url::parse(&cli.url).with_context(|| format!("invalid --url {}", cli.url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("--url must be http or https, got {}", url.scheme());
        }
        for (flag, value) in [
            ("--refresh-interval", cli.refresh_interval),
            ("--status-interval", cli.status_interval),
            ("--fetch-timeout", cli.fetch_timeout),
            ("--stop-timeout", cli.stop_timeout),
        ] {
            if value == 0 {
                bail!("{} must be greater than zero", flag);
            }
        }

        Ok(Self {
            url: cli.url.clone(),
            data_dir: cli.data_dir.clone(),
            download_dir: cli.download_dir.clone(),
            refresh_interval: Duration::from_secs(cli.refresh_interval),
            status_interval: Duration::from_secs(cli.status_interval),
            fetch_timeout: Duration::from_secs(cli.fetch_timeout),
            stop_timeout: Duration::from_secs(cli.stop_timeout),
            listen_port: cli.listen_port,
            upload_rate: cli.upload_rate,
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            download_dir: self.download_dir.clone(),
            listen_port: self.listen_port,
            upload_rate: self.upload_rate,
            ..SessionConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> anyhow::Result<Config> {
        let mut argv = vec!["seeder"];
        argv.extend_from_slice(args);
        Config::from_cli(&Cli::try_parse_from(argv).unwrap())
    }

    #[test]
    fn test_valid_config() {
        let config = parse(&["--status-interval", "5", "--upload-rate", "0"]).unwrap();
        assert_eq!(config.status_interval, Duration::from_secs(5));
        assert_eq!(config.refresh_interval, Duration::from_secs(900));
        let session = config.session_config();
        assert_eq!(session.download_dir, PathBuf::from("downloads"));
        assert_eq!(session.upload_rate, 0);
        assert!(session.announce);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(parse(&["--refresh-interval", "0"]).is_err());
        assert!(parse(&["--url", "ftp://example.com/x.torrent"]).is_err());
        assert!(parse(&["--url", "not a url"]).is_err());
    }
}
