//! Configuration file shared by the tracker and the peer binaries.
//!
//! The flags of each binary override the values of the file.
use std::{net::SocketAddr, path::PathBuf, time::Duration};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tokio::{
    fs::{create_dir_all, OpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tracing::warn;

use crate::{client::DEFAULT_TIMEOUT, error::Error, tracker};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Where peers reach the tracker.
    pub tracker_addr: SocketAddr,
    /// Where the tracker listens.
    pub tracker_listen: SocketAddr,
    /// Each peer keeps its files in `<peers_dir>/<peer id>/files`.
    pub peers_dir: PathBuf,
    /// Seconds between two verifications of the files of the peers.
    pub verify_interval: u64,
    /// Seconds before an outbound connection or a read is abandoned.
    pub timeout: u64,
    /// CSV file where completed downloads are recorded.
    pub download_log: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tracker_addr: SocketAddr::from(([127, 0, 0, 1], tracker::DEFAULT_PORT)),
            tracker_listen: SocketAddr::from(([0, 0, 0, 0], tracker::DEFAULT_PORT)),
            peers_dir: PathBuf::from("."),
            verify_interval: tracker::VERIFY_INTERVAL.as_secs(),
            timeout: DEFAULT_TIMEOUT.as_secs(),
            download_log: None,
        }
    }
}

impl Config {
    /// Returns the path of the configuration file, creating its folder if
    /// needed.
    ///
    /// # Errors
    ///
    /// If the user has no home folder, or if the folder can't be created.
    pub async fn config_path() -> Result<PathBuf, Error> {
        let dotfile = ProjectDirs::from("", "", "blockswarm").ok_or(Error::HomeInvalid)?;
        let config_dir = dotfile.config_dir().to_path_buf();

        if !config_dir.exists() {
            create_dir_all(&config_dir)
                .await
                .map_err(|_| Error::FolderOpenError(config_dir.display().to_string()))?;
        }

        Ok(config_dir.join("config.toml"))
    }

    /// Load the configuration file. A missing, empty or invalid file is
    /// replaced by the default configuration.
    pub async fn load() -> Result<Self, Error> {
        let path = Self::config_path().await?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;

        let mut content = String::new();
        file.read_to_string(&mut content).await?;

        match Self::from_toml(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                if !content.trim().is_empty() {
                    warn!("invalid configuration at {path:?}, writing the default one: {e}");
                }
                let config = Self::default();
                let default_str = toml::to_string(&config)?;

                file.set_len(0).await?;
                file.rewind().await?;
                file.write_all(default_str.as_bytes()).await?;
                file.flush().await?;

                Ok(config)
            }
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, Error> {
        if content.trim().is_empty() {
            return Err(Error::ConfigDeserializeError);
        }
        Ok(toml::from_str(content)?)
    }

    pub fn verify_interval(&self) -> Duration {
        Duration::from_secs(self.verify_interval.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode() {
        let toml = r#"
            tracker_addr = "10.0.0.1:9000"
            peers_dir = "/tmp/peers"
            download_log = "/tmp/downloads.csv"
        "#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.tracker_addr, "10.0.0.1:9000".parse().unwrap());
        assert_eq!(config.peers_dir, PathBuf::from("/tmp/peers"));
        assert_eq!(config.download_log, Some(PathBuf::from("/tmp/downloads.csv")));

        // missing fields fall back to the defaults
        assert_eq!(config.tracker_listen, "0.0.0.0:8000".parse().unwrap());
        assert_eq!(config.verify_interval(), Duration::from_secs(2));
        assert_eq!(config.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn default_roundtrip() {
        let s = toml::to_string(&Config::default()).unwrap();
        assert_eq!(Config::from_toml(&s).unwrap(), Config::default());
    }

    #[test]
    fn invalid() {
        assert!(matches!(Config::from_toml(""), Err(Error::ConfigDeserializeError)));
        assert!(matches!(
            Config::from_toml("timeout = \"soon\""),
            Err(Error::ConfigDeserializeError)
        ));
    }
}
