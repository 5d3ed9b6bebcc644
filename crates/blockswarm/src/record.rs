//! A CSV log of completed downloads, used to measure the swarm.
use std::path::{Path, PathBuf};

use tokio::{
    fs::{create_dir_all, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};

use crate::{error::Error, swarm::DownloadReport};

pub const HEADER: &str = "file,size,n_peers,seconds";

/// Appends one line per download to a CSV file, writing the header when the
/// file is created.
#[derive(Debug)]
pub struct DownloadLog {
    path: PathBuf,
    // appends of concurrent downloads must not interleave.
    lock: Mutex<()>,
}

impl DownloadLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, report: &DownloadReport) -> Result<(), Error> {
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        let mut lines = String::new();
        if file.metadata().await?.len() == 0 {
            lines.push_str(HEADER);
            lines.push('\n');
        }
        lines.push_str(&format!(
            "{},{},{},{:.6}\n",
            report.name,
            report.size,
            report.peer_count,
            report.elapsed.as_secs_f64()
        ));

        file.write_all(lines.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }
}
