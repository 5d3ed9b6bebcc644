//! The files a peer shares, backed by a directory.
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use hashbrown::HashMap;
use tokio::{
    fs::{create_dir_all, read_dir},
    sync::RwLock,
};
use tracing::{debug, info, warn};

use crate::{block::BlockStore, error::Error};

/// Every file of the peer directory, loaded as a [`BlockStore`].
///
/// Hidden files (starting with a dot) are ignored, they are the temporary
/// files of downloads that are being written. So are names with whitespace
/// or commas, which can't be sent in the text requests.
#[derive(Debug)]
pub struct Library {
    dir: PathBuf,
    files: RwLock<HashMap<String, Arc<BlockStore>>>,
}

impl Library {
    /// Create the directory if needed, and load every file in it.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = dir.into();
        create_dir_all(&dir)
            .await
            .map_err(|_| Error::FolderOpenError(dir.display().to_string()))?;

        let library = Self { dir, files: RwLock::new(HashMap::new()) };
        let names = library.rescan().await?;
        info!("sharing {} files from {:?}: {names:?}", names.len(), library.dir);

        Ok(library)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Synchronize the in-memory files with the directory and return the
    /// sorted names of the files.
    ///
    /// New files are loaded, deleted files are dropped, and a file whose size
    /// on disk changed is loaded again. A file that can't be read is skipped
    /// for this scan.
    pub async fn rescan(&self) -> Result<Vec<String>, Error> {
        let mut on_disk: Vec<(String, u64)> = Vec::new();
        let mut entries = read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if name.contains(|c: char| c.is_whitespace() || c == ',') {
                warn!("not sharing {name:?}, names with spaces or commas can't be announced");
                continue;
            }
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if metadata.is_file() {
                on_disk.push((name, metadata.len()));
            }
        }

        // load outside of the lock, reading files may take a while.
        let current = self.files.read().await.clone();
        let mut loaded = HashMap::with_capacity(on_disk.len());

        for (name, len) in on_disk {
            match current.get(&name) {
                Some(store) if store.size() == len => {
                    loaded.insert(name, store.clone());
                }
                _ => match BlockStore::from_file(self.dir.join(&name)).await {
                    Ok(store) => {
                        debug!("loaded {name}");
                        loaded.insert(name, Arc::new(store));
                    }
                    Err(e) => warn!("could not load {name}: {e}"),
                },
            }
        }

        let mut files = self.files.write().await;
        for (name, store) in files.iter() {
            if loaded.contains_key(name) {
                continue;
            }
            if current.contains_key(name) {
                debug!("{name} was removed from {:?}", self.dir);
            } else {
                // inserted while the directory was being read
                loaded.insert(name.clone(), store.clone());
            }
        }
        *files = loaded;

        let mut names: Vec<String> = files.keys().cloned().collect();
        drop(files);

        names.sort();
        Ok(names)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<BlockStore>> {
        self.files.read().await.get(name).cloned()
    }

    /// Add a file that was written to the directory.
    pub async fn insert(&self, store: Arc<BlockStore>) {
        let mut files = self.files.write().await;
        files.insert(store.name().to_owned(), store);
    }

    /// Sorted names of the files in memory.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}
