//! A file split into fixed-size blocks.
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use bytes::{Bytes, BytesMut};
use tokio::{
    fs::{self, create_dir_all, File},
    io::{AsyncReadExt, AsyncWriteExt, BufWriter},
};
use tracing::debug;

use crate::{
    error::Error,
    wire::{Block, BLOCK_SIZE},
};

/// One file as a sparse map of block index to data.
///
/// A store is built either from a local file, with [`BlockStore::from_file`],
/// or block by block while a download is in progress. The map is ordered by
/// index, so iterating it always reassembles the bytes in the right order,
/// whatever order the blocks arrived in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockStore {
    name: String,
    /// Sum of the length of all blocks.
    size: u64,
    blocks: BTreeMap<u32, Bytes>,
}

impl BlockStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    /// Read the file at `path` sequentially, in chunks of [`BLOCK_SIZE`].
    /// The name of the store is the base name of the file.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::FileNotFound(path.display().to_string()))?
            .to_owned();

        let mut file = File::open(path).await?;
        let on_disk = file.metadata().await?.len();

        let mut blocks = BTreeMap::new();
        let mut index = 0;

        loop {
            let mut chunk = BytesMut::with_capacity(BLOCK_SIZE);

            // `read_buf` may return less than a block before the end of file.
            while chunk.len() < BLOCK_SIZE {
                let mut limited = (&mut file).take((BLOCK_SIZE - chunk.len()) as u64);
                if limited.read_buf(&mut chunk).await? == 0 {
                    break;
                }
            }

            if chunk.is_empty() {
                break;
            }

            let full = chunk.len() == BLOCK_SIZE;
            blocks.insert(index, chunk.freeze());
            index += 1;

            if !full {
                break;
            }
        }

        debug!("read {name} {on_disk} bytes in {index} blocks");

        Ok(Self { name, size: on_disk, blocks })
    }

    /// Build a store from blocks received from the network.
    pub fn from_block_map<I>(name: impl Into<String>, map: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (u32, Bytes)>,
    {
        let mut store = Self::new(name);
        for (index, data) in map {
            store.insert_block(index, data)?;
        }
        Ok(store)
    }

    /// Store the block at `index`, replacing any previous block there.
    ///
    /// Each index counts once in the size of the store, inserting the same
    /// block twice leaves the store unchanged.
    pub fn insert_block(&mut self, index: u32, data: Bytes) -> Result<(), Error> {
        if data.len() > BLOCK_SIZE {
            return Err(Error::BlockTooLarge(data.len()));
        }

        let len = data.len() as u64;
        if let Some(previous) = self.blocks.insert(index, data) {
            self.size -= previous.len() as u64;
        }
        self.size += len;

        Ok(())
    }

    pub fn get_block(&self, index: u32) -> Result<Block, Error> {
        self.blocks
            .get(&index)
            .map(|data| Block::new(index, data.clone()))
            .ok_or(Error::OutOfRange(index))
    }

    /// Blocks in ascending index order.
    pub fn ordered_blocks(&self) -> impl Iterator<Item = Block> + '_ {
        self.blocks
            .iter()
            .map(|(index, data)| Block::new(*index, data.clone()))
    }

    /// How many distinct blocks the store holds.
    pub fn block_count(&self) -> u32 {
        self.blocks.len() as u32
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// If every index in `0..block_count` is present.
    pub fn is_complete(&self) -> bool {
        match self.blocks.keys().next_back() {
            Some(last) => *last as usize + 1 == self.blocks.len(),
            None => true,
        }
    }

    /// Indices of `0..expected` that the store doesn't have, ascending.
    pub fn missing_blocks(&self, expected: u32) -> Vec<u32> {
        (0..expected)
            .filter(|index| !self.blocks.contains_key(index))
            .collect()
    }

    /// Write the blocks `0..block_count` to `dir/name`, creating `dir` if
    /// needed. Returns the path of the written file.
    ///
    /// The bytes go to a hidden file first, which is renamed when complete,
    /// so a reader of `dir` never sees a partial file.
    pub async fn write_to_disk(&self, dir: impl AsRef<Path>) -> Result<PathBuf, Error> {
        let dir = dir.as_ref();
        create_dir_all(dir).await?;

        let path = dir.join(&self.name);
        let part = dir.join(format!(".{}.part", self.name));

        let result = self.write_blocks(&part).await;
        if let Err(e) = result {
            let _ = fs::remove_file(&part).await;
            return Err(e);
        }

        fs::rename(&part, &path).await?;
        debug!("wrote {} bytes to {path:?}", self.size);

        Ok(path)
    }

    async fn write_blocks(&self, path: &Path) -> Result<(), Error> {
        let mut file = BufWriter::new(File::create(path).await?);

        for index in 0..self.block_count() {
            let data = self.blocks.get(&index).ok_or(Error::OutOfRange(index))?;
            file.write_all(data).await?;
        }

        file.flush().await?;
        file.into_inner().sync_all().await?;
        Ok(())
    }
}
