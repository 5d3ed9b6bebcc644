//! Text replies of the tracker and of peers.
//!
//! A reply has no terminator of its own, the server closes the connection
//! right after writing it. Which reply to expect depends on the request, so
//! the client parses the text with the function matching the request it sent.
use std::net::SocketAddr;

use bytes::BytesMut;
use tokio_util::codec::Encoder;

use super::{join_csv, split_csv};
use crate::error::Error;

pub const REGISTERED: &str = "REGISTERED";
pub const NOT_REGISTERED: &str = "NOT REGISTERED";
pub const NEW_FILE_ADDED: &str = "NEW FILE ADDED TO PEER FILES DIRECTORY";
pub const FILES_OK: &str = "FILES_OK";
pub const NEW_FILES_LIST: &str = "New files list: ";

/// One entry of a `WHO_HAS` answer: `ip:port|block_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Holder {
    pub addr: SocketAddr,
    /// `None` when the tracker sent something that is not an integer.
    pub block_count: Option<u32>,
}

impl std::fmt::Display for Holder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.block_count {
            Some(n) => write!(f, "{}|{n}", self.addr),
            None => write!(f, "{}|?", self.addr),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `REGISTER` succeeded.
    Registered,
    /// Sent by the tracker for any request it could not understand.
    NotRegistered,
    /// Answer to `WHO_HAS`.
    Holders(Vec<Holder>),
    /// Answer to `NEW_FILE`, sent even if the peer is unknown.
    NewFileAdded,
    /// Answer to `VERIFY_FILES` when the lists match.
    FilesOk,
    /// Answer to `VERIFY_FILES` when the lists differ, with the files the
    /// peer actually has.
    NewFilesList(Vec<String>),
    /// Answer to `BLOCK_COUNT`.
    BlockCount(u32),
}

impl Reply {
    pub fn encode(&self, buf: &mut BytesMut) {
        let text = match self {
            Reply::Registered => REGISTERED.to_owned(),
            Reply::NotRegistered => NOT_REGISTERED.to_owned(),
            Reply::Holders(holders) => holders
                .iter()
                .map(|h| h.to_string())
                .collect::<Vec<_>>()
                .join(","),
            Reply::NewFileAdded => NEW_FILE_ADDED.to_owned(),
            Reply::FilesOk => FILES_OK.to_owned(),
            Reply::NewFilesList(files) => {
                format!("{NEW_FILES_LIST}{}", join_csv(files))
            }
            Reply::BlockCount(n) => format!("OK {n}\n"),
        };
        buf.extend_from_slice(text.as_bytes());
    }

    /// Parse the answer of a `REGISTER`.
    pub fn parse_register(text: &str) -> Result<Self, Error> {
        match text.trim() {
            REGISTERED => Ok(Reply::Registered),
            NOT_REGISTERED => Ok(Reply::NotRegistered),
            other => Err(Error::UnexpectedReply(other.to_owned())),
        }
    }

    /// Parse the answer of a `WHO_HAS`, an empty text means no holder.
    ///
    /// Entries whose block count is not an integer are kept with a `None`
    /// count, entries without a valid address are an error.
    pub fn parse_holders(text: &str) -> Result<Vec<Holder>, Error> {
        let text = text.trim();
        if text == NOT_REGISTERED {
            return Err(Error::UnexpectedReply(text.to_owned()));
        }

        text.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| -> Result<Holder, Error> {
                let (addr, count) = entry.split_once('|').unwrap_or((entry, ""));
                let addr = addr
                    .parse()
                    .map_err(|_| Error::UnexpectedReply(entry.to_owned()))?;
                Ok(Holder { addr, block_count: count.trim().parse().ok() })
            })
            .collect()
    }

    /// Parse the answer of a `BLOCK_COUNT`: `OK <n>`.
    pub fn parse_block_count(text: &str) -> Result<u32, Error> {
        text.trim()
            .strip_prefix("OK ")
            .and_then(|n| n.trim().parse().ok())
            .ok_or_else(|| Error::UnexpectedReply(text.trim().to_owned()))
    }

    /// Parse the answer of a `VERIFY_FILES`, `None` means the lists match.
    pub fn parse_verify(text: &str) -> Result<Option<Vec<String>>, Error> {
        let text = text.trim_end();
        if text == FILES_OK {
            return Ok(None);
        }
        // an empty list loses its trailing space on some peers
        match text.strip_prefix(NEW_FILES_LIST.trim_end()) {
            Some(csv) => Ok(Some(split_csv(csv))),
            None => Err(Error::UnexpectedReply(text.to_owned())),
        }
    }
}

/// Encoder of [`Reply`]s, used by the servers after the request was decoded
/// with [`super::RequestCodec`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplyCodec;

impl Encoder<Reply> for ReplyCodec {
    type Error = Error;

    fn encode(&mut self, item: Reply, buf: &mut BytesMut) -> Result<(), Error> {
        item.encode(buf);
        Ok(())
    }
}
