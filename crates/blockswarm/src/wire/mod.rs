//! Documentation of the wire protocol spoken by peers and the tracker.
//!
//! Every exchange uses a new TCP connection: the client sends one request,
//! the server answers and closes the connection.
//!
//! Requests are a single UTF-8 text line, tokens separated by spaces and
//! terminated by `\n`, see [`Request`]. Only `GET_BLOCKS` has a binary
//! follow-up after its line.
//!
//! Answers are either a text [`Reply`], delimited by the server closing the
//! socket, or, for `GET` and `GET_BLOCKS`, a binary transfer of [`Frame`]s:
//!
//! ```text
//! meta header:   <total_blocks:u32><total_size:u32>
//! each block:    <index:u32><len:u32><payload: len bytes>
//! ```
//!
//! All integers are 4 bytes, unsigned, big-endian.
mod reply;
mod request;

pub use reply::*;
pub use request::*;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::Error;

/// Size of every block of a file, only the last one might be smaller.
pub const BLOCK_SIZE: usize = 4096;

/// Length of the meta header and of the header of each block.
pub const HEADER_LEN: usize = 8;

/// A chunk of a file, addressed by its zero-based position.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Block {
    pub index: u32,
    /// [`BLOCK_SIZE`] bytes, except for the last block of a file.
    pub data: Bytes,
}

impl Block {
    pub fn new(index: u32, data: impl Into<Bytes>) -> Self {
        Self { index, data: data.into() }
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Encodes the block in the network binary format into the given buffer.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), Error> {
        if !self.is_valid() {
            return Err(Error::BlockTooLarge(self.data.len()));
        }
        buf.reserve(HEADER_LEN + self.data.len());
        buf.put_u32(self.index);
        buf.put_u32(self.data.len() as u32);
        buf.extend_from_slice(&self.data);
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.data.len() <= BLOCK_SIZE
    }
}

/// Sent before any block of a `GET` or `GET_BLOCKS` answer, it describes the
/// whole file as the serving peer knows it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct MetaHeader {
    pub total_blocks: u32,
    pub total_size: u32,
}

/// Items of a block transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Meta(MetaHeader),
    Block(Block),
}

/// Codec of the binary part of a `GET`/`GET_BLOCKS` answer.
///
/// The first frame on the stream is always the [`MetaHeader`], every frame
/// after it is a [`Block`]. The decoder keeps track of that, so a codec must
/// not be reused across connections.
#[derive(Debug, Default)]
pub struct TransferCodec {
    meta_received: bool,
}

impl Encoder<Frame> for TransferCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, buf: &mut BytesMut) -> Result<(), Error> {
        match item {
            Frame::Meta(meta) => {
                buf.put_u32(meta.total_blocks);
                buf.put_u32(meta.total_size);
            }
            Frame::Block(block) => block.encode(buf)?,
        }
        Ok(())
    }
}

impl Decoder for TransferCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, Error> {
        if buf.remaining() < HEADER_LEN {
            return Ok(None);
        }

        if !self.meta_received {
            self.meta_received = true;
            let total_blocks = buf.get_u32();
            let total_size = buf.get_u32();
            return Ok(Some(Frame::Meta(MetaHeader { total_blocks, total_size })));
        }

        // peek at the header, the payload may not be here yet.
        let index = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;

        if len > BLOCK_SIZE {
            return Err(Error::Protocol(format!(
                "block {index} announces {len} bytes"
            )));
        }

        if buf.remaining() < HEADER_LEN + len {
            let missing = HEADER_LEN + len - buf.remaining();
            buf.reserve(missing);
            return Ok(None);
        }

        buf.advance(HEADER_LEN);
        let data = buf.split_to(len).freeze();

        Ok(Some(Frame::Block(Block { index, data })))
    }
}

/// Join names with commas, the list format used on the wire.
pub fn join_csv<S: AsRef<str>>(names: &[S]) -> String {
    names.iter().map(|n| n.as_ref()).collect::<Vec<_>>().join(",")
}

/// Split a comma separated list, ignoring empty entries.
pub fn split_csv(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_then_blocks() {
        let mut buf = BytesMut::new();
        let mut codec = TransferCodec::default();

        let meta = MetaHeader { total_blocks: 3, total_size: 10_000 };
        codec.encode(Frame::Meta(meta), &mut buf).unwrap();
        codec.encode(Frame::Block(Block::new(2, vec![7u8; 1808])), &mut buf).unwrap();
        codec.encode(Frame::Block(Block::new(0, vec![1u8; 4096])), &mut buf).unwrap();

        assert_eq!(buf.len(), 8 + 8 + 1808 + 8 + 4096);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Meta(meta)));

        match codec.decode(&mut buf).unwrap() {
            Some(Frame::Block(block)) => {
                assert_eq!(block.index, 2);
                assert_eq!(block.len(), 1808);
            }
            other => panic!("expected a block, got {other:?}"),
        }
        match codec.decode(&mut buf).unwrap() {
            Some(Frame::Block(block)) => assert_eq!(block.index, 0),
            other => panic!("expected a block, got {other:?}"),
        }
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn partial_block_waits_for_payload() {
        let mut codec = TransferCodec { meta_received: true };
        let mut encoded = BytesMut::new();
        Block::new(5, vec![9u8; 100]).encode(&mut encoded).unwrap();

        let mut buf = BytesMut::from(&encoded[..50]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 50);

        buf.extend_from_slice(&encoded[50..]);
        let frame = codec.decode(&mut buf).unwrap();
        assert_eq!(frame, Some(Frame::Block(Block::new(5, vec![9u8; 100]))));
    }

    #[test]
    fn oversized_block_len_is_rejected() {
        let mut codec = TransferCodec { meta_received: true };
        let mut buf = BytesMut::new();
        buf.put_u32(0);
        buf.put_u32(1_000_000);

        assert!(matches!(codec.decode(&mut buf), Err(Error::Protocol(_))));

        let block = Block::new(0, vec![0u8; BLOCK_SIZE + 1]);
        assert!(matches!(
            block.encode(&mut BytesMut::new()),
            Err(Error::BlockTooLarge(4097))
        ));
    }

    #[test]
    fn csv_lists() {
        assert_eq!(join_csv(&["a.txt", "b.pdf"]), "a.txt,b.pdf");
        assert_eq!(join_csv::<&str>(&[]), "");
        assert_eq!(split_csv("a.txt,,b.pdf"), vec!["a.txt", "b.pdf"]);
        assert!(split_csv("").is_empty());
    }
}
