//! Requests sent to the tracker and to peers.
use std::net::{IpAddr, SocketAddr};

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{join_csv, split_csv};
use crate::{error::Error, peer_id::PeerId};

/// Upper bound of the block count of a `GET_BLOCKS`, a larger value is
/// treated as a corrupt or hostile request.
pub const MAX_BLOCKS_PER_REQUEST: u32 = 200_000;

/// Upper bound of a request line.
pub const MAX_LINE_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `REGISTER <ip> <peer_id> <port> <csv files>`
    ///
    /// The csv may be omitted by a peer that doesn't share any file.
    Register { addr: SocketAddr, peer_id: PeerId, files: Vec<String> },
    /// `WHO_HAS <filename>`
    WhoHas(String),
    /// `NEW_FILE <peer_id> <filename>`
    NewFile { peer_id: PeerId, filename: String },
    /// `DISCONNECT <peer_id>`
    Disconnect(PeerId),
    /// `GET <filename>`
    Get(String),
    /// `GET_BLOCKS <filename>\n<qty:u32><index:u32>...`
    GetBlocks { filename: String, indices: Vec<u32> },
    /// `VERIFY_FILES <csv files>`
    VerifyFiles(Vec<String>),
    /// `BLOCK_COUNT <filename>`
    BlockCount(String),
}

impl Request {
    /// Parse a text request, every request except `GET_BLOCKS`.
    pub fn parse_line(line: &str) -> Result<Self, Error> {
        let tokens: Vec<&str> = line.split_whitespace().collect();

        let request = match tokens.as_slice() {
            ["REGISTER", ip, peer_id, port, rest @ ..] if rest.len() <= 1 => {
                let ip: IpAddr = ip
                    .parse()
                    .map_err(|_| Error::Protocol(format!("invalid ip `{ip}`")))?;
                let port: u16 = port
                    .parse()
                    .map_err(|_| Error::Protocol(format!("invalid port `{port}`")))?;
                let files = rest.first().map(|csv| split_csv(csv)).unwrap_or_default();

                Request::Register {
                    addr: SocketAddr::new(ip, port),
                    peer_id: PeerId::from(*peer_id),
                    files,
                }
            }
            ["WHO_HAS", filename] => Request::WhoHas(filename.to_string()),
            ["NEW_FILE", peer_id, filename] => Request::NewFile {
                peer_id: PeerId::from(*peer_id),
                filename: filename.to_string(),
            },
            ["DISCONNECT", peer_id] => Request::Disconnect(PeerId::from(*peer_id)),
            ["GET", filename] => Request::Get(filename.to_string()),
            ["VERIFY_FILES"] => Request::VerifyFiles(Vec::new()),
            ["VERIFY_FILES", csv] => Request::VerifyFiles(split_csv(csv)),
            ["BLOCK_COUNT", filename] => Request::BlockCount(filename.to_string()),
            _ => {
                return Err(Error::Protocol(format!("invalid request `{line}`")));
            }
        };

        Ok(request)
    }
}

/// Command words of the requests.
const COMMANDS: [&str; 8] = [
    "REGISTER",
    "WHO_HAS",
    "NEW_FILE",
    "DISCONNECT",
    "GET",
    "VERIFY_FILES",
    "BLOCK_COUNT",
    "GET_BLOCKS",
];

/// Whether an unterminated buffer holds a whole text request.
///
/// Clients may send a text request without `\n` and wait for the answer, so
/// whatever arrived in one read is the request once its command word is
/// complete. `GET_BLOCKS` is always terminated, its indices follow the line.
fn is_bare_line(buf: &[u8]) -> bool {
    let start = buf
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(buf.len());
    let buf = &buf[start..];
    let word_len = buf
        .iter()
        .position(|b| b.is_ascii_whitespace())
        .unwrap_or(buf.len());
    let word = &buf[..word_len];

    if word.is_empty() || word == b"GET_BLOCKS" {
        return false;
    }
    if word_len < buf.len() || word == b"VERIFY_FILES" {
        return true;
    }

    // a command word cut by the network, wait for the rest. Any other word
    // is not a request and is rejected now.
    !COMMANDS.iter().any(|c| c.as_bytes().starts_with(word))
}

/// Codec of [`Request`]s.
///
/// The decoder yields a request only when it is complete, including the
/// binary indices of a `GET_BLOCKS`. A text request is complete at its `\n`,
/// or, if it has none, with whatever arrived once its command word is whole.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestCodec;

impl Encoder<Request> for RequestCodec {
    type Error = Error;

    fn encode(&mut self, item: Request, buf: &mut BytesMut) -> Result<(), Error> {
        let line = match item {
            Request::Register { addr, peer_id, files } => format!(
                "REGISTER {} {peer_id} {} {}",
                addr.ip(),
                addr.port(),
                join_csv(&files)
            ),
            Request::WhoHas(filename) => format!("WHO_HAS {filename}"),
            Request::NewFile { peer_id, filename } => {
                format!("NEW_FILE {peer_id} {filename}")
            }
            Request::Disconnect(peer_id) => format!("DISCONNECT {peer_id}"),
            Request::Get(filename) => format!("GET {filename}"),
            Request::VerifyFiles(files) => format!("VERIFY_FILES {}", join_csv(&files)),
            Request::BlockCount(filename) => format!("BLOCK_COUNT {filename}"),
            Request::GetBlocks { filename, indices } => {
                let qty: u32 = indices.len().try_into().map_err(|_| {
                    Error::Protocol(format!("{} blocks in one request", indices.len()))
                })?;
                if qty > MAX_BLOCKS_PER_REQUEST {
                    return Err(Error::Protocol(format!("{qty} blocks in one request")));
                }

                buf.reserve(filename.len() + 12 + indices.len() * 4);
                buf.extend_from_slice(format!("GET_BLOCKS {filename}\n").as_bytes());
                buf.put_u32(qty);
                for index in indices {
                    buf.put_u32(index);
                }
                return Ok(());
            }
        };

        buf.extend_from_slice(line.trim_end().as_bytes());
        buf.put_u8(b'\n');
        Ok(())
    }
}

impl Decoder for RequestCodec {
    type Item = Request;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Request>, Error> {
        let Some(nl) = buf.iter().position(|b| *b == b'\n') else {
            if buf.len() > MAX_LINE_LEN {
                return Err(Error::Protocol("request line is too long".into()));
            }
            if !is_bare_line(buf) {
                return Ok(None);
            }
            let line = std::str::from_utf8(buf)
                .map_err(|_| Error::Protocol("request line is not UTF-8".into()))?
                .trim()
                .to_owned();
            buf.clear();
            return Request::parse_line(&line).map(Some);
        };

        let line = std::str::from_utf8(&buf[..nl])
            .map_err(|_| Error::Protocol("request line is not UTF-8".into()))?
            .trim()
            .to_owned();

        if !line.starts_with("GET_BLOCKS ") && line != "GET_BLOCKS" {
            buf.advance(nl + 1);
            return Request::parse_line(&line).map(Some);
        }

        let filename = match line.split_whitespace().collect::<Vec<_>>().as_slice() {
            ["GET_BLOCKS", filename] => filename.to_string(),
            _ => return Err(Error::Protocol(format!("invalid request `{line}`"))),
        };

        // the line is followed by <qty:u32><index:u32>...
        let body = &buf[nl + 1..];
        if body.len() < 4 {
            return Ok(None);
        }

        let qty = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);

        // checked before reserving anything for the indices.
        if qty > MAX_BLOCKS_PER_REQUEST {
            return Err(Error::Protocol(format!(
                "GET_BLOCKS asked for {qty} blocks"
            )));
        }

        let needed = 4 + qty as usize * 4;
        if body.len() < needed {
            let missing = needed - body.len();
            buf.reserve(missing);
            return Ok(None);
        }

        buf.advance(nl + 1 + 4);
        let indices = (0..qty).map(|_| buf.get_u32()).collect();

        Ok(Some(Request::GetBlocks { filename, indices }))
    }

    /// A client may close its write half without terminating the line.
    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Request>, Error> {
        if let Some(request) = self.decode(buf)? {
            return Ok(Some(request));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        if buf.contains(&b'\n') {
            return Err(Error::Protocol("truncated request".into()));
        }
        buf.put_u8(b'\n');
        self.decode(buf)
    }
}
