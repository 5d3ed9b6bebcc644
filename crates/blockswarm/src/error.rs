use std::io;

use thiserror::Error;
use tokio::time::error::Elapsed;

impl From<Elapsed> for Error {
    fn from(_value: Elapsed) -> Self {
        Self::Timeout
    }
}

impl From<toml::de::Error> for Error {
    fn from(_value: toml::de::Error) -> Self {
        Self::ConfigDeserializeError
    }
}

impl From<toml::ser::Error> for Error {
    fn from(_value: toml::ser::Error) -> Self {
        Self::ConfigSerializeError
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    IO(#[from] io::Error),

    #[error("String is not UTF-8")]
    Utf8Error(#[from] std::string::FromUtf8Error),

    #[error("Malformed message: {0}")]
    Protocol(String),

    #[error("A block of {0} bytes is larger than the maximum block size")]
    BlockTooLarge(usize),

    #[error("Block {0} does not exist")]
    OutOfRange(u32),

    #[error("The file `{0}` is not shared by this peer")]
    FileNotFound(String),

    #[error("No peer has the file `{0}`")]
    NoSource(String),

    #[error("No peer reported a usable block count for `{0}`")]
    NoConsensus(String),

    #[error("No peer reported {1} blocks for `{0}`")]
    NoCompatiblePeer(String, u32),

    #[error("No block of `{0}` was received from any peer")]
    NoData(String),

    #[error("The download of `{name}` is incomplete, missing blocks {missing:?}")]
    Incomplete { name: String, missing: Vec<u32> },

    #[error("The tracker refused the registration")]
    NotRegistered,

    #[error("Unexpected reply: `{0}`")]
    UnexpectedReply(String),

    #[error("The peer closed the socket")]
    PeerClosedSocket,

    #[error("The peer took to long to respond")]
    Timeout,

    #[error(
        "Tried to load $HOME but could not find it. Please make sure you have \
         a $HOME env and that this program has the permission to create dirs."
    )]
    HomeInvalid,

    #[error(
        "Could not open the folder `{0}`. Please make sure the program has \
         permission to open it and that the folder exist"
    )]
    FolderOpenError(String),

    #[error(
        "Error while trying to read the configuration file, please make sure \
         it has the correct format"
    )]
    ConfigDeserializeError,

    #[error("Could not serialize the default configuration")]
    ConfigSerializeError,
}
