pub mod checksum;
pub mod message;
pub mod object;

pub use checksum::{checksum_bytes, checksum_to_hex, hex_to_checksum, Checksum};
pub use message::{
    decode_bundle, encode_bundle, read_message, write_message, CheckRequest, CheckResponse,
    HubError, SyncStatus, UploadAck, UploadMessage, UploadObject, CORRELATION_HEADER,
};
pub use object::{ObjectId, ObjectType};

#[derive(thiserror::Error, Debug)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] Box<bincode::ErrorKind>),

    #[error("Unexpected EOF")]
    Eof,

    #[error("Invalid checksum: {0}")]
    InvalidChecksum(String),

    #[error("Invalid object name: {0}")]
    InvalidObjectName(String),

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),
}
