use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read, Write};

use crate::object::ObjectId;
use crate::WireError;

/// Header carrying the correlation id on every request of one push run
pub const CORRELATION_HEADER: &str = "X-Correlation-ID";

/// Body of `POST <root>/objects/check`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    pub objects: Vec<ObjectId>,
}

/// Objects of the request the hub does not hold yet
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckResponse {
    #[serde(default)]
    pub missing: Vec<ObjectId>,
}

/// Replication progress the hub reports for one correlation id.
/// Counters are cumulative for the whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    #[serde(default)]
    pub uploaded_files: u64,
    #[serde(default)]
    pub synced_objects: u64,
    #[serde(default)]
    pub uploaded_to_cold_storage: u64,
    #[serde(default)]
    pub sync_failed: u64,
    /// hub has nothing left in flight for this run
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubError {
    pub code: u16,
    pub message: String,
}

/// Frames of an upload request and its reply.
///
/// request: Object* Done
/// reply:   Ack | Error
#[derive(Debug, Serialize, Deserialize)]
pub enum UploadMessage {
    Object(UploadObject),
    Done,
    Ack(UploadAck),
    Error(HubError),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadObject {
    pub id: ObjectId,
    pub data: Vec<u8>, // raw bytes of the loose object file
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadAck {
    pub received_objects: u64,
    pub received_bytes: u64,
}

/// length-prefixed bincode message:
/// [len: u32 LE][payload: len bytes]
pub fn write_message<W: Write>(mut w: W, msg: &UploadMessage) -> Result<(), WireError> {
    let payload = bincode::serialize(msg)?;
    let len = payload.len() as u32;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(&payload)?;
    Ok(())
}

pub fn read_message<R: Read>(mut r: R) -> Result<UploadMessage, WireError> {
    let mut len_buf = [0u8; 4];
    if let Err(e) = r.read_exact(&mut len_buf) {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(WireError::Eof);
        }
        return Err(WireError::Io(e));
    }
    let len = u32::from_le_bytes(len_buf) as u64;
    // grow with the data actually read; a bogus length must not allocate
    let mut payload = Vec::new();
    (&mut r).take(len).read_to_end(&mut payload)?;
    if (payload.len() as u64) < len {
        return Err(WireError::Eof);
    }
    let msg: UploadMessage = bincode::deserialize(&payload)?;
    Ok(msg)
}

/// Frame a set of objects as one upload request body
pub fn encode_bundle(objects: Vec<UploadObject>) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::new();
    for object in objects {
        write_message(&mut buf, &UploadMessage::Object(object))?;
    }
    write_message(&mut buf, &UploadMessage::Done)?;
    Ok(buf)
}

/// Read an upload request body back into its objects. The body must end
/// with `Done`.
pub fn decode_bundle(body: &[u8]) -> Result<Vec<UploadObject>, WireError> {
    let mut cursor = Cursor::new(body);
    let mut objects = Vec::new();
    loop {
        match read_message(&mut cursor)? {
            UploadMessage::Object(object) => objects.push(object),
            UploadMessage::Done => return Ok(objects),
            other => return Err(WireError::UnexpectedMessage(format!("{other:?}"))),
        }
    }
}
