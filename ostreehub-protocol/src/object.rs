use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::checksum::{checksum_to_hex, hex_to_checksum, Checksum};
use crate::WireError;

/// The kinds of loose objects an OSTree repository holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectType {
    Commit,
    CommitMeta,
    DirTree,
    DirMeta,
    File,
}

impl ObjectType {
    /// Extension used in loose object names. File content travels in the
    /// archive representation, so it is always named `.filez` on the wire.
    pub fn extension(&self) -> &'static str {
        match self {
            ObjectType::Commit => "commit",
            ObjectType::CommitMeta => "commitmeta",
            ObjectType::DirTree => "dirtree",
            ObjectType::DirMeta => "dirmeta",
            ObjectType::File => "filez",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "commit" => Some(ObjectType::Commit),
            "commitmeta" => Some(ObjectType::CommitMeta),
            "dirtree" => Some(ObjectType::DirTree),
            "dirmeta" => Some(ObjectType::DirMeta),
            "filez" | "file" => Some(ObjectType::File),
            _ => None,
        }
    }

    /// Metadata objects are stored as their serialized GVariant, so their
    /// checksum is the SHA-256 of the bytes on disk.
    pub fn is_metadata(&self) -> bool {
        !matches!(self, ObjectType::File)
    }
}

/// Identity of one object: checksum plus type, rendered as `<hex>.<ext>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ObjectId {
    pub checksum: Checksum,
    pub object_type: ObjectType,
}

impl ObjectId {
    pub fn new(checksum: Checksum, object_type: ObjectType) -> Self {
        Self {
            checksum,
            object_type,
        }
    }

    pub fn name(&self) -> String {
        format!(
            "{}.{}",
            checksum_to_hex(&self.checksum),
            self.object_type.extension()
        )
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for ObjectId {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hex, ext) = s
            .split_once('.')
            .ok_or_else(|| WireError::InvalidObjectName(s.to_string()))?;
        let object_type = ObjectType::from_extension(ext)
            .ok_or_else(|| WireError::InvalidObjectName(s.to_string()))?;
        let checksum = hex_to_checksum(hex)?;
        Ok(ObjectId::new(checksum, object_type))
    }
}

impl From<ObjectId> for String {
    fn from(id: ObjectId) -> Self {
        id.name()
    }
}

impl TryFrom<String> for ObjectId {
    type Error = WireError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
