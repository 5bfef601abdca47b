use sha2::{Digest, Sha256};

use crate::WireError;

/// 32-byte SHA-256 checksum, the identity of every OSTree object
pub type Checksum = [u8; 32];

/// Hash arbitrary bytes with SHA-256 and return the raw digest
#[inline]
pub fn checksum_bytes(data: &[u8]) -> Checksum {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let mut checksum = [0u8; 32];
    checksum.copy_from_slice(&hasher.finalize());
    checksum
}

/// Convert checksum to the lowercase hex form used in object names and refs
#[inline]
pub fn checksum_to_hex(checksum: &Checksum) -> String {
    hex::encode(checksum)
}

/// Parse a 64 character hex string back to a checksum
pub fn hex_to_checksum(hex_str: &str) -> Result<Checksum, WireError> {
    let bytes =
        hex::decode(hex_str).map_err(|e| WireError::InvalidChecksum(format!("{hex_str}: {e}")))?;
    if bytes.len() != 32 {
        return Err(WireError::InvalidChecksum(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    let mut checksum = [0u8; 32];
    checksum.copy_from_slice(&bytes);
    Ok(checksum)
}
