use bytes::{Buf, BufMut};
use commonware_codec::{Error, ReadExt, Write};

/// Maximum stored username length (bytes).
pub const MAX_USERNAME_LENGTH: usize = 64;

/// Maximum bet type name length (bytes).
pub const MAX_BET_NAME_LENGTH: usize = 16;

/// Maximum PvP invite link length (bytes).
pub const MAX_LINK_LENGTH: usize = 32;

/// Maximum chain transaction hash length (bytes).
pub const MAX_TX_HASH_LENGTH: usize = 128;

/// Writes a string as a u32 length prefix followed by its UTF-8 bytes.
pub fn write_str(s: &str, writer: &mut impl BufMut) {
    (s.len() as u32).write(writer);
    writer.put_slice(s.as_bytes());
}

/// Reads a length-prefixed UTF-8 string, rejecting anything longer than `max_len`.
///
/// `field` names the value in the returned error.
pub fn read_str(reader: &mut impl Buf, max_len: usize, field: &'static str) -> Result<String, Error> {
    let len = u32::read(reader)? as usize;
    if len > max_len {
        return Err(Error::Invalid(field, "too long"));
    }
    if reader.remaining() < len {
        return Err(Error::EndOfBuffer);
    }
    let mut bytes = vec![0u8; len];
    reader.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).map_err(|_| Error::Invalid(field, "invalid UTF-8"))
}

pub fn str_encode_size(s: &str) -> usize {
    4 + s.len()
}
