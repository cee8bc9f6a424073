//! Wire codec bridge for the authentication front-end.
//!
//! A frame is, before scrambling: a 2-byte little-endian total length, a
//! 2-byte little-endian packet id, a 1-byte block count, that many
//! length-prefixed UTF-8 blocks, and a trailing 4-byte little-endian CRC32
//! checksum over everything preceding it. The whole frame is then XORed
//! byte-for-byte with a single repeating key that differs per direction and
//! per endpoint (see [`ids`]).

pub mod ids;
pub mod xor;

use std::string::FromUtf8Error;

use xor::scramble;

/// Bytes making up the length/id/block-count header, before any blocks.
pub const HEADER_LEN: usize = 5;

/// Bytes making up the trailing checksum.
pub const CHECKSUM_LEN: usize = 4;

#[derive(Debug)]
pub enum Error {
    /// Not enough bytes buffered yet to decode a full frame.
    Truncated,
    /// The trailing CRC32 did not match the frame body.
    BadChecksum,
    /// A block was not valid UTF-8.
    BadUtf8(FromUtf8Error),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<FromUtf8Error> for Error {
    fn from(value: FromUtf8Error) -> Self {
        Self::BadUtf8(value)
    }
}

/// A fully decoded, still-scrambled-on-the-wire packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub id: u16,
    pub blocks: Vec<String>,
}

#[derive(Default)]
pub struct Decoder;

impl Decoder {
    /// Peeks the total length of the next frame in `bytes` without
    /// consuming it, so the caller knows how many more bytes to read
    /// before calling [`Decoder::decode`].
    ///
    /// # Test
    ///
    /// ```
    /// use auth_server_codec::{Decoder, encode};
    ///
    /// let frame = encode(0x1010, &[], 0x96);
    /// assert_eq!(Decoder::message_size(&frame, 0x96).unwrap(), frame.len());
    /// ```
    pub fn message_size(bytes: &[u8], key: u8) -> Result<usize, Error> {
        if bytes.len() < 2 {
            return Err(Error::Truncated);
        }

        let low = bytes[0] ^ key;
        let high = bytes[1] ^ key;
        Ok(u16::from_le_bytes([low, high]) as usize)
    }

    /// Decodes one full frame out of `bytes`, which must contain at least
    /// [`Decoder::message_size`] bytes.
    ///
    /// # Test
    ///
    /// ```
    /// use auth_server_codec::{Decoder, encode};
    ///
    /// let frame = encode(0x1100, &["alice".to_string(), "pw".to_string()], 0x96);
    /// let inbound = Decoder::default().decode(&frame, 0x96).unwrap();
    ///
    /// assert_eq!(inbound.id, 0x1100);
    /// assert_eq!(inbound.blocks, vec!["alice".to_string(), "pw".to_string()]);
    /// ```
    pub fn decode(&self, bytes: &[u8], key: u8) -> Result<Inbound, Error> {
        let mut plain = bytes.to_vec();
        scramble(&mut plain, key);

        if plain.len() < HEADER_LEN + CHECKSUM_LEN {
            return Err(Error::Truncated);
        }

        let total_len = u16::from_le_bytes([plain[0], plain[1]]) as usize;
        if plain.len() < total_len {
            return Err(Error::Truncated);
        }

        let frame = &plain[..total_len];
        let body = &frame[..frame.len() - CHECKSUM_LEN];
        let checksum = u32::from_le_bytes(frame[frame.len() - CHECKSUM_LEN..].try_into().unwrap());

        if crc32fast::hash(body) != checksum {
            return Err(Error::BadChecksum);
        }

        let id = u16::from_le_bytes([body[2], body[3]]);
        let block_count = body[4] as usize;

        let mut offset = HEADER_LEN;
        let mut blocks = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            if offset + 2 > body.len() {
                return Err(Error::Truncated);
            }

            let block_len = u16::from_le_bytes([body[offset], body[offset + 1]]) as usize;
            offset += 2;

            if offset + block_len > body.len() {
                return Err(Error::Truncated);
            }

            blocks.push(String::from_utf8(body[offset..offset + block_len].to_vec())?);
            offset += block_len;
        }

        Ok(Inbound { id, blocks })
    }
}

/// Encodes a packet id and its blocks into a scrambled, checksummed frame
/// ready to write to the wire.
///
/// # Test
///
/// ```
/// use auth_server_codec::encode;
///
/// let frame = encode(0x1010, &[], 0x96);
/// assert!(frame.len() >= 9);
/// ```
pub fn encode(id: u16, blocks: &[String], key: u8) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&0u16.to_le_bytes());
    body.extend_from_slice(&id.to_le_bytes());
    body.push(blocks.len() as u8);

    for block in blocks {
        body.extend_from_slice(&(block.len() as u16).to_le_bytes());
        body.extend_from_slice(block.as_bytes());
    }

    let total_len = (body.len() + CHECKSUM_LEN) as u16;
    body[0..2].copy_from_slice(&total_len.to_le_bytes());

    let checksum = crc32fast::hash(&body);
    body.extend_from_slice(&checksum.to_le_bytes());

    scramble(&mut body, key);
    body
}

/// Builds the "connection hello" packet sent immediately after accept,
/// constructed from the connection's send key.
///
/// # Test
///
/// ```
/// use auth_server_codec::{Decoder, hello, ids};
///
/// let frame = hello(0x96);
/// let inbound = Decoder::default().decode(&frame, 0x96).unwrap();
///
/// assert_eq!(inbound.id, ids::HELLO);
/// assert_eq!(inbound.blocks, vec!["150".to_string()]);
/// ```
pub fn hello(send_key: u8) -> Vec<u8> {
    encode(ids::HELLO, &[send_key.to_string()], send_key)
}
