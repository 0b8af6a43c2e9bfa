//! Tokio codec for TPKT (RFC 1006) framing.
//!
//! Every ISO-on-TCP packet starts with a four byte header:
//!
//! ```text
//! +---------+----------+-----------------+
//! | version | reserved | length (u16 BE) |
//! |  0x03   |   0x00   | header included |
//! +---------+----------+-----------------+
//! ```
//!
//! `TpktCodec` strips the header on decode and yields the COTP payload; on
//! encode it prefixes the payload with a header. It is meant to be used with
//! `tokio_util::codec::Framed`:
//!
//! ```rust,no_run
//! use tokio::net::TcpStream;
//! use tokio_util::codec::Framed;
//! use visionlink_protocol::TpktCodec;
//!
//! # async fn example() -> std::io::Result<()> {
//! let stream = TcpStream::connect("192.168.1.10:102").await?;
//! let framed = Framed::new(stream, TpktCodec::new());
//! # Ok(())
//! # }
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{ProtocolError, Result};

/// TPKT version byte.
pub const TPKT_VERSION: u8 = 0x03;

/// Size of the TPKT header.
pub const TPKT_HEADER_LEN: usize = 4;

/// Default maximum frame size, header included.
///
/// Controllers negotiate PDUs of at most 960 bytes; anything far above that
/// is treated as a corrupted stream.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4096;

/// Codec for TPKT-framed packets.
#[derive(Debug, Clone)]
pub struct TpktCodec {
    max_frame_size: usize,
}

impl TpktCodec {
    /// Create a codec with the default maximum frame size.
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with a custom maximum frame size.
    ///
    /// ```
    /// use visionlink_protocol::TpktCodec;
    ///
    /// let codec = TpktCodec::with_max_frame_size(1024);
    /// assert_eq!(codec.max_frame_size(), 1024);
    /// ```
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Get the current maximum frame size.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for TpktCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for TpktCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < TPKT_HEADER_LEN {
            return Ok(None);
        }

        if src[0] != TPKT_VERSION {
            return Err(ProtocolError::BadVersion(src[0]));
        }

        let length = usize::from(u16::from_be_bytes([src[2], src[3]]));
        if length < TPKT_HEADER_LEN {
            return Err(ProtocolError::truncated("TPKT frame", length, TPKT_HEADER_LEN));
        }
        if length > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max_size: self.max_frame_size,
            });
        }

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(length);
        frame.advance(TPKT_HEADER_LEN);
        Ok(Some(frame.freeze()))
    }
}

impl Encoder<Bytes> for TpktCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        let size = item.len() + TPKT_HEADER_LEN;
        if size > self.max_frame_size || size > usize::from(u16::MAX) {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max_size: self.max_frame_size,
            });
        }

        dst.reserve(size);
        dst.put_u8(TPKT_VERSION);
        dst.put_u8(0x00);
        dst.put_u16(size as u16);
        dst.extend_from_slice(&item);
        Ok(())
    }
}
