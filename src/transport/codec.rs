//! JSON framing with optional zlib compression.

use crate::error::TransportError;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};

use super::protocol::Frame;

/// Encodes outbound messages and decodes inbound frames.
///
/// Without compression messages travel as text frames. With compression the
/// JSON bytes are zlib-deflated into binary frames, and inbound binary frames
/// are inflated before parsing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WireCodec {
    compression: bool,
}

impl WireCodec {
    pub fn new(compression: bool) -> Self {
        Self { compression }
    }

    pub fn compression(&self) -> bool {
        self.compression
    }

    /// Serialize a message into a frame.
    pub fn encode<T: Serialize + ?Sized>(&self, message: &T) -> Result<Frame, TransportError> {
        let json = serde_json::to_string(message)
            .map_err(|e| TransportError::SerializationError(e.to_string()))?;

        if !self.compression {
            return Ok(Frame::Text(json));
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(json.as_bytes())
            .map_err(|e| TransportError::CompressionError(e.to_string()))?;
        let bytes = encoder
            .finish()
            .map_err(|e| TransportError::CompressionError(e.to_string()))?;
        Ok(Frame::Binary(bytes))
    }

    /// Parse a frame into a message.
    pub fn decode<T: DeserializeOwned>(&self, frame: &Frame) -> Result<T, TransportError> {
        match (self.compression, frame) {
            (false, Frame::Text(text)) => Ok(serde_json::from_str(text)?),
            (false, Frame::Binary(bytes)) => Ok(serde_json::from_slice(bytes)?),
            (true, Frame::Binary(bytes)) => {
                let mut json = Vec::new();
                ZlibDecoder::new(bytes.as_slice())
                    .read_to_end(&mut json)
                    .map_err(|e| TransportError::CompressionError(e.to_string()))?;
                Ok(serde_json::from_slice(&json)?)
            }
            (true, Frame::Text(_)) => Err(TransportError::UnexpectedFrame(
                "text frame on a compressed connection".to_string(),
            )),
        }
    }
}
