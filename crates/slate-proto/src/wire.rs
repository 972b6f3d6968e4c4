// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! CBOR framing helpers for update envelopes.

use crate::UpdateEnvelope;
use thiserror::Error;

/// Upper bound on a single frame's payload. Envelopes larger than this are
/// rejected before decoding.
pub const MAX_PAYLOAD: usize = 8 * 1024 * 1024;

/// Errors raised while framing or parsing packets.
#[derive(Debug, Error)]
pub enum WireError {
    /// Fewer bytes than a length prefix.
    #[error("incomplete length prefix")]
    IncompleteLength,
    /// The buffer ends before the announced payload does.
    #[error("incomplete frame: announced {announced} bytes, have {available}")]
    IncompleteFrame {
        /// Payload length announced by the prefix.
        announced: usize,
        /// Payload bytes actually available.
        available: usize,
    },
    /// Announced payload exceeds [`MAX_PAYLOAD`].
    #[error("frame of {0} bytes exceeds payload limit")]
    Oversize(usize),
    /// CBOR serialization failure.
    #[error("encode error: {0}")]
    Encode(String),
    /// CBOR deserialization failure.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Serialize an envelope to CBOR bytes.
pub fn to_cbor(env: &UpdateEnvelope) -> Result<Vec<u8>, WireError> {
    let mut body = Vec::new();
    ciborium::ser::into_writer(env, &mut body).map_err(|e| WireError::Encode(e.to_string()))?;
    Ok(body)
}

/// Deserialize an envelope from CBOR bytes.
pub fn from_cbor(bytes: &[u8]) -> Result<UpdateEnvelope, WireError> {
    ciborium::de::from_reader(bytes).map_err(|e| WireError::Decode(e.to_string()))
}

/// A framed packet: len (u32, BE) + CBOR payload.
#[derive(Debug, Clone)]
pub struct Packet;

impl Packet {
    /// Encode an envelope into a length-prefixed CBOR packet.
    pub fn encode(env: &UpdateEnvelope) -> Result<Vec<u8>, WireError> {
        let body = to_cbor(env)?;
        if body.len() > MAX_PAYLOAD {
            return Err(WireError::Oversize(body.len()));
        }
        let len = u32::try_from(body.len()).map_err(|_| WireError::Oversize(body.len()))?;
        let mut out = Vec::with_capacity(4 + body.len());
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode one packet from the front of `stream`, returning the envelope
    /// and the number of bytes consumed.
    pub fn decode(stream: &[u8]) -> Result<(UpdateEnvelope, usize), WireError> {
        if stream.len() < 4 {
            return Err(WireError::IncompleteLength);
        }
        let len = u32::from_be_bytes([stream[0], stream[1], stream[2], stream[3]]) as usize;
        if len > MAX_PAYLOAD {
            return Err(WireError::Oversize(len));
        }
        if stream.len() < 4 + len {
            return Err(WireError::IncompleteFrame {
                announced: len,
                available: stream.len().saturating_sub(4),
            });
        }
        let env = from_cbor(&stream[4..4 + len])?;
        Ok((env, 4 + len))
    }
}
