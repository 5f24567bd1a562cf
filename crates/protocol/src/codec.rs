//! Binary frame codec.

use crate::envelope::Envelope;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("empty frame")]
    Empty,
    #[error("frame is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("{0} trailing bytes after envelope")]
    TrailingBytes(usize),
    #[error("malformed envelope: {0}")]
    Malformed(#[from] postcard::Error),
}

/// Decode one envelope from a complete frame.
///
/// The frame must contain exactly one envelope; leftover bytes are treated as
/// corruption rather than ignored.
pub fn decode(frame: &[u8]) -> Result<Envelope, CodecError> {
    if frame.is_empty() {
        return Err(CodecError::Empty);
    }
    let (envelope, rest) = postcard::take_from_bytes::<Envelope>(frame)?;
    if !rest.is_empty() {
        return Err(CodecError::TrailingBytes(rest.len()));
    }
    Ok(envelope)
}

/// Decode with an upper bound on the frame size.
pub fn decode_bounded(frame: &[u8], limit: usize) -> Result<Envelope, CodecError> {
    if frame.len() > limit {
        return Err(CodecError::TooLarge {
            size: frame.len(),
            limit,
        });
    }
    decode(frame)
}

pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    Ok(postcard::to_allocvec(envelope)?)
}
