//! Length-prefixed framing over a blocking stream: a 4-byte big-endian
//! length prefix followed by a `postcard`-encoded payload.

use std::io::{Read, Write};

/// Maximum frame size accepted from the wire — guards against a corrupt or
/// adversarial length prefix causing an unbounded allocation.
const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

#[derive(thiserror::Error, Debug)]
pub enum FramingError {
    #[error("IO error while framing: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame length {0} exceeds maximum of {MAX_FRAME_BYTES}")]
    TooLarge(u32),
}

pub fn write_frame(stream: &mut impl Write, bytes: &[u8]) -> Result<(), FramingError> {
    let len = u32::try_from(bytes.len()).map_err(|_| FramingError::TooLarge(u32::MAX))?;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(bytes)?;
    Ok(())
}

pub fn read_frame(stream: &mut impl Read) -> Result<Vec<u8>, FramingError> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes)?;
    let len = u32::from_be_bytes(len_bytes);
    if len > MAX_FRAME_BYTES {
        return Err(FramingError::TooLarge(len));
    }

    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf)?;
    Ok(buf)
}
