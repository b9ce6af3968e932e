//! Wire framing.
//!
//! Each frame on a transport connection is
//! `u32 name_len | name_bytes | u32 body_len | body_bytes | u32 from_len | from_bytes`
//! in network byte order. `from` is the sender's address in `name(host:port)`
//! form. Decoding is incremental: a partial frame leaves the buffer untouched
//! and yields `None` until the remaining bytes arrive.

use crate::addr::AddrParseError;
use crate::envelope::Envelope;
use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Upper bound on any single frame section; larger sections indicate a
/// corrupt stream rather than a legitimate message.
pub const MAX_SECTION_LEN: usize = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame section of {0} bytes exceeds the {MAX_SECTION_LEN} byte limit")]
    SectionTooLarge(usize),
    #[error("frame name is not valid ascii")]
    NonAsciiName,
    #[error("frame sender is not valid utf-8")]
    NonUtf8Sender,
    #[error("frame sender: {0}")]
    Sender(#[from] AddrParseError),
}

/// Appends one encoded frame to `dst`.
pub fn encode(envelope: &Envelope, dst: &mut BytesMut) -> Result<(), CodecError> {
    if !envelope.name.is_ascii() {
        return Err(CodecError::NonAsciiName);
    }
    let from = envelope.from.to_string();
    for len in [envelope.name.len(), envelope.body.len(), from.len()] {
        if len > MAX_SECTION_LEN {
            return Err(CodecError::SectionTooLarge(len));
        }
    }
    dst.reserve(12 + envelope.name.len() + envelope.body.len() + from.len());
    dst.put_u32(envelope.name.len() as u32);
    dst.put_slice(envelope.name.as_bytes());
    dst.put_u32(envelope.body.len() as u32);
    dst.put_slice(&envelope.body);
    dst.put_u32(from.len() as u32);
    dst.put_slice(from.as_bytes());
    Ok(())
}

/// Removes and returns the next complete frame from `src`, or `None` if the
/// buffer does not yet hold one.
pub fn decode(src: &mut BytesMut) -> Result<Option<Envelope>, CodecError> {
    let mut offset = 0usize;
    let mut sections = [(0usize, 0usize); 3];
    for section in sections.iter_mut() {
        if src.len() < offset + 4 {
            return Ok(None);
        }
        let len = (&src[offset..offset + 4]).get_u32() as usize;
        if len > MAX_SECTION_LEN {
            return Err(CodecError::SectionTooLarge(len));
        }
        offset += 4;
        if src.len() < offset + len {
            return Ok(None);
        }
        *section = (offset, len);
        offset += len;
    }

    let frame = src.split_to(offset).freeze();
    let (name_at, name_len) = sections[0];
    let (body_at, body_len) = sections[1];
    let (from_at, from_len) = sections[2];

    let name = std::str::from_utf8(&frame[name_at..name_at + name_len])
        .map_err(|_| CodecError::NonAsciiName)?;
    if !name.is_ascii() {
        return Err(CodecError::NonAsciiName);
    }
    let from = std::str::from_utf8(&frame[from_at..from_at + from_len])
        .map_err(|_| CodecError::NonUtf8Sender)?
        .parse()?;
    Ok(Some(Envelope {
        name: name.to_string(),
        from,
        body: frame.slice(body_at..body_at + body_len),
    }))
}
