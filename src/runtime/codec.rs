//! Binary encoding of tagged values and evaluation results.
//!
//! Layout of an encoded value: one tag byte, then a payload whose size is a
//! pure function of the tag (`Bool` 1, `Int`/`UInt` 4, `Double` 8, `String`
//! 8-byte length plus data, everything else nothing). Fixed-width fields use
//! native byte order; both processes always run on the same machine.
//!
//! An [`EvalResult`] is prefixed with a one-byte success flag. A failure may be
//! followed by a length-prefixed message; a bare flag is still a valid failure.

use bytes::{Buf, BufMut};

use super::error::ProtocolError;
use super::value::{TaggedValue, ValueTag};

/// Result of evaluating one script on the isolated side.
#[derive(Clone, Debug, PartialEq)]
pub enum EvalResult {
    Success(TaggedValue),
    /// The script threw or failed to compile. Carries the exception text when
    /// the executor could extract one.
    Failure(Option<String>),
}

impl EvalResult {
    pub fn is_success(&self) -> bool {
        matches!(self, EvalResult::Success(_))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            EvalResult::Success(value) => {
                buf.put_u8(1);
                encode_value(value, &mut buf);
            }
            EvalResult::Failure(message) => {
                buf.put_u8(0);
                if let Some(message) = message {
                    put_bytes(&mut buf, message.as_bytes());
                }
            }
        }
        buf
    }

    pub fn decode(mut bytes: &[u8]) -> Result<Self, ProtocolError> {
        let buf = &mut bytes;
        ensure(buf, 1)?;
        if buf.get_u8() != 0 {
            return Ok(EvalResult::Success(decode_value(buf)?));
        }
        if !buf.has_remaining() {
            return Ok(EvalResult::Failure(None));
        }
        let message = get_bytes(buf)?;
        Ok(EvalResult::Failure(Some(
            String::from_utf8_lossy(&message).into_owned(),
        )))
    }
}

/// Append the encoding of `value` to `buf`. Never fails.
pub fn encode_value<B: BufMut>(value: &TaggedValue, buf: &mut B) {
    buf.put_u8(value.tag() as u8);
    match value {
        TaggedValue::Bool(b) => buf.put_u8(u8::from(*b)),
        TaggedValue::Double(f) => buf.put_f64_ne(*f),
        TaggedValue::Int(i) => buf.put_i32_ne(*i),
        TaggedValue::UInt(u) => buf.put_u32_ne(*u),
        TaggedValue::String(s) => put_bytes(buf, s.as_bytes()),
        _ => {}
    }
}

/// Consume one encoded value from the front of `buf`.
pub fn decode_value<B: Buf>(buf: &mut B) -> Result<TaggedValue, ProtocolError> {
    ensure(buf, 1)?;
    let tag = ValueTag::try_from(buf.get_u8())?;
    if let Some(bare) = TaggedValue::from_bare_tag(tag) {
        return Ok(bare);
    }

    Ok(match tag {
        ValueTag::Bool => {
            ensure(buf, 1)?;
            TaggedValue::Bool(buf.get_u8() != 0)
        }
        ValueTag::Double => {
            ensure(buf, 8)?;
            TaggedValue::Double(buf.get_f64_ne())
        }
        ValueTag::Int => {
            ensure(buf, 4)?;
            TaggedValue::Int(buf.get_i32_ne())
        }
        ValueTag::UInt => {
            ensure(buf, 4)?;
            TaggedValue::UInt(buf.get_u32_ne())
        }
        ValueTag::String => {
            let data = get_bytes(buf)?;
            TaggedValue::String(String::from_utf8_lossy(&data).into_owned())
        }
        // payload-less tags returned above
        _ => TaggedValue::Unknown,
    })
}

fn put_bytes<B: BufMut>(buf: &mut B, data: &[u8]) {
    buf.put_u64_ne(data.len() as u64);
    buf.put_slice(data);
}

fn get_bytes<B: Buf>(buf: &mut B) -> Result<Vec<u8>, ProtocolError> {
    ensure(buf, 8)?;
    let len = buf.get_u64_ne();
    let len = usize::try_from(len).map_err(|_| ProtocolError::Truncated {
        needed: usize::MAX,
        remaining: buf.remaining(),
    })?;
    ensure(buf, len)?;
    let mut data = vec![0; len];
    buf.copy_to_slice(&mut data);
    Ok(data)
}

fn ensure<B: Buf>(buf: &B, needed: usize) -> Result<(), ProtocolError> {
    if buf.remaining() < needed {
        return Err(ProtocolError::Truncated {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}
