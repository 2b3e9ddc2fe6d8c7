use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io;
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder};

/// Frames messages as bare JSON values.
///
/// Encoding appends a trailing newline for readability; decoding does not
/// require one — the first complete JSON value in the buffer is the message,
/// with surrounding whitespace skipped.
#[derive(Debug, Default)]
pub struct JsonCodec<T> {
    marker: PhantomData<T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            marker: PhantomData,
        }
    }
}

impl<T> Encoder<T> for JsonCodec<T>
where
    T: Serialize,
{
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut encoded = serde_json::to_vec(&item)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        encoded.push(b'\n');
        dst.reserve(encoded.len());
        dst.put_slice(&encoded);
        Ok(())
    }
}

impl<T> Decoder for JsonCodec<T>
where
    T: DeserializeOwned,
{
    type Item = T;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(start) = src.iter().position(|b| !b.is_ascii_whitespace()) else {
            src.clear();
            return Ok(None);
        };

        let mut values = serde_json::Deserializer::from_slice(&src[start..]).into_iter::<T>();
        match values.next() {
            Some(Ok(value)) => {
                let consumed = start + values.byte_offset();
                src.advance(consumed);
                Ok(Some(value))
            }
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string())),
            None => Ok(None),
        }
    }
}
