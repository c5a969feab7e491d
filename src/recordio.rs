//! Length-delimited record framing for streamed calls and events.
//!
//! Each record is the ASCII decimal payload length, a newline, then the
//! payload bytes in the negotiated message encoding:
//!
//! ```text
//! 5\nhello13\nhello, world!
//! ```

use crate::pipe::PipeReader;
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Upper bound on a single framed record.
pub const MAX_RECORD_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum RecordIoError {
    #[error("malformed record length `{0}`")]
    MalformedLength(String),
    #[error("record length {len} exceeds maximum of {MAX_RECORD_BYTES}")]
    RecordTooLarge { len: usize },
    #[error("stream ended mid-record")]
    Truncated,
    #[error("failed to decode record: {0}")]
    Decode(String),
}

/// Frames `payload` as a single record.
pub fn encode_record(payload: &[u8]) -> Bytes {
    let mut framed = BytesMut::with_capacity(payload.len() + 12);
    framed.put_slice(payload.len().to_string().as_bytes());
    framed.put_u8(b'\n');
    framed.put_slice(payload);
    framed.freeze()
}

/// Decodes a byte pipe carrying framed records into a lazy sequence of
/// values using the injected codec. A reader is bound to its pipe;
/// restart by constructing a new instance on a new pipe.
pub struct RecordReader<T> {
    pipe: PipeReader,
    decode: Box<dyn Fn(&[u8]) -> Result<T, String> + Send>,
    buffer: BytesMut,
}

impl<T> RecordReader<T> {
    pub fn new<D>(pipe: PipeReader, decode: D) -> Self
    where
        D: Fn(&[u8]) -> Result<T, String> + Send + 'static,
    {
        RecordReader {
            pipe,
            decode: Box::new(decode),
            buffer: BytesMut::new(),
        }
    }

    /// Yields the next decoded record, `None` at a clean end of stream,
    /// or an error on truncation or a malformed length prefix. May
    /// suspend until at least one complete record is buffered.
    pub async fn read(&mut self) -> Result<Option<T>, RecordIoError> {
        loop {
            if let Some(record) = self.try_decode()? {
                return Ok(Some(record));
            }
            match self.pipe.read().await {
                Some(chunk) => self.buffer.extend_from_slice(&chunk),
                None if self.buffer.is_empty() => return Ok(None),
                None => return Err(RecordIoError::Truncated),
            }
        }
    }

    fn try_decode(&mut self) -> Result<Option<T>, RecordIoError> {
        let newline = match self.buffer.iter().position(|&b| b == b'\n') {
            Some(idx) => idx,
            None => {
                // A length prefix longer than the maximum record's digits
                // cannot become valid.
                if self.buffer.len() > 20 {
                    let prefix = String::from_utf8_lossy(&self.buffer[..20]).into_owned();
                    return Err(RecordIoError::MalformedLength(prefix));
                }
                return Ok(None);
            }
        };

        let header = &self.buffer[..newline];
        if header.is_empty() || !header.iter().all(u8::is_ascii_digit) {
            return Err(RecordIoError::MalformedLength(
                String::from_utf8_lossy(header).into_owned(),
            ));
        }
        let len: usize = std::str::from_utf8(header)
            .ok()
            .and_then(|header| header.parse().ok())
            .ok_or_else(|| {
                RecordIoError::MalformedLength(String::from_utf8_lossy(header).into_owned())
            })?;
        if len > MAX_RECORD_BYTES {
            return Err(RecordIoError::RecordTooLarge { len });
        }
        if self.buffer.len() < newline + 1 + len {
            return Ok(None);
        }

        let _ = self.buffer.split_to(newline + 1);
        let payload = self.buffer.split_to(len);
        let record = (self.decode)(&payload).map_err(RecordIoError::Decode)?;
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::pipe;

    fn utf8(payload: &[u8]) -> Result<String, String> {
        String::from_utf8(payload.to_vec()).map_err(|err| err.to_string())
    }

    #[tokio::test]
    async fn reads_records_across_chunks() {
        let (writer, reader) = pipe();
        let mut reader = RecordReader::new(reader, utf8);

        let framed = encode_record(b"hello, world!");
        let (left, right) = framed.split_at(4);
        writer.write(Bytes::copy_from_slice(left)).unwrap();
        writer.write(Bytes::copy_from_slice(right)).unwrap();
        writer.write(encode_record(b"bye")).unwrap();
        writer.close();

        assert_eq!(Some("hello, world!".to_string()), reader.read().await.unwrap());
        assert_eq!(Some("bye".to_string()), reader.read().await.unwrap());
        assert!(reader.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_record() {
        let (writer, reader) = pipe();
        let mut reader = RecordReader::new(reader, utf8);
        writer.write(encode_record(b"")).unwrap();
        writer.close();
        assert_eq!(Some(String::new()), reader.read().await.unwrap());
        assert!(reader.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_stream() {
        let (writer, reader) = pipe();
        let mut reader = RecordReader::new(reader, utf8);
        writer.write(Bytes::from_static(b"100\npartial")).unwrap();
        writer.close();
        assert!(matches!(
            reader.read().await,
            Err(RecordIoError::Truncated)
        ));
    }

    #[tokio::test]
    async fn malformed_length() {
        let (writer, reader) = pipe();
        let mut reader = RecordReader::new(reader, utf8);
        writer.write(Bytes::from_static(b"5x\nhello")).unwrap();
        writer.close();
        assert!(matches!(
            reader.read().await,
            Err(RecordIoError::MalformedLength(_))
        ));
    }
}
