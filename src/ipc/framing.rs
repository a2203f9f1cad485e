//! Newline-delimited JSON framing.
//!
//! Every message is one compact JSON value followed by a single line feed:
//!
//! ```text
//! {"dmd":"start"}\n
//! ```
//!
//! There is no length prefix and no BOM. Readers accept a trailing `\r`
//! before the line feed so that peers writing CRLF are tolerated.

use std::io;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::models::empty_response;

/// Serialize `message` as one JSON line and flush it.
///
/// Compact JSON never contains a raw line feed (newlines inside strings
/// are escaped), so the terminator is the only `\n` on the wire.
///
/// # Errors
///
/// Returns an error if serialization fails or the write or flush fails.
pub async fn write_line<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let mut line = serde_json::to_vec(message).map_err(io::Error::from)?;
    line.push(b'\n');

    writer.write_all(&line).await?;
    writer.flush().await
}

/// A line ran past the reader's size limit without a line feed.
///
/// The rest of the line is still unread, so the stream cannot be resynced.
#[derive(Debug, Error)]
#[error("line exceeds maximum of {limit} bytes")]
pub(crate) struct LineTooLong {
    limit: u64,
}

/// Whether `err` came from [`read_line_bounded`] hitting its limit.
pub(crate) fn is_line_too_long(err: &io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<LineTooLong>())
}

/// Read one line, without its terminator.
///
/// Returns `Ok(None)` when the stream is closed before any byte arrives.
/// A final line without a trailing `\n` is still returned.
///
/// # Errors
///
/// Returns an error if the read fails or the line is not valid UTF-8.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    read_line_bounded(reader, u64::MAX).await
}

/// Read one line of at most `limit` bytes (terminator included).
///
/// # Errors
///
/// In addition to the errors of [`read_line`], fails with
/// `ErrorKind::InvalidData` wrapping [`LineTooLong`] when no line feed appears
/// within `limit` bytes. A non-UTF-8 line is consumed in full before its error
/// is returned, so the next read starts on a fresh line.
pub(crate) async fn read_line_bounded<R>(reader: &mut R, limit: u64) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let bytes_read = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;

    if bytes_read == 0 {
        return Ok(None);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if bytes_read as u64 == limit {
        return Err(io::Error::new(io::ErrorKind::InvalidData, LineTooLong { limit }));
    }

    String::from_utf8(buf)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Decode a reply line.
///
/// An empty line is not an error: it yields `{"error": "empty_response"}`
/// so callers can tell a silent peer from an unreachable one.
///
/// # Errors
///
/// Returns the `serde_json` error when the line is not valid JSON.
pub fn decode_reply(line: &str) -> Result<Value, serde_json::Error> {
    if line.is_empty() {
        return Ok(empty_response());
    }
    serde_json::from_str(line)
}
