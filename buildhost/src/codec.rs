//! `Content-Length` framing for the build host's JSON-RPC stream.
//!
//! Each message is `Content-Length: N\r\n\r\n` followed by exactly `N` bytes
//! of UTF-8 JSON. [`FrameReader`] and [`FrameWriter`] wrap the child's
//! stdout and stdin respectively.

use std::io;

use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Project evaluation results for large solutions are big; cap at 64 MiB.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("unexpected EOF while reading headers")]
    TruncatedHeaders,
    #[error("missing Content-Length header")]
    MissingContentLength,
    #[error("invalid Content-Length value '{0}'")]
    InvalidContentLength(String),
    #[error("Content-Length {len} exceeds maximum {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("malformed JSON-RPC frame: {0}")]
    Json(#[from] serde_json::Error),
}

impl CodecError {
    fn io(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Io { context, source }
    }
}

/// Reads framed JSON values from an async reader.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    max_frame_bytes: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_limit(reader, DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_limit(reader: R, max_frame_bytes: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_frame_bytes,
        }
    }

    /// Read the next frame. `Ok(None)` means the peer closed the stream
    /// between frames.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>, CodecError> {
        let Some(len) = self.read_content_length().await? else {
            return Ok(None);
        };
        if len > self.max_frame_bytes {
            return Err(CodecError::FrameTooLarge {
                len,
                max: self.max_frame_bytes,
            });
        }

        let mut body = vec![0u8; len];
        self.reader
            .read_exact(&mut body)
            .await
            .map_err(CodecError::io("reading frame body"))?;
        Ok(Some(serde_json::from_slice(&body)?))
    }

    /// Consume one header block and return its `Content-Length`.
    async fn read_content_length(&mut self) -> Result<Option<usize>, CodecError> {
        let mut found = None;
        let mut line = String::new();
        let mut first = true;

        loop {
            line.clear();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(CodecError::io("reading header line"))?;
            match (n, first) {
                (0, true) => return Ok(None),
                (0, false) => return Err(CodecError::TruncatedHeaders),
                _ => first = false,
            }

            let header = line.trim_end_matches(['\r', '\n']);
            if header.is_empty() {
                return found.map(Some).ok_or(CodecError::MissingContentLength);
            }
            if let Some(len) = content_length_of(header)? {
                found = Some(len);
            }
        }
    }
}

/// `Some(len)` when `header` is a `Content-Length` line; other headers are ignored.
fn content_length_of(header: &str) -> Result<Option<usize>, CodecError> {
    let Some((name, value)) = header.split_once(':') else {
        return Ok(None);
    };
    if !name.trim().eq_ignore_ascii_case("content-length") {
        return Ok(None);
    }
    let value = value.trim();
    value
        .parse()
        .map(Some)
        .map_err(|_| CodecError::InvalidContentLength(value.to_string()))
}

/// Writes framed JSON values to an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Serialize `msg` and send it as one frame.
    pub async fn write_frame<T: Serialize + ?Sized>(&mut self, msg: &T) -> Result<(), CodecError> {
        let body = serde_json::to_vec(msg)?;
        let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
        frame.extend_from_slice(&body);

        self.writer
            .write_all(&frame)
            .await
            .map_err(CodecError::io("writing frame"))?;
        self.writer
            .flush()
            .await
            .map_err(CodecError::io("flushing frame"))
    }
}
