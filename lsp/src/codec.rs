//! JSON-RPC framing over stdio.
//!
//! Messages are `Content-Length: N\r\n\r\n{json}`. [`FrameReader`] and
//! [`FrameWriter`] handle one side each; the server runs them on dedicated
//! tasks so a half-read frame is never abandoned by a `select!`.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Maximum frame size (64 MiB). Whole documents travel in `didOpen`.
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("i/o error while {action}: {source}")]
    Io {
        action: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("unexpected EOF while reading headers")]
    TruncatedHeaders,
    #[error("missing Content-Length header")]
    MissingContentLength,
    #[error("invalid Content-Length value: {0:?}")]
    InvalidContentLength(String),
    #[error("Content-Length {0} exceeds maximum {MAX_FRAME_BYTES}")]
    Oversized(usize),
    #[error("invalid JSON-RPC body: {0}")]
    Json(#[from] serde_json::Error),
}

fn io_err(action: &'static str) -> impl FnOnce(io::Error) -> CodecError {
    move |source| CodecError::Io { action, source }
}

/// Reads JSON-RPC frames from an async reader.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` on a clean EOF between frames.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>, CodecError> {
        let Some(content_length) = self.read_headers().await? else {
            return Ok(None);
        };

        if content_length > MAX_FRAME_BYTES {
            return Err(CodecError::Oversized(content_length));
        }

        let mut body = vec![0u8; content_length];
        self.reader
            .read_exact(&mut body)
            .await
            .map_err(io_err("reading frame body"))?;

        Ok(Some(serde_json::from_slice(&body)?))
    }

    /// Parse headers up to the blank separator line.
    async fn read_headers(&mut self) -> Result<Option<usize>, CodecError> {
        let mut content_length = None;
        let mut line = String::new();
        let mut saw_header_bytes = false;

        loop {
            line.clear();
            let read = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(io_err("reading header line"))?;

            if read == 0 {
                if saw_header_bytes {
                    return Err(CodecError::TruncatedHeaders);
                }
                return Ok(None);
            }
            saw_header_bytes = true;

            let header = line.trim();
            if header.is_empty() {
                break;
            }

            let Some((key, value)) = header.split_once(':') else {
                continue;
            };
            if key.trim().eq_ignore_ascii_case("Content-Length") {
                let value = value.trim();
                let len = value
                    .parse()
                    .map_err(|_| CodecError::InvalidContentLength(value.to_owned()))?;
                content_length = Some(len);
            }
        }

        content_length
            .map(Some)
            .ok_or(CodecError::MissingContentLength)
    }
}

/// Writes JSON-RPC frames to an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame(&mut self, msg: &serde_json::Value) -> Result<(), CodecError> {
        let body = serde_json::to_vec(msg)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.writer
            .write_all(header.as_bytes())
            .await
            .map_err(io_err("writing frame header"))?;
        self.writer
            .write_all(&body)
            .await
            .map_err(io_err("writing frame body"))?;
        self.writer.flush().await.map_err(io_err("flushing frame"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_frame_reads_back() {
        let msg = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": { "uri": "file:///work/a.c", "diagnostics": [] }
        });

        let mut buf = Vec::new();
        FrameWriter::new(&mut buf).write_frame(&msg).await.unwrap();

        let mut reader = FrameReader::new(buf.as_slice());
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), msg);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_back_to_back_frames() {
        let open = serde_json::json!({"jsonrpc": "2.0", "method": "textDocument/didOpen"});
        let close = serde_json::json!({"jsonrpc": "2.0", "method": "textDocument/didClose"});

        let mut buf = Vec::new();
        let mut writer = FrameWriter::new(&mut buf);
        writer.write_frame(&open).await.unwrap();
        writer.write_frame(&close).await.unwrap();

        let mut reader = FrameReader::new(buf.as_slice());
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), open);
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), close);
    }

    #[tokio::test]
    async fn test_clean_eof() {
        let mut reader = FrameReader::new(&b""[..]);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_content_length() {
        let mut reader = FrameReader::new(&b"Content-Type: application/json\r\n\r\n{}"[..]);
        assert!(matches!(
            reader.read_frame().await,
            Err(CodecError::MissingContentLength)
        ));
    }

    #[tokio::test]
    async fn test_eof_mid_headers_is_error() {
        let mut reader = FrameReader::new(&b"Content-Length: 10\r\n"[..]);
        assert!(matches!(
            reader.read_frame().await,
            Err(CodecError::TruncatedHeaders)
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let header = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_BYTES + 1);
        let mut reader = FrameReader::new(header.as_bytes());
        assert!(matches!(
            reader.read_frame().await,
            Err(CodecError::Oversized(_))
        ));
    }

    #[tokio::test]
    async fn test_header_name_case_and_extra_headers() {
        let body = r#"{"jsonrpc":"2.0","id":1}"#;
        let frame = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\ncontent-length: {}\r\n\r\n{body}",
            body.len(),
        );
        let mut reader = FrameReader::new(frame.as_bytes());
        assert_eq!(reader.read_frame().await.unwrap().unwrap()["id"], 1);
    }

    #[tokio::test]
    async fn test_eof_mid_body() {
        let mut reader = FrameReader::new(&b"Content-Length: 100\r\n\r\nhello"[..]);
        assert!(matches!(
            reader.read_frame().await,
            Err(CodecError::Io { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_json_body() {
        let body = "not valid json!!!";
        let frame = format!("Content-Length: {}\r\n\r\n{body}", body.len());
        let mut reader = FrameReader::new(frame.as_bytes());
        assert!(matches!(reader.read_frame().await, Err(CodecError::Json(_))));
    }

    #[tokio::test]
    async fn test_invalid_content_length_value() {
        let mut reader = FrameReader::new(&b"Content-Length: lots\r\n\r\n"[..]);
        match reader.read_frame().await {
            Err(CodecError::InvalidContentLength(value)) => assert_eq!(value, "lots"),
            other => panic!("expected InvalidContentLength, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_content_length_counts_bytes() {
        // "é" is 2 bytes in UTF-8.
        let msg = serde_json::json!({"text": "é"});
        let mut buf = Vec::new();
        FrameWriter::new(&mut buf).write_frame(&msg).await.unwrap();

        let body = serde_json::to_string(&msg).unwrap();
        let output = String::from_utf8(buf).unwrap();
        assert!(output.starts_with(&format!("Content-Length: {}\r\n\r\n", body.len())));
    }
}
