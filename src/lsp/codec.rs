//! `Content-Length` framing for JSON-RPC over the server's stdio.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::utils::error::{ClientError, ClientResult};

/// Upper bound on a single incoming body.
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader: BufReader::new(reader) }
    }

    /// Read the next frame body as JSON. `Ok(None)` means the stream closed
    /// cleanly between frames.
    ///
    /// A body that is not valid JSON yields [`ClientError::Json`] after the
    /// whole body has been consumed, so the next call starts on a frame
    /// boundary.
    pub async fn read_frame(&mut self) -> ClientResult<Option<serde_json::Value>> {
        let Some(content_length) = self.read_headers().await? else {
            return Ok(None);
        };

        if content_length > MAX_FRAME_BYTES {
            return Err(ClientError::transport(format!(
                "Content-Length {content_length} exceeds maximum {MAX_FRAME_BYTES}"
            )));
        }

        let mut body = vec![0u8; content_length];
        self.reader.read_exact(&mut body).await?;
        Ok(Some(serde_json::from_slice(&body)?))
    }

    async fn read_headers(&mut self) -> ClientResult<Option<usize>> {
        let mut content_length = None;
        let mut saw_header = false;
        let mut line = String::new();

        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                if saw_header {
                    return Err(ClientError::transport("unexpected EOF while reading headers"));
                }
                return Ok(None);
            }
            saw_header = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            // Content-Type and any other header are ignored.
            if let Some((key, value)) = trimmed.split_once(':') {
                if key.trim().eq_ignore_ascii_case("Content-Length") {
                    let len = value.trim().parse().map_err(|_| {
                        ClientError::transport(format!("invalid Content-Length: {}", value.trim()))
                    })?;
                    content_length = Some(len);
                }
            }
        }

        content_length
            .map(Some)
            .ok_or_else(|| ClientError::transport("missing Content-Length header"))
    }
}

pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame<T: serde::Serialize>(&mut self, message: &T) -> ClientResult<()> {
        let content = serde_json::to_string(message)?;
        let framed = format!("Content-Length: {}\r\n\r\n{content}", content.len());
        self.writer.write_all(framed.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
