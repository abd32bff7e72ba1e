//! MJPEG block reader
//!
//! Each block on the wire is a text header carrying `Content-Length:`, some
//! boundary bytes, a `0xFF` start-of-image byte and then `Content-Length`
//! further payload bytes. The start byte is consumed while scanning for it
//! and put back as byte 0 of the returned frame.

use futures::Stream;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use super::types::{ExtractorLimits, Frame, FrameHeader, CONTENT_LENGTH, START_OF_IMAGE};
use crate::error::{Result, StreamError};

/// Pulls one frame per call off a byte stream
///
/// Holds no state between calls: each call expects the reader to sit at the
/// start of the next header block.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameExtractor {
    limits: ExtractorLimits,
}

impl FrameExtractor {
    pub fn new(limits: ExtractorLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ExtractorLimits {
        &self.limits
    }

    /// Read the next frame
    pub async fn next_frame<R>(&self, reader: &mut R) -> Result<Frame>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.try_next_frame(reader).await?.ok_or_else(|| {
            StreamError::MalformedHeader("source ended before Content-Length".to_string())
        })
    }

    /// Like [`next_frame`](Self::next_frame), but `Ok(None)` when the source
    /// ends before a `Content-Length` field starts
    pub async fn try_next_frame<R>(&self, reader: &mut R) -> Result<Option<Frame>>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let Some(header) = self.read_header(reader).await? else {
            return Ok(None);
        };
        let skipped = locate_frame_start(reader, header.content_length).await?;
        trace!(
            content_length = header.content_length,
            header_len = header.raw.len(),
            skipped,
            "Frame start located"
        );
        read_frame_body(reader, header.content_length).await.map(Some)
    }

    /// Parse a header block up to the end of its `Content-Length` line
    pub async fn parse_header<R>(&self, reader: &mut R) -> Result<FrameHeader>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.read_header(reader).await?.ok_or_else(|| {
            StreamError::MalformedHeader("source ended before Content-Length".to_string())
        })
    }

    async fn read_header<R>(&self, reader: &mut R) -> Result<Option<FrameHeader>>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut raw = Vec::with_capacity(128);
        let mut field: Option<Vec<u8>> = None;

        loop {
            let Some(byte) = read_byte(reader).await? else {
                return match field {
                    None => Ok(None),
                    Some(_) => Err(StreamError::MalformedHeader(
                        "source ended inside the Content-Length field".to_string(),
                    )),
                };
            };

            match field.as_mut() {
                Some(digits) => {
                    if byte == b'\r' || byte == b'\n' {
                        let content_length = self.parse_length(digits)?;
                        return Ok(Some(FrameHeader {
                            content_length,
                            raw,
                        }));
                    }
                    if digits.len() >= self.limits.max_length_digits {
                        return Err(StreamError::MalformedHeader(format!(
                            "Content-Length field longer than {} bytes",
                            self.limits.max_length_digits
                        )));
                    }
                    digits.push(byte);
                }
                None => {
                    if raw.len() >= self.limits.max_header_len {
                        return Err(StreamError::MalformedHeader(format!(
                            "no Content-Length within {} header bytes",
                            self.limits.max_header_len
                        )));
                    }
                    raw.push(byte);
                    if raw.ends_with(CONTENT_LENGTH) {
                        field = Some(Vec::with_capacity(16));
                    }
                }
            }
        }
    }

    fn parse_length(&self, digits: &[u8]) -> Result<usize> {
        let text: String = String::from_utf8_lossy(digits)
            .chars()
            .filter(|c| *c != ' ')
            .collect();
        let content_length: usize = text.parse().map_err(|_| {
            StreamError::MalformedHeader(format!("unparseable Content-Length {text:?}"))
        })?;

        if content_length == 0 {
            return Err(StreamError::MalformedHeader(
                "Content-Length must be positive".to_string(),
            ));
        }
        if content_length > self.limits.max_frame_len {
            return Err(StreamError::MalformedHeader(format!(
                "Content-Length {content_length} exceeds limit {}",
                self.limits.max_frame_len
            )));
        }
        Ok(content_length)
    }

    /// Stream every frame until the source is exhausted at a block boundary
    ///
    /// The stream ends after the first error.
    pub fn frames<R>(self, reader: R) -> impl Stream<Item = Result<Frame>>
    where
        R: AsyncRead + Unpin,
    {
        futures::stream::unfold(Some((self, reader)), |state| async move {
            let (extractor, mut reader) = state?;
            match extractor.try_next_frame(&mut reader).await {
                Ok(Some(frame)) => Some((Ok(frame), Some((extractor, reader)))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

/// Discard bytes up to and including the next start-of-image byte
///
/// Returns how many boundary bytes were skipped before it.
async fn locate_frame_start<R>(reader: &mut R, content_length: usize) -> Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut skipped = 0;
    loop {
        match read_byte(reader).await? {
            Some(START_OF_IMAGE) => return Ok(skipped),
            Some(_) => skipped += 1,
            None => {
                return Err(StreamError::StreamTruncated {
                    expected: content_length,
                    received: 0,
                })
            }
        }
    }
}

async fn read_frame_body<R>(reader: &mut R, content_length: usize) -> Result<Frame>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let total = content_length.checked_add(1).ok_or_else(|| {
        StreamError::MalformedHeader(format!("Content-Length {content_length} too large"))
    })?;
    let mut buf = vec![0u8; total];
    // The marker was eaten by the scan
    buf[0] = START_OF_IMAGE;

    let mut filled = 1;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(StreamError::StreamTruncated {
                expected: content_length,
                received: filled - 1,
            });
        }
        filled += n;
    }

    Ok(Frame::from_buffer(buf))
}

/// `Ok(None)` at end-of-data
async fn read_byte<R>(reader: &mut R) -> Result<Option<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match reader.read_u8().await {
        Ok(byte) => Ok(Some(byte)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}
