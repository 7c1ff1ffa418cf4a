use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

/// Largest accepted frame, counted on the trimmed line.
pub const MAX_FRAME_LEN: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line with surrounding whitespace removed.
    Line(String),
    /// A line whose content exceeded the cap; carries the raw length seen.
    Oversized(usize),
    /// Peer closed the stream or the read failed. Terminal.
    Eof,
}

pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
    seen: usize,
    // A non-whitespace byte fell past the cap.
    overflow: bool,
    max_len: usize,
    done: bool,
}

impl<R: AsyncBufRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_len(inner, MAX_FRAME_LEN)
    }

    pub fn with_max_len(inner: R, max_len: usize) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(256),
            seen: 0,
            overflow: false,
            max_len,
            done: false,
        }
    }

    /// Reads the next frame.
    ///
    /// Cancel safe: partial line state lives in the reader, so dropping the
    /// future inside `tokio::select!` loses no bytes. Once [`Frame::Eof`] has
    /// been returned every later call returns it again.
    pub async fn next_frame(&mut self) -> Frame {
        if self.done {
            return Frame::Eof;
        }

        loop {
            // (bytes consumed, line complete); `None` ends the stream.
            let step = match self.inner.fill_buf().await {
                // A trailing partial line without `\n` is not a frame.
                Ok([]) => None,
                Ok(available) => {
                    let newline = available.iter().position(|&b| b == b'\n');
                    let take = newline.map_or(available.len(), |i| i + 1);

                    let mut chunk = &available[..take];
                    if self.buf.is_empty() {
                        let start = chunk
                            .iter()
                            .position(|b| !b.is_ascii_whitespace())
                            .unwrap_or(chunk.len());
                        chunk = &chunk[start..];
                    }

                    let room = self.max_len.saturating_sub(self.buf.len());
                    let (kept, dropped) = chunk.split_at(chunk.len().min(room));
                    self.buf.extend_from_slice(kept);
                    self.overflow |= dropped.iter().any(|b| !b.is_ascii_whitespace());
                    Some((take, newline.is_some()))
                }
                Err(err) => {
                    debug!(error = %err, "read failed, ending stream");
                    None
                }
            };

            let Some((take, complete)) = step else {
                return self.finish();
            };
            self.seen += take;
            self.inner.consume(take);

            if complete {
                return self.take_frame();
            }
        }
    }

    fn take_frame(&mut self) -> Frame {
        let seen = std::mem::take(&mut self.seen);
        let truncated = std::mem::take(&mut self.overflow);

        let frame = {
            let text = String::from_utf8_lossy(&self.buf);
            let line = text.trim();
            if truncated || line.len() > self.max_len {
                Frame::Oversized(seen)
            } else {
                Frame::Line(line.to_string())
            }
        };

        self.buf.clear();
        frame
    }

    fn finish(&mut self) -> Frame {
        self.done = true;
        self.buf.clear();
        self.seen = 0;
        self.overflow = false;
        Frame::Eof
    }
}
