use core::pin::Pin;
use core::task::{Context, Poll};

use futures::{Stream, ready};
use pin_project_lite::pin_project;
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tracing::warn;

use crate::error::{ErrorKind, SyncResult};
use crate::sync_error;
use crate::types::{LogLevel, Message};

pin_project! {
    /// Streaming decoder for the line-delimited message envelope.
    ///
    /// [`MessageStream`] turns the raw byte stream of a source adapter into
    /// an ordered sequence of [`Message`]s, one JSON object per line. It is
    /// single-pass: lines are decoded as they arrive and never buffered
    /// beyond the current one, and emission order is preserved exactly.
    ///
    /// Sources may interleave non-protocol noise (stray stderr-like output)
    /// with protocol lines. A line that fails to decode therefore does not
    /// fail the stream: it is surfaced as a synthesized LOG diagnostic and
    /// decoding continues. Only a fault of the underlying byte stream itself
    /// ends the stream, with a single [`ErrorKind::SourceIoFailed`] error.
    #[must_use = "streams do nothing unless polled"]
    #[derive(Debug)]
    pub struct MessageStream<R> {
        #[pin]
        lines: Lines<R>,
        done: bool,
    }
}

impl<R> MessageStream<R>
where
    R: AsyncBufRead,
{
    /// Wraps `reader`, decoding one message per line.
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            done: false,
        }
    }
}

impl<R> Stream for MessageStream<R>
where
    R: AsyncBufRead,
{
    type Item = SyncResult<Message>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if *this.done {
            return Poll::Ready(None);
        }

        loop {
            match ready!(this.lines.as_mut().poll_next_line(cx)) {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    match serde_json::from_str::<Message>(trimmed) {
                        Ok(message) => return Poll::Ready(Some(Ok(message))),
                        Err(err) => {
                            warn!(error = %err, "skipping malformed protocol line");

                            let diagnostic = Message::log(
                                LogLevel::Warn,
                                json!({
                                    "message": "malformed protocol line skipped",
                                    "line": line,
                                    "error": err.to_string(),
                                }),
                            );

                            return Poll::Ready(Some(Ok(diagnostic)));
                        }
                    }
                }
                Ok(None) => {
                    *this.done = true;
                    return Poll::Ready(None);
                }
                Err(err) => {
                    // A fault of the byte stream itself is fatal; the stream
                    // ends after reporting it once.
                    *this.done = true;

                    return Poll::Ready(Some(Err(sync_error!(
                        ErrorKind::SourceIoFailed,
                        "Failed to read from the source output stream",
                        detail = err.to_string(),
                        source: err
                    ))));
                }
            }
        }
    }
}
