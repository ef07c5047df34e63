use crate::body::BodyStream;
use crate::constants;
use bytes::{Bytes, BytesMut};
use futures_util::stream::Stream;
use memchr::memmem;
use std::task::{Context, Poll};

/// Buffers the decoded body for the multipart parser.
///
/// Chunks are only pulled when the parser can't make progress with what is
/// already buffered, so a slow consumer throttles the transport.
pub(crate) struct StreamBuffer<'r> {
    pub(crate) eof: bool,
    pub(crate) buf: BytesMut,
    pub(crate) stream: BodyStream<'r>,
}

impl<'r> StreamBuffer<'r> {
    pub(crate) fn new(stream: BodyStream<'r>) -> Self {
        StreamBuffer {
            eof: false,
            buf: BytesMut::new(),
            stream,
        }
    }

    /// Pulls one more chunk into the buffer. Resolves to `false` at the end of
    /// the stream.
    pub(crate) fn poll_fill(&mut self, cx: &mut Context<'_>) -> Poll<crate::Result<bool>> {
        if self.eof {
            return Poll::Ready(Ok(false));
        }

        loop {
            match self.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(data))) if data.is_empty() => continue,
                Poll::Ready(Some(Ok(data))) => {
                    self.buf.extend_from_slice(&data);
                    return Poll::Ready(Ok(true));
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Err(err)),
                Poll::Ready(None) => {
                    self.eof = true;
                    return Poll::Ready(Ok(false));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }

    pub(crate) fn read_exact(&mut self, size: usize) -> Option<Bytes> {
        if size <= self.buf.len() {
            Some(self.buf.split_to(size).freeze())
        } else {
            None
        }
    }

    pub(crate) fn peek_exact(&self, size: usize) -> Option<&[u8]> {
        self.buf.get(..size)
    }

    pub(crate) fn read_until(&mut self, pattern: &[u8]) -> Option<Bytes> {
        memmem::find(&self.buf, pattern).map(|idx| self.buf.split_to(idx + pattern.len()).freeze())
    }

    /// Drops everything before `pattern`. While the pattern is not found only
    /// a tail that could still start it is kept.
    pub(crate) fn skip_to(&mut self, pattern: &[u8]) -> bool {
        match memmem::find(&self.buf, pattern) {
            Some(idx) => {
                drop(self.buf.split_to(idx));
                true
            }
            None => {
                let keep = pattern.len().saturating_sub(1).min(self.buf.len());
                let len = self.buf.len();
                drop(self.buf.split_to(len - keep));
                false
            }
        }
    }

    /// Reads part data up to the next `\r\n--boundary` delimiter.
    ///
    /// Returns `(true, bytes)` with the last bytes of the part once the
    /// delimiter is found, `(false, bytes)` for data that can't belong to the
    /// delimiter, and `None` when more input is needed.
    pub(crate) fn read_field_data(
        &mut self,
        boundary: &str,
        field_name: Option<&str>,
    ) -> crate::Result<Option<(bool, Bytes)>> {
        if self.buf.is_empty() && self.eof {
            return Err(crate::Error::IncompleteFieldData {
                field_name: field_name.map(|s| s.to_owned()),
            });
        }

        let boundary_deriv = [constants::CRLF, constants::BOUNDARY_EXT.as_bytes(), boundary.as_bytes()].concat();
        let b_len = boundary_deriv.len();

        match memmem::find(&self.buf, &boundary_deriv) {
            Some(idx) => {
                let bytes = self.buf.split_to(idx).freeze();

                // discard \r\n.
                drop(self.buf.split_to(constants::CRLF.len()));

                Ok(Some((true, bytes)))
            }
            None if self.eof => Err(crate::Error::IncompleteFieldData {
                field_name: field_name.map(|s| s.to_owned()),
            }),
            None => {
                let buf_len = self.buf.len();
                let rem_boundary_part_max_len = b_len - 1;
                let rem_boundary_part_idx = buf_len.saturating_sub(rem_boundary_part_max_len);

                let tail = memmem::find_iter(&self.buf[rem_boundary_part_idx..], constants::CR)
                    .map(|rel_idx| rel_idx + rem_boundary_part_idx)
                    .find(|&idx| boundary_deriv.starts_with(&self.buf[idx..]));

                let bytes = match tail {
                    Some(idx) => self.buf.split_to(idx).freeze(),
                    None => self.buf.split().freeze(),
                };

                if bytes.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some((false, bytes)))
                }
            }
        }
    }
}
