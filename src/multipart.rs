use crate::body::BodyStream;
use crate::buffer::StreamBuffer;
use crate::constants;
use crate::content_disposition::ContentDisposition;
use crate::helpers;
use crate::limits::{self, Limits};
use crate::state::{MultipartState, StreamingStage};
use crate::Field;
use bytes::Bytes;
use futures_util::future::poll_fn;
use futures_util::stream::{Stream, TryStreamExt};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

/// Parses a `multipart/form-data` stream into [`Field`]s, one at a time.
///
/// Parts are strictly sequential: a new [`Field`] is only yielded once the
/// previous one has been dropped. Data the previous field didn't read is
/// skipped. The part count and the number of header lines per part are
/// checked against the given [`Limits`] while parsing.
///
/// # Examples
///
/// ```
/// use intake::Multipart;
/// use bytes::Bytes;
/// use std::convert::Infallible;
/// use futures_util::stream::once;
///
/// # async fn run() {
/// let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"my_text_field\"\r\n\r\nabcd\r\n--X-BOUNDARY--\r\n";
/// let stream = once(async move { Result::<Bytes, Infallible>::Ok(Bytes::from(data)) });
/// let mut multipart = Multipart::new(stream, "X-BOUNDARY");
///
/// while let Some(field) = multipart.next_field().await.unwrap() {
///     println!("Field: {:?}", field.text().await)
/// }
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(run());
/// ```
pub struct Multipart<'r> {
    state: Arc<spin::Mutex<MultipartState<'r>>>,
}

impl<'r> Multipart<'r> {
    /// Constructs a parser over a stream of byte chunks, without limits.
    pub fn new<S, O, E, B>(stream: S, boundary: B) -> Self
    where
        S: Stream<Item = Result<O, E>> + Send + 'r,
        O: Into<Bytes> + 'r,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'r,
        B: Into<String>,
    {
        Multipart::with_limits(stream, boundary, Limits::unbounded())
    }

    /// Constructs a parser over a stream of byte chunks, enforcing the part
    /// and header pair limits of `limits`.
    pub fn with_limits<S, O, E, B>(stream: S, boundary: B, limits: Limits) -> Self
    where
        S: Stream<Item = Result<O, E>> + Send + 'r,
        O: Into<Bytes> + 'r,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'r,
        B: Into<String>,
    {
        let stream = stream.map_ok(|b| b.into()).map_err(crate::Error::connection);
        Multipart::from_body(Box::pin(stream), boundary.into(), limits)
    }

    /// Constructs a parser over an [`AsyncRead`] reader.
    pub fn with_reader<R, B>(reader: R, boundary: B) -> Self
    where
        R: AsyncRead + Send + 'r,
        B: Into<String>,
    {
        Multipart::new(ReaderStream::new(reader), boundary)
    }

    pub(crate) fn from_body(stream: BodyStream<'r>, boundary: String, limits: Limits) -> Self {
        let state = MultipartState {
            buffer: StreamBuffer::new(stream),
            boundary,
            stage: StreamingStage::FindingFirstBoundary,
            next_field_idx: 0,
            curr_field_name: None,
            limits,
        };

        Multipart {
            state: Arc::new(spin::Mutex::new(state)),
        }
    }

    /// Yields the next [`Field`] if available.
    pub async fn next_field(&mut self) -> crate::Result<Option<Field<'r>>> {
        poll_fn(|cx| self.poll_next_field(cx)).await
    }

    /// Yields the next [`Field`] with its position in the stream.
    pub async fn next_field_with_idx(&mut self) -> crate::Result<Option<(usize, Field<'r>)>> {
        self.next_field().await.map(|f| f.map(|field| (field.index(), field)))
    }

    /// Polls for the next [`Field`].
    pub fn poll_next_field(&mut self, cx: &mut Context<'_>) -> Poll<crate::Result<Option<Field<'r>>>> {
        // The returned `Field` is the only other owner of the state, so a
        // live previous field shows up in the strong count.
        if Arc::strong_count(&self.state) != 1 {
            return Poll::Ready(Err(crate::Error::LockFailure));
        }

        let mut guard = match self.state.try_lock() {
            Some(lock) => lock,
            None => return Poll::Ready(Err(crate::Error::LockFailure)),
        };
        let state = &mut *guard;

        loop {
            match state.stage {
                StreamingStage::Eof => return Poll::Ready(Ok(None)),

                StreamingStage::FindingFirstBoundary => {
                    let first = format!("{}{}", constants::BOUNDARY_EXT, state.boundary);
                    if state.buffer.skip_to(first.as_bytes()) {
                        state.stage = StreamingStage::ReadingBoundary;
                    } else if !ready!(state.buffer.poll_fill(cx))? {
                        return Poll::Ready(Err(crate::Error::IncompleteStream));
                    }
                }

                StreamingStage::ReadingFieldData => {
                    match state
                        .buffer
                        .read_field_data(&state.boundary, state.curr_field_name.as_deref())?
                    {
                        Some((true, _)) => state.stage = StreamingStage::ReadingBoundary,
                        Some((false, _)) => {}
                        None => {
                            ready!(state.buffer.poll_fill(cx))?;
                        }
                    }
                }

                StreamingStage::ReadingBoundary => {
                    let boundary_deriv_len = constants::BOUNDARY_EXT.len() + state.boundary.len();

                    match state.buffer.read_exact(boundary_deriv_len) {
                        Some(bytes) => {
                            if bytes[constants::BOUNDARY_EXT.len()..] != *state.boundary.as_bytes() {
                                return Poll::Ready(Err(crate::Error::IncompleteStream));
                            }
                            state.stage = StreamingStage::DeterminingBoundaryType;
                        }
                        None => {
                            if !ready!(state.buffer.poll_fill(cx))? {
                                return Poll::Ready(Err(crate::Error::IncompleteStream));
                            }
                        }
                    }
                }

                StreamingStage::DeterminingBoundaryType => match state.buffer.peek_exact(2) {
                    Some(ext) if ext == constants::BOUNDARY_EXT.as_bytes() => {
                        state.stage = StreamingStage::Eof;
                        return Poll::Ready(Ok(None));
                    }
                    Some(_) => state.stage = StreamingStage::ReadingTransportPadding,
                    None => {
                        if !ready!(state.buffer.poll_fill(cx))? {
                            return Poll::Ready(Err(crate::Error::IncompleteStream));
                        }
                    }
                },

                StreamingStage::ReadingTransportPadding => match state.buffer.read_until(constants::CRLF) {
                    Some(bytes) => {
                        let padding = &bytes[..bytes.len() - constants::CRLF.len()];
                        if !padding.iter().all(|b| *b == b' ' || *b == b'\t') {
                            return Poll::Ready(Err(crate::Error::IncompleteStream));
                        }

                        let part_count = state.next_field_idx as u64 + 1;
                        if limits::exceeds(part_count, state.limits.max_parts) {
                            return Poll::Ready(Err(crate::Error::PartsLimitExceeded {
                                limit: state.limits.max_parts.unwrap_or_default(),
                            }));
                        }

                        state.stage = StreamingStage::ReadingFieldHeaders;
                    }
                    None => {
                        if state.buffer.buf.len() > constants::MAX_HEADER_SECTION_SIZE {
                            return Poll::Ready(Err(crate::Error::IncompleteStream));
                        }
                        if !ready!(state.buffer.poll_fill(cx))? {
                            return Poll::Ready(Err(crate::Error::IncompleteStream));
                        }
                    }
                },

                StreamingStage::ReadingFieldHeaders => {
                    let header_bytes = if state.buffer.buf.starts_with(constants::CRLF) {
                        state.buffer.read_exact(constants::CRLF.len())
                    } else {
                        state.buffer.read_until(constants::CRLF_CRLF)
                    };

                    let header_bytes = match header_bytes {
                        Some(bytes) => bytes,
                        None => {
                            if state.buffer.buf.len() > constants::MAX_HEADER_SECTION_SIZE {
                                return Poll::Ready(Err(crate::Error::IncompleteHeaders));
                            }
                            if !ready!(state.buffer.poll_fill(cx))? {
                                return Poll::Ready(Err(crate::Error::IncompleteHeaders));
                            }
                            continue;
                        }
                    };

                    if header_bytes.len() > constants::MAX_HEADER_SECTION_SIZE {
                        return Poll::Ready(Err(crate::Error::IncompleteHeaders));
                    }

                    // one slot per line is enough for any block, one past the limit detects a breach
                    let pair_limit = state.limits.max_header_pairs;
                    let lines = memchr::memchr_iter(b'\n', &header_bytes).count();
                    let slots = match pair_limit {
                        Some(limit) => lines.min(usize::try_from(limit).unwrap_or(usize::MAX).saturating_add(1)),
                        None => lines,
                    };
                    let mut headers = vec![httparse::EMPTY_HEADER; slots];

                    let headers = match httparse::parse_headers(&header_bytes, &mut headers) {
                        Ok(httparse::Status::Complete((_, raw_headers))) => {
                            if limits::exceeds(raw_headers.len() as u64, pair_limit) {
                                return Poll::Ready(Err(crate::Error::HeaderPairsExceeded {
                                    limit: pair_limit.unwrap_or_default(),
                                }));
                            }
                            helpers::convert_raw_headers_to_header_map(raw_headers)?
                        }
                        Ok(httparse::Status::Partial) => {
                            return Poll::Ready(Err(crate::Error::IncompleteHeaders));
                        }
                        Err(httparse::Error::TooManyHeaders) if pair_limit.is_some() => {
                            return Poll::Ready(Err(crate::Error::HeaderPairsExceeded {
                                limit: pair_limit.unwrap_or_default(),
                            }));
                        }
                        Err(err) => {
                            return Poll::Ready(Err(crate::Error::ReadHeaderFailed(err)));
                        }
                    };

                    let field_idx = state.next_field_idx;
                    state.next_field_idx += 1;

                    let content_disposition = ContentDisposition::parse(&headers);
                    state.curr_field_name = content_disposition.field_name.clone();
                    state.stage = StreamingStage::ReadingFieldData;

                    drop(guard);

                    let field = Field::new(Arc::clone(&self.state), headers, field_idx, content_disposition);
                    return Poll::Ready(Ok(Some(field)));
                }
            }
        }
    }
}

impl std::fmt::Debug for Multipart<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multipart").finish_non_exhaustive()
    }
}
