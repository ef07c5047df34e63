use crate::constants;
use crate::content_disposition::ContentDisposition;
use crate::state::{MultipartState, StreamingStage};
use bytes::{Bytes, BytesMut};
use encoding_rs::{Encoding, UTF_8};
use futures_util::stream::{Stream, TryStreamExt};
use http::header::{self, HeaderMap};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// A single part of a `multipart/form-data` stream.
///
/// Only one `Field` can be alive at a time: [`Multipart::next_field`] fails
/// with [`Error::LockFailure`](crate::Error::LockFailure) while a previous
/// `Field` is still held. Unread data of a dropped `Field` is skipped.
///
/// [`Multipart::next_field`]: crate::Multipart::next_field
pub struct Field<'r> {
    state: Arc<spin::Mutex<MultipartState<'r>>>,
    done: bool,
    headers: HeaderMap,
    content_disposition: ContentDisposition,
    content_type: Option<mime::Mime>,
    idx: usize,
}

impl<'r> Field<'r> {
    pub(crate) fn new(
        state: Arc<spin::Mutex<MultipartState<'r>>>,
        headers: HeaderMap,
        idx: usize,
        content_disposition: ContentDisposition,
    ) -> Self {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|val| val.to_str().ok())
            .and_then(|val| val.parse::<mime::Mime>().ok());

        Field {
            state,
            done: false,
            headers,
            content_disposition,
            content_type,
            idx,
        }
    }

    /// The field name found in the `Content-Disposition` header.
    pub fn name(&self) -> Option<&str> {
        self.content_disposition.field_name.as_deref()
    }

    /// The file name found in the `Content-Disposition` header. Parts with a
    /// file name are files, the others are plain fields.
    pub fn file_name(&self) -> Option<&str> {
        self.content_disposition.file_name.as_deref()
    }

    /// The part's `Content-Type`, if it parses as a MIME type.
    pub fn content_type(&self) -> Option<&mime::Mime> {
        self.content_type.as_ref()
    }

    /// The part's `Content-Transfer-Encoding`, `7bit` when absent.
    pub fn transfer_encoding(&self) -> &str {
        self.headers
            .get("content-transfer-encoding")
            .and_then(|val| val.to_str().ok())
            .unwrap_or(constants::DEFAULT_PART_ENCODING)
    }

    /// All headers of the part.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The position of the part in the stream, starting at `0`.
    pub fn index(&self) -> usize {
        self.idx
    }

    /// Reads the next chunk of the part data.
    pub async fn chunk(&mut self) -> crate::Result<Option<Bytes>> {
        self.try_next().await
    }

    /// Reads the whole part into memory.
    pub async fn bytes(mut self) -> crate::Result<Bytes> {
        let mut buf = BytesMut::new();

        while let Some(bytes) = self.chunk().await? {
            buf.extend_from_slice(&bytes);
        }

        Ok(buf.freeze())
    }

    /// Reads the whole part as text, decoded with the `charset` of its
    /// `Content-Type` or UTF-8.
    pub async fn text(self) -> crate::Result<String> {
        self.text_with_charset("utf-8").await
    }

    /// Like [`text`](Field::text) with a different fallback charset.
    pub async fn text_with_charset(self, default_encoding: &str) -> crate::Result<String> {
        let encoding = self.encoding_or(default_encoding);
        let bytes = self.bytes().await?;
        Ok(decode_text(encoding, &bytes))
    }

    pub(crate) fn encoding_or(&self, default_encoding: &str) -> &'static Encoding {
        let encoding_name = self
            .content_type()
            .and_then(|mime| mime.get_param(mime::CHARSET))
            .map(|charset| charset.as_str())
            .unwrap_or(default_encoding);

        Encoding::for_label(encoding_name.as_bytes()).unwrap_or(UTF_8)
    }
}

pub(crate) fn decode_text(encoding: &'static Encoding, bytes: &[u8]) -> String {
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

impl Stream for Field<'_> {
    type Item = crate::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        let state_arc = Arc::clone(&self.state);
        let mut state = match state_arc.try_lock() {
            Some(lock) => lock,
            None => return Poll::Ready(Some(Err(crate::Error::LockFailure))),
        };
        let state = &mut *state;

        loop {
            match state
                .buffer
                .read_field_data(&state.boundary, state.curr_field_name.as_deref())
            {
                Ok(Some((done, bytes))) => {
                    if done {
                        state.stage = StreamingStage::ReadingBoundary;
                        self.done = true;

                        if bytes.is_empty() {
                            return Poll::Ready(None);
                        }
                    }
                    return Poll::Ready(Some(Ok(bytes)));
                }
                Ok(None) => match state.buffer.poll_fill(cx) {
                    Poll::Ready(Ok(_)) => continue,
                    Poll::Ready(Err(err)) => {
                        self.done = true;
                        return Poll::Ready(Some(Err(err)));
                    }
                    Poll::Pending => return Poll::Pending,
                },
                Err(err) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(err)));
                }
            }
        }
    }
}

impl std::fmt::Debug for Field<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name())
            .field("file_name", &self.file_name())
            .field("content_type", &self.content_type)
            .field("index", &self.idx)
            .finish()
    }
}
