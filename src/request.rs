use crate::body::BodyStream;
use bytes::Bytes;
use futures_util::stream::{Stream, TryStreamExt};
use http::header::{self, HeaderMap};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

/// An incoming request body with its headers.
///
/// The request is consumed by [`upload`](crate::upload) or
/// [`buffered`](crate::buffered), so a body can only be read once.
pub struct UploadRequest<'r> {
    headers: HeaderMap,
    body: BodyStream<'r>,
    timestamp: u64,
}

impl<'r> UploadRequest<'r> {
    /// Wraps a stream of body chunks, e.g. from `hyper` or `axum`.
    pub fn new<S, O, E>(headers: HeaderMap, stream: S) -> Self
    where
        S: Stream<Item = Result<O, E>> + Send + 'r,
        O: Into<Bytes> + 'r,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'r,
    {
        let stream = stream.map_ok(|b| b.into()).map_err(crate::Error::connection);

        UploadRequest {
            headers,
            body: Box::pin(stream),
            timestamp: now_millis(),
        }
    }

    /// Wraps an [`AsyncRead`] body.
    pub fn with_reader<R>(headers: HeaderMap, reader: R) -> Self
    where
        R: AsyncRead + Send + 'r,
    {
        UploadRequest::new(headers, ReaderStream::new(reader))
    }

    /// Sets the request time in milliseconds since the epoch, used to name
    /// temp files.
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// The declared `Content-Length`, if it is a valid number.
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(header::CONTENT_LENGTH)
            .and_then(|val| val.to_str().ok())
            .and_then(|val| val.trim().parse().ok())
    }

    pub(crate) fn into_parts(self) -> (HeaderMap, BodyStream<'r>, u64) {
        (self.headers, self.body, self.timestamp)
    }
}

impl fmt::Debug for UploadRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadRequest")
            .field("headers", &self.headers)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream::{self, StreamExt};
    use http::HeaderValue;

    #[tokio::test]
    async fn test_reader_body() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("5"));

        let request = UploadRequest::with_reader(headers, &b"hello"[..]).with_timestamp(42);
        assert_eq!(request.content_length(), Some(5));
        assert_eq!(request.timestamp(), 42);

        let (_, mut body, _) = request.into_parts();
        assert_eq!(body.next().await.unwrap().unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_stream_errors_become_connection_errors() {
        let items = vec![Ok("a"), Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))];
        let request = UploadRequest::new(HeaderMap::new(), stream::iter(items));
        assert_eq!(request.content_length(), None);

        let (_, mut body, _) = request.into_parts();
        assert!(body.next().await.unwrap().is_ok());
        assert_eq!(body.next().await.unwrap().unwrap_err().code(), crate::ErrorCode::Connection);
    }
}
