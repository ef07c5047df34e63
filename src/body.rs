use bytes::Bytes;
use futures_util::stream::Stream;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

/// The byte stream flowing between the pipeline stages.
pub(crate) type BodyStream<'r> = Pin<Box<dyn Stream<Item = crate::Result<Bytes>> + Send + 'r>>;

/// Upload progress callback: `(chunk_len, received_so_far, declared_total)`.
///
/// `declared_total` comes from the `Content-Length` header, if any.
#[derive(Clone)]
pub struct Progress(Arc<dyn Fn(u64, u64, Option<u64>) + Send + Sync>);

impl Progress {
    /// Wraps a callback.
    pub fn new<F>(f: F) -> Progress
    where
        F: Fn(u64, u64, Option<u64>) + Send + Sync + 'static,
    {
        Progress(Arc::new(f))
    }

    fn report(&self, chunk: u64, received: u64, declared: Option<u64>) {
        (self.0)(chunk, received, declared)
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Progress(..)")
    }
}

/// Reports every raw chunk pulled from the transport.
pub(crate) struct ProgressStream<'r> {
    inner: BodyStream<'r>,
    progress: Progress,
    received: u64,
    declared: Option<u64>,
}

impl<'r> ProgressStream<'r> {
    pub(crate) fn new(inner: BodyStream<'r>, progress: Progress, declared: Option<u64>) -> Self {
        ProgressStream {
            inner,
            progress,
            received: 0,
            declared,
        }
    }
}

impl Stream for ProgressStream<'_> {
    type Item = crate::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let item = ready!(self.inner.as_mut().poll_next(cx));

        if let Some(Ok(ref data)) = item {
            let chunk = data.len() as u64;
            self.received += chunk;
            self.progress.report(chunk, self.received, self.declared);
        }

        Poll::Ready(item)
    }
}

/// Fails with [`Error::BodyTooLarge`](crate::Error::BodyTooLarge) as soon as
/// the decoded body goes past `limit`. Bytes past the limit are never yielded.
pub(crate) struct LimitedStream<'r> {
    inner: BodyStream<'r>,
    limit: u64,
    counter: u64,
    done: bool,
}

impl<'r> LimitedStream<'r> {
    pub(crate) fn new(inner: BodyStream<'r>, limit: u64) -> Self {
        LimitedStream {
            inner,
            limit,
            counter: 0,
            done: false,
        }
    }
}

impl Stream for LimitedStream<'_> {
    type Item = crate::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        match ready!(self.inner.as_mut().poll_next(cx)) {
            Some(Ok(data)) => {
                self.counter += data.len() as u64;
                if self.counter > self.limit {
                    self.done = true;
                    return Poll::Ready(Some(Err(crate::Error::BodyTooLarge { limit: self.limit })));
                }
                Poll::Ready(Some(Ok(data)))
            }
            Some(Err(err)) => {
                self.done = true;
                Poll::Ready(Some(Err(err)))
            }
            None => {
                self.done = true;
                Poll::Ready(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream::{self, StreamExt, TryStreamExt};
    use std::sync::Mutex;

    fn chunks(parts: &[&'static str]) -> BodyStream<'static> {
        let items: Vec<crate::Result<Bytes>> = parts.iter().map(|p| Ok(Bytes::from_static(p.as_bytes()))).collect();
        Box::pin(stream::iter(items))
    }

    #[tokio::test]
    async fn test_progress_reports_every_chunk() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress = Progress::new(move |chunk, received, total| sink.lock().unwrap().push((chunk, received, total)));

        let stream = ProgressStream::new(chunks(&["abc", "de", "f"]), progress, Some(6));
        let out: Vec<Bytes> = stream.try_collect().await.unwrap();

        assert_eq!(out.concat(), b"abcdef");
        assert_eq!(*seen.lock().unwrap(), vec![(3, 3, Some(6)), (2, 5, Some(6)), (1, 6, Some(6))]);
    }

    #[tokio::test]
    async fn test_limited_stream() {
        let stream = LimitedStream::new(chunks(&["abc", "de"]), 5);
        let out: Vec<Bytes> = stream.try_collect().await.unwrap();
        assert_eq!(out.concat(), b"abcde");

        let mut stream = LimitedStream::new(chunks(&["abc", "def", "ghi"]), 5);
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"abc"));

        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::BodyTooLarge);
        assert!(stream.next().await.is_none());
    }
}
