//! Transport decoding of the request body according to `Content-Encoding`.

use crate::body::BodyStream;
use bytes::{Buf, Bytes, BytesMut};
use flate2::{Crc, Decompress, FlushDecompress, Status};
use futures_util::stream::Stream;
use http::HeaderValue;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

/// Upper bound of one decoded chunk.
pub(crate) const DECODED_CHUNK_SIZE: usize = 16 * 1024;

/// Largest gzip member header accepted, file name and comment included.
const MAX_GZIP_HEADER_SIZE: usize = 64 * 1024;

const GZIP_FEXTRA: u8 = 0x04;
const GZIP_FNAME: u8 = 0x08;
const GZIP_FCOMMENT: u8 = 0x10;
const GZIP_FHCRC: u8 = 0x02;

enum Stage {
    Header(BytesMut),
    Body,
    Trailer(BytesMut),
    Done,
}

/// One decompression stage. Output is produced in chunks of at most
/// [`DECODED_CHUNK_SIZE`] bytes, however much the input expands.
pub(crate) struct Inflater {
    inflate: Decompress,
    crc: Option<Crc>,
    stage: Stage,
    output_pending: bool,
}

impl Inflater {
    fn gzip() -> Self {
        Inflater {
            inflate: Decompress::new(false),
            crc: Some(Crc::new()),
            stage: Stage::Header(BytesMut::new()),
            output_pending: false,
        }
    }

    fn deflate() -> Self {
        Inflater {
            inflate: Decompress::new(true),
            crc: None,
            stage: Stage::Body,
            output_pending: false,
        }
    }

    /// Decodes from `input` until a chunk of output is ready. An empty result
    /// means `input` is used up and more is needed.
    fn inflate(&mut self, input: &mut Bytes) -> io::Result<Bytes> {
        loop {
            match self.stage {
                Stage::Header(ref mut header) => {
                    header.extend_from_slice(&input[..]);
                    input.clear();

                    match gzip_header_len(header)? {
                        Some(len) => {
                            *input = header.split_off(len).freeze();
                            self.stage = Stage::Body;
                        }
                        None if header.len() > MAX_GZIP_HEADER_SIZE => return Err(invalid("gzip header too large")),
                        None => return Ok(Bytes::new()),
                    }
                }
                Stage::Body => {
                    if input.is_empty() && !self.output_pending {
                        return Ok(Bytes::new());
                    }

                    let mut out = Vec::with_capacity(DECODED_CHUNK_SIZE);
                    let before = self.inflate.total_in();
                    let status = self
                        .inflate
                        .decompress_vec(&input[..], &mut out, FlushDecompress::None)
                        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
                    let consumed = (self.inflate.total_in() - before) as usize;
                    input.advance(consumed);
                    self.output_pending = out.len() == out.capacity();

                    if let Some(ref mut crc) = self.crc {
                        crc.update(&out);
                    }
                    if status == Status::StreamEnd {
                        self.output_pending = false;
                        self.stage = match self.crc {
                            Some(_) => Stage::Trailer(BytesMut::with_capacity(8)),
                            None => Stage::Done,
                        };
                    }

                    if !out.is_empty() {
                        return Ok(Bytes::from(out));
                    }
                    if consumed == 0 && status != Status::StreamEnd {
                        if input.is_empty() {
                            return Ok(Bytes::new());
                        }
                        return Err(invalid("corrupt compressed body"));
                    }
                }
                Stage::Trailer(ref mut trailer) => {
                    let take = input.len().min(8 - trailer.len());
                    trailer.extend_from_slice(&input.split_to(take));
                    if trailer.len() < 8 {
                        return Ok(Bytes::new());
                    }

                    let crc = self.crc.as_ref().map_or(0, Crc::sum);
                    let size = self.crc.as_ref().map_or(0, Crc::amount);
                    let expected_crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
                    let expected_size = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);
                    if crc != expected_crc || size != expected_size {
                        return Err(invalid("gzip checksum mismatch"));
                    }
                    self.stage = Stage::Done;
                }
                Stage::Done => {
                    if !input.is_empty() {
                        return Err(invalid("unexpected data after compressed body"));
                    }
                    return Ok(Bytes::new());
                }
            }
        }
    }

    fn finish(self) -> io::Result<()> {
        match self.stage {
            Stage::Done => Ok(()),
            _ => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated compressed body")),
        }
    }
}

fn invalid(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Length of the gzip member header at the start of `buf`, `None` while it is
/// incomplete.
fn gzip_header_len(buf: &[u8]) -> io::Result<Option<usize>> {
    if buf.len() < 10 {
        return Ok(None);
    }
    if buf[0] != 0x1f || buf[1] != 0x8b || buf[2] != 8 {
        return Err(invalid("invalid gzip header"));
    }

    let flags = buf[3];
    let mut pos = 10;

    if flags & GZIP_FEXTRA != 0 {
        let len = match buf.get(pos..pos + 2) {
            Some(len) => u16::from_le_bytes([len[0], len[1]]) as usize,
            None => return Ok(None),
        };
        pos += 2 + len;
        if buf.len() < pos {
            return Ok(None);
        }
    }

    for flag in [GZIP_FNAME, GZIP_FCOMMENT] {
        if flags & flag != 0 {
            match memchr::memchr(0, &buf[pos..]) {
                Some(idx) => pos += idx + 1,
                None => return Ok(None),
            }
        }
    }

    if flags & GZIP_FHCRC != 0 {
        pos += 2;
        if buf.len() < pos {
            return Ok(None);
        }
    }

    Ok(Some(pos))
}

/// Codings listed in a `Content-Encoding` header, in the order they must be
/// undone.
pub(crate) fn parse_content_encoding(value: Option<&HeaderValue>) -> crate::Result<Vec<Coding>> {
    let value = match value {
        Some(value) => value
            .to_str()
            .map_err(|_| crate::Error::UnsupportedEncoding(String::from_utf8_lossy(value.as_bytes()).into_owned()))?,
        None => return Ok(Vec::new()),
    };

    let mut codings = Vec::new();
    for coding in value.split(',').map(str::trim).filter(|c| !c.is_empty()).rev() {
        match coding.to_ascii_lowercase().as_str() {
            "identity" => {}
            "gzip" | "x-gzip" => codings.push(Coding::Gzip),
            "deflate" => codings.push(Coding::Deflate),
            _ => return Err(crate::Error::UnsupportedEncoding(coding.to_owned())),
        }
    }

    Ok(codings)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Coding {
    Gzip,
    Deflate,
}

/// Wraps `stream` in the decompression stages named by `content_encoding`.
///
/// The header is validated before the stream is touched, so an unsupported
/// coding never consumes a byte of the body.
pub(crate) fn decode<'r>(
    stream: BodyStream<'r>,
    content_encoding: Option<&HeaderValue>,
) -> crate::Result<BodyStream<'r>> {
    let codings = parse_content_encoding(content_encoding)?;

    Ok(codings.into_iter().fold(stream, |inner, coding| {
        let inflater = match coding {
            Coding::Gzip => Inflater::gzip(),
            Coding::Deflate => Inflater::deflate(),
        };
        Box::pin(DecodedStream::new(inner, inflater)) as BodyStream<'r>
    }))
}

/// A byte stream that decompresses the inner stream. A new inner chunk is
/// pulled only once the previous one is fully decoded.
pub(crate) struct DecodedStream<'r> {
    inner: BodyStream<'r>,
    inflater: Option<Inflater>,
    pending: Bytes,
}

impl<'r> DecodedStream<'r> {
    fn new(inner: BodyStream<'r>, inflater: Inflater) -> Self {
        DecodedStream {
            inner,
            inflater: Some(inflater),
            pending: Bytes::new(),
        }
    }
}

impl Stream for DecodedStream<'_> {
    type Item = crate::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            let inflater = match this.inflater.as_mut() {
                Some(inflater) => inflater,
                None => return Poll::Ready(None),
            };

            match inflater.inflate(&mut this.pending) {
                Ok(bytes) if !bytes.is_empty() => return Poll::Ready(Some(Ok(bytes))),
                Ok(_) => {}
                Err(err) => {
                    this.inflater = None;
                    return Poll::Ready(Some(Err(crate::Error::connection(err))));
                }
            }

            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(data)) => this.pending = data,
                Some(Err(err)) => {
                    this.inflater = None;
                    return Poll::Ready(Some(Err(err)));
                }
                None => {
                    return match this.inflater.take().map(Inflater::finish) {
                        Some(Err(err)) => Poll::Ready(Some(Err(crate::Error::connection(err)))),
                        _ => Poll::Ready(None),
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use flate2::{Compression, GzBuilder};
    use futures_util::stream::{self, TryStreamExt};
    use std::io::Write;

    fn chunked(data: Vec<u8>, size: usize) -> BodyStream<'static> {
        let chunks: Vec<crate::Result<Bytes>> = data.chunks(size).map(|c| Ok(Bytes::copy_from_slice(c))).collect();
        Box::pin(stream::iter(chunks))
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_parse_content_encoding() {
        assert!(parse_content_encoding(None).unwrap().is_empty());
        assert!(parse_content_encoding(Some(&HeaderValue::from_static("identity")))
            .unwrap()
            .is_empty());
        assert_eq!(
            parse_content_encoding(Some(&HeaderValue::from_static("deflate, GZIP"))).unwrap(),
            vec![Coding::Gzip, Coding::Deflate]
        );

        let err = parse_content_encoding(Some(&HeaderValue::from_static("br"))).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::UnsupportedEncoding);
    }

    #[test]
    fn test_unsupported_encoding_is_rejected_before_polling() {
        let polled = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = polled.clone();
        let body: BodyStream<'static> = Box::pin(stream::poll_fn(move |_| {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            Poll::<Option<crate::Result<Bytes>>>::Ready(None)
        }));

        assert!(decode(body, Some(&HeaderValue::from_static("compress"))).is_err());
        assert!(!polled.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_gzip_stream() {
        let text = "hello gzip ".repeat(500);
        let stream = decode(chunked(gzip(text.as_bytes()), 7), Some(&HeaderValue::from_static("gzip"))).unwrap();

        let out: Vec<Bytes> = stream.try_collect().await.unwrap();
        assert_eq!(out.concat(), text.as_bytes());
    }

    #[tokio::test]
    async fn test_deflate_stream() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"name=value").unwrap();
        let data = encoder.finish().unwrap();

        let stream = decode(chunked(data, 3), Some(&HeaderValue::from_static("deflate"))).unwrap();
        let out: Vec<Bytes> = stream.try_collect().await.unwrap();
        assert_eq!(out.concat(), b"name=value");
    }

    #[tokio::test]
    async fn test_corrupt_gzip_is_connection_error() {
        let mut data = gzip(b"some body that will be corrupted");
        data.truncate(data.len() / 2);

        let stream = decode(chunked(data, 4), Some(&HeaderValue::from_static("gzip"))).unwrap();
        let err = stream.try_collect::<Vec<Bytes>>().await.unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::Connection);

        let garbage = b"definitely not gzip".to_vec();
        let stream = decode(chunked(garbage, 4), Some(&HeaderValue::from_static("gzip"))).unwrap();
        let err = stream.try_collect::<Vec<Bytes>>().await.unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::Connection);
    }

    #[tokio::test]
    async fn test_decoded_chunks_are_bounded() {
        let zeros = vec![0u8; 4 * 1024 * 1024];
        let data = gzip(&zeros);
        assert!(data.len() < 64 * 1024);

        let stream = decode(chunked(data, 64 * 1024), Some(&HeaderValue::from_static("gzip"))).unwrap();
        let out: Vec<Bytes> = stream.try_collect().await.unwrap();

        assert!(out.iter().all(|chunk| chunk.len() <= DECODED_CHUNK_SIZE));
        assert_eq!(out.iter().map(Bytes::len).sum::<usize>(), zeros.len());
    }

    #[tokio::test]
    async fn test_gzip_header_fields_and_trailer() {
        let mut encoder = GzBuilder::new()
            .filename("report.txt")
            .comment("nightly export")
            .extra(vec![1, 2, 3])
            .write(Vec::new(), Compression::default());
        encoder.write_all(b"payload").unwrap();
        let data = encoder.finish().unwrap();

        let stream = decode(chunked(data.clone(), 1), Some(&HeaderValue::from_static("gzip"))).unwrap();
        let out: Vec<Bytes> = stream.try_collect().await.unwrap();
        assert_eq!(out.concat(), b"payload");

        let mut corrupt = data;
        let crc_at = corrupt.len() - 8;
        corrupt[crc_at] ^= 0xff;
        let stream = decode(chunked(corrupt, 16), Some(&HeaderValue::from_static("gzip"))).unwrap();
        let err = stream.try_collect::<Vec<Bytes>>().await.unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::Connection);
    }

    #[tokio::test]
    async fn test_stacked_codings() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"a=1&b=2").unwrap();
        let data = gzip(&encoder.finish().unwrap());

        let coding = HeaderValue::from_static("deflate, gzip");
        let stream = decode(chunked(data, 5), Some(&coding)).unwrap();
        let out: Vec<Bytes> = stream.try_collect().await.unwrap();
        assert_eq!(out.concat(), b"a=1&b=2");
    }
}
