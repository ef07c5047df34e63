use crate::body::BodyStream;
use crate::field;
use crate::limits;
use bytes::{Bytes, BytesMut};
use encoding_rs::{Encoding, UTF_8};
use futures_util::stream::StreamExt;

/// A body read whole by [`buffered`](crate::buffered).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Buffered {
    /// Textual content types, decoded with their `charset` or UTF-8.
    Text(String),
    Bytes(Bytes),
}

impl Buffered {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Buffered::Text(text) => text.as_bytes(),
            Buffered::Bytes(bytes) => bytes,
        }
    }
}

/// Reads the whole stream into memory. A chunk that would take the body
/// past `limit` fails the read before it is buffered.
pub(crate) async fn capture(mut stream: BodyStream<'_>, limit: Option<u64>) -> crate::Result<Bytes> {
    let mut buf = BytesMut::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if limits::exceeds((buf.len() + chunk.len()) as u64, limit) {
            return Err(crate::Error::BodyTooLarge {
                limit: limit.unwrap_or_default(),
            });
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(buf.freeze())
}

/// Parses a JSON body. An empty body is an empty object.
pub(crate) fn parse_json(body: &[u8]) -> crate::Result<serde_json::Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }

    serde_json::from_slice(body).map_err(|err| crate::Error::upload_caused_by("invalid JSON body", err))
}

/// Decodes `body` as text when `content_type` names a charset or a textual
/// type, otherwise hands the bytes back.
pub(crate) fn to_buffered(body: Bytes, content_type: Option<&mime::Mime>) -> Buffered {
    let mime = match content_type {
        Some(mime) => mime,
        None => return Buffered::Bytes(body),
    };

    if let Some(charset) = mime.get_param(mime::CHARSET) {
        let encoding = Encoding::for_label(charset.as_str().as_bytes()).unwrap_or(UTF_8);
        return Buffered::Text(field::decode_text(encoding, &body));
    }

    let textual = mime.type_() == mime::TEXT
        || mime.subtype() == mime::JSON
        || mime.subtype() == mime::XML
        || mime.suffix() == Some(mime::JSON)
        || mime.suffix() == Some(mime::XML)
        || mime.subtype() == mime::WWW_FORM_URLENCODED;

    match textual {
        true => Buffered::Text(field::decode_text(UTF_8, &body)),
        false => Buffered::Bytes(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn body(chunks: &[&'static str]) -> BodyStream<'static> {
        let items: Vec<crate::Result<Bytes>> = chunks.iter().map(|c| Ok(Bytes::from_static(c.as_bytes()))).collect();
        Box::pin(stream::iter(items))
    }

    #[tokio::test]
    async fn test_capture_limit() {
        assert_eq!(capture(body(&["ab", "cd"]), Some(4)).await.unwrap(), "abcd");

        let err = capture(body(&["ab", "cde"]), Some(4)).await.unwrap_err();
        assert!(matches!(err, crate::Error::BodyTooLarge { limit: 4 }));

        assert_eq!(capture(body(&[]), None).await.unwrap(), "");
    }

    #[test]
    fn test_parse_json() {
        assert_eq!(parse_json(br#"{"a":1}"#).unwrap(), serde_json::json!({"a": 1}));
        assert_eq!(parse_json(b"").unwrap(), serde_json::json!({}));
        assert_eq!(parse_json(b" \n").unwrap(), serde_json::json!({}));

        let err = parse_json(b"{oops").unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::Upload);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_to_buffered() {
        let latin1: mime::Mime = "text/plain; charset=iso-8859-1".parse().unwrap();
        assert_eq!(
            to_buffered(Bytes::from_static(b"caf\xe9"), Some(&latin1)),
            Buffered::Text("café".to_owned())
        );

        let json: mime::Mime = "application/json".parse().unwrap();
        assert_eq!(to_buffered(Bytes::from_static(b"{}"), Some(&json)), Buffered::Text("{}".to_owned()));

        let png: mime::Mime = "image/png".parse().unwrap();
        assert_eq!(
            to_buffered(Bytes::from_static(b"\x89PNG"), Some(&png)),
            Buffered::Bytes(Bytes::from_static(b"\x89PNG"))
        );
        assert!(matches!(to_buffered(Bytes::new(), None), Buffered::Bytes(_)));
    }
}
