use bytes::Bytes;
use futures_util::stream;
use intake::{Limits, Multipart};

fn char_stream(data: &'static str) -> impl futures_util::Stream<Item = intake::Result<Bytes>> {
    stream::iter(
        data.chars()
            .map(|ch| ch.to_string())
            .map(|part| intake::Result::Ok(Bytes::copy_from_slice(part.as_bytes()))),
    )
}

#[tokio::test]
async fn test_multipart_basic() {
    let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"My Field\"\r\n\r\nabcd\r\n--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"File Field\"; filename=\"a-text-file.txt\"\r\nContent-Type: text/plain\r\n\r\nHello world\nHello\r\nWorld\rAgain\r\n--X-BOUNDARY--\r\n";
    let mut m = Multipart::new(char_stream(data), "X-BOUNDARY");

    while let Some((idx, field)) = m.next_field_with_idx().await.unwrap() {
        if idx == 0 {
            assert_eq!(field.name(), Some("My Field"));
            assert_eq!(field.file_name(), None);
            assert_eq!(field.content_type(), None);
            assert_eq!(field.index(), 0);

            assert_eq!(field.text().await.unwrap(), "abcd");
        } else if idx == 1 {
            assert_eq!(field.name(), Some("File Field"));
            assert_eq!(field.file_name(), Some("a-text-file.txt"));
            assert_eq!(field.content_type(), Some(&mime::TEXT_PLAIN));
            assert_eq!(field.index(), 1);

            assert_eq!(field.text().await.unwrap(), "Hello world\nHello\r\nWorld\rAgain");
        }
    }
}

#[tokio::test]
async fn test_multipart_empty() {
    let mut m = Multipart::new(char_stream("--X-BOUNDARY--\r\n"), "X-BOUNDARY");

    assert!(m.next_field().await.unwrap().is_none());
    assert!(m.next_field().await.unwrap().is_none());
}

#[tokio::test]
async fn test_multipart_clean_field() {
    let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"My Field\"\r\n\r\nabcd\r\n--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"File Field\"; filename=\"a-text-file.txt\"\r\nContent-Type: text/plain\r\n\r\nHello world\nHello\r\nWorld\rAgain\r\n--X-BOUNDARY--\r\n";
    let mut m = Multipart::new(char_stream(data), "X-BOUNDARY");

    assert!(m.next_field().await.unwrap().is_some());
    assert!(m.next_field().await.unwrap().is_some());
    assert!(m.next_field().await.unwrap().is_none());
}

#[tokio::test]
async fn test_multipart_transfer_encoding_and_headers() {
    let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"bin\"; filename=\"x.bin\"\r\nContent-Transfer-Encoding: binary\r\nX-Custom: 1\r\n\r\n\x01\x02\r\n--X-BOUNDARY--\r\n";
    let mut m = Multipart::new(char_stream(data), "X-BOUNDARY");

    let field = m.next_field().await.unwrap().unwrap();
    assert_eq!(field.transfer_encoding(), "binary");
    assert_eq!(field.headers().get("x-custom").unwrap(), "1");
    assert_eq!(field.bytes().await.unwrap(), Bytes::from_static(b"\x01\x02"));
}

#[tokio::test]
async fn test_multipart_with_reader() {
    let data: &[u8] = b"--AB\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n--AB--\r\n";
    let mut m = Multipart::with_reader(data, "AB");

    let field = m.next_field().await.unwrap().unwrap();
    assert_eq!(field.name(), Some("a"));
    assert_eq!(field.text().await.unwrap(), "1");
    assert!(m.next_field().await.unwrap().is_none());
}

#[tokio::test]
async fn test_multipart_missing_terminal_boundary() {
    let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n--X-BOUNDARY";
    let mut m = Multipart::new(char_stream(data), "X-BOUNDARY");

    let field = m.next_field().await.unwrap().unwrap();
    assert_eq!(field.text().await.unwrap(), "1");

    let err = m.next_field().await.unwrap_err();
    assert_eq!(err.code(), intake::ErrorCode::MalformedBody);
}

#[tokio::test]
async fn test_multipart_parts_limit() {
    let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"b\"\r\n\r\n2\r\n--X-BOUNDARY--\r\n";
    let limits = Limits {
        max_parts: Some(1),
        ..Limits::unbounded()
    };
    let mut m = Multipart::with_limits(char_stream(data), "X-BOUNDARY", limits);

    assert!(m.next_field().await.unwrap().is_some());
    assert!(matches!(
        m.next_field().await,
        Err(intake::Error::PartsLimitExceeded { limit: 1 })
    ));
}
