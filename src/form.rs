use crate::body::BodyStream;
use crate::dispatch::DecodeContext;
use crate::field::{self, Field};
use crate::fields::{FieldValue, Fields};
use crate::helpers;
use crate::limits::{self, Limits};
use crate::sink::{self, FilePart};
use crate::Multipart;
use bytes::BytesMut;

/// Decodes a `multipart/form-data` body into fields, storing file parts
/// through the sink resolver.
pub(crate) async fn decode(
    stream: BodyStream<'_>,
    boundary: String,
    ctx: &mut DecodeContext<'_>,
) -> crate::Result<Fields> {
    let mut multipart = Multipart::from_body(stream, boundary, ctx.limits);
    let mut fields = Fields::new();
    let mut field_count = 0;
    let mut file_count = 0;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_owned();
        check_name(&name, &ctx.limits)?;

        match field.file_name().map(str::to_owned) {
            Some(file_name) => {
                file_count += 1;
                if limits::exceeds(file_count, ctx.limits.max_files) {
                    return Err(crate::Error::FilesLimitExceeded {
                        limit: ctx.limits.max_files.unwrap_or_default(),
                    });
                }
                if !ctx.options.accepts_file_field(&name) {
                    return Err(crate::Error::UnexpectedFile { field_name: name });
                }
                if !ctx.options.accepts_extension(helpers::file_extension(&file_name)) {
                    return Err(crate::Error::FileExtensionRejected { file_name });
                }

                ctx.logger
                    .debug(format_args!("part #{}: file '{}' in field '{}'", field.index(), file_name, name));

                let part = FilePart::new(
                    name.clone(),
                    file_name,
                    field.transfer_encoding().to_owned(),
                    field.content_type().map(|mime| mime.to_string()),
                    Box::pin(field),
                    ctx.limits.max_file_size,
                );

                if let Some(value) = sink::resolve(part, ctx.sink()).await? {
                    fields.insert(name, value);
                }
            }
            None => {
                field_count += 1;
                if limits::exceeds(field_count, ctx.limits.max_fields) {
                    return Err(crate::Error::FieldsLimitExceeded {
                        limit: ctx.limits.max_fields.unwrap_or_default(),
                    });
                }

                ctx.logger.debug(format_args!("part #{}: field '{}'", field.index(), name));

                let value = read_text(field, &name, ctx.limits.field_value_size).await?;
                fields.insert(name, FieldValue::Text(value));
            }
        }
    }

    Ok(fields)
}

pub(crate) fn check_name(name: &str, limits: &Limits) -> crate::Result<()> {
    if limits::exceeds(name.len() as u64, limits.field_name_size) {
        return Err(crate::Error::FieldNameTooLarge {
            limit: limits.field_name_size.unwrap_or_default(),
        });
    }
    Ok(())
}

/// Buffers a field value, failing on the first chunk that goes past `limit`.
async fn read_text(mut field: Field<'_>, name: &str, limit: Option<u64>) -> crate::Result<String> {
    let encoding = field.encoding_or("utf-8");
    let mut buf = BytesMut::new();

    while let Some(chunk) = field.chunk().await? {
        if limits::exceeds((buf.len() + chunk.len()) as u64, limit) {
            return Err(crate::Error::FieldValueTooLarge {
                limit: limit.unwrap_or_default(),
                field_name: name.to_owned(),
            });
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(field::decode_text(encoding, &buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::Logger;
    use crate::options::UploadOptions;
    use crate::temp::TempFiles;
    use bytes::Bytes;
    use futures_util::stream;

    fn body(data: &str) -> BodyStream<'static> {
        let chunks: Vec<crate::Result<Bytes>> = data
            .as_bytes()
            .chunks(7)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Box::pin(stream::iter(chunks))
    }

    fn form(parts: &[(&str, Option<&str>, &str)]) -> String {
        let mut out = String::new();
        for (name, file_name, value) in parts {
            out.push_str("--XB\r\n");
            match file_name {
                Some(file_name) => out.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: text/plain\r\n\r\n",
                    name, file_name
                )),
                None => out.push_str(&format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)),
            }
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("--XB--\r\n");
        out
    }

    async fn run(data: String, limits: Limits, options: &UploadOptions, temp: &mut TempFiles) -> crate::Result<Fields> {
        let logger = Logger::disabled();
        let mut ctx = DecodeContext {
            limits,
            options,
            temp_files: temp,
            logger: &logger,
        };
        decode(body(&data), "XB".to_owned(), &mut ctx).await
    }

    #[tokio::test]
    async fn test_fields_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut temp = TempFiles::new(dir.path().to_owned(), 1, Logger::disabled());
        let data = form(&[
            ("name", None, "value"),
            ("tag", None, "a"),
            ("doc", Some("notes.txt"), "some notes"),
            ("tag", None, "b"),
        ]);

        let fields = run(data, Limits::default(), &UploadOptions::new(), &mut temp).await.unwrap();

        assert_eq!(fields.len(), 3);
        assert_eq!(fields.text("name"), Some("value"));
        let tags: Vec<_> = fields.get("tag").unwrap().values().iter().filter_map(FieldValue::as_text).collect();
        assert_eq!(tags, ["a", "b"]);

        let file = fields.file("doc").unwrap();
        assert_eq!(file.name, "notes.txt");
        assert_eq!(file.size, 10);
        assert_eq!(file.mime_type.as_deref(), Some("text/plain"));
        assert_eq!(std::fs::read(file.path().unwrap()).unwrap(), b"some notes");
    }

    #[tokio::test]
    async fn test_field_limits() {
        let dir = tempfile::tempdir().unwrap();
        let mut temp = TempFiles::new(dir.path().to_owned(), 1, Logger::disabled());
        let options = UploadOptions::new();

        let limits = Limits {
            field_value_size: Some(3),
            ..Limits::unbounded()
        };
        let err = run(form(&[("bio", None, "too long")]), limits, &options, &mut temp).await.unwrap_err();
        assert!(matches!(err, crate::Error::FieldValueTooLarge { limit: 3, ref field_name } if field_name == "bio"));

        let limits = Limits {
            field_name_size: Some(2),
            ..Limits::unbounded()
        };
        let err = run(form(&[("bio", None, "x")]), limits, &options, &mut temp).await.unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::FieldNameTooLarge);

        let limits = Limits {
            max_fields: Some(1),
            ..Limits::unbounded()
        };
        let err = run(form(&[("a", None, "1"), ("b", None, "2")]), limits, &options, &mut temp)
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::FieldsLimitExceeded);
    }

    #[tokio::test]
    async fn test_file_limits_and_allow_lists() {
        let dir = tempfile::tempdir().unwrap();
        let mut temp = TempFiles::new(dir.path().to_owned(), 1, Logger::disabled());

        let limits = Limits {
            max_files: Some(1),
            ..Limits::unbounded()
        };
        let data = form(&[("a", Some("a.txt"), "1"), ("b", Some("b.txt"), "2")]);
        let err = run(data, limits, &UploadOptions::new(), &mut temp).await.unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::FilesLimitExceeded);

        let options = UploadOptions::new().file_fields(["avatar"]);
        let data = form(&[("doc", Some("a.txt"), "1")]);
        let err = run(data, Limits::unbounded(), &options, &mut temp).await.unwrap_err();
        assert!(matches!(err, crate::Error::UnexpectedFile { ref field_name } if field_name == "doc"));

        let options = UploadOptions::new().extensions(["png"]);
        let data = form(&[("doc", Some("a.txt"), "1")]);
        let err = run(data, Limits::unbounded(), &options, &mut temp).await.unwrap_err();
        assert!(matches!(err, crate::Error::FileExtensionRejected { ref file_name } if file_name == "a.txt"));
    }

    #[tokio::test]
    async fn test_field_charset() {
        let dir = tempfile::tempdir().unwrap();
        let mut temp = TempFiles::new(dir.path().to_owned(), 1, Logger::disabled());

        let logger = Logger::disabled();
        let options = UploadOptions::new();
        let mut ctx = DecodeContext {
            limits: Limits::unbounded(),
            options: &options,
            temp_files: &mut temp,
            logger: &logger,
        };
        let mut raw = Vec::new();
        raw.extend_from_slice(
            b"--XB\r\nContent-Disposition: form-data; name=\"city\"\r\nContent-Type: text/plain; charset=iso-8859-1\r\n\r\n",
        );
        raw.extend_from_slice(b"Z\xfcrich\r\n--XB--\r\n");
        let stream: BodyStream<'static> = Box::pin(stream::iter(vec![Ok(Bytes::from(raw))]));

        let fields = decode(stream, "XB".to_owned(), &mut ctx).await.unwrap();
        assert_eq!(fields.text("city"), Some("Zürich"));
    }
}
