use crate::body::BodyStream;
use crate::constants;
use crate::form;
use crate::limits::Limits;
use crate::logger::Logger;
use crate::mime_table;
use crate::options::{RawPolicy, UploadOptions};
use crate::sink::{self, FilePart, SinkContext};
use crate::temp::TempFiles;
use crate::upload::UploadData;
use crate::urlencoded;
use crate::whole;
use crate::xml;
use http::HeaderValue;

/// How a body is going to be decoded, decided from its `Content-Type` before
/// any byte is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Route {
    Multipart { boundary: String },
    UrlEncoded,
    Json,
    Xml,
    Raw { mime_type: String },
}

/// Per-upload state shared by the decoders.
pub(crate) struct DecodeContext<'a> {
    pub(crate) limits: Limits,
    pub(crate) options: &'a UploadOptions,
    pub(crate) temp_files: &'a mut TempFiles,
    pub(crate) logger: &'a Logger,
}

impl DecodeContext<'_> {
    pub(crate) fn sink(&mut self) -> SinkContext<'_> {
        SinkContext {
            temp_files: &mut *self.temp_files,
            on_file: self.options.on_file.as_deref(),
            keep_extension: self.options.keep_extension,
            logger: self.logger,
        }
    }
}

/// Checks the declared media type against the allow-list and picks a route.
pub(crate) fn classify(content_type: Option<&HeaderValue>, options: &UploadOptions) -> crate::Result<Route> {
    let raw = match content_type {
        Some(value) => String::from_utf8_lossy(value.as_bytes()).into_owned(),
        None => return Err(crate::Error::upload("missing content type")),
    };
    let declared = raw.split(';').next().unwrap_or_default().trim();

    if let Some(ref allowed) = options.content_type {
        let accepted = allowed
            .iter()
            .filter_map(|entry| mime_table::resolve_entry(entry))
            .any(|essence| essence == declared);

        if !accepted {
            return Err(crate::Error::ContentTypeRejected {
                content_type: Some(declared.to_owned()),
            });
        }
    }

    let mime = match raw.parse::<mime::Mime>() {
        Ok(mime) => mime,
        Err(_) => return raw_route(declared, options),
    };
    let (type_, subtype) = (mime.type_(), mime.subtype());
    let structured = |name: mime::Name<'_>| subtype == name || mime.suffix() == Some(name);

    if type_ == mime::MULTIPART && subtype == mime::FORM_DATA {
        return match mime.get_param(mime::BOUNDARY) {
            Some(boundary) => Ok(Route::Multipart {
                boundary: boundary.as_str().to_owned(),
            }),
            None => Err(crate::Error::NoBoundary),
        };
    }

    if type_ == mime::APPLICATION && subtype == mime::WWW_FORM_URLENCODED {
        return Ok(Route::UrlEncoded);
    }

    if options.parse {
        if type_ == mime::APPLICATION && structured(mime::JSON) {
            return Ok(Route::Json);
        }
        if (type_ == mime::APPLICATION || type_ == mime::TEXT) && structured(mime::XML) {
            return Ok(Route::Xml);
        }
    }

    raw_route(declared, options)
}

fn raw_route(declared: &str, options: &UploadOptions) -> crate::Result<Route> {
    match options.raw {
        RawPolicy::Capture => Ok(Route::Raw {
            mime_type: declared.to_owned(),
        }),
        RawPolicy::Reject => Err(crate::Error::ContentTypeRejected {
            content_type: Some(declared.to_owned()),
        }),
    }
}

/// Decodes the body along `route`.
pub(crate) async fn run(
    route: Route,
    stream: BodyStream<'_>,
    ctx: &mut DecodeContext<'_>,
) -> crate::Result<UploadData> {
    ctx.logger.debug(format_args!("decoding body as {:?}", route));

    match route {
        Route::Multipart { boundary } => form::decode(stream, boundary, ctx).await.map(UploadData::Form),
        Route::UrlEncoded => urlencoded::decode(stream, ctx).await.map(UploadData::Form),
        Route::Json => {
            let body = whole::capture(stream, ctx.limits.total_size).await?;
            whole::parse_json(&body).map(UploadData::Json)
        }
        Route::Xml => {
            let body = whole::capture(stream, ctx.limits.total_size).await?;
            xml::parse(&body).map(UploadData::Xml)
        }
        Route::Raw { mime_type } => {
            let part = FilePart::new(
                constants::RAW_FIELD_NAME.to_owned(),
                constants::RAW_FILE_NAME.to_owned(),
                constants::DEFAULT_PART_ENCODING.to_owned(),
                Some(mime_type),
                stream,
                ctx.limits.max_file_size,
            );
            sink::resolve(part, ctx.sink()).await.map(UploadData::Raw)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_str(content_type: &'static str, options: &UploadOptions) -> crate::Result<Route> {
        classify(Some(&HeaderValue::from_static(content_type)), options)
    }

    #[test]
    fn test_routes() {
        let parse = UploadOptions::new().parse(true);

        assert_eq!(
            classify_str("multipart/form-data; boundary=XB", &parse).unwrap(),
            Route::Multipart {
                boundary: "XB".to_owned()
            }
        );
        assert_eq!(
            classify_str("application/x-www-form-urlencoded", &parse).unwrap(),
            Route::UrlEncoded
        );
        assert_eq!(classify_str("application/json; charset=utf-8", &parse).unwrap(), Route::Json);
        assert_eq!(classify_str("application/ld+json", &parse).unwrap(), Route::Json);
        assert_eq!(classify_str("text/xml", &parse).unwrap(), Route::Xml);
        assert_eq!(
            classify_str("image/png", &parse).unwrap(),
            Route::Raw {
                mime_type: "image/png".to_owned()
            }
        );
    }

    #[test]
    fn test_json_without_parse_is_raw() {
        assert_eq!(
            classify_str("application/json", &UploadOptions::new()).unwrap(),
            Route::Raw {
                mime_type: "application/json".to_owned()
            }
        );
    }

    #[test]
    fn test_missing_content_type_and_boundary() {
        let err = classify(None, &UploadOptions::new()).unwrap_err();
        assert_eq!(err.to_string(), "missing content type");

        let err = classify_str("multipart/form-data", &UploadOptions::new()).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::MalformedBody);
    }

    #[test]
    fn test_allow_list() {
        let options = UploadOptions::new().content_type(["png", "application/pdf"]);

        assert!(classify_str("image/png", &options).is_ok());
        assert!(classify_str("application/pdf", &options).is_ok());

        let err = classify_str("image/gif", &options).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::ContentTypeRejected);

        // the comparison is case-sensitive
        assert!(classify_str("Image/PNG", &options).is_err());
    }

    #[test]
    fn test_raw_reject_policy() {
        let options = UploadOptions::new().raw(RawPolicy::Reject);
        let err = classify_str("application/octet-stream", &options).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::ContentTypeRejected);

        assert!(classify_str("multipart/form-data; boundary=a", &options).is_ok());
    }
}
