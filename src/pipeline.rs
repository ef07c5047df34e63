use crate::body::{BodyStream, LimitedStream, ProgressStream};
use crate::decoder;
use crate::dispatch::{self, DecodeContext};
use crate::limits::{LimitOverrides, Limits, Size};
use crate::options::{ServerDefaults, UploadOptions};
use crate::request::UploadRequest;
use crate::temp::TempFiles;
use crate::upload::Upload;
use crate::whole::{self, Buffered};
use http::header;
use std::future::Future;
use std::io;
use std::time::Duration;

/// Decodes a request body into form fields, files or a parsed document.
///
/// Limits are resolved from `options` over `defaults` and checked before any
/// byte is read where possible: the declared `Content-Length`, the
/// `Content-Encoding` and the `Content-Type` allow-list. On failure every temp
/// file created for the request is deleted before the error is returned.
///
/// # Examples
///
/// ```
/// use intake::{upload, ServerDefaults, UploadOptions, UploadRequest};
/// use bytes::Bytes;
/// use futures_util::stream::once;
/// use http::{header, HeaderMap, HeaderValue};
/// use std::convert::Infallible;
///
/// # async fn run() {
/// let mut headers = HeaderMap::new();
/// headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/x-www-form-urlencoded"));
/// let body = once(async { Ok::<_, Infallible>(Bytes::from("name=value")) });
///
/// let result = upload(UploadRequest::new(headers, body), &ServerDefaults::new(), UploadOptions::new())
///     .await
///     .unwrap();
/// assert_eq!(result.fields().unwrap().text("name"), Some("value"));
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(run());
/// ```
pub async fn upload(
    request: UploadRequest<'_>,
    defaults: &ServerDefaults,
    options: UploadOptions,
) -> crate::Result<Upload> {
    let logger = options.logger.clone().unwrap_or_else(|| defaults.logger.clone());
    let limits = Limits::resolve(&defaults.limits, &options.limits)?;

    let content_length = request.content_length();
    check_content_length(content_length, limits.total_size)?;

    let (headers, body, timestamp) = request.into_parts();
    let route = dispatch::classify(headers.get(header::CONTENT_TYPE), &options)?;

    let body: BodyStream<'_> = match options.progress.clone() {
        Some(progress) => Box::pin(ProgressStream::new(body, progress, content_length)),
        None => body,
    };
    let stream = limit(decoder::decode(body, headers.get(header::CONTENT_ENCODING))?, limits.total_size);

    let temp_dir = options.temp_dir.clone().unwrap_or_else(|| defaults.temp_dir.clone());
    let mut temp_files = TempFiles::new(temp_dir, timestamp, logger.clone());

    let result = {
        let mut ctx = DecodeContext {
            limits,
            options: &options,
            temp_files: &mut temp_files,
            logger: &logger,
        };
        with_timeout(options.timeout.or(defaults.timeout), dispatch::run(route, stream, &mut ctx)).await
    };

    match result {
        Ok(data) => {
            let paths = temp_files.into_paths();
            logger.debug(format_args!("upload done, {} temp files", paths.len()));
            Ok(Upload::new(data, paths, logger))
        }
        Err(err) => {
            logger.error(format_args!("upload aborted: {}", err));
            temp_files.release().await;
            Err(err)
        }
    }
}

/// Reads the whole body into memory whatever its content type.
///
/// `max_size` overrides the total size limit of `defaults`. The body is
/// returned as text when its content type has a `charset` or is textual.
pub async fn buffered(
    request: UploadRequest<'_>,
    defaults: &ServerDefaults,
    max_size: Option<Size>,
) -> crate::Result<Buffered> {
    let overrides = LimitOverrides {
        size: max_size,
        ..LimitOverrides::default()
    };
    let limits = Limits::resolve(&defaults.limits, &overrides)?;

    let content_length = request.content_length();
    check_content_length(content_length, limits.total_size)?;

    let (headers, body, _) = request.into_parts();
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|val| val.to_str().ok())
        .and_then(|val| val.parse::<mime::Mime>().ok());

    let stream = decoder::decode(body, headers.get(header::CONTENT_ENCODING))?;
    let body = with_timeout(defaults.timeout, whole::capture(stream, limits.total_size))
        .await
        .map_err(|err| {
            defaults.logger.error(format_args!("buffered read aborted: {}", err));
            err
        })?;

    Ok(whole::to_buffered(body, content_type.as_ref()))
}

fn check_content_length(content_length: Option<u64>, limit: Option<u64>) -> crate::Result<()> {
    match (content_length, limit) {
        (Some(len), Some(limit)) if len > limit => Err(crate::Error::BodyTooLarge { limit }),
        _ => Ok(()),
    }
}

fn limit(stream: BodyStream<'_>, limit: Option<u64>) -> BodyStream<'_> {
    match limit {
        Some(limit) => Box::pin(LimitedStream::new(stream, limit)),
        None => stream,
    }
}

async fn with_timeout<F, T>(timeout: Option<Duration>, fut: F) -> crate::Result<T>
where
    F: Future<Output = crate::Result<T>>,
{
    match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(crate::Error::connection(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("upload timed out after {:?}", timeout),
            ))),
        },
        None => fut.await,
    }
}
