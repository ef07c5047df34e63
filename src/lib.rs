//! An async request body ingestion pipeline for tokio.
//!
//! `intake` turns an untrusted, possibly compressed request body into form
//! fields, stored files, a parsed JSON or XML document, or a raw captured
//! file. Size and count limits are enforced while the body streams in, and
//! every temp file created for a failed request is deleted before the error
//! is returned.
//!
//! The body flows through pull-based stages: transport decoding (`gzip`,
//! `deflate`), the total size ceiling, then a decoder picked from the
//! `Content-Type`. A slow file sink throttles reads from the client.
//!
//! # Examples
//!
//! ```
//! use intake::{on_file_fn, upload, FileAction, LimitOverrides, ServerDefaults, UploadOptions, UploadRequest};
//! use bytes::Bytes;
//! use futures_util::stream::once;
//! use http::{header, HeaderMap, HeaderValue};
//! use std::convert::Infallible;
//!
//! # async fn run() {
//! let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nHoliday\r\n\
//!     --X-BOUNDARY\r\nContent-Disposition: form-data; name=\"photo\"; filename=\"beach.png\"\r\n\r\n<png>\r\n\
//!     --X-BOUNDARY--\r\n";
//! let mut headers = HeaderMap::new();
//! headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("multipart/form-data; boundary=X-BOUNDARY"));
//! let body = once(async move { Ok::<_, Infallible>(Bytes::from(data)) });
//!
//! let dir = std::env::temp_dir().join("intake-doc");
//! let defaults = ServerDefaults::new().temp_dir(&dir);
//! let options = UploadOptions::new()
//!     .limits(LimitOverrides::new().file_size("5MB").files(4u64))
//!     .keep_extension(true)
//!     .on_file(on_file_fn(|_| Ok(FileAction::UseTempFile)));
//!
//! let mut result = upload(UploadRequest::new(headers, body), &defaults, options).await.unwrap();
//!
//! let fields = result.fields().unwrap();
//! assert_eq!(fields.text("title"), Some("Holiday"));
//! assert_eq!(fields.file("photo").unwrap().size, 5);
//!
//! // the temp files are the caller's until cleared
//! result.clear().await;
//! # }
//! # tokio::runtime::Runtime::new().unwrap().block_on(run());
//! ```
//!
//! [`Multipart`] can also be used on its own to walk the parts of a
//! `multipart/form-data` stream.

pub use async_trait::async_trait;
pub use body::Progress;
pub use error::{Error, ErrorCode};
pub use field::Field;
pub use fields::{FieldEntry, FieldValue, Fields, FileDescriptor};
pub use limits::{LimitOverrides, Limits, Size};
pub use logger::Logger;
pub use multipart::Multipart;
pub use options::{RawPolicy, ServerDefaults, UploadConfig, UploadOptions};
pub use pipeline::{buffered, upload};
pub use request::UploadRequest;
pub use sink::{on_file_fn, FileAction, FileInfo, FilePart, OnFile, OnFileFn};
pub use size::parse_size;
pub use upload::{Upload, UploadData};
pub use whole::Buffered;

mod body;
mod buffer;
mod constants;
mod content_disposition;
mod decoder;
mod dispatch;
mod error;
mod field;
mod fields;
mod form;
mod helpers;
mod limits;
mod logger;
pub mod mime_table;
mod multipart;
mod options;
mod pipeline;
mod request;
mod sink;
mod size;
mod state;
mod temp;
mod upload;
mod urlencoded;
mod whole;
mod xml;

/// A Result type often returned from methods that can have `intake` errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Parses the `Content-Type` header to extract the boundary value.
pub fn parse_boundary<T: AsRef<str>>(content_type: T) -> crate::Result<String> {
    let m = content_type
        .as_ref()
        .parse::<mime::Mime>()
        .map_err(|_| Error::ContentTypeRejected {
            content_type: Some(content_type.as_ref().to_owned()),
        })?;

    if !(m.type_() == mime::MULTIPART && m.subtype() == mime::FORM_DATA) {
        return Err(Error::ContentTypeRejected {
            content_type: Some(m.essence_str().to_owned()),
        });
    }

    m.get_param(mime::BOUNDARY)
        .map(|name| name.as_str().to_owned())
        .ok_or(Error::NoBoundary)
}
