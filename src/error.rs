use std::path::PathBuf;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A set of errors that can occur while ingesting a request body.
///
/// Every variant maps to a stable [`ErrorCode`] through [`Error::code`] so
/// callers can decide the HTTP status without matching on messages.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A limit or option could not be resolved.
    #[error("invalid upload configuration: {0}")]
    Config(String),

    /// The `Content-Encoding` of the request is not supported.
    #[error("unsupported content encoding: {0:?}")]
    UnsupportedEncoding(String),

    /// The declared media type is not in the caller's allow-list.
    #[error("content type rejected: {}", .content_type.as_deref().unwrap_or("<none>"))]
    ContentTypeRejected { content_type: Option<String> },

    /// The body is larger than the total size limit.
    #[error("body size exceeded the maximum limit: {limit} bytes")]
    BodyTooLarge { limit: u64 },

    /// A form field name is longer than the limit.
    #[error("field name exceeded the maximum size limit: {limit} bytes")]
    FieldNameTooLarge { limit: u64 },

    /// A form field value is longer than the limit.
    #[error("field '{field_name}' exceeded the maximum size limit: {limit} bytes")]
    FieldValueTooLarge { limit: u64, field_name: String },

    /// Too many non-file fields.
    #[error("too many fields: the limit is {limit}")]
    FieldsLimitExceeded { limit: u64 },

    /// Too many file parts.
    #[error("too many files: the limit is {limit}")]
    FilesLimitExceeded { limit: u64 },

    /// An uploaded file is larger than the limit.
    #[error("file '{file_name}' in field '{field_name}' exceeded the maximum size limit: {limit} bytes")]
    FileSizeExceeded {
        limit: u64,
        field_name: String,
        file_name: String,
    },

    /// Too many multipart parts.
    #[error("too many parts: the limit is {limit}")]
    PartsLimitExceeded { limit: u64 },

    /// A part carries more header lines than allowed.
    #[error("too many part header pairs: the limit is {limit}")]
    HeaderPairsExceeded { limit: u64 },

    /// A file was sent in a field that is not allowed to carry files.
    #[error("unexpected file in field '{field_name}'")]
    UnexpectedFile { field_name: String },

    /// A file name extension is not in the allow-list.
    #[error("file extension of '{file_name}' is not accepted")]
    FileExtensionRejected { file_name: String },

    /// A temp file could not be created.
    #[error("failed to create temp file {}: {source}", .path.display())]
    TempFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing to a file sink failed.
    #[error("failed to write file {}: {source}", sink_name(.path.as_deref()))]
    WriteFile {
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    /// Reading the body failed, the client went away or the upload timed out.
    #[error("connection error: {0}")]
    Connection(#[source] BoxError),

    /// Couldn't read the part headers completely.
    #[error("failed to read part complete headers")]
    IncompleteHeaders,

    /// Failed to parse the part headers.
    #[error("failed to read headers: {0}")]
    ReadHeaderFailed(#[source] httparse::Error),

    /// Failed to decode a part's raw header name.
    #[error("failed to decode part's raw header name: {name:?} {cause}")]
    DecodeHeaderName { name: String, cause: BoxError },

    /// Failed to decode a part's raw header value.
    #[error("failed to decode part's raw header value: {cause}")]
    DecodeHeaderValue { value: Vec<u8>, cause: BoxError },

    /// The part data ended before its closing boundary.
    #[error("part '{}' received with incomplete data", .field_name.as_deref().unwrap_or("<unknown>"))]
    IncompleteFieldData { field_name: Option<String> },

    /// The multipart stream ended before the terminal boundary.
    #[error("incomplete multipart stream")]
    IncompleteStream,

    /// No boundary found in `Content-Type` header.
    #[error("multipart boundary not found in Content-Type")]
    NoBoundary,

    /// A part handle was still alive when the next part was requested.
    #[error("failed to lock multipart state")]
    LockFailure,

    /// Hook contract violations and parser failures.
    #[error("{message}")]
    Upload {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

/// Stable error codes callers can dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCode {
    Config,
    UnsupportedEncoding,
    ContentTypeRejected,
    BodyTooLarge,
    FieldNameTooLarge,
    FieldValueTooLarge,
    FieldsLimitExceeded,
    FilesLimitExceeded,
    FileSizeExceeded,
    PartsLimitExceeded,
    HeaderPairsExceeded,
    TempFile,
    Connection,
    MalformedBody,
    Upload,
}

fn sink_name(path: Option<&std::path::Path>) -> String {
    path.map(|p| p.display().to_string()).unwrap_or_else(|| "<sink>".to_owned())
}

impl Error {
    pub(crate) fn upload(message: impl Into<String>) -> Self {
        Error::Upload {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn upload_caused_by<E>(message: impl Into<String>, cause: E) -> Self
    where
        E: Into<BoxError>,
    {
        Error::Upload {
            message: message.into(),
            source: Some(cause.into()),
        }
    }

    pub(crate) fn connection<E>(cause: E) -> Self
    where
        E: Into<BoxError>,
    {
        Error::Connection(cause.into())
    }

    /// Returns the stable code of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Config(_) => ErrorCode::Config,
            Error::UnsupportedEncoding(_) => ErrorCode::UnsupportedEncoding,
            Error::ContentTypeRejected { .. } => ErrorCode::ContentTypeRejected,
            Error::BodyTooLarge { .. } => ErrorCode::BodyTooLarge,
            Error::FieldNameTooLarge { .. } => ErrorCode::FieldNameTooLarge,
            Error::FieldValueTooLarge { .. } => ErrorCode::FieldValueTooLarge,
            Error::FieldsLimitExceeded { .. } => ErrorCode::FieldsLimitExceeded,
            Error::FilesLimitExceeded { .. } => ErrorCode::FilesLimitExceeded,
            Error::FileSizeExceeded { .. } => ErrorCode::FileSizeExceeded,
            Error::PartsLimitExceeded { .. } => ErrorCode::PartsLimitExceeded,
            Error::HeaderPairsExceeded { .. } => ErrorCode::HeaderPairsExceeded,
            Error::TempFile { .. } | Error::WriteFile { .. } => ErrorCode::TempFile,
            Error::Connection(_) => ErrorCode::Connection,
            Error::IncompleteHeaders
            | Error::ReadHeaderFailed(_)
            | Error::DecodeHeaderName { .. }
            | Error::DecodeHeaderValue { .. }
            | Error::IncompleteFieldData { .. }
            | Error::IncompleteStream
            | Error::NoBoundary => ErrorCode::MalformedBody,
            Error::UnexpectedFile { .. }
            | Error::FileExtensionRejected { .. }
            | Error::LockFailure
            | Error::Upload { .. } => ErrorCode::Upload,
        }
    }

    /// Returns `true` for errors caused by a configured limit.
    pub fn is_limit(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::BodyTooLarge
                | ErrorCode::FieldNameTooLarge
                | ErrorCode::FieldValueTooLarge
                | ErrorCode::FieldsLimitExceeded
                | ErrorCode::FilesLimitExceeded
                | ErrorCode::FileSizeExceeded
                | ErrorCode::PartsLimitExceeded
                | ErrorCode::HeaderPairsExceeded
        )
    }
}
